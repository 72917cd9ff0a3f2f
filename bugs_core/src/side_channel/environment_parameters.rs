// Environment parameters side channel: named float values read by the
// Unity scene through Academy.Instance.EnvironmentParameters.
use std::collections::HashMap;

use uuid::{uuid, Uuid};

use super::{IncomingMessage, MessageQueue, OutgoingMessage, SideChannel};
use crate::error::SideChannelError;

/// UUID for EnvironmentParametersChannel
pub const ENV_PARAMS_CHANNEL_ID: Uuid = uuid!("534c891e-810f-11ea-a9d0-822485860400");

/// Environment parameter data types
#[repr(i32)]
enum EnvironmentDataType {
    Float = 0,
}

#[derive(Debug, Default)]
pub struct EnvironmentParametersChannel {
    queue: MessageQueue,
}

impl EnvironmentParametersChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format: key (length-prefixed string), data type (i32), value (f32)
    pub fn set_float_parameter(&self, key: &str, value: f32) {
        let mut msg = OutgoingMessage::new();
        msg.write_string(key);
        msg.write_int32(EnvironmentDataType::Float as i32);
        msg.write_float32(value);
        self.queue_message_to_send(msg);
    }

    /// Converts YAML scalars to floats the same way the config loader does:
    /// booleans become 0/1, numeric strings are parsed, anything else is 0.
    pub fn set_yaml_parameters(&self, params: &HashMap<String, serde_yaml::Value>) {
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        for key in keys {
            let float_value = match &params[key] {
                serde_yaml::Value::Number(n) => n.as_f64().map(|f| f as f32).unwrap_or(0.0),
                serde_yaml::Value::Bool(b) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                serde_yaml::Value::String(s) => s.parse::<f32>().unwrap_or(0.0),
                _ => 0.0,
            };
            self.set_float_parameter(key, float_value);
        }
    }
}

impl SideChannel for EnvironmentParametersChannel {
    fn channel_id(&self) -> Uuid {
        ENV_PARAMS_CHANNEL_ID
    }

    fn on_message_received(&self, _msg: IncomingMessage) -> Result<(), SideChannelError> {
        Err(SideChannelError::UnexpectedMessage("EnvironmentParametersChannel"))
    }

    fn message_queue(&self) -> &MessageQueue {
        &self.queue
    }
}
