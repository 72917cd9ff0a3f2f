// Engine configuration side channel: screen resolution, quality level,
// time scale and frame rates of the Unity player.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::{uuid, Uuid};

use super::{IncomingMessage, MessageQueue, OutgoingMessage, SideChannel};
use crate::error::SideChannelError;

/// UUID for EngineConfigurationChannel
pub const ENGINE_CONFIG_CHANNEL_ID: Uuid = uuid!("e951342c-4f7e-11ea-b238-784f4387d1f7");

/// Tag written before each configuration message
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
enum ConfigurationType {
    ScreenResolution = 0,
    QualityLevel = 1,
    TimeScale = 2,
    TargetFrameRate = 3,
    CaptureFrameRate = 4,
}

/// Engine configuration settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub width: i32,
    pub height: i32,
    pub quality_level: i32,
    pub time_scale: f32,
    pub target_frame_rate: i32,
    pub capture_frame_rate: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 84,
            height: 84,
            quality_level: 3,
            time_scale: 1.0,
            target_frame_rate: -1,
            capture_frame_rate: 60,
        }
    }
}

/// A partial update; only fields that are set are sent to Unity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineConfigurationParameters {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub quality_level: Option<i32>,
    pub time_scale: Option<f32>,
    pub target_frame_rate: Option<i32>,
    pub capture_frame_rate: Option<i32>,
}

impl EngineConfigurationParameters {
    fn merge(&mut self, update: &EngineConfigurationParameters) {
        if update.width.is_some() {
            self.width = update.width;
            self.height = update.height;
        }
        self.quality_level = update.quality_level.or(self.quality_level);
        self.time_scale = update.time_scale.or(self.time_scale);
        self.target_frame_rate = update.target_frame_rate.or(self.target_frame_rate);
        self.capture_frame_rate = update.capture_frame_rate.or(self.capture_frame_rate);
    }
}

impl From<&EngineConfig> for EngineConfigurationParameters {
    fn from(config: &EngineConfig) -> Self {
        Self {
            width: Some(config.width),
            height: Some(config.height),
            quality_level: Some(config.quality_level),
            time_scale: Some(config.time_scale),
            target_frame_rate: Some(config.target_frame_rate),
            capture_frame_rate: Some(config.capture_frame_rate),
        }
    }
}

/// Write-only channel that configures the Unity engine.
#[derive(Debug, Default)]
pub struct EngineConfigurationChannel {
    queue: MessageQueue,
    parameters: Mutex<EngineConfigurationParameters>,
}

impl EngineConfigurationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one message per parameter that is set.
    ///
    /// Width and height travel together as the screen resolution, so
    /// setting only one of them is rejected.
    pub fn set_configuration_parameters(
        &self,
        params: EngineConfigurationParameters,
    ) -> Result<(), SideChannelError> {
        match (params.width, params.height) {
            (Some(width), Some(height)) => {
                let mut msg = Self::tagged(ConfigurationType::ScreenResolution);
                msg.write_int32(width);
                msg.write_int32(height);
                self.queue_message_to_send(msg);
            }
            (None, None) => {}
            _ => {
                return Err(SideChannelError::InvalidConfiguration(
                    "the screen width and height must be set together",
                ))
            }
        }

        if let Some(quality_level) = params.quality_level {
            let mut msg = Self::tagged(ConfigurationType::QualityLevel);
            msg.write_int32(quality_level);
            self.queue_message_to_send(msg);
        }
        if let Some(time_scale) = params.time_scale {
            let mut msg = Self::tagged(ConfigurationType::TimeScale);
            msg.write_float32(time_scale);
            self.queue_message_to_send(msg);
        }
        if let Some(target_frame_rate) = params.target_frame_rate {
            let mut msg = Self::tagged(ConfigurationType::TargetFrameRate);
            msg.write_int32(target_frame_rate);
            self.queue_message_to_send(msg);
        }
        if let Some(capture_frame_rate) = params.capture_frame_rate {
            let mut msg = Self::tagged(ConfigurationType::CaptureFrameRate);
            msg.write_int32(capture_frame_rate);
            self.queue_message_to_send(msg);
        }

        self.parameters.lock().merge(&params);
        Ok(())
    }

    /// Sends every field of `config`.
    pub fn set_configuration(&self, config: &EngineConfig) -> Result<(), SideChannelError> {
        self.set_configuration_parameters(config.into())
    }

    /// Everything configured on this channel so far.
    pub fn parameters(&self) -> EngineConfigurationParameters {
        *self.parameters.lock()
    }

    fn tagged(kind: ConfigurationType) -> OutgoingMessage {
        let mut msg = OutgoingMessage::new();
        msg.write_int32(kind as i32);
        msg
    }
}

impl SideChannel for EngineConfigurationChannel {
    fn channel_id(&self) -> Uuid {
        ENGINE_CONFIG_CHANNEL_ID
    }

    fn on_message_received(&self, _msg: IncomingMessage) -> Result<(), SideChannelError> {
        Err(SideChannelError::UnexpectedMessage("EngineConfigurationChannel"))
    }

    fn message_queue(&self) -> &MessageQueue {
        &self.queue
    }
}
