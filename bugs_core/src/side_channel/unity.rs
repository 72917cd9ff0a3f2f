// World of Bugs side channels: a log relay from Unity and a string channel
// used to toggle bugs and player behaviours inside the running game.
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::{uuid, Uuid};

use super::{IncomingMessage, MessageQueue, OutgoingMessage, SideChannel};
use crate::error::SideChannelError;

pub const LOG_CHANNEL_ID: Uuid = uuid!("621f0a70-4f87-11ea-a6bf-784f4387d1f7");
pub const CONFIG_CHANNEL_ID: Uuid = uuid!("621f0a70-4f87-11ea-a6bf-784f4387d1f8");

/// Where relayed Unity log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSink {
    #[default]
    Stdout,
    Tracing,
}

impl FromStr for LogSink {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogSink::Stdout),
            "tracing" => Ok(LogSink::Tracing),
            other => Err(format!("unknown log sink `{}` (expected stdout or tracing)", other)),
        }
    }
}

/// Relays log text sent by Unity's game controller.
#[derive(Debug, Default)]
pub struct UnityLogChannel {
    queue: MessageQueue,
    sink: LogSink,
    received: AtomicUsize,
}

impl UnityLogChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: LogSink) -> Self {
        Self {
            sink,
            ..Self::default()
        }
    }

    pub fn sink(&self) -> LogSink {
        self.sink
    }

    pub fn messages_received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }
}

impl SideChannel for UnityLogChannel {
    fn channel_id(&self) -> Uuid {
        LOG_CHANNEL_ID
    }

    fn on_message_received(&self, mut msg: IncomingMessage) -> Result<(), SideChannelError> {
        let line = msg.read_string();
        self.received.fetch_add(1, Ordering::Relaxed);
        match self.sink {
            LogSink::Stdout => println!("{}", line),
            LogSink::Tracing => info!(target: "unity", "{}", line),
        }
        Ok(())
    }

    fn message_queue(&self) -> &MessageQueue {
        &self.queue
    }
}

/// Pushes plain strings to the Unity game controller.
///
/// The receiving side parses messages such as `Bugs.<name>.enabled:True`;
/// nothing here validates or acknowledges them.
#[derive(Debug, Default)]
pub struct UnityConfigChannel {
    queue: MessageQueue,
}

impl UnityConfigChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `data` for the next exchange with Unity.
    pub fn write(&self, data: &str) {
        let mut msg = OutgoingMessage::new();
        msg.write_string(data);
        self.queue_message_to_send(msg);
    }

    /// Strings queued but not yet sent.
    pub fn pending(&self) -> Vec<String> {
        self.queue
            .pending()
            .into_iter()
            .map(|bytes| IncomingMessage::new(bytes).read_string())
            .collect()
    }
}

impl SideChannel for UnityConfigChannel {
    fn channel_id(&self) -> Uuid {
        CONFIG_CHANNEL_ID
    }

    fn on_message_received(&self, mut msg: IncomingMessage) -> Result<(), SideChannelError> {
        debug!(message = %msg.read_string(), "config channel message from Unity");
        Ok(())
    }

    fn message_queue(&self) -> &MessageQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_write_is_length_prefixed_string() {
        let channel = UnityConfigChannel::new();
        channel.write("Bugs.ZFighting.enabled:True");

        let queued = channel.message_queue().drain();
        assert_eq!(queued.len(), 1);
        let expected_len = "Bugs.ZFighting.enabled:True".len() as i32;
        assert_eq!(&queued[0][..4], &expected_len.to_le_bytes());
        assert_eq!(&queued[0][4..], b"Bugs.ZFighting.enabled:True");
    }

    #[test]
    fn test_config_pending_keeps_order() {
        let channel = UnityConfigChannel::new();
        channel.write("a");
        channel.write("b:True");
        assert_eq!(channel.pending(), vec!["a".to_string(), "b:True".to_string()]);
        assert_eq!(channel.message_queue().len(), 2);
    }

    #[test]
    fn test_log_channel_counts_messages() {
        let channel = UnityLogChannel::with_sink(LogSink::Tracing);
        let mut msg = OutgoingMessage::new();
        msg.write_string("[Unity] episode reset");
        channel.on_message_received(IncomingMessage::new(msg.into_bytes())).unwrap();
        assert_eq!(channel.messages_received(), 1);
    }

    #[test]
    fn test_log_sink_from_str() {
        assert_eq!("tracing".parse::<LogSink>().unwrap(), LogSink::Tracing);
        assert_eq!("Stdout".parse::<LogSink>().unwrap(), LogSink::Stdout);
        assert!("syslog".parse::<LogSink>().is_err());
    }

    #[test]
    fn test_channel_ids_are_distinct() {
        assert_ne!(UnityLogChannel::new().channel_id(), UnityConfigChannel::new().channel_id());
    }
}
