// Side channels: out-of-band messages multiplexed alongside the RL exchange.
//
// Frame layout on the wire, repeated for every queued message:
// - 16 bytes: channel UUID (little-endian field order, as .NET Guid writes it)
// - 4 bytes: message length (i32, little-endian)
// - N bytes: message payload

mod engine_configuration;
mod environment_parameters;
mod unity;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SideChannelError;

pub use engine_configuration::{
    EngineConfig, EngineConfigurationChannel, EngineConfigurationParameters,
    ENGINE_CONFIG_CHANNEL_ID,
};
pub use environment_parameters::{EnvironmentParametersChannel, ENV_PARAMS_CHANNEL_ID};
pub use unity::{LogSink, UnityConfigChannel, UnityLogChannel, CONFIG_CHANNEL_ID, LOG_CHANNEL_ID};

const UUID_LEN: usize = 16;
const LENGTH_PREFIX_LEN: usize = 4;

/// A channel shared between its owner and the session that drains it.
pub type SharedSideChannel = Arc<dyn SideChannel>;

/// Message builder for data sent to Unity.
#[derive(Debug, Default, Clone)]
pub struct OutgoingMessage {
    buffer: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    pub fn write_int32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_float32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_float32_list(&mut self, values: &[f32]) {
        self.write_int32(values.len() as i32);
        for value in values {
            self.write_float32(*value);
        }
    }

    /// Length-prefixed string. The bytes are sent as-is: no escaping.
    pub fn write_string(&mut self, s: &str) {
        let encoded = s.as_bytes();
        self.write_int32(encoded.len() as i32);
        self.buffer.extend_from_slice(encoded);
    }

    pub fn set_raw_bytes(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reader over a message received from Unity.
///
/// Every reader returns the type's default once the buffer is exhausted,
/// so a channel can read optional trailing fields without checking lengths.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    buffer: Vec<u8>,
    offset: usize,
}

impl IncomingMessage {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&[u8]> {
        let end = self.offset.checked_add(len)?;
        let bytes = self.buffer.get(self.offset..end)?;
        self.offset = end;
        Some(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|b| b.try_into().ok())
    }

    pub fn read_bool(&mut self) -> bool {
        self.take_array::<1>().map(|b| b[0] != 0).unwrap_or_default()
    }

    pub fn read_int32(&mut self) -> i32 {
        self.take_array().map(i32::from_le_bytes).unwrap_or_default()
    }

    pub fn read_float32(&mut self) -> f32 {
        self.take_array().map(f32::from_le_bytes).unwrap_or_default()
    }

    pub fn read_float32_list(&mut self) -> Vec<f32> {
        if self.is_exhausted() {
            return Vec::new();
        }
        let len = self.read_int32().max(0) as usize;
        (0..len).map(|_| self.read_float32()).collect()
    }

    pub fn read_string(&mut self) -> String {
        if self.is_exhausted() {
            return String::new();
        }
        let len = self.read_int32().max(0) as usize;
        let remaining = self.buffer.len().saturating_sub(self.offset);
        let bytes = self.take(len.min(remaining)).unwrap_or_default();
        String::from_utf8_lossy(bytes).into_owned()
    }

    pub fn get_raw_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.buffer.len()
    }
}

/// Outgoing messages waiting for the next exchange with Unity.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<Vec<Vec<u8>>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, msg: OutgoingMessage) {
        self.messages.lock().push(msg.into_bytes());
    }

    /// Removes and returns everything queued so far.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.messages.lock())
    }

    /// Copies of the queued payloads, leaving the queue untouched.
    pub fn pending(&self) -> Vec<Vec<u8>> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

/// A channel identified by UUID that can queue messages for Unity and
/// receive messages from it.
pub trait SideChannel: fmt::Debug + Send + Sync {
    fn channel_id(&self) -> Uuid;

    fn on_message_received(&self, msg: IncomingMessage) -> Result<(), SideChannelError>;

    fn message_queue(&self) -> &MessageQueue;

    fn queue_message_to_send(&self, msg: OutgoingMessage) {
        self.message_queue().push(msg);
    }
}

/// Routes side channel traffic by channel id.
#[derive(Debug, Clone, Default)]
pub struct SideChannelManager {
    side_channels: Vec<SharedSideChannel>,
}

impl SideChannelManager {
    pub fn new(side_channels: Vec<SharedSideChannel>) -> Result<Self, SideChannelError> {
        for (i, channel) in side_channels.iter().enumerate() {
            let id = channel.channel_id();
            if side_channels[..i].iter().any(|c| c.channel_id() == id) {
                return Err(SideChannelError::DuplicateChannel(id));
            }
        }
        Ok(Self { side_channels })
    }

    pub fn channels(&self) -> &[SharedSideChannel] {
        &self.side_channels
    }

    pub fn get(&self, channel_id: Uuid) -> Option<&SharedSideChannel> {
        self.side_channels.iter().find(|c| c.channel_id() == channel_id)
    }

    /// Frames and clears every queued message, in channel registration order.
    pub fn generate_side_channel_messages(&self) -> Vec<u8> {
        let mut result = Vec::new();
        for channel in &self.side_channels {
            let id = channel.channel_id().to_bytes_le();
            for message in channel.message_queue().drain() {
                result.extend_from_slice(&id);
                result.extend_from_slice(&(message.len() as i32).to_le_bytes());
                result.extend_from_slice(&message);
            }
        }
        result
    }

    /// Dispatches each frame of `data` to the channel it is addressed to.
    pub fn process_side_channel_message(&self, data: &[u8]) -> Result<(), SideChannelError> {
        for (channel_id, payload) in parse_side_channel_frames(data)? {
            match self.get(channel_id) {
                Some(channel) => {
                    debug!(%channel_id, len = payload.len(), "side channel message received");
                    channel.on_message_received(IncomingMessage::new(payload.to_vec()))?;
                }
                None => warn!(%channel_id, "unknown side channel data received"),
            }
        }
        Ok(())
    }
}

/// Splits raw side channel bytes into `(channel id, payload)` frames.
pub fn parse_side_channel_frames(data: &[u8]) -> Result<Vec<(Uuid, &[u8])>, SideChannelError> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let header_end = offset + UUID_LEN + LENGTH_PREFIX_LEN;
        let header = data
            .get(offset..header_end)
            .ok_or(SideChannelError::MalformedFrame { offset })?;
        let (id_bytes, len_bytes) = header.split_at(UUID_LEN);
        let id: [u8; UUID_LEN] = id_bytes
            .try_into()
            .map_err(|_| SideChannelError::MalformedFrame { offset })?;
        let len: [u8; LENGTH_PREFIX_LEN] = len_bytes
            .try_into()
            .map_err(|_| SideChannelError::MalformedFrame { offset })?;
        let channel_id = Uuid::from_bytes_le(id);
        let expected = usize::try_from(i32::from_le_bytes(len))
            .map_err(|_| SideChannelError::MalformedFrame { offset })?;

        let payload_end = header_end.saturating_add(expected).min(data.len());
        let payload = &data[header_end..payload_end];
        if payload.len() != expected {
            return Err(SideChannelError::ShortMessage {
                channel: channel_id,
                expected,
                actual: payload.len(),
            });
        }
        frames.push((channel_id, payload));
        offset = payload_end;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingChannel {
        id: Uuid,
        received: AtomicUsize,
        queue: MessageQueue,
    }

    impl CountingChannel {
        fn new(id: Uuid) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: AtomicUsize::new(0),
                queue: MessageQueue::new(),
            })
        }
    }

    impl SideChannel for CountingChannel {
        fn channel_id(&self) -> Uuid {
            self.id
        }

        fn on_message_received(&self, mut msg: IncomingMessage) -> Result<(), SideChannelError> {
            assert_eq!(msg.read_string(), "ping");
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn message_queue(&self) -> &MessageQueue {
            &self.queue
        }
    }

    fn string_message(s: &str) -> OutgoingMessage {
        let mut msg = OutgoingMessage::new();
        msg.write_string(s);
        msg
    }

    #[test]
    fn test_outgoing_message_layout() {
        let mut msg = OutgoingMessage::new();
        msg.write_bool(true);
        msg.write_int32(-2);
        msg.write_float32(1.5);
        msg.write_string("ab");
        let bytes = msg.into_bytes();

        let mut expected = vec![1u8];
        expected.extend_from_slice(&(-2i32).to_le_bytes());
        expected.extend_from_slice(&1.5f32.to_le_bytes());
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(b"ab");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_incoming_message_reads_back() {
        let mut msg = OutgoingMessage::new();
        msg.write_bool(true);
        msg.write_int32(7);
        msg.write_float32_list(&[0.25, -1.0]);
        msg.write_string("Bugs.BlackScreen.enabled:True");

        let mut incoming = IncomingMessage::new(msg.into_bytes());
        assert!(incoming.read_bool());
        assert_eq!(incoming.read_int32(), 7);
        assert_eq!(incoming.read_float32_list(), vec![0.25, -1.0]);
        assert_eq!(incoming.read_string(), "Bugs.BlackScreen.enabled:True");
        assert!(incoming.is_exhausted());

        // Defaults once exhausted
        assert_eq!(incoming.read_int32(), 0);
        assert_eq!(incoming.read_string(), "");
        assert!(!incoming.read_bool());
    }

    #[test]
    fn test_generate_frames_and_clear_queue() {
        let a = CountingChannel::new(Uuid::from_u128(1));
        let b = CountingChannel::new(Uuid::from_u128(2));
        a.queue_message_to_send(string_message("x"));
        b.queue_message_to_send(string_message("yz"));
        a.queue_message_to_send(string_message("w"));

        let manager = SideChannelManager::new(vec![a.clone(), b.clone()]).unwrap();
        let bytes = manager.generate_side_channel_messages();

        let frames = parse_side_channel_frames(&bytes).unwrap();
        let ids: Vec<Uuid> = frames.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(1), Uuid::from_u128(2)]);
        assert_eq!(&bytes[0..16], &Uuid::from_u128(1).to_bytes_le());
        assert_eq!(frames[2].1, string_message("yz").as_bytes());

        assert!(a.message_queue().is_empty());
        assert!(manager.generate_side_channel_messages().is_empty());
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let a = CountingChannel::new(Uuid::from_u128(9));
        let b = CountingChannel::new(Uuid::from_u128(9));
        let err = SideChannelManager::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, SideChannelError::DuplicateChannel(id) if id == Uuid::from_u128(9)));
    }

    #[test]
    fn test_process_dispatches_and_skips_unknown() {
        let known = CountingChannel::new(Uuid::from_u128(3));
        let manager = SideChannelManager::new(vec![known.clone()]).unwrap();

        let sender = CountingChannel::new(Uuid::from_u128(3));
        let stranger = CountingChannel::new(Uuid::from_u128(4));
        sender.queue_message_to_send(string_message("ping"));
        stranger.queue_message_to_send(string_message("ignored"));
        sender.queue_message_to_send(string_message("ping"));
        let data = SideChannelManager::new(vec![sender, stranger])
            .unwrap()
            .generate_side_channel_messages();

        manager.process_side_channel_message(&data).unwrap();
        assert_eq!(known.received.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_short_message_is_an_error() {
        let mut data = Uuid::from_u128(5).to_bytes_le().to_vec();
        data.extend_from_slice(&10i32.to_le_bytes());
        data.extend_from_slice(b"abc");
        let err = parse_side_channel_frames(&data).unwrap_err();
        assert!(matches!(
            err,
            SideChannelError::ShortMessage {
                expected: 10,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_header_is_an_error() {
        let data = vec![0u8; 10];
        let err = parse_side_channel_frames(&data).unwrap_err();
        assert!(matches!(err, SideChannelError::MalformedFrame { offset: 0 }));
    }

    #[test]
    fn test_empty_data_has_no_frames() {
        assert!(parse_side_channel_frames(&[]).unwrap().is_empty());
    }
}
