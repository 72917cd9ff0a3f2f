// Test doubles for driving a BugsEnvironment without Unity
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use bugs_core::env::{
    ActionSpec, ActionTuple, BehaviorSpec, DecisionSteps, EngineLauncher, EngineSession,
    SessionOptions, TerminalSteps,
};
use bugs_core::side_channel::{parse_side_channel_frames, IncomingMessage, SideChannelManager};
use bugs_core::{Result, UnityEnvironmentError};
use parking_lot::Mutex;
use uuid::Uuid;

pub const PLAYER_BEHAVIOR: &str = "Player?team=0";

/// Everything a session was asked to do, shared with the test.
#[derive(Debug, Default)]
pub struct Recording {
    pub options: Option<SessionOptions>,
    /// Side channel bytes sent with each reset, in order
    pub resets: Vec<Vec<u8>>,
    pub steps: usize,
    pub closed: bool,
}

impl Recording {
    /// Strings carried by `channel` on the `index`-th reset.
    pub fn strings_sent(&self, index: usize, channel: Uuid) -> Vec<String> {
        parse_side_channel_frames(&self.resets[index])
            .unwrap()
            .into_iter()
            .filter(|(id, _)| *id == channel)
            .map(|(_, payload)| IncomingMessage::new(payload.to_vec()).read_string())
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordingLauncher {
    pub recording: Arc<Mutex<Recording>>,
    pub fail_with_timeout: bool,
    /// Sessions record each reset, then report the communicator as stopped
    pub fail_resets: bool,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_with_timeout: true,
            ..Self::default()
        }
    }

    pub fn failing_resets() -> Self {
        Self {
            fail_resets: true,
            ..Self::default()
        }
    }
}

#[tonic::async_trait]
impl EngineLauncher for RecordingLauncher {
    type Session = RecordingSession;

    async fn launch(&self, options: SessionOptions) -> Result<RecordingSession> {
        if self.fail_with_timeout {
            return Err(UnityEnvironmentError::Timeout(options.timeout_wait));
        }
        let manager = SideChannelManager::new(options.side_channels.clone())?;
        self.recording.lock().options = Some(options);

        let mut specs = BTreeMap::new();
        specs.insert(
            PLAYER_BEHAVIOR.to_string(),
            BehaviorSpec {
                observation_specs: Vec::new(),
                action_spec: ActionSpec::continuous(2),
            },
        );
        Ok(RecordingSession {
            manager,
            specs,
            recording: self.recording.clone(),
            fail_resets: self.fail_resets,
        })
    }
}

pub struct RecordingSession {
    manager: SideChannelManager,
    specs: BTreeMap<String, BehaviorSpec>,
    recording: Arc<Mutex<Recording>>,
    fail_resets: bool,
}

#[tonic::async_trait]
impl EngineSession for RecordingSession {
    async fn reset(&mut self) -> Result<()> {
        let bytes = self.manager.generate_side_channel_messages();
        self.recording.lock().resets.push(bytes);
        if self.fail_resets {
            return Err(UnityEnvironmentError::CommunicatorStopped);
        }
        Ok(())
    }

    async fn step(&mut self) -> Result<()> {
        self.manager.generate_side_channel_messages();
        self.recording.lock().steps += 1;
        Ok(())
    }

    fn behavior_specs(&self) -> &BTreeMap<String, BehaviorSpec> {
        &self.specs
    }

    fn get_steps(&self, behavior_name: &str) -> Result<(DecisionSteps, TerminalSteps)> {
        if self.specs.contains_key(behavior_name) {
            Ok(Default::default())
        } else {
            Err(UnityEnvironmentError::UnknownBehavior(behavior_name.to_string()))
        }
    }

    fn set_actions(&mut self, behavior_name: &str, actions: ActionTuple) -> Result<()> {
        let spec = self
            .specs
            .get(behavior_name)
            .ok_or_else(|| UnityEnvironmentError::UnknownBehavior(behavior_name.to_string()))?;
        spec.action_spec.validate(&actions, 0, behavior_name)
    }

    async fn close(&mut self) -> Result<()> {
        self.recording.lock().closed = true;
        Ok(())
    }
}
