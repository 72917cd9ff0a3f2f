// The engine session seam: what an environment adapter needs from a running simulation
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::spec::{ActionTuple, BehaviorSpec, DecisionSteps, TerminalSteps};
use crate::error::Result;
use crate::side_channel::SharedSideChannel;

/// Everything needed to start (or attach to) a simulation process.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Player build to launch; `None` waits for the Unity Editor instead
    pub file_name: Option<PathBuf>,
    pub worker_id: u16,
    pub base_port: Option<u16>,
    pub seed: i32,
    pub no_graphics: bool,
    pub timeout_wait: Duration,
    pub additional_args: Vec<String>,
    /// Registered in order; queued messages are sent in this order too
    pub side_channels: Vec<SharedSideChannel>,
    pub log_folder: Option<PathBuf>,
    pub num_areas: i32,
}

/// A connected simulation, stepped in lockstep by its owner.
#[tonic::async_trait]
pub trait EngineSession: Send {
    /// Starts a new episode, sending any queued side channel messages.
    async fn reset(&mut self) -> Result<()>;

    /// Advances the simulation, sending queued actions and side channel messages.
    async fn step(&mut self) -> Result<()>;

    fn behavior_specs(&self) -> &BTreeMap<String, BehaviorSpec>;

    fn get_steps(&self, behavior_name: &str) -> Result<(DecisionSteps, TerminalSteps)>;

    fn set_actions(&mut self, behavior_name: &str, actions: ActionTuple) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Starts sessions from options.
#[tonic::async_trait]
pub trait EngineLauncher: Send + Sync {
    type Session: EngineSession;

    async fn launch(&self, options: SessionOptions) -> Result<Self::Session>;
}
