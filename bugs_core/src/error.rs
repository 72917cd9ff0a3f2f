// Error types for the environment, its communicator and side channels
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub type Result<T, E = UnityEnvironmentError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum UnityEnvironmentError {
    #[error("couldn't launch the {0} environment: no matching build was found")]
    ExecutableNotFound(String),

    #[error("the Editor can only be reached with worker id 0 (got {0})")]
    EditorWorkerId(u16),

    #[error("couldn't launch the Unity process: {0}")]
    Launch(#[source] std::io::Error),

    #[error("port {port} is in use; another environment may be running on worker id {worker_id}")]
    WorkerInUse { port: u16, worker_id: u16 },

    #[error("base port {base_port} plus worker id {worker_id} is not a valid port")]
    InvalidPort { base_port: u16, worker_id: u16 },

    #[error("the Unity environment took too long to respond (waited {0:?})")]
    Timeout(Duration),

    #[error("environment shut down with return code {0}")]
    ProcessExited(ExitStatus),

    #[error("communicator has exited")]
    CommunicatorStopped,

    #[error("communication API versions are incompatible: Unity {unity}, local {local}")]
    IncompatibleVersion { unity: String, local: String },

    #[error("no Unity environment is loaded")]
    NotLoaded,

    #[error("the behavior {0} is not present in the environment")]
    UnknownBehavior(String),

    #[error("actions for behavior {behavior} are malformed: {reason}")]
    InvalidAction { behavior: String, reason: String },

    #[error("failed to read environment config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse environment config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error(transparent)]
    SideChannel(#[from] SideChannelError),
}

#[derive(Debug, Error)]
pub enum SideChannelError {
    #[error("there cannot be two side channels with the same channel id {0}")]
    DuplicateChannel(Uuid),

    #[error("there was a problem reading a side channel frame at offset {offset}")]
    MalformedFrame { offset: usize },

    #[error("side channel {channel} message too short ({actual} of {expected} bytes)")]
    ShortMessage {
        channel: Uuid,
        expected: usize,
        actual: usize,
    },

    #[error("the {0} received a message from Unity, this should not have happened")]
    UnexpectedMessage(&'static str),

    #[error("invalid engine configuration: {0}")]
    InvalidConfiguration(&'static str),
}
