// Engine sessions: the seam the World of Bugs environment drives, and its gRPC implementation
pub mod executable;
pub mod session;
pub mod spec;
pub mod unity_env;

pub use session::{EngineLauncher, EngineSession, SessionOptions};
pub use spec::{
    ActionSpec, ActionTuple, AgentStep, BehaviorSpec, DecisionSteps, Observation, ObservationSpec,
    TerminalSteps,
};
pub use unity_env::{GrpcLauncher, UnityEnvironment, API_VERSION};
