// World of Bugs environment adapter for Unity ML-Agents builds

pub mod env;
pub mod environment;
pub mod error;
pub mod grpc_server;
pub mod settings;
pub mod side_channel;

pub use env::EngineSession;
pub use environment::BugsEnvironment;
pub use error::{Result, SideChannelError, UnityEnvironmentError};
pub use settings::EnvironmentConfig;

// Include generated gRPC code from build.rs
pub mod communicator_objects {
    tonic::include_proto!("communicator_objects");
}

pub fn get_version_string() -> String {
    format!(
        "worldofbugs: {}, communicator API: {}",
        env!("CARGO_PKG_VERSION"),
        env::API_VERSION
    )
}
