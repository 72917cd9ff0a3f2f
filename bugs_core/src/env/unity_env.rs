// Unity environment session over the ML-Agents gRPC protocol
use std::collections::{BTreeMap, HashMap};
use std::process::{Child, ExitStatus};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::executable::{executable_args, launch_executable};
use super::session::{EngineLauncher, EngineSession, SessionOptions};
use super::spec::{steps_from_proto, ActionTuple, BehaviorSpec, DecisionSteps, TerminalSteps};
use crate::communicator_objects::{
    unity_rl_input_proto::ListAgentActionProto, AgentActionProto, CommandProto, UnityInputProto,
    UnityOutputProto, UnityRlCapabilitiesProto, UnityRlInitializationInputProto, UnityRlInputProto,
    UnityRlOutputProto,
};
use crate::error::{Result, UnityEnvironmentError};
use crate::grpc_server::GrpcServer;
use crate::side_channel::SideChannelManager;

/// Communication protocol version spoken with the Unity package
pub const API_VERSION: &str = "1.5.0";
pub const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BASE_ENVIRONMENT_PORT: u16 = 5005;
pub const DEFAULT_EDITOR_PORT: u16 = 5004;

pub fn capabilities() -> UnityRlCapabilitiesProto {
    UnityRlCapabilitiesProto {
        base_rl_capabilities: true,
        concatenated_png_observations: true,
        compressed_channel_mapping: true,
        hybrid_actions: true,
        training_analytics: false,
        variable_length_observation: true,
        multi_agent_groups: true,
    }
}

/// Unity and this crate can talk when their major versions match; for
/// 0.x versions the minor version must match too.
pub fn check_communication_compatibility(unity_version: &str, api_version: &str) -> bool {
    fn parse(v: &str) -> Option<(u32, u32)> {
        let mut parts = v.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        Some((major, minor))
    }
    match (parse(unity_version), parse(api_version)) {
        (Some((0, unity_minor)), Some((api_major, api_minor))) => {
            api_major == 0 && unity_minor == api_minor
        }
        (Some((unity_major, _)), Some((api_major, _))) => unity_major == api_major,
        _ => false,
    }
}

pub struct UnityEnvironment {
    communicator: GrpcServer,
    process: Option<Child>,
    side_channel_manager: SideChannelManager,
    worker_id: u16,
    timeout_wait: Duration,
    env_specs: BTreeMap<String, BehaviorSpec>,
    env_state: HashMap<String, (DecisionSteps, TerminalSteps)>,
    env_actions: HashMap<String, ActionTuple>,
    is_first_message: bool,
    loaded: bool,
    academy_capabilities: Option<UnityRlCapabilitiesProto>,
}

impl UnityEnvironment {
    /// Starts the gRPC server, launches the player (if any) and performs the handshake.
    pub async fn launch(options: SessionOptions) -> Result<Self> {
        let SessionOptions {
            file_name,
            worker_id,
            base_port,
            seed,
            no_graphics,
            timeout_wait,
            additional_args,
            side_channels,
            log_folder,
            num_areas,
        } = options;

        if file_name.is_none() && worker_id != 0 {
            return Err(UnityEnvironmentError::EditorWorkerId(worker_id));
        }
        let base_port = base_port.unwrap_or(if file_name.is_some() {
            BASE_ENVIRONMENT_PORT
        } else {
            DEFAULT_EDITOR_PORT
        });

        let side_channel_manager = SideChannelManager::new(side_channels)?;
        let mut communicator = GrpcServer::bind(worker_id, base_port, timeout_wait)?;
        let port = communicator.port();

        let process = match &file_name {
            Some(file_name) => {
                let args = executable_args(
                    no_graphics,
                    port,
                    log_folder.as_deref(),
                    worker_id,
                    &additional_args,
                );
                match launch_executable(file_name, &args) {
                    Ok(child) => Some(child),
                    Err(e) => {
                        communicator.close();
                        return Err(e);
                    }
                }
            }
            None => {
                info!(
                    port,
                    "listening; start training by pressing the Play button in the Unity Editor"
                );
                None
            }
        };

        let mut env = Self {
            communicator,
            process,
            side_channel_manager,
            worker_id,
            timeout_wait,
            env_specs: BTreeMap::new(),
            env_state: HashMap::new(),
            env_actions: HashMap::new(),
            is_first_message: true,
            loaded: true,
            academy_capabilities: None,
        };

        let init_input = UnityInputProto {
            rl_input: None,
            rl_initialization_input: Some(UnityRlInitializationInputProto {
                seed,
                communication_version: API_VERSION.to_string(),
                package_version: PACKAGE_VERSION.to_string(),
                capabilities: Some(capabilities()),
                num_areas,
            }),
        };

        let process = &mut env.process;
        let handshake = env.communicator.initialize(init_input, || poll_process(process)).await;
        let aca_output = match handshake {
            Ok(output) => output,
            Err(e) => {
                env.shutdown(Duration::ZERO).await;
                return Err(e);
            }
        };

        let aca_params = aca_output.rl_initialization_output.clone().unwrap_or_default();
        if !check_communication_compatibility(&aca_params.communication_version, API_VERSION) {
            env.shutdown(Duration::ZERO).await;
            return Err(UnityEnvironmentError::IncompatibleVersion {
                unity: aca_params.communication_version,
                local: API_VERSION.to_string(),
            });
        }
        info!(
            port,
            worker_id,
            name = %aca_params.name,
            unity_package = %aca_params.package_version,
            communication_version = %aca_params.communication_version,
            "connected to Unity environment"
        );

        env.update_behavior_specs(&aca_output);
        env.academy_capabilities = aca_params.capabilities;
        Ok(env)
    }

    pub fn port(&self) -> u16 {
        self.communicator.port()
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// OS id of the launched player, while it is still owned by this session.
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().map(Child::id)
    }

    pub fn academy_capabilities(&self) -> Option<&UnityRlCapabilitiesProto> {
        self.academy_capabilities.as_ref()
    }

    pub fn side_channel_manager(&self) -> &SideChannelManager {
        &self.side_channel_manager
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(UnityEnvironmentError::NotLoaded)
        }
    }

    fn assert_behavior_exists(&self, behavior_name: &str) -> Result<()> {
        if self.env_specs.contains_key(behavior_name) {
            Ok(())
        } else {
            Err(UnityEnvironmentError::UnknownBehavior(behavior_name.to_string()))
        }
    }

    async fn exchange(&mut self, input: UnityInputProto) -> Result<()> {
        let process = &mut self.process;
        let output = self.communicator.exchange(input, || poll_process(process)).await?;
        self.update_behavior_specs(&output);
        self.update_state(output.rl_output.as_ref())?;
        self.env_actions.clear();
        Ok(())
    }

    fn update_behavior_specs(&mut self, output: &UnityOutputProto) {
        let Some(init) = &output.rl_initialization_output else {
            return;
        };
        let agent_infos = output.rl_output.as_ref().map(|o| &o.agent_infos);
        for brain in &init.brain_parameters {
            let agent = agent_infos
                .and_then(|infos| infos.get(&brain.brain_name))
                .and_then(|list| list.value.first());
            let spec = BehaviorSpec::from_proto(brain, agent);
            debug!(behavior = %brain.brain_name, ?spec, "behavior registered");
            self.env_specs.insert(brain.brain_name.clone(), spec);
        }
    }

    fn update_state(&mut self, rl_output: Option<&UnityRlOutputProto>) -> Result<()> {
        let Some(rl_output) = rl_output else {
            return Ok(());
        };
        if !rl_output.side_channel.is_empty() {
            self.side_channel_manager.process_side_channel_message(&rl_output.side_channel)?;
        }
        for name in self.env_specs.keys() {
            let steps = match rl_output.agent_infos.get(name) {
                Some(list) => steps_from_proto(&list.value),
                None => Default::default(),
            };
            self.env_state.insert(name.clone(), steps);
        }
        Ok(())
    }

    fn generate_reset_input(&self) -> UnityInputProto {
        UnityInputProto {
            rl_input: Some(UnityRlInputProto {
                agent_actions: HashMap::new(),
                command: CommandProto::Reset as i32,
                side_channel: self.side_channel_manager.generate_side_channel_messages(),
            }),
            rl_initialization_input: None,
        }
    }

    fn generate_step_input(&self) -> UnityInputProto {
        let mut agent_actions = HashMap::new();
        for (name, actions) in &self.env_actions {
            let n_agents = self.env_state.get(name).map(|(d, _)| d.len()).unwrap_or(0);
            if n_agents == 0 {
                continue;
            }
            let value = (0..n_agents)
                .map(|i| AgentActionProto {
                    continuous_actions: actions.continuous.get(i).cloned().unwrap_or_default(),
                    discrete_actions: actions.discrete.get(i).cloned().unwrap_or_default(),
                    ..Default::default()
                })
                .collect();
            agent_actions.insert(name.clone(), ListAgentActionProto { value });
        }
        UnityInputProto {
            rl_input: Some(UnityRlInputProto {
                agent_actions,
                command: CommandProto::Step as i32,
                side_channel: self.side_channel_manager.generate_side_channel_messages(),
            }),
            rl_initialization_input: None,
        }
    }

    /// Stops the communicator, then gives the player `timeout` to exit before killing it.
    async fn shutdown(&mut self, timeout: Duration) {
        self.loaded = false;
        self.communicator.close();
        if let Some(child) = self.process.take() {
            match stop_process(child, timeout).await {
                ProcessStop::Exited(status) => info!(%status, "Unity process exited"),
                ProcessStop::Killed => warn!(
                    worker_id = self.worker_id,
                    "Unity process did not exit in time, killed it"
                ),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessStop {
    Exited(ExitStatus),
    Killed,
}

/// Gives `child` until `timeout` to exit on its own, then kills it.
pub(crate) async fn stop_process(mut child: Child, timeout: Duration) -> ProcessStop {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return ProcessStop::Exited(status),
            Ok(None) if Instant::now() < deadline => sleep(Duration::from_millis(100)).await,
            _ => break,
        }
    }
    if let Err(e) = child.kill() {
        warn!(error = %e, "failed to kill Unity process");
    }
    let _ = child.wait();
    ProcessStop::Killed
}

#[tonic::async_trait]
impl EngineSession for UnityEnvironment {
    async fn reset(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        let input = self.generate_reset_input();
        self.exchange(input).await?;
        self.is_first_message = false;
        Ok(())
    }

    async fn step(&mut self) -> Result<()> {
        if self.is_first_message {
            return self.reset().await;
        }
        self.ensure_loaded()?;
        for (name, spec) in &self.env_specs {
            if !self.env_actions.contains_key(name) {
                let n_agents = self.env_state.get(name).map(|(d, _)| d.len()).unwrap_or(0);
                self.env_actions.insert(name.clone(), spec.action_spec.empty_action(n_agents));
            }
        }
        let input = self.generate_step_input();
        self.exchange(input).await
    }

    fn behavior_specs(&self) -> &BTreeMap<String, BehaviorSpec> {
        &self.env_specs
    }

    fn get_steps(&self, behavior_name: &str) -> Result<(DecisionSteps, TerminalSteps)> {
        self.assert_behavior_exists(behavior_name)?;
        Ok(self.env_state.get(behavior_name).cloned().unwrap_or_default())
    }

    fn set_actions(&mut self, behavior_name: &str, actions: ActionTuple) -> Result<()> {
        self.assert_behavior_exists(behavior_name)?;
        let Some((decision_steps, _)) = self.env_state.get(behavior_name) else {
            return Ok(());
        };
        let spec = &self.env_specs[behavior_name];
        spec.action_spec.validate(&actions, decision_steps.len(), behavior_name)?;
        self.env_actions.insert(behavior_name.to_string(), actions);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.loaded {
            self.shutdown(self.timeout_wait).await;
        }
        Ok(())
    }
}

impl Drop for UnityEnvironment {
    fn drop(&mut self) {
        self.communicator.close();
        if let Some(mut child) = self.process.take() {
            debug!(worker_id = self.worker_id, "cleaning up Unity process");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn poll_process(process: &mut Option<Child>) -> Result<()> {
    if let Some(child) = process {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(UnityEnvironmentError::ProcessExited(status));
        }
    }
    Ok(())
}

/// Launches [`UnityEnvironment`] sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcLauncher;

#[tonic::async_trait]
impl EngineLauncher for GrpcLauncher {
    type Session = UnityEnvironment;

    async fn launch(&self, options: SessionOptions) -> Result<UnityEnvironment> {
        UnityEnvironment::launch(options).await
    }
}
