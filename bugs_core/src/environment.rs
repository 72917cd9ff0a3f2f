// The World of Bugs environment: an engine session plus the bug and log side channels
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use crate::env::{EngineLauncher, EngineSession, GrpcLauncher, SessionOptions, UnityEnvironment};
use crate::error::Result;
use crate::settings::EnvironmentConfig;
use crate::side_channel::{
    EngineConfigurationChannel, SharedSideChannel, UnityConfigChannel, UnityLogChannel,
};

/// Seeds drawn when none is configured lie in `0..MAX_RANDOM_SEED`.
pub const MAX_RANDOM_SEED: i32 = 100_000_000;

pub fn random_seed<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    rng.gen_range(0..MAX_RANDOM_SEED)
}

/// The string the game controller reads to switch a bug on or off.
pub fn bug_toggle_message(bug_name: &str, enabled: bool) -> String {
    let state = if enabled { "True" } else { "False" };
    format!("Bugs.{}.enabled:{}", bug_name, state)
}

pub fn player_behaviour_message(behaviour: &str) -> String {
    format!("{}:True", behaviour)
}

/// Gym-style wrapper around an engine session.
///
/// Everything except the bug and behaviour toggles is the session's own
/// behaviour, reached through `Deref`: bring [`EngineSession`] into scope
/// to call `reset`, `step`, `get_steps`, `set_actions` and `close`.
pub struct BugsEnvironment<S> {
    session: S,
    config_channel: Arc<UnityConfigChannel>,
    engine_channel: Arc<EngineConfigurationChannel>,
    log_channel: Option<Arc<UnityLogChannel>>,
    seed: i32,
}

impl BugsEnvironment<UnityEnvironment> {
    /// Launches (or waits for) Unity over gRPC.
    pub async fn launch(config: EnvironmentConfig) -> Result<Self> {
        Self::new(config, &GrpcLauncher).await
    }
}

impl<S: EngineSession> BugsEnvironment<S> {
    pub async fn new<L>(config: EnvironmentConfig, launcher: &L) -> Result<Self>
    where
        L: EngineLauncher<Session = S>,
    {
        let timeout_wait = config.timeout_wait();
        let engine_parameters = config.engine_parameters();
        let EnvironmentConfig {
            file_name,
            worker_id,
            base_port,
            seed,
            no_graphics,
            additional_args,
            side_channels,
            log_folder,
            debug,
            log_sink,
            num_areas,
            ..
        } = config;

        let engine_channel = Arc::new(EngineConfigurationChannel::new());
        engine_channel.set_configuration_parameters(engine_parameters)?;
        let config_channel = Arc::new(UnityConfigChannel::new());
        let log_channel = debug.then(|| Arc::new(UnityLogChannel::with_sink(log_sink)));

        let mut channels: Vec<SharedSideChannel> = side_channels;
        channels.push(engine_channel.clone() as SharedSideChannel);
        channels.push(config_channel.clone() as SharedSideChannel);
        if let Some(log_channel) = &log_channel {
            channels.push(log_channel.clone() as SharedSideChannel);
        }

        let seed = seed.unwrap_or_else(|| random_seed(&mut rand::thread_rng()));
        debug!(seed, channels = channels.len(), "launching World of Bugs environment");

        let session = launcher
            .launch(SessionOptions {
                file_name,
                worker_id,
                base_port,
                seed,
                no_graphics,
                timeout_wait,
                additional_args,
                side_channels: channels,
                log_folder,
                num_areas,
            })
            .await?;

        Ok(Self {
            session,
            config_channel,
            engine_channel,
            log_channel,
            seed,
        })
    }

    pub fn enable_bug(&self, bug_name: &str) {
        info!(bug = bug_name, "enabling bug");
        self.config_channel.write(&bug_toggle_message(bug_name, true));
    }

    pub fn disable_bug(&self, bug_name: &str) {
        info!(bug = bug_name, "disabling bug");
        self.config_channel.write(&bug_toggle_message(bug_name, false));
    }

    /// Switches the player's controlling behaviour and resets so Unity picks it up.
    pub async fn set_player_behaviour(&mut self, behaviour: &str) -> Result<()> {
        info!(behaviour, "setting player behaviour");
        self.config_channel.write(&player_behaviour_message(behaviour));
        self.session.reset().await
    }

    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn config_channel(&self) -> &Arc<UnityConfigChannel> {
        &self.config_channel
    }

    pub fn engine_channel(&self) -> &Arc<EngineConfigurationChannel> {
        &self.engine_channel
    }

    /// `None` unless the environment was built with `debug`.
    pub fn log_channel(&self) -> Option<&Arc<UnityLogChannel>> {
        self.log_channel.as_ref()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_inner(self) -> S {
        self.session
    }
}

impl<S> Deref for BugsEnvironment<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> DerefMut for BugsEnvironment<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}
