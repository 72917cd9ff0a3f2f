use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use bugs_core::env::UnityEnvironment;
use bugs_core::side_channel::LogSink;
use bugs_core::{BugsEnvironment, EngineSession, EnvironmentConfig};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "worldofbugs",
    version,
    about = "Launch a World of Bugs Unity build, toggle bugs and step it with empty actions"
)]
struct Args {
    #[arg(
        long = "env",
        value_name = "PATH",
        help = "Path to the Unity build (omit to connect to the Editor)"
    )]
    env_path: Option<PathBuf>,
    #[arg(long, value_name = "YAML", help = "Environment config file; flags override its values")]
    config: Option<PathBuf>,
    #[arg(long = "worker-id", help = "Offset added to the base port")]
    worker_id: Option<u16>,
    #[arg(long = "base-port", help = "Base port (default 5005, or 5004 for the Editor)")]
    base_port: Option<u16>,
    #[arg(long, help = "Seed sent to Unity (random when omitted)")]
    seed: Option<i32>,
    #[arg(long = "no-graphics", help = "Run Unity with graphics disabled")]
    no_graphics: bool,
    #[arg(long = "timeout-wait", help = "Seconds to wait for Unity to respond")]
    timeout_wait: Option<u64>,
    #[arg(long = "log-folder", help = "Folder for the Unity player log")]
    log_folder: Option<PathBuf>,
    #[arg(long, help = "Window width in pixels")]
    width: Option<i32>,
    #[arg(long, help = "Window height in pixels")]
    height: Option<i32>,
    #[arg(long = "quality-level", help = "Unity QualitySettings level")]
    quality_level: Option<i32>,
    #[arg(long = "time-scale", help = "Unity Time.timeScale value")]
    time_scale: Option<f32>,
    #[arg(long, help = "Enable debug-level logging")]
    debug: bool,
    #[arg(
        long = "unity-log",
        value_name = "SINK",
        value_parser = LogSink::from_str,
        help = "Where Unity log lines go: stdout or tracing"
    )]
    unity_log: Option<LogSink>,
    #[arg(long = "enable-bug", value_name = "NAME", help = "Bug to enable (repeatable)")]
    enable_bug: Vec<String>,
    #[arg(long = "disable-bug", value_name = "NAME", help = "Bug to disable (repeatable)")]
    disable_bug: Vec<String>,
    #[arg(long, value_name = "NAME", help = "Player behaviour to switch to before stepping")]
    behaviour: Option<String>,
    #[arg(
        long = "env-param",
        value_name = "KEY=VALUE",
        value_parser = parse_env_param,
        help = "Float environment parameter (repeatable)"
    )]
    env_param: Vec<(String, f32)>,
    #[arg(long, default_value_t = 100, help = "Number of steps to run")]
    steps: u64,
    #[arg(
        long = "env-args",
        num_args = 1..,
        allow_hyphen_values = true,
        help = "Extra arguments forwarded to the Unity build"
    )]
    env_args: Vec<String>,
}

fn parse_env_param(s: &str) -> Result<(String, f32), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", s))?;
    let value = value
        .parse::<f32>()
        .map_err(|e| format!("invalid value for `{}`: {}", key, e))?;
    Ok((key.to_string(), value))
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_config(args: &Args) -> Result<EnvironmentConfig> {
    let mut config = match &args.config {
        Some(path) => EnvironmentConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EnvironmentConfig::default(),
    };

    if args.env_path.is_some() {
        config.file_name = args.env_path.clone();
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = worker_id;
    }
    if args.base_port.is_some() {
        config.base_port = args.base_port;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.no_graphics |= args.no_graphics;
    if let Some(timeout_wait) = args.timeout_wait {
        config.timeout_wait = timeout_wait;
    }
    if args.log_folder.is_some() {
        config.log_folder = args.log_folder.clone();
    }
    if let Some(width) = args.width {
        config.display_width = width;
    }
    if let Some(height) = args.height {
        config.display_height = height;
    }
    if let Some(quality_level) = args.quality_level {
        config.quality_level = quality_level;
    }
    if let Some(time_scale) = args.time_scale {
        config.time_scale = time_scale;
    }
    if let Some(sink) = args.unity_log {
        config.log_sink = sink;
    }
    config.additional_args.extend(args.env_args.iter().cloned());

    if !config.environment_parameters.is_empty() || !args.env_param.is_empty() {
        let channel = config.attach_environment_parameters();
        for (key, value) in &args.env_param {
            channel.set_float_parameter(key, *value);
        }
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);
    info!("{}", bugs_core::get_version_string());

    let config = build_config(&args)?;
    let mut env = BugsEnvironment::launch(config)
        .await
        .context("failed to start the Unity environment")?;
    info!(seed = env.seed(), port = env.port(), "environment ready");

    let result = run(&mut env, &args).await;
    if let Err(e) = env.close().await {
        warn!(error = %e, "error while closing the environment");
    }
    result
}

async fn run(env: &mut BugsEnvironment<UnityEnvironment>, args: &Args) -> Result<()> {
    for bug in &args.enable_bug {
        env.enable_bug(bug);
    }
    for bug in &args.disable_bug {
        env.disable_bug(bug);
    }
    match &args.behaviour {
        Some(behaviour) => env
            .set_player_behaviour(behaviour)
            .await
            .with_context(|| format!("setting player behaviour {}", behaviour))?,
        None => env.reset().await.context("reset failed")?,
    }

    let behaviors: Vec<String> = env.behavior_specs().keys().cloned().collect();
    if behaviors.is_empty() {
        warn!("no behaviors registered by the environment");
    }

    let mut episode_rewards = vec![0.0f32; behaviors.len()];
    for step in 1..=args.steps {
        env.step().await.with_context(|| format!("step {} failed", step))?;
        for (name, total) in behaviors.iter().zip(episode_rewards.iter_mut()) {
            let (decision, terminal) = env.get_steps(name)?;
            let reward: f32 =
                decision.agents.iter().chain(&terminal.agents).map(|a| a.reward).sum();
            *total += reward;
            if !terminal.is_empty() {
                info!(step, behavior = %name, episode_reward = *total, "episode finished");
                *total = 0.0;
            }
            tracing::debug!(
                step,
                behavior = %name,
                decisions = decision.len(),
                terminals = terminal.len(),
                reward,
                "step"
            );
        }
    }
    info!(steps = args.steps, "run complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_param() {
        assert_eq!(parse_env_param("gravity=9.8").unwrap(), ("gravity".to_string(), 9.8));
        assert!(parse_env_param("gravity").is_err());
        assert!(parse_env_param("gravity=heavy").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "worldofbugs",
            "--env",
            "builds/WorldOfBugs",
            "--worker-id",
            "2",
            "--time-scale",
            "10",
            "--enable-bug",
            "BlackScreen",
            "--enable-bug",
            "ZFighting",
            "--env-param",
            "difficulty=2",
            "--env-args",
            "-screen-fullscreen",
            "0",
        ]);
        assert_eq!(args.enable_bug, vec!["BlackScreen", "ZFighting"]);
        assert_eq!(args.env_args, vec!["-screen-fullscreen", "0"]);

        let config = build_config(&args).unwrap();
        assert_eq!(config.file_name, Some(PathBuf::from("builds/WorldOfBugs")));
        assert_eq!(config.worker_id, 2);
        assert_eq!(config.time_scale, 10.0);
        assert_eq!(config.display_width, 84);
        assert_eq!(config.additional_args, vec!["-screen-fullscreen", "0"]);
        assert_eq!(config.side_channels.len(), 1);
        assert_eq!(config.log_sink, LogSink::Stdout);
        assert!(config.environment_parameters.is_empty());
    }

    #[test]
    fn test_config_file_parameters_and_log_sink() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_sink: stdout\nenvironment_parameters:\n  fog: 0.5").unwrap();
        let path = file.path().display().to_string();

        let args = Args::parse_from(["worldofbugs", "--config", &path, "--unity-log", "tracing"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.log_sink, LogSink::Tracing);
        assert_eq!(config.side_channels.len(), 1);

        let args = Args::parse_from(["worldofbugs"]);
        assert!(build_config(&args).unwrap().side_channels.is_empty());
        assert!(Args::try_parse_from(["worldofbugs", "--unity-log", "stderr"]).is_err());
    }
}
