// Locating and launching a Unity player build
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::{debug, info};

use crate::error::{Result, UnityEnvironmentError};

pub const PORT_COMMAND_LINE_ARG: &str = "--mlagents-port";

const PLAYER_EXTENSIONS: [&str; 4] = ["x86_64", "x86", "exe", "app"];

/// Resolves a build name to an executable file.
///
/// Accepts the name with or without a platform extension; `.app` bundles
/// resolve to the first executable inside `Contents/MacOS`.
pub fn validate_environment_path(file_name: &Path) -> Option<PathBuf> {
    let base = match file_name.extension().and_then(OsStr::to_str) {
        Some(ext) if PLAYER_EXTENSIONS.contains(&ext) => file_name.with_extension(""),
        _ => file_name.to_path_buf(),
    };

    if base.is_file() {
        return Some(base);
    }
    for ext in PLAYER_EXTENSIONS {
        let candidate = with_appended_extension(&base, ext);
        if ext == "app" {
            if let Some(exec) = resolve_app_bundle(&candidate) {
                return Some(exec);
            }
        } else if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn resolve_app_bundle(bundle: &Path) -> Option<PathBuf> {
    let macos_dir = bundle.join("Contents").join("MacOS");
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&macos_dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(exec) = entries.iter().find(|path| {
            std::fs::metadata(path)
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        }) {
            return Some(exec.clone());
        }
    }
    entries.into_iter().next()
}

/// Command-line arguments for a player build, in the order Unity expects them.
pub fn executable_args(
    no_graphics: bool,
    port: u16,
    log_folder: Option<&Path>,
    worker_id: u16,
    additional_args: &[String],
) -> Vec<String> {
    let mut args = Vec::new();
    if no_graphics {
        args.push("-nographics".to_string());
        args.push("-batchmode".to_string());
    }
    args.push(PORT_COMMAND_LINE_ARG.to_string());
    args.push(port.to_string());
    if let Some(folder) = log_folder {
        let log_file = folder.join(format!("Player-{}.log", worker_id));
        args.push("-logFile".to_string());
        args.push(log_file.display().to_string());
    }
    args.extend(additional_args.iter().cloned());
    args
}

pub fn launch_executable(file_name: &Path, args: &[String]) -> Result<Child> {
    let exec_path = validate_environment_path(file_name)
        .ok_or_else(|| UnityEnvironmentError::ExecutableNotFound(file_name.display().to_string()))?;
    debug!(path = %exec_path.display(), "resolved Unity executable");
    info!(command = %exec_path.display(), ?args, "launching Unity environment");

    Command::new(&exec_path)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(UnityEnvironmentError::Launch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_args_order() {
        let extra = vec!["-screen-fullscreen".to_string(), "0".to_string()];
        let args = executable_args(true, 5007, Some(Path::new("logs")), 2, &extra);
        let log_file = Path::new("logs").join("Player-2.log").display().to_string();
        assert_eq!(
            args,
            vec![
                "-nographics".to_string(),
                "-batchmode".to_string(),
                "--mlagents-port".to_string(),
                "5007".to_string(),
                "-logFile".to_string(),
                log_file,
                "-screen-fullscreen".to_string(),
                "0".to_string(),
            ]
        );
    }

    #[test]
    fn test_args_minimal() {
        let args = executable_args(false, 5005, None, 0, &[]);
        assert_eq!(args, vec!["--mlagents-port".to_string(), "5005".to_string()]);
    }

    #[test]
    fn test_validate_path_finds_extension() {
        let dir = tempfile::tempdir().unwrap();
        let player = dir.path().join("World.x86_64");
        fs::write(&player, b"").unwrap();

        assert_eq!(validate_environment_path(&dir.path().join("World")), Some(player.clone()));
        assert_eq!(validate_environment_path(&player), Some(player));
        assert_eq!(validate_environment_path(&dir.path().join("Missing")), None);
    }

    #[test]
    fn test_validate_path_app_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let macos = dir.path().join("World.app").join("Contents").join("MacOS");
        fs::create_dir_all(&macos).unwrap();
        let exec = macos.join("World");
        fs::write(&exec, b"").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&exec, fs::Permissions::from_mode(0o755)).unwrap();
        }

        assert_eq!(validate_environment_path(&dir.path().join("World")), Some(exec.clone()));
        assert_eq!(validate_environment_path(&dir.path().join("World.app")), Some(exec));
    }

    #[test]
    fn test_launch_missing_executable() {
        let err = launch_executable(Path::new("/definitely/not/a/build"), &[]).unwrap_err();
        assert!(matches!(err, UnityEnvironmentError::ExecutableNotFound(_)));
    }
}
