pub mod error;

pub use error::*;

use std::path::PathBuf;

/// Environment variable naming the deployment file directly
pub const DEPLOYMENT_PATH_ENV: &str = "FLEET_DEPLOYMENT_PATH";

/// Environment variable naming the directory that holds `.fleetflow/`
pub const STATE_DIR_ENV: &str = "FLEET_STATE_DIR";

const CANDIDATES: [&str; 4] = ["fleet.local.kdl", ".fleet.local.kdl", "fleet.kdl", ".fleet.kdl"];

/// Locate the deployment file declaring the fleet's machines
///
/// Search order:
/// 1. `FLEET_DEPLOYMENT_PATH` (direct path)
/// 2. current directory: fleet.local.kdl, .fleet.local.kdl, fleet.kdl, .fleet.kdl
/// 3. the same names inside `./.fleetflow/`
/// 4. ~/.config/fleetflow/fleet.kdl
pub fn find_deployment_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(DEPLOYMENT_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let flow_dir = current_dir.join(".fleetflow");
    if flow_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = flow_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("fleetflow").join("fleet.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::DeploymentFileNotFound)
}

/// Directory under which the state file (`.fleetflow/state.json`) lives
pub fn state_root() -> Result<PathBuf> {
    match std::env::var(STATE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Ok(std::env::current_dir()?),
    }
}
