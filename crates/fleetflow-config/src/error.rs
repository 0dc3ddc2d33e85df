use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Deployment file not found. Looked in:\n\
        - current directory: fleet.local.kdl, .fleet.local.kdl, fleet.kdl, .fleet.kdl\n\
        - ./.fleetflow/\n\
        - ~/.config/fleetflow/fleet.kdl\n\
        Set FLEET_DEPLOYMENT_PATH to point at a file directly"
    )]
    DeploymentFileNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
