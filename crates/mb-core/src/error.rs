use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("no free port for {service} within {attempts} ports from {start}")]
    PortExhaustion {
        service: String,
        start: u16,
        attempts: u32,
    },

    #[error("instance '{0}' already exists")]
    AlreadyExists(String),

    #[error("runtime operation failed: {0}")]
    RuntimeOperation(String),

    #[error("instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("alert rule '{0}' not found")]
    RuleNotFound(String),

    #[error("alert '{0}' not found")]
    AlertNotFound(String),

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("state persistence failed: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl FleetError {
    /// True for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FleetError::InstanceNotFound(_)
                | FleetError::RuleNotFound(_)
                | FleetError::AlertNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
