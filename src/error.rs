use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Coordinate transform is not initialized")]
    TransformNotInitialized,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Detector Error: {0}")]
    Detector(String),

    #[error("Logger Error: {0}")]
    Logger(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML Error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
