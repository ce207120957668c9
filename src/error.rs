use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Metadata Error - {0}")]
    Metadata(String),

    #[error("Unknown Partition - {0}")]
    UnknownPartition(String),

    #[error("Lifecycle Error - {0}")]
    Lifecycle(String),

    #[error("Startpoint Error - {0}")]
    Startpoint(String),

    #[error("Store Error - {0}")]
    Store(String),

    #[error("Listener Error - {0}")]
    Listener(String),
}
