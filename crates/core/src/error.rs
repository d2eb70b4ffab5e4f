use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Attempt to schedule unregistered client: {0}")]
    UnregisteredClient(String),

    #[error("Failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Statistics I/O error: {0}")]
    Statistics(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
