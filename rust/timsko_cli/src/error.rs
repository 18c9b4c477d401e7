use thiserror::Error;
use timsko::{
    BatchTableError,
    CcsError,
    PrecisionError,
    ReaderError,
    RunError,
    WindowError,
    WorkerError,
};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Error interpreting the config: {0}")]
    Config(String),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Ccs(#[from] CcsError),

    #[error(transparent)]
    Precision(#[from] PrecisionError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    BatchTable(#[from] BatchTableError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("{failed} of {total} batch jobs failed")]
    BatchFailures { failed: usize, total: usize },
}
