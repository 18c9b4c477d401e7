#![doc = include_str!("../README.md")]

// Declare modules
pub mod batch;
pub mod ccs;
pub mod errors;
pub mod extraction;
pub mod labels;
pub mod merge;
pub mod observer;
pub mod pipeline;
pub mod reader;
pub mod worker;

// Re-export main structures
pub use crate::batch::{
    BatchReport,
    BatchRow,
    read_batch_table,
    run_batch,
};
pub use crate::ccs::CcsSettings;
pub use crate::extraction::{
    MobilityPrecision,
    MobilityProfile,
    MzWindow,
    SpectrumExtractor,
};
pub use crate::labels::{
    ActivationLabel,
    LabelStrategy,
};
pub use crate::merge::{
    FinalTable,
    MasterTable,
};
pub use crate::observer::{
    LoggingObserver,
    NoopObserver,
    ProgressObserver,
};
pub use crate::pipeline::{
    RunParameters,
    RunReport,
    run_folder,
};
pub use crate::worker::{
    RunEvent,
    RunHandle,
    spawn_run,
};

// Re-export traits
pub use crate::reader::{
    AcquisitionHandle,
    RawDataReader,
};

// Re-export errors
pub use crate::errors::{
    BatchJobError,
    BatchTableError,
    CcsError,
    ExtractionError,
    MetadataResolutionError,
    PrecisionError,
    ReaderError,
    RunError,
    WindowError,
    WorkerError,
};
