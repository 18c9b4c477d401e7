use crate::pipeline::ExcludedAcquisition;
use std::path::PathBuf;
use thiserror::Error;

/// Failures coming out of a raw-data backend.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Unable to open acquisition at '{}': {message}", .path.display())]
    Open { path: PathBuf, message: String },

    #[error("Failed to read frame {frame_id}: {message}")]
    Read { frame_id: u32, message: String },

    #[error("Frame {frame_id} is outside of the acquisition (1..={frame_count})")]
    FrameOutOfRange { frame_id: u32, frame_count: u32 },

    #[error("Scan range {begin}..{end} is outside of frame {frame_id} ({scan_count} scans)")]
    ScanOutOfRange {
        frame_id: u32,
        begin: u32,
        end: u32,
        scan_count: u32,
    },

    #[error("Vendor library error: {0}")]
    Library(String),

    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Conversion failed: {0}")]
    Conversion(String),
}

/// A single acquisition could not be extracted.
#[derive(Error, Debug)]
#[error("Extraction of '{}' failed: {source}", .acquisition.display())]
pub struct ExtractionError {
    pub acquisition: PathBuf,
    #[source]
    pub source: ReaderError,
}

#[derive(Error, Debug)]
pub enum MetadataResolutionError {
    #[error("No subfolder ending with '{extension}' found in {}", .path.display())]
    MissingMethodBundle {
        path: PathBuf,
        extension: &'static str,
    },

    #[error("No file ending with '{extension}' found in {}", .path.display())]
    MissingMethodFile {
        path: PathBuf,
        extension: &'static str,
    },

    #[error("Expected exactly one entry ending with '{extension}' in {}, found {found:?}", .path.display())]
    Ambiguous {
        path: PathBuf,
        extension: &'static str,
        found: Vec<String>,
    },

    #[error("Parameter {parameter} not found in {}", .path.display())]
    MissingParameter {
        path: PathBuf,
        parameter: &'static str,
    },

    #[error("Could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CcsError {
    #[error("CCS conversion requires a non-zero charge")]
    ZeroCharge,

    #[error("CCS conversion requires a positive, finite reference m/z, got {0}")]
    InvalidReferenceMz(f64),

    #[error("CCS conversion requested without a {0}")]
    MissingValue(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrecisionError {
    #[error("Mobility grouping supports at most {max} decimals, got {decimals}")]
    TooManyDecimals { decimals: u32, max: u32 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    #[error("m/z bounds must be finite, got ({0}, {1})")]
    NonFinite(f64, f64),

    #[error(
        "Expected the first element to be less than or equal to the second, got ({0:?}, {1:?})"
    )]
    ExpectedOrderedRange(f64, f64),
}

/// Terminal conditions for one folder run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid m/z window: {0}")]
    Window(#[from] WindowError),

    #[error("Invalid CCS settings: {0}")]
    Ccs(#[from] CcsError),

    /// Nothing to write. `excluded` lists the acquisitions that failed, so an
    /// empty window can be told apart from unreadable data.
    #[error("No data to process in {} ({} acquisitions excluded)", .folder.display(), .excluded.len())]
    NoData {
        folder: PathBuf,
        excluded: Vec<ExcludedAcquisition>,
    },

    #[error("Failed to list {}: {source}", .folder.display())]
    Discovery {
        folder: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Error, Debug)]
pub enum BatchTableError {
    #[error("Failed to read batch table {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Batch table {} is missing required column '{column}'", .path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
}

/// One batch row that did not produce an output file.
#[derive(Error, Debug)]
pub enum BatchJobError {
    #[error("Row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("Row {row} ({}): {source}", .folder.display())]
    Run {
        row: usize,
        folder: PathBuf,
        #[source]
        source: RunError,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker thread panicked: {0}")]
    Panicked(String),
}
