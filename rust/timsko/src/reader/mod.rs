//! Access to timsTOF raw data.
//!
//! Extraction only ever talks to the [RawDataReader] / [AcquisitionHandle] pair.
//! Three backends implement it:
//! 1. [NativeReader], pure rust decoding through `timsrust`.
//! 2. [BrukerSdkReader], the vendor `timsdata` library loaded at runtime.
//! 3. [InMemoryReader], synthetic acquisitions for tests.
//!
//! [ReaderBackend] picks one of them at runtime.

mod bruker_sdk;
mod in_memory;
mod native;

pub use bruker_sdk::{
    BrukerSdkHandle,
    BrukerSdkReader,
};
pub use in_memory::{
    InMemoryHandle,
    InMemoryReader,
    MzCalibration,
    SyntheticAcquisition,
    SyntheticFrame,
    SyntheticScan,
};
pub use native::{
    NativeHandle,
    NativeReader,
};

use crate::errors::ReaderError;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt::Display;
use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;

/// One raw-data folder (usually a `.d` directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub path: PathBuf,
    pub folder_name: String,
}

impl Acquisition {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let folder_name = path
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self { path, folder_name }
    }
}

/// Pressure compensation applied by the vendor library when converting
/// scan numbers to mobility.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum PressureCompensation {
    NoCompensation,
    PerFrame,
    #[default]
    Global,
}

impl PressureCompensation {
    /// Value of the `pressure_compensation_strategy` argument of `tims_open_v2`.
    pub fn sdk_code(&self) -> u32 {
        match self {
            PressureCompensation::NoCompensation => 0,
            PressureCompensation::Global => 1,
            PressureCompensation::PerFrame => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PressureCompensation::NoCompensation => "No compensation",
            PressureCompensation::PerFrame => "Per-frame",
            PressureCompensation::Global => "Global",
        }
    }
}

impl Display for PressureCompensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PressureCompensation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "nocompensation" | "nopressurecompensation" | "none" => {
                Ok(PressureCompensation::NoCompensation)
            }
            "perframe" | "perframepressurecompensation" => Ok(PressureCompensation::PerFrame),
            "global"
            | "analysisglobalpressurecompensation"
            | "analyisglobalpressurecompensation" => Ok(PressureCompensation::Global),
            _ => Err(format!(
                "Unknown pressure compensation strategy '{}', expected one of: \"No compensation\", \"Per-frame\", \"Global\"",
                s
            )),
        }
    }
}

impl TryFrom<String> for PressureCompensation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PressureCompensation> for String {
    fn from(value: PressureCompensation) -> Self {
        value.as_str().to_string()
    }
}

/// Options handed to [RawDataReader::open].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    #[serde(default = "default_true")]
    pub use_recalibrated_state: bool,
    #[serde(default)]
    pub pressure_compensation: PressureCompensation,
}

fn default_true() -> bool {
    true
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            use_recalibrated_state: true,
            pressure_compensation: PressureCompensation::Global,
        }
    }
}

/// The (index, intensity) spectrum of one scan, before m/z conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawScan {
    pub indices: Vec<u32>,
    pub intensities: Vec<u32>,
}

impl RawScan {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// An open acquisition. Dropping the handle releases it.
///
/// Frame ids are 1-based, scan indices are 0-based, matching the TDF schema.
pub trait AcquisitionHandle {
    fn frame_count(&mut self) -> Result<u32, ReaderError>;

    fn scan_count(&mut self, frame_id: u32) -> Result<u32, ReaderError>;

    /// Scans `scan_begin..scan_end` of a frame.
    fn read_scans(
        &mut self,
        frame_id: u32,
        scan_begin: u32,
        scan_end: u32,
    ) -> Result<Vec<RawScan>, ReaderError>;

    fn read_scan(&mut self, frame_id: u32, scan: u32) -> Result<RawScan, ReaderError> {
        let mut scans = self.read_scans(frame_id, scan, scan + 1)?;
        scans.pop().ok_or(ReaderError::Read {
            frame_id,
            message: format!("scan {} returned no data", scan),
        })
    }

    /// Converts raw TOF indices to m/z using the calibration of `frame_id`.
    fn index_to_mz(&mut self, frame_id: u32, indices: &[u32]) -> Result<Vec<f64>, ReaderError>;

    /// The 1/K0 value of one scan within one frame.
    fn scan_to_mobility(&mut self, frame_id: u32, scan: u32) -> Result<f64, ReaderError>;
}

pub trait RawDataReader {
    type Handle: AcquisitionHandle;

    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Self::Handle, ReaderError>;

    fn mobility_to_ccs(
        &self,
        mobility: f64,
        charge: i32,
        reference_mz: f64,
    ) -> Result<f64, ReaderError>;
}

/// Runtime selection between the available backends.
pub enum ReaderBackend {
    Native(NativeReader),
    BrukerSdk(BrukerSdkReader),
    InMemory(InMemoryReader),
}

pub enum BackendHandle {
    Native(NativeHandle),
    BrukerSdk(BrukerSdkHandle),
    InMemory(InMemoryHandle),
}

impl ReaderBackend {
    pub fn name(&self) -> &'static str {
        match self {
            ReaderBackend::Native(_) => "native",
            ReaderBackend::BrukerSdk(_) => "bruker_sdk",
            ReaderBackend::InMemory(_) => "in_memory",
        }
    }
}

impl RawDataReader for ReaderBackend {
    type Handle = BackendHandle;

    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Self::Handle, ReaderError> {
        Ok(match self {
            ReaderBackend::Native(reader) => BackendHandle::Native(reader.open(path, options)?),
            ReaderBackend::BrukerSdk(reader) => {
                BackendHandle::BrukerSdk(reader.open(path, options)?)
            }
            ReaderBackend::InMemory(reader) => BackendHandle::InMemory(reader.open(path, options)?),
        })
    }

    fn mobility_to_ccs(
        &self,
        mobility: f64,
        charge: i32,
        reference_mz: f64,
    ) -> Result<f64, ReaderError> {
        match self {
            ReaderBackend::Native(reader) => reader.mobility_to_ccs(mobility, charge, reference_mz),
            ReaderBackend::BrukerSdk(reader) => {
                reader.mobility_to_ccs(mobility, charge, reference_mz)
            }
            ReaderBackend::InMemory(reader) => {
                reader.mobility_to_ccs(mobility, charge, reference_mz)
            }
        }
    }
}

impl AcquisitionHandle for BackendHandle {
    fn frame_count(&mut self) -> Result<u32, ReaderError> {
        match self {
            BackendHandle::Native(handle) => handle.frame_count(),
            BackendHandle::BrukerSdk(handle) => handle.frame_count(),
            BackendHandle::InMemory(handle) => handle.frame_count(),
        }
    }

    fn scan_count(&mut self, frame_id: u32) -> Result<u32, ReaderError> {
        match self {
            BackendHandle::Native(handle) => handle.scan_count(frame_id),
            BackendHandle::BrukerSdk(handle) => handle.scan_count(frame_id),
            BackendHandle::InMemory(handle) => handle.scan_count(frame_id),
        }
    }

    fn read_scans(
        &mut self,
        frame_id: u32,
        scan_begin: u32,
        scan_end: u32,
    ) -> Result<Vec<RawScan>, ReaderError> {
        match self {
            BackendHandle::Native(handle) => handle.read_scans(frame_id, scan_begin, scan_end),
            BackendHandle::BrukerSdk(handle) => handle.read_scans(frame_id, scan_begin, scan_end),
            BackendHandle::InMemory(handle) => handle.read_scans(frame_id, scan_begin, scan_end),
        }
    }

    fn index_to_mz(&mut self, frame_id: u32, indices: &[u32]) -> Result<Vec<f64>, ReaderError> {
        match self {
            BackendHandle::Native(handle) => handle.index_to_mz(frame_id, indices),
            BackendHandle::BrukerSdk(handle) => handle.index_to_mz(frame_id, indices),
            BackendHandle::InMemory(handle) => handle.index_to_mz(frame_id, indices),
        }
    }

    fn scan_to_mobility(&mut self, frame_id: u32, scan: u32) -> Result<f64, ReaderError> {
        match self {
            BackendHandle::Native(handle) => handle.scan_to_mobility(frame_id, scan),
            BackendHandle::BrukerSdk(handle) => handle.scan_to_mobility(frame_id, scan),
            BackendHandle::InMemory(handle) => handle.scan_to_mobility(frame_id, scan),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_compensation_parses_table_and_sdk_spellings() {
        let cases = [
            ("No compensation", PressureCompensation::NoCompensation),
            ("Per-frame", PressureCompensation::PerFrame),
            ("Global", PressureCompensation::Global),
            ("global", PressureCompensation::Global),
            (
                "AnalysisGlobalPressureCompensation",
                PressureCompensation::Global,
            ),
            (
                "PerFramePressureCompensation",
                PressureCompensation::PerFrame,
            ),
            (
                "NoPressureCompensation",
                PressureCompensation::NoCompensation,
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<PressureCompensation>().unwrap(), expected);
        }
        assert!("sometimes".parse::<PressureCompensation>().is_err());
    }

    #[test]
    fn test_pressure_compensation_sdk_codes() {
        assert_eq!(PressureCompensation::NoCompensation.sdk_code(), 0);
        assert_eq!(PressureCompensation::Global.sdk_code(), 1);
        assert_eq!(PressureCompensation::PerFrame.sdk_code(), 2);
    }

    #[test]
    fn test_open_options_defaults_from_json() {
        let opts: OpenOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, OpenOptions::default());
        let opts: OpenOptions = serde_json::from_str(
            r#"{"use_recalibrated_state": false, "pressure_compensation": "Per-frame"}"#,
        )
        .unwrap();
        assert!(!opts.use_recalibrated_state);
        assert_eq!(opts.pressure_compensation, PressureCompensation::PerFrame);
    }

    #[test]
    fn test_acquisition_folder_name() {
        let acq = Acquisition::from_path("/data/run/sample_20V.d");
        assert_eq!(acq.folder_name, "sample_20V.d");
    }
}
