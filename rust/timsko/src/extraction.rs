use crate::ccs::CcsSettings;
use crate::errors::{
    ExtractionError,
    PrecisionError,
    ReaderError,
    WindowError,
};
use crate::labels::ActivationLabel;
use crate::reader::{
    Acquisition,
    AcquisitionHandle,
    OpenOptions,
    RawDataReader,
};
use ordered_float::OrderedFloat;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;
use tracing::{
    debug,
    instrument,
};

/// Closed-closed m/z range `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MzWindow(f64, f64);

impl MzWindow {
    pub fn try_new(min: f64, max: f64) -> Result<Self, WindowError> {
        if !(min.is_finite() && max.is_finite()) {
            return Err(WindowError::NonFinite(min, max));
        }
        if min > max {
            return Err(WindowError::ExpectedOrderedRange(min, max));
        }
        Ok(Self(min, max))
    }

    pub fn contains(&self, mz: f64) -> bool {
        self.0 <= mz && mz <= self.1
    }

    pub fn start(&self) -> f64 {
        self.0
    }

    pub fn end(&self) -> f64 {
        self.1
    }
}

/// Largest rounding precision accepted for mobility grouping.
/// An f64 carries about 15 significant decimal digits.
pub const MAX_MOBILITY_DECIMALS: u32 = 15;

/// How mobility values are turned into grouping keys.
///
/// `Exact` groups bit-identical values, which is what the vendor conversion
/// yields for a given scan index. `Decimals(n)` rounds to `n` decimal places
/// first, for data where that does not hold. Build it with
/// [MobilityPrecision::try_decimals]; deserialisation applies the same bound.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "RawMobilityPrecision")]
pub enum MobilityPrecision {
    #[default]
    Exact,
    Decimals(u32),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawMobilityPrecision {
    Exact,
    Decimals(u32),
}

impl TryFrom<RawMobilityPrecision> for MobilityPrecision {
    type Error = PrecisionError;

    fn try_from(value: RawMobilityPrecision) -> Result<Self, Self::Error> {
        match value {
            RawMobilityPrecision::Exact => Ok(MobilityPrecision::Exact),
            RawMobilityPrecision::Decimals(n) => MobilityPrecision::try_decimals(n),
        }
    }
}

impl MobilityPrecision {
    pub fn try_decimals(decimals: u32) -> Result<Self, PrecisionError> {
        if decimals > MAX_MOBILITY_DECIMALS {
            return Err(PrecisionError::TooManyDecimals {
                decimals,
                max: MAX_MOBILITY_DECIMALS,
            });
        }
        Ok(MobilityPrecision::Decimals(decimals))
    }

    pub fn key(&self, value: f64) -> f64 {
        let value = match self {
            MobilityPrecision::Exact => value,
            MobilityPrecision::Decimals(n) => {
                // Out of range variants built by hand still get a finite factor.
                let factor = 10f64.powi((*n).min(MAX_MOBILITY_DECIMALS) as i32);
                (value * factor).round() / factor
            }
        };
        // -0.0 and 0.0 are one bucket.
        if value == 0.0 { 0.0 } else { value }
    }
}

/// Summed intensity per mobility value, ascending by mobility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MobilityProfile {
    buckets: BTreeMap<OrderedFloat<f64>, f64>,
    precision: MobilityPrecision,
}

impl MobilityProfile {
    pub fn new(precision: MobilityPrecision) -> Self {
        Self {
            buckets: BTreeMap::new(),
            precision,
        }
    }

    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (f64, f64)>,
        precision: MobilityPrecision,
    ) -> Self {
        let mut out = Self::new(precision);
        for (mobility, intensity) in pairs {
            out.add(mobility, intensity);
        }
        out
    }

    pub fn add(&mut self, mobility: f64, intensity: f64) {
        let key = OrderedFloat(self.precision.key(mobility));
        *self.buckets.entry(key).or_insert(0.0) += intensity;
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.buckets.iter().map(|(k, v)| (k.0, *v))
    }

    pub fn get(&self, mobility: f64) -> Option<f64> {
        self.buckets
            .get(&OrderedFloat(self.precision.key(mobility)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn precision(&self) -> MobilityPrecision {
        self.precision
    }

    pub fn total_intensity(&self) -> f64 {
        self.buckets.values().sum()
    }
}

/// Which physical quantity the key column holds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MobilityAxis {
    #[default]
    InverseMobility,
    Ccs,
}

impl MobilityAxis {
    pub fn column_name(&self) -> &'static str {
        match self {
            MobilityAxis::InverseMobility => "Mobility",
            MobilityAxis::Ccs => "CCS",
        }
    }
}

/// One acquisition's profile together with how it will be labeled in the table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub folder_name: String,
    pub label: ActivationLabel,
    pub axis: MobilityAxis,
    pub profile: MobilityProfile,
}

impl ExtractionResult {
    pub fn new(folder_name: String, label: ActivationLabel, profile: MobilityProfile) -> Self {
        Self {
            folder_name,
            label,
            axis: MobilityAxis::InverseMobility,
            profile,
        }
    }

    pub fn into_ccs<R: RawDataReader>(
        self,
        reader: &R,
        settings: &CcsSettings,
    ) -> Result<Self, ReaderError> {
        let profile = settings.convert_profile(reader, &self.profile)?;
        Ok(Self {
            axis: MobilityAxis::Ccs,
            profile,
            ..self
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ExtractionStats {
    frames: u32,
    scans_read: u64,
    scans_with_signal: u64,
}

/// Builds the mobility profile of one acquisition inside an m/z window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumExtractor {
    pub window: MzWindow,
    pub options: OpenOptions,
    pub precision: MobilityPrecision,
}

impl SpectrumExtractor {
    pub fn new(window: MzWindow) -> Self {
        Self {
            window,
            options: OpenOptions::default(),
            precision: MobilityPrecision::default(),
        }
    }

    pub fn with_options(mut self, options: OpenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_precision(mut self, precision: MobilityPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Opens the acquisition, extracts it and releases the handle, on success or failure.
    #[instrument(skip(self, reader), fields(folder = %acquisition.folder_name))]
    pub fn extract<R: RawDataReader>(
        &self,
        reader: &R,
        acquisition: &Acquisition,
    ) -> Result<MobilityProfile, ExtractionError> {
        let to_err = |source| ExtractionError {
            acquisition: acquisition.path.clone(),
            source,
        };
        let mut handle = reader
            .open(&acquisition.path, &self.options)
            .map_err(to_err)?;
        self.extract_from_handle(&mut handle).map_err(to_err)
    }

    pub fn extract_from_handle<H: AcquisitionHandle>(
        &self,
        handle: &mut H,
    ) -> Result<MobilityProfile, ReaderError> {
        let mut profile = MobilityProfile::new(self.precision);
        let mut stats = ExtractionStats {
            frames: handle.frame_count()?,
            ..Default::default()
        };

        for frame_id in 1..=stats.frames {
            let num_scans = handle.scan_count(frame_id)?;
            if num_scans == 0 {
                continue;
            }
            let scans = handle.read_scans(frame_id, 0, num_scans)?;
            stats.scans_read += scans.len() as u64;

            for (scan_idx, scan) in scans.iter().enumerate() {
                if scan.is_empty() {
                    continue;
                }
                let mzs = handle.index_to_mz(frame_id, &scan.indices)?;
                let mut survivors = 0usize;
                let mut summed = 0.0;
                for (mz, intensity) in mzs.iter().zip(scan.intensities.iter()) {
                    if self.window.contains(*mz) {
                        survivors += 1;
                        summed += *intensity as f64;
                    }
                }
                if survivors == 0 {
                    continue;
                }
                stats.scans_with_signal += 1;
                let mobility = handle.scan_to_mobility(frame_id, scan_idx as u32)?;
                profile.add(mobility, summed);
            }
        }

        debug!(
            "Read {} frames / {} scans, {} scans in window, {} mobility buckets",
            stats.frames,
            stats.scans_read,
            stats.scans_with_signal,
            profile.len()
        );
        Ok(profile)
    }
}
