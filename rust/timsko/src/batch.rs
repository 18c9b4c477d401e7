//! Batch mode: one folder run per row of a CSV job table.

use crate::ccs::CcsSettings;
use crate::errors::{
    BatchJobError,
    BatchTableError,
    RunError,
};
use crate::labels::LabelStrategy;
use crate::observer::{
    ProgressObserver,
    SubRangeObserver,
};
use crate::pipeline::{
    RunParameters,
    RunReport,
    run_folder,
};
use crate::reader::{
    OpenOptions,
    PressureCompensation,
    RawDataReader,
};
use serde::Deserialize;
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    error,
    info,
    instrument,
};

pub const COL_PARENT_FOLDER: &str = "Parent Folder";
pub const COL_MZ_MIN: &str = "mzmin";
pub const COL_MZ_MAX: &str = "mzmax";
pub const COL_EXTRACTION_METHOD: &str = "Extraction Method";
pub const COL_SORT_COLUMNS: &str = "Sort Columns";
pub const COL_CONVERT_TO_CCS: &str = "Convert to CCS";
pub const COL_CHARGE: &str = "Charge";
pub const COL_REFERENCE_MZ: &str = "mz";
pub const COL_USE_RECALIBRATED: &str = "Use Recalibrated State";
pub const COL_PRESSURE_COMPENSATION: &str = "Pressure Compensation Strategy";

const REQUIRED_COLUMNS: [&str; 6] = [
    COL_PARENT_FOLDER,
    COL_MZ_MIN,
    COL_MZ_MAX,
    COL_EXTRACTION_METHOD,
    COL_SORT_COLUMNS,
    COL_CONVERT_TO_CCS,
];

pub const STATUS_BATCH_COMPLETE: &str = "Batch processing complete";

/// One row of the job table, as written. Validated by [`BatchRow::to_job`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchRow {
    #[serde(skip)]
    pub row: usize,
    #[serde(rename = "Parent Folder", default)]
    pub parent_folder: Option<String>,
    #[serde(rename = "mzmin", default)]
    pub mz_min: Option<String>,
    #[serde(rename = "mzmax", default)]
    pub mz_max: Option<String>,
    #[serde(rename = "Extraction Method", default)]
    pub extraction_method: Option<String>,
    #[serde(rename = "Sort Columns", default)]
    pub sort_columns: Option<String>,
    #[serde(rename = "Convert to CCS", default)]
    pub convert_to_ccs: Option<String>,
    #[serde(rename = "Charge", default)]
    pub charge: Option<String>,
    #[serde(rename = "mz", default)]
    pub reference_mz: Option<String>,
    #[serde(rename = "Use Recalibrated State", default)]
    pub use_recalibrated_state: Option<String>,
    #[serde(rename = "Pressure Compensation Strategy", default)]
    pub pressure_compensation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub row: usize,
    pub folder: PathBuf,
    pub params: RunParameters,
}

/// `true/false`, `1/0`, `yes/no`, any case. Blank is `None`.
pub fn parse_flag(value: &str) -> Result<Option<bool>, String> {
    let v = value.trim().to_ascii_lowercase();
    match v.as_str() {
        "" => Ok(None),
        "true" | "1" | "1.0" | "yes" | "y" => Ok(Some(true)),
        "false" | "0" | "0.0" | "no" | "n" => Ok(Some(false)),
        _ => Err(format!("'{}' is not a boolean", value)),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl BatchRow {
    fn invalid(&self, message: impl Into<String>) -> BatchJobError {
        BatchJobError::InvalidRow {
            row: self.row,
            message: message.into(),
        }
    }

    fn required<'a>(
        &self,
        value: &'a Option<String>,
        column: &str,
    ) -> Result<&'a str, BatchJobError> {
        non_blank(value).ok_or_else(|| self.invalid(format!("'{}' is empty", column)))
    }

    fn number<T: std::str::FromStr>(
        &self,
        value: &str,
        column: &str,
    ) -> Result<T, BatchJobError> {
        value
            .parse::<T>()
            .map_err(|_| self.invalid(format!("'{}' is not a valid {}", value, column)))
    }

    fn flag(&self, value: &Option<String>, column: &str) -> Result<Option<bool>, BatchJobError> {
        match non_blank(value) {
            Some(v) => parse_flag(v).map_err(|e| self.invalid(format!("{}: {}", column, e))),
            None => Ok(None),
        }
    }

    fn charge(&self) -> Result<Option<i32>, BatchJobError> {
        let Some(value) = non_blank(&self.charge) else {
            return Ok(None);
        };
        // Spreadsheets like to write integers as `2.0`.
        let charge: f64 = self.number(value, COL_CHARGE)?;
        if charge.fract() != 0.0 || charge.abs() > i32::MAX as f64 {
            return Err(self.invalid(format!("'{}' is not a valid {}", value, COL_CHARGE)));
        }
        Ok(Some(charge as i32))
    }

    /// Builds the run this row describes. Settings the table has no column
    /// for come from `template`.
    pub fn to_job(&self, template: &RunParameters) -> Result<BatchJob, BatchJobError> {
        let folder = PathBuf::from(self.required(&self.parent_folder, COL_PARENT_FOLDER)?);
        let mz_min: f64 = self.number(self.required(&self.mz_min, COL_MZ_MIN)?, COL_MZ_MIN)?;
        let mz_max: f64 = self.number(self.required(&self.mz_max, COL_MZ_MAX)?, COL_MZ_MAX)?;
        let label_strategy: LabelStrategy = self
            .required(&self.extraction_method, COL_EXTRACTION_METHOD)?
            .parse()
            .map_err(|e: String| self.invalid(e))?;
        let sort_columns = self
            .flag(&self.sort_columns, COL_SORT_COLUMNS)?
            .ok_or_else(|| self.invalid(format!("'{}' is empty", COL_SORT_COLUMNS)))?;
        let convert_to_ccs = self
            .flag(&self.convert_to_ccs, COL_CONVERT_TO_CCS)?
            .ok_or_else(|| self.invalid(format!("'{}' is empty", COL_CONVERT_TO_CCS)))?;

        let ccs = if convert_to_ccs {
            let reference_mz = match non_blank(&self.reference_mz) {
                Some(v) => Some(self.number::<f64>(v, COL_REFERENCE_MZ)?),
                None => None,
            };
            let settings = CcsSettings::from_parts(self.charge()?, reference_mz).map_err(|e| {
                BatchJobError::Run {
                    row: self.row,
                    folder: folder.clone(),
                    source: RunError::Ccs(e),
                }
            })?;
            Some(settings)
        } else {
            None
        };

        let defaults = OpenOptions::default();
        let open_options = OpenOptions {
            use_recalibrated_state: self
                .flag(&self.use_recalibrated_state, COL_USE_RECALIBRATED)?
                .unwrap_or(defaults.use_recalibrated_state),
            pressure_compensation: match non_blank(&self.pressure_compensation) {
                Some(v) => v
                    .parse::<PressureCompensation>()
                    .map_err(|e| self.invalid(e))?,
                None => defaults.pressure_compensation,
            },
        };

        Ok(BatchJob {
            row: self.row,
            folder,
            params: RunParameters {
                mz_min,
                mz_max,
                label_strategy,
                sort_columns,
                ccs,
                open_options,
                ..template.clone()
            },
        })
    }
}

/// Reads a job table. Relative `Parent Folder` paths are taken relative to
/// the table's own directory.
pub fn read_batch_table(path: &Path) -> Result<Vec<BatchRow>, BatchTableError> {
    let csv_err = |source| BatchTableError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = rdr.headers().map_err(csv_err)?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(BatchTableError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut rows = Vec::new();
    for (i, record) in rdr.deserialize::<BatchRow>().enumerate() {
        let mut row = record.map_err(csv_err)?;
        row.row = i + 1;
        if let Some(folder) = non_blank(&row.parent_folder) {
            let folder = Path::new(folder);
            if folder.is_relative() {
                row.parent_folder = Some(base_dir.join(folder).to_string_lossy().to_string());
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// A template table with every column and one example row.
pub fn write_batch_template<W: std::io::Write>(writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        COL_PARENT_FOLDER,
        COL_MZ_MIN,
        COL_MZ_MAX,
        COL_EXTRACTION_METHOD,
        COL_SORT_COLUMNS,
        COL_CONVERT_TO_CCS,
        COL_CHARGE,
        COL_REFERENCE_MZ,
        COL_USE_RECALIBRATED,
        COL_PRESSURE_COMPENSATION,
    ])?;
    wtr.write_record([
        "/path/to/folder_with_d_folders",
        "622.0",
        "623.0",
        LabelStrategy::FileName.as_str(),
        "true",
        "false",
        "",
        "",
        "true",
        PressureCompensation::Global.as_str(),
    ])?;
    wtr.flush()?;
    Ok(())
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub row: usize,
    pub folder: Option<PathBuf>,
    pub result: Result<RunReport, BatchJobError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchJobError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }
}

/// Runs every row in order. A failing row is recorded and the batch moves on.
#[instrument(skip_all, fields(rows = rows.len()))]
pub fn run_batch<R: RawDataReader + Sync>(
    reader: &R,
    rows: &[BatchRow],
    template: &RunParameters,
    observer: &dyn ProgressObserver,
) -> BatchReport {
    let total = rows.len();
    let mut report = BatchReport::default();

    for (idx, row) in rows.iter().enumerate() {
        let folder_text = row.parent_folder.clone().unwrap_or_default();
        observer.on_status(&format!(
            "Processing folder {} ({}/{})",
            folder_text,
            idx + 1,
            total
        ));

        let child = SubRangeObserver::slot(observer, idx, total);
        let result = row.to_job(template).and_then(|job| {
            run_folder(reader, &job.folder, &job.params, &child).map_err(|source| {
                BatchJobError::Run {
                    row: job.row,
                    folder: job.folder.clone(),
                    source,
                }
            })
        });

        if let Err(e) = &result {
            error!("{}", e);
            observer.on_status(&format!("Error processing folder {}: {}", folder_text, e));
        }
        observer.on_progress((idx + 1) as f64 / total as f64);
        report.outcomes.push(BatchOutcome {
            row: row.row,
            folder: non_blank(&row.parent_folder).map(PathBuf::from),
            result,
        });
    }

    info!(
        "Batch finished: {} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
    observer.on_status(STATUS_BATCH_COMPLETE);
    report
}
