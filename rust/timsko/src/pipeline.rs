use crate::ccs::CcsSettings;
use crate::errors::{
    ExtractionError,
    RunError,
    WindowError,
};
use crate::extraction::{
    ExtractionResult,
    MobilityPrecision,
    MzWindow,
    SpectrumExtractor,
};
use crate::labels::{
    ActivationLabel,
    LabelStrategy,
    resolve_label_or_fallback,
};
use crate::merge::{
    MasterTable,
    output_file_path,
};
use crate::observer::ProgressObserver;
use crate::reader::{
    Acquisition,
    OpenOptions,
    RawDataReader,
};
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};
use std::time::Instant;
use tracing::{
    error,
    info,
    instrument,
    warn,
};

pub const STATUS_COMPLETE: &str = "Processing complete";
pub const STATUS_NO_DATA: &str = "No data to process.";

fn default_true() -> bool {
    true
}

/// Everything one folder run needs besides the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub mz_min: f64,
    pub mz_max: f64,
    #[serde(default)]
    pub label_strategy: LabelStrategy,
    #[serde(default = "default_true")]
    pub sort_columns: bool,
    #[serde(default)]
    pub ccs: Option<CcsSettings>,
    #[serde(default)]
    pub open_options: OpenOptions,
    #[serde(default)]
    pub mobility_precision: MobilityPrecision,
    #[serde(default)]
    pub parallel_extraction: bool,
}

impl RunParameters {
    pub fn new(mz_min: f64, mz_max: f64) -> Self {
        Self {
            mz_min,
            mz_max,
            label_strategy: LabelStrategy::default(),
            sort_columns: true,
            ccs: None,
            open_options: OpenOptions::default(),
            mobility_precision: MobilityPrecision::default(),
            parallel_extraction: false,
        }
    }

    pub fn window(&self) -> Result<MzWindow, WindowError> {
        MzWindow::try_new(self.mz_min, self.mz_max)
    }

    pub fn extractor(&self) -> Result<SpectrumExtractor, WindowError> {
        Ok(SpectrumExtractor::new(self.window()?)
            .with_options(self.open_options)
            .with_precision(self.mobility_precision))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedAcquisition {
    pub folder_name: String,
    pub label: ActivationLabel,
    pub buckets: usize,
}

/// An acquisition left out of the table, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedAcquisition {
    pub folder_name: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub folder: PathBuf,
    pub output_path: PathBuf,
    pub merged: Vec<MergedAcquisition>,
    pub excluded: Vec<ExcludedAcquisition>,
    pub rows: usize,
    pub columns: usize,
}

/// Immediate subdirectories of `folder`, ordered by name.
pub fn discover_acquisitions(folder: &Path) -> Result<Vec<Acquisition>, RunError> {
    let discovery_err = |source| RunError::Discovery {
        folder: folder.to_path_buf(),
        source,
    };
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(discovery_err)? {
        let entry = entry.map_err(discovery_err)?;
        if entry.file_type().map_err(discovery_err)?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(dirs.into_iter().map(Acquisition::from_path).collect())
}

fn process_acquisition<R: RawDataReader>(
    reader: &R,
    extractor: &SpectrumExtractor,
    params: &RunParameters,
    acquisition: &Acquisition,
) -> Result<ExtractionResult, ExtractionError> {
    let label = resolve_label_or_fallback(&acquisition.path, params.label_strategy);
    let profile = extractor.extract(reader, acquisition)?;
    let result = ExtractionResult::new(acquisition.folder_name.clone(), label, profile);
    match &params.ccs {
        Some(settings) => result
            .into_ccs(reader, settings)
            .map_err(|source| ExtractionError {
                acquisition: acquisition.path.clone(),
                source,
            }),
        None => Ok(result),
    }
}

/// Extracts every acquisition under `folder`, merges them and writes the table
/// next to them.
///
/// A failing acquisition is excluded and listed in the report. The run itself
/// only fails on bad parameters, an unreadable folder, an empty table or a
/// failed write.
#[instrument(skip(reader, params, observer), fields(folder = %folder.display()))]
pub fn run_folder<R: RawDataReader + Sync>(
    reader: &R,
    folder: &Path,
    params: &RunParameters,
    observer: &dyn ProgressObserver,
) -> Result<RunReport, RunError> {
    let st = Instant::now();
    let extractor = params.extractor()?;
    let acquisitions = discover_acquisitions(folder)?;
    info!(
        "Found {} acquisitions in {}",
        acquisitions.len(),
        folder.display()
    );
    if acquisitions.is_empty() {
        observer.on_status(STATUS_NO_DATA);
        error!("No acquisitions found in {}", folder.display());
        return Err(RunError::NoData {
            folder: folder.to_path_buf(),
            excluded: Vec::new(),
        });
    }

    // Extraction may run in parallel but merging is always in discovery order.
    let total = acquisitions.len();
    let mut prefetched = if params.parallel_extraction {
        acquisitions
            .par_iter()
            .map(|acq| Some(process_acquisition(reader, &extractor, params, acq)))
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    let mut table = MasterTable::new(extractor.window);
    let mut merged = Vec::new();
    let mut excluded = Vec::new();
    for (idx, acquisition) in acquisitions.iter().enumerate() {
        observer.on_status(&format!("Processing folder: {}", acquisition.folder_name));
        let outcome = match prefetched.get_mut(idx).and_then(Option::take) {
            Some(outcome) => outcome,
            None => process_acquisition(reader, &extractor, params, acquisition),
        };
        match outcome {
            Ok(result) => {
                let buckets = result.profile.len();
                let label = table.merge(result).clone();
                merged.push(MergedAcquisition {
                    folder_name: acquisition.folder_name.clone(),
                    label,
                    buckets,
                });
            }
            Err(e) => {
                warn!("Excluding {}: {}", acquisition.folder_name, e);
                excluded.push(ExcludedAcquisition {
                    folder_name: acquisition.folder_name.clone(),
                    path: acquisition.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
        observer.on_progress((idx + 1) as f64 / total as f64);
    }

    if table.is_empty() {
        observer.on_status(STATUS_NO_DATA);
        error!(
            "No signal in {:?} for any of the {} acquisitions in {} ({} excluded)",
            extractor.window,
            total,
            folder.display(),
            excluded.len()
        );
        return Err(RunError::NoData {
            folder: folder.to_path_buf(),
            excluded,
        });
    }

    let final_table = table.finalize(params.sort_columns);
    let output_path = output_file_path(folder, &extractor.window);
    final_table
        .write_csv_file(&output_path)
        .map_err(|source| RunError::Output {
            path: output_path.clone(),
            source,
        })?;

    info!(
        "Wrote {} rows x {} columns to {} in {:?} ({} excluded)",
        final_table.row_count(),
        final_table.columns().len(),
        output_path.display(),
        st.elapsed(),
        excluded.len()
    );
    observer.on_status(STATUS_COMPLETE);

    Ok(RunReport {
        folder: folder.to_path_buf(),
        output_path,
        merged,
        excluded,
        rows: final_table.row_count(),
        columns: final_table.columns().len(),
    })
}
