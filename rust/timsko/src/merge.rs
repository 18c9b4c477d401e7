use crate::extraction::{
    ExtractionResult,
    MobilityAxis,
    MzWindow,
};
use crate::labels::ActivationLabel;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::{
    BTreeMap,
    HashSet,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    debug,
    warn,
};

pub const MZ_RANGE_MARKER: &str = "#mz range";
pub const RAW_FILE_MARKER: &str = "#Raw file name";

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub label: ActivationLabel,
    pub folder_name: String,
}

/// Outer join of every merged acquisition, keyed by mobility.
///
/// Rows are kept in ascending key order. Cells stay unset until [`MasterTable::finalize`].
#[derive(Debug, Clone)]
pub struct MasterTable {
    window: MzWindow,
    axis: MobilityAxis,
    columns: Vec<TableColumn>,
    rows: BTreeMap<OrderedFloat<f64>, Vec<Option<f64>>>,
    seen_labels: HashSet<String>,
}

impl MasterTable {
    pub fn new(window: MzWindow) -> Self {
        Self {
            window,
            axis: MobilityAxis::InverseMobility,
            columns: Vec::new(),
            rows: BTreeMap::new(),
            seen_labels: HashSet::new(),
        }
    }

    /// Folds one acquisition into the table as a new column and returns the
    /// label it was stored under.
    pub fn merge(&mut self, result: ExtractionResult) -> &ActivationLabel {
        let label = self.unique_label(&result.label, &result.folder_name);
        if result.axis == MobilityAxis::Ccs {
            self.axis = MobilityAxis::Ccs;
        }

        let column = self.columns.len();
        let mut new_rows = 0usize;
        for (key, intensity) in result.profile.iter() {
            let row = self.rows.entry(OrderedFloat(key)).or_insert_with(|| {
                new_rows += 1;
                Vec::new()
            });
            row.resize(column + 1, None);
            row[column] = Some(intensity);
        }
        debug!(
            "Merged '{}' from {}: {} values, {} new rows, {} rows total",
            label,
            result.folder_name,
            result.profile.len(),
            new_rows,
            self.rows.len()
        );

        self.seen_labels.insert(label.display().to_string());
        self.columns.push(TableColumn {
            label,
            folder_name: result.folder_name,
        });
        &self.columns[column].label
    }

    fn unique_label(&self, label: &ActivationLabel, folder_name: &str) -> ActivationLabel {
        if !self.seen_labels.contains(label.display()) {
            return label.clone();
        }
        let mut n = 2;
        loop {
            let candidate = label.with_suffix(n);
            if !self.seen_labels.contains(candidate.display()) {
                warn!(
                    "Label '{}' of {} is already used, storing it as '{}'",
                    label, folder_name, candidate
                );
                return candidate;
            }
            n += 1;
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn axis(&self) -> MobilityAxis {
        self.axis
    }

    /// Fills unset cells with zero and optionally orders columns by the
    /// numeric prefix of their label. Ties keep merge order.
    pub fn finalize(self, sort_columns: bool) -> FinalTable {
        let mut order: Vec<usize> = (0..self.columns.len()).collect();
        if sort_columns {
            order.sort_by(|&a, &b| {
                compare_sort_keys(
                    self.columns[a].label.numeric(),
                    self.columns[b].label.numeric(),
                )
            });
        }

        let rows = self
            .rows
            .into_iter()
            .map(|(key, cells)| {
                let values = order
                    .iter()
                    .map(|&i| cells.get(i).copied().flatten().unwrap_or(0.0))
                    .collect();
                (key.0, values)
            })
            .collect();
        let columns = order.iter().map(|&i| self.columns[i].clone()).collect();

        FinalTable {
            window: self.window,
            axis: self.axis,
            columns,
            rows,
        }
    }
}

fn compare_sort_keys(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// `<min>-<max>` with both bounds always carrying a fractional part.
pub fn format_mz_range(window: &MzWindow) -> String {
    format!("{:?}-{:?}", window.start(), window.end())
}

/// `<folder base name>_mz<min>-<max>_raw.csv` inside `folder`, bounds truncated.
pub fn output_file_path(folder: &Path, window: &MzWindow) -> PathBuf {
    let base = folder
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    folder.join(format!(
        "{}_mz{}-{}_raw.csv",
        base,
        window.start().trunc() as i64,
        window.end().trunc() as i64
    ))
}

/// The emitted table: three header rows followed by zero-filled data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalTable {
    window: MzWindow,
    axis: MobilityAxis,
    columns: Vec<TableColumn>,
    rows: Vec<(f64, Vec<f64>)>,
}

impl FinalTable {
    pub fn key_column(&self) -> &'static str {
        self.axis.column_name()
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn column_labels(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.label.display()).collect()
    }

    pub fn folder_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.folder_name.as_str()).collect()
    }

    pub fn rows(&self) -> &[(f64, Vec<f64>)] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header_rows(&self) -> [Vec<String>; 3] {
        let mz_range = format_mz_range(&self.window);
        let mut mz_row = vec![MZ_RANGE_MARKER.to_string()];
        let mut folder_row = vec![RAW_FILE_MARKER.to_string()];
        let mut label_row = vec![self.key_column().to_string()];
        for column in &self.columns {
            mz_row.push(mz_range.clone());
            folder_row.push(column.folder_name.clone());
            label_row.push(column.label.display().to_string());
        }
        [mz_row, folder_row, label_row]
    }

    pub fn data_rows(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows.iter().map(|(key, values)| {
            std::iter::once(key.to_string())
                .chain(values.iter().map(|v| v.to_string()))
                .collect()
        })
    }

    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        for row in self.header_rows() {
            wtr.write_record(&row)?;
        }
        for row in self.data_rows() {
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv_file(&self, path: &Path) -> Result<(), csv::Error> {
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}
