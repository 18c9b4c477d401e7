use super::{
    AcquisitionHandle,
    OpenOptions,
    RawDataReader,
    RawScan,
};
use crate::ccs::one_over_k0_to_ccs;
use crate::errors::ReaderError;
use std::collections::HashMap;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use std::sync::Arc;

/// Linear index to m/z mapping: `mz = intercept + slope * index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MzCalibration {
    pub intercept: f64,
    pub slope: f64,
}

impl Default for MzCalibration {
    fn default() -> Self {
        // index == m/z, handy for writing exact boundaries in tests.
        Self {
            intercept: 0.0,
            slope: 1.0,
        }
    }
}

impl MzCalibration {
    pub fn convert(&self, index: u32) -> f64 {
        self.intercept + self.slope * index as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScan {
    pub mobility: f64,
    /// (index, intensity) pairs.
    pub peaks: Vec<(u32, u32)>,
}

impl SyntheticScan {
    pub fn new(mobility: f64, peaks: Vec<(u32, u32)>) -> Self {
        Self { mobility, peaks }
    }

    pub fn empty(mobility: f64) -> Self {
        Self::new(mobility, Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticFrame {
    pub calibration: MzCalibration,
    pub scans: Vec<SyntheticScan>,
}

impl SyntheticFrame {
    pub fn new(scans: Vec<SyntheticScan>) -> Self {
        Self {
            calibration: MzCalibration::default(),
            scans,
        }
    }

    pub fn with_calibration(mut self, calibration: MzCalibration) -> Self {
        self.calibration = calibration;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticAcquisition {
    pub frames: Vec<SyntheticFrame>,
    open_failure: Option<String>,
    failing_frame: Option<u32>,
}

impl SyntheticAcquisition {
    pub fn new(frames: Vec<SyntheticFrame>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// One frame, one scan: the smallest acquisition with signal.
    pub fn single_scan(mobility: f64, mz_index: u32, intensity: u32) -> Self {
        Self::new(vec![SyntheticFrame::new(vec![SyntheticScan::new(
            mobility,
            vec![(mz_index, intensity)],
        )])])
    }

    /// An acquisition that cannot be opened.
    pub fn unreadable(message: impl Into<String>) -> Self {
        Self {
            open_failure: Some(message.into()),
            ..Default::default()
        }
    }

    /// Reading the given frame fails after the acquisition was opened.
    pub fn failing_at_frame(mut self, frame_id: u32) -> Self {
        self.failing_frame = Some(frame_id);
        self
    }
}

/// Serves synthetic acquisitions keyed by path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReader {
    acquisitions: HashMap<PathBuf, Arc<SyntheticAcquisition>>,
    open_handles: Arc<AtomicUsize>,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, acquisition: SyntheticAcquisition) {
        self.acquisitions.insert(path.into(), Arc::new(acquisition));
    }

    pub fn with_acquisition(
        mut self,
        path: impl Into<PathBuf>,
        acquisition: SyntheticAcquisition,
    ) -> Self {
        self.insert(path, acquisition);
        self
    }

    /// Number of handles currently alive.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

impl RawDataReader for InMemoryReader {
    type Handle = InMemoryHandle;

    fn open(&self, path: &Path, _options: &OpenOptions) -> Result<Self::Handle, ReaderError> {
        let acquisition = self
            .acquisitions
            .get(path)
            .ok_or_else(|| ReaderError::Open {
                path: path.to_path_buf(),
                message: "no such acquisition".to_string(),
            })?;
        if let Some(message) = &acquisition.open_failure {
            return Err(ReaderError::Open {
                path: path.to_path_buf(),
                message: message.clone(),
            });
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryHandle {
            acquisition: acquisition.clone(),
            open_handles: self.open_handles.clone(),
        })
    }

    fn mobility_to_ccs(
        &self,
        mobility: f64,
        charge: i32,
        reference_mz: f64,
    ) -> Result<f64, ReaderError> {
        Ok(one_over_k0_to_ccs(mobility, reference_mz, charge))
    }
}

pub struct InMemoryHandle {
    acquisition: Arc<SyntheticAcquisition>,
    open_handles: Arc<AtomicUsize>,
}

impl InMemoryHandle {
    fn frame(&self, frame_id: u32) -> Result<&SyntheticFrame, ReaderError> {
        if self.acquisition.failing_frame == Some(frame_id) {
            return Err(ReaderError::Read {
                frame_id,
                message: "injected decode failure".to_string(),
            });
        }
        let frame_count = self.acquisition.frames.len() as u32;
        if frame_id == 0 || frame_id > frame_count {
            return Err(ReaderError::FrameOutOfRange {
                frame_id,
                frame_count,
            });
        }
        Ok(&self.acquisition.frames[(frame_id - 1) as usize])
    }

    fn scan(&self, frame_id: u32, scan: u32) -> Result<&SyntheticScan, ReaderError> {
        let frame = self.frame(frame_id)?;
        frame
            .scans
            .get(scan as usize)
            .ok_or(ReaderError::ScanOutOfRange {
                frame_id,
                begin: scan,
                end: scan + 1,
                scan_count: frame.scans.len() as u32,
            })
    }
}

impl AcquisitionHandle for InMemoryHandle {
    fn frame_count(&mut self) -> Result<u32, ReaderError> {
        Ok(self.acquisition.frames.len() as u32)
    }

    fn scan_count(&mut self, frame_id: u32) -> Result<u32, ReaderError> {
        Ok(self.frame(frame_id)?.scans.len() as u32)
    }

    fn read_scans(
        &mut self,
        frame_id: u32,
        scan_begin: u32,
        scan_end: u32,
    ) -> Result<Vec<RawScan>, ReaderError> {
        let frame = self.frame(frame_id)?;
        let scan_count = frame.scans.len() as u32;
        if scan_begin > scan_end || scan_end > scan_count {
            return Err(ReaderError::ScanOutOfRange {
                frame_id,
                begin: scan_begin,
                end: scan_end,
                scan_count,
            });
        }
        Ok(frame.scans[scan_begin as usize..scan_end as usize]
            .iter()
            .map(|scan| {
                let (indices, intensities) = scan.peaks.iter().copied().unzip();
                RawScan {
                    indices,
                    intensities,
                }
            })
            .collect())
    }

    fn index_to_mz(&mut self, frame_id: u32, indices: &[u32]) -> Result<Vec<f64>, ReaderError> {
        let calibration = self.frame(frame_id)?.calibration;
        Ok(indices.iter().map(|&i| calibration.convert(i)).collect())
    }

    fn scan_to_mobility(&mut self, frame_id: u32, scan: u32) -> Result<f64, ReaderError> {
        Ok(self.scan(frame_id, scan)?.mobility)
    }
}

impl Drop for InMemoryHandle {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_counted_and_released() {
        let reader = InMemoryReader::new()
            .with_acquisition("/a.d", SyntheticAcquisition::single_scan(0.9, 10, 5));
        {
            let _handle = reader.open(Path::new("/a.d"), &OpenOptions::default()).unwrap();
            assert_eq!(reader.open_handles(), 1);
        }
        assert_eq!(reader.open_handles(), 0);
    }

    #[test]
    fn test_unknown_and_unreadable_paths_fail_to_open() {
        let reader = InMemoryReader::new()
            .with_acquisition("/bad.d", SyntheticAcquisition::unreadable("corrupt tdf"));
        let opts = OpenOptions::default();
        assert!(matches!(
            reader.open(Path::new("/missing.d"), &opts),
            Err(ReaderError::Open { .. })
        ));
        let err = reader.open(Path::new("/bad.d"), &opts).err().unwrap();
        assert!(err.to_string().contains("corrupt tdf"));
        assert_eq!(reader.open_handles(), 0);
    }

    #[test]
    fn test_read_scans_and_conversions() {
        let frame = SyntheticFrame::new(vec![
            SyntheticScan::new(1.1, vec![(100, 1), (200, 2)]),
            SyntheticScan::empty(1.0),
        ])
        .with_calibration(MzCalibration {
            intercept: 50.0,
            slope: 0.5,
        });
        let reader =
            InMemoryReader::new().with_acquisition("/a.d", SyntheticAcquisition::new(vec![frame]));
        let mut handle = reader.open(Path::new("/a.d"), &OpenOptions::default()).unwrap();

        assert_eq!(handle.frame_count().unwrap(), 1);
        assert_eq!(handle.scan_count(1).unwrap(), 2);
        let scans = handle.read_scans(1, 0, 2).unwrap();
        assert_eq!(scans[0].indices, vec![100, 200]);
        assert_eq!(scans[0].intensities, vec![1, 2]);
        assert!(scans[1].is_empty());
        assert_eq!(handle.read_scan(1, 0).unwrap(), scans[0]);
        assert_eq!(handle.index_to_mz(1, &[100, 200]).unwrap(), vec![100.0, 150.0]);
        assert_eq!(handle.scan_to_mobility(1, 1).unwrap(), 1.0);
        assert!(handle.read_scans(1, 0, 3).is_err());
        assert!(handle.scan_count(2).is_err());
    }
}
