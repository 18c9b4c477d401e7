use super::{
    AcquisitionHandle,
    OpenOptions,
    RawDataReader,
    RawScan,
};
use crate::ccs::one_over_k0_to_ccs;
use crate::errors::ReaderError;
use std::path::Path;
use timsrust::converters::{
    ConvertableDomain,
    Scan2ImConverter,
    Tof2MzConverter,
};
use timsrust::readers::{
    FrameReader,
    MetadataReader,
};
use timsrust::Frame;
use tracing::warn;

/// Reads `.d` folders with `timsrust`.
///
/// The global m/z and mobility calibrations stored in `analysis.tdf` are used
/// for every frame. Recalibrated state and pressure compensation only exist in
/// the vendor library, so they are ignored here.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeReader;

pub struct NativeHandle {
    frame_reader: FrameReader,
    mz_converter: Tof2MzConverter,
    im_converter: Scan2ImConverter,
    // Extraction walks frames in order, so keeping the last one decoded
    // avoids decoding a frame once per scan.
    current: Option<Frame>,
}

impl RawDataReader for NativeReader {
    type Handle = NativeHandle;

    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Self::Handle, ReaderError> {
        if *options != OpenOptions::default() {
            warn!(
                "Native reader ignores recalibration/pressure compensation settings ({:?}) for {}",
                options,
                path.display()
            );
        }
        let open_err = |message: String| ReaderError::Open {
            path: path.to_path_buf(),
            message,
        };
        let metadata = MetadataReader::new(path.join("analysis.tdf"))
            .map_err(|e| open_err(format!("Failed to read TDF metadata: {e}")))?;
        let frame_reader = FrameReader::new(path)
            .map_err(|e| open_err(format!("Failed to open TDF frames: {e}")))?;

        Ok(NativeHandle {
            frame_reader,
            mz_converter: metadata.mz_converter,
            im_converter: metadata.im_converter,
            current: None,
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

impl NativeHandle {
    fn frame(&mut self, frame_id: u32) -> Result<&Frame, ReaderError> {
        let frame_count = self.frame_reader.len() as u32;
        if frame_id == 0 || frame_id > frame_count {
            return Err(ReaderError::FrameOutOfRange {
                frame_id,
                frame_count,
            });
        }
        let index = (frame_id - 1) as usize;
        let cached = matches!(&self.current, Some(frame) if frame.index == index);
        if !cached {
            let frame = self
                .frame_reader
                .get(index)
                .map_err(|e| ReaderError::Read {
                    frame_id,
                    message: e.to_string(),
                })?;
            self.current = Some(frame);
        }
        self.current.as_ref().ok_or(ReaderError::Read {
            frame_id,
            message: "frame cache is empty".to_string(),
        })
    }
}

impl AcquisitionHandle for NativeHandle {
    fn frame_count(&mut self) -> Result<u32, ReaderError> {
        Ok(self.frame_reader.len() as u32)
    }

    fn scan_count(&mut self, frame_id: u32) -> Result<u32, ReaderError> {
        let frame = self.frame(frame_id)?;
        Ok(frame.scan_offsets.len().saturating_sub(1) as u32)
    }

    fn read_scans(
        &mut self,
        frame_id: u32,
        scan_begin: u32,
        scan_end: u32,
    ) -> Result<Vec<RawScan>, ReaderError> {
        let frame = self.frame(frame_id)?;
        let scan_count = frame.scan_offsets.len().saturating_sub(1) as u32;
        if scan_begin > scan_end || scan_end > scan_count {
            return Err(ReaderError::ScanOutOfRange {
                frame_id,
                begin: scan_begin,
                end: scan_end,
                scan_count,
            });
        }

        let scans = (scan_begin as usize..scan_end as usize)
            .map(|scan| {
                let start = frame.scan_offsets[scan];
                let end = frame.scan_offsets[scan + 1];
                RawScan {
                    indices: frame.tof_indices[start..end].to_vec(),
                    intensities: frame.intensities[start..end].to_vec(),
                }
            })
            .collect();
        Ok(scans)
    }

    fn index_to_mz(&mut self, _frame_id: u32, indices: &[u32]) -> Result<Vec<f64>, ReaderError> {
        Ok(indices
            .iter()
            .map(|&tof| self.mz_converter.convert(tof as f64))
            .collect())
    }

    fn scan_to_mobility(&mut self, _frame_id: u32, scan: u32) -> Result<f64, ReaderError> {
        Ok(self.im_converter.convert(scan as f64))
    }
}
