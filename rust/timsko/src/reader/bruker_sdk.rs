use super::{
    AcquisitionHandle,
    OpenOptions,
    RawDataReader,
    RawScan,
};
use crate::errors::ReaderError;
use libloading::{
    Library,
    Symbol,
};
use rusqlite::Connection;
use std::ffi::CString;
use std::os::raw::{
    c_char,
    c_double,
};
use std::path::{
    Path,
    PathBuf,
};
use std::sync::Arc;
use tracing::{
    debug,
    warn,
};

// Largest scan buffer (in u32 words) we are willing to allocate for one frame.
const MAX_SCAN_BUFFER_WORDS: usize = 16_777_216;
const INITIAL_SCAN_BUFFER_WORDS: usize = 128;

type OpenFn = unsafe extern "C" fn(*const c_char, u32, u32) -> u64;
type CloseFn = unsafe extern "C" fn(u64);
type LastErrorFn = unsafe extern "C" fn(*mut c_char, u32) -> u32;
type ReadScansFn = unsafe extern "C" fn(u64, i64, u32, u32, *mut u32, u32) -> u32;
type ConvertFn = unsafe extern "C" fn(u64, i64, *const c_double, *mut c_double, u32) -> u32;
type CcsFn = unsafe extern "C" fn(c_double, i32, c_double) -> c_double;

/// Reads `.d` folders through Bruker's `timsdata` shared library.
///
/// The library is loaded once and shared by every handle opened from this reader.
#[derive(Clone)]
pub struct BrukerSdkReader {
    lib: Arc<Library>,
    lib_path: PathBuf,
}

impl std::fmt::Debug for BrukerSdkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrukerSdkReader")
            .field("lib_path", &self.lib_path)
            .finish()
    }
}

impl BrukerSdkReader {
    pub fn new(lib_path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let lib_path = lib_path.as_ref().to_path_buf();
        let lib = unsafe { Library::new(&lib_path) }.map_err(|e| {
            ReaderError::Library(format!(
                "Unable to load {}: {}",
                lib_path.display(),
                e
            ))
        })?;
        debug!("Loaded vendor library from {}", lib_path.display());
        Ok(Self {
            lib: Arc::new(lib),
            lib_path,
        })
    }

    pub fn library_path(&self) -> &Path {
        &self.lib_path
    }
}

fn symbol<'a, T>(lib: &'a Library, name: &[u8]) -> Result<Symbol<'a, T>, ReaderError> {
    unsafe { lib.get(name) }.map_err(|e| {
        ReaderError::Library(format!(
            "Missing symbol {}: {}",
            String::from_utf8_lossy(name),
            e
        ))
    })
}

fn last_error(lib: &Library) -> String {
    let func: Symbol<LastErrorFn> = match symbol(lib, b"tims_get_last_error_string") {
        Ok(f) => f,
        Err(e) => return e.to_string(),
    };
    let mut buf = vec![0u8; 512];
    let len = unsafe { func(buf.as_mut_ptr() as *mut c_char, buf.len() as u32) } as usize;
    buf.truncate(len.min(buf.len()));
    // The reported length includes the trailing nul.
    while buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// `(frame id, number of scans)` for every row of the `Frames` table.
fn read_frame_scan_counts(data_path: &Path) -> Result<Vec<(i64, u32)>, ReaderError> {
    let conn = Connection::open(data_path.join("analysis.tdf"))?;
    let mut stmt = conn.prepare("SELECT Id, NumScans FROM Frames ORDER BY Id")?;
    let rows: Result<Vec<(i64, u32)>, _> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect();
    Ok(rows?)
}

impl RawDataReader for BrukerSdkReader {
    type Handle = BrukerSdkHandle;

    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Self::Handle, ReaderError> {
        let open_err = |message: String| ReaderError::Open {
            path: path.to_path_buf(),
            message,
        };
        let frames = read_frame_scan_counts(path)
            .map_err(|e| open_err(format!("Failed to read the Frames table: {e}")))?;
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|e| open_err(format!("Invalid path: {e}")))?;

        let handle = {
            let func: Symbol<OpenFn> = symbol(&self.lib, b"tims_open_v2")?;
            unsafe {
                func(
                    c_path.as_ptr(),
                    options.use_recalibrated_state as u32,
                    options.pressure_compensation.sdk_code(),
                )
            }
        };
        if handle == 0 {
            return Err(open_err(last_error(&self.lib)));
        }
        debug!(
            "Opened {} with handle {} ({} frames, {:?})",
            path.display(),
            handle,
            frames.len(),
            options
        );

        Ok(BrukerSdkHandle {
            lib: self.lib.clone(),
            handle,
            frames,
            buffer: vec![0; INITIAL_SCAN_BUFFER_WORDS],
        })
    }

    fn mobility_to_ccs(
        &self,
        mobility: f64,
        charge: i32,
        reference_mz: f64,
    ) -> Result<f64, ReaderError> {
        let func: Symbol<CcsFn> = symbol(&self.lib, b"tims_oneoverk0_to_ccs_for_mz")?;
        Ok(unsafe { func(mobility, charge, reference_mz) })
    }
}

pub struct BrukerSdkHandle {
    lib: Arc<Library>,
    handle: u64,
    frames: Vec<(i64, u32)>,
    buffer: Vec<u32>,
}

impl BrukerSdkHandle {
    fn convert(
        &self,
        name: &[u8],
        frame_id: u32,
        input: &[c_double],
    ) -> Result<Vec<f64>, ReaderError> {
        let mut out = vec![0.0; input.len()];
        if input.is_empty() {
            return Ok(out);
        }
        let func: Symbol<ConvertFn> = symbol(&self.lib, name)?;
        let ok = unsafe {
            func(
                self.handle,
                frame_id as i64,
                input.as_ptr(),
                out.as_mut_ptr(),
                input.len() as u32,
            )
        };
        if ok == 0 {
            return Err(ReaderError::Conversion(last_error(&self.lib)));
        }
        Ok(out)
    }
}

impl AcquisitionHandle for BrukerSdkHandle {
    fn frame_count(&mut self) -> Result<u32, ReaderError> {
        Ok(self.frames.len() as u32)
    }

    fn scan_count(&mut self, frame_id: u32) -> Result<u32, ReaderError> {
        self.frames
            .binary_search_by_key(&(frame_id as i64), |(id, _)| *id)
            .map(|pos| self.frames[pos].1)
            .map_err(|_| ReaderError::FrameOutOfRange {
                frame_id,
                frame_count: self.frames.len() as u32,
            })
    }

    fn read_scans(
        &mut self,
        frame_id: u32,
        scan_begin: u32,
        scan_end: u32,
    ) -> Result<Vec<RawScan>, ReaderError> {
        let scan_count = self.scan_count(frame_id)?;
        if scan_begin > scan_end || scan_end > scan_count {
            return Err(ReaderError::ScanOutOfRange {
                frame_id,
                begin: scan_begin,
                end: scan_end,
                scan_count,
            });
        }

        let func: Symbol<ReadScansFn> = symbol(&self.lib, b"tims_read_scans_v2")?;
        loop {
            let capacity_bytes = (self.buffer.len() * 4) as u32;
            let required_bytes = unsafe {
                func(
                    self.handle,
                    frame_id as i64,
                    scan_begin,
                    scan_end,
                    self.buffer.as_mut_ptr(),
                    capacity_bytes,
                )
            };
            if required_bytes == 0 {
                return Err(ReaderError::Read {
                    frame_id,
                    message: last_error(&self.lib),
                });
            }
            if required_bytes <= capacity_bytes {
                break;
            }
            let required_words = required_bytes as usize / 4 + 1;
            if required_words > MAX_SCAN_BUFFER_WORDS {
                return Err(ReaderError::Read {
                    frame_id,
                    message: format!(
                        "Maximum expected frame size exceeded ({} bytes)",
                        required_bytes
                    ),
                });
            }
            self.buffer.resize(required_words, 0);
        }

        // Layout: one peak count per scan, then indices and intensities per scan.
        let num_scans = (scan_end - scan_begin) as usize;
        let mut offset = num_scans;
        let mut scans = Vec::with_capacity(num_scans);
        for i in 0..num_scans {
            let npeaks = self.buffer[i] as usize;
            let end = offset + 2 * npeaks;
            if end > self.buffer.len() {
                return Err(ReaderError::Read {
                    frame_id,
                    message: "scan buffer is shorter than the reported peak counts".to_string(),
                });
            }
            scans.push(RawScan {
                indices: self.buffer[offset..offset + npeaks].to_vec(),
                intensities: self.buffer[offset + npeaks..end].to_vec(),
            });
            offset = end;
        }
        Ok(scans)
    }

    fn index_to_mz(&mut self, frame_id: u32, indices: &[u32]) -> Result<Vec<f64>, ReaderError> {
        let dbl_indices: Vec<f64> = indices.iter().map(|&x| x as f64).collect();
        self.convert(b"tims_index_to_mz", frame_id, &dbl_indices)
    }

    fn scan_to_mobility(&mut self, frame_id: u32, scan: u32) -> Result<f64, ReaderError> {
        let out = self.convert(b"tims_scannum_to_oneoverk0", frame_id, &[scan as f64])?;
        out.first().copied().ok_or(ReaderError::Conversion(format!(
            "no mobility returned for frame {} scan {}",
            frame_id, scan
        )))
    }
}

impl Drop for BrukerSdkHandle {
    fn drop(&mut self) {
        match symbol::<CloseFn>(&self.lib, b"tims_close") {
            Ok(func) => unsafe { func(self.handle) },
            Err(e) => warn!("Unable to close handle {}: {}", self.handle, e),
        }
    }
}
