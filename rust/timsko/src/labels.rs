//! Column labels for acquisitions.
//!
//! A label is resolved once per acquisition, either from the folder name or
//! from the acquisition method, and carries its own numeric sort key.

use crate::errors::MetadataResolutionError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;
use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;
use tracing::{
    debug,
    warn,
};

pub const UNKNOWN_LABEL: &str = "unknown";

const METHOD_BUNDLE_EXTENSION: &str = ".m";
const METHOD_FILE_EXTENSION: &str = ".method";
const TUNNEL_VOLTAGE_PARAMETER: &str = "IMS_TunnelVoltage_Delta_6";

static VOLTAGE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+V").expect("Invalid voltage token pattern"));
static NUMERIC_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?").expect("Invalid numeric prefix pattern"));
static TUNNEL_VOLTAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<para_double value="([\d.]+)" permname="IMS_TunnelVoltage_Delta_6"/>"#)
        .expect("Invalid tunnel voltage pattern")
});

/// Display string of a column plus the number it sorts by.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationLabel {
    display: String,
    numeric: Option<f64>,
}

impl ActivationLabel {
    pub fn new(display: impl Into<String>) -> Self {
        let display = display.into();
        let numeric = NUMERIC_PREFIX
            .find(&display)
            .and_then(|m| m.as_str().parse::<f64>().ok());
        Self { display, numeric }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_LABEL)
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn numeric(&self) -> Option<f64> {
        self.numeric
    }

    /// Same sort key, display suffixed with `_<n>`.
    pub fn with_suffix(&self, n: usize) -> Self {
        Self {
            display: format!("{}_{}", self.display, n),
            numeric: self.numeric,
        }
    }
}

impl fmt::Display for ActivationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LabelStrategy {
    /// Voltage token (e.g. `20V`) in the folder name, or the whole name.
    #[default]
    #[cfg_attr(feature = "clap", value(name = "filename"))]
    FileName,
    /// Tunnel voltage delta stored in the acquisition method.
    Method,
}

impl LabelStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelStrategy::FileName => "filename",
            LabelStrategy::Method => "method",
        }
    }
}

impl fmt::Display for LabelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabelStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filename" | "file name" | "file_name" => Ok(LabelStrategy::FileName),
            "method" => Ok(LabelStrategy::Method),
            other => Err(format!(
                "Unknown extraction method '{}', expected 'filename' or 'method'",
                other
            )),
        }
    }
}

fn folder_base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn label_from_file_name(path: &Path) -> ActivationLabel {
    let name = folder_base_name(path);
    match VOLTAGE_TOKEN.find(&name) {
        Some(token) => ActivationLabel::new(token.as_str()),
        None => ActivationLabel::new(name),
    }
}

/// The single entry of `dir` whose name ends with `extension`.
fn single_entry(
    dir: &Path,
    extension: &'static str,
    want_dir: bool,
) -> Result<PathBuf, MetadataResolutionError> {
    let io_err = |source| MetadataResolutionError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(extension) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() == want_dir {
            found.push((name, path));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));

    match found.len() {
        0 if want_dir => Err(MetadataResolutionError::MissingMethodBundle {
            path: dir.to_path_buf(),
            extension,
        }),
        0 => Err(MetadataResolutionError::MissingMethodFile {
            path: dir.to_path_buf(),
            extension,
        }),
        1 => Ok(found.remove(0).1),
        _ => Err(MetadataResolutionError::Ambiguous {
            path: dir.to_path_buf(),
            extension,
            found: found.into_iter().map(|(name, _)| name).collect(),
        }),
    }
}

fn label_from_method(path: &Path) -> Result<ActivationLabel, MetadataResolutionError> {
    let bundle = single_entry(path, METHOD_BUNDLE_EXTENSION, true)?;
    let method_file = single_entry(&bundle, METHOD_FILE_EXTENSION, false)?;
    let text = std::fs::read_to_string(&method_file).map_err(|source| {
        MetadataResolutionError::Io {
            path: method_file.clone(),
            source,
        }
    })?;

    let missing = || MetadataResolutionError::MissingParameter {
        path: method_file.clone(),
        parameter: TUNNEL_VOLTAGE_PARAMETER,
    };
    let value: f64 = TUNNEL_VOLTAGE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(missing)?;
    debug!(
        "{} = {} in {}",
        TUNNEL_VOLTAGE_PARAMETER,
        value,
        method_file.display()
    );
    Ok(ActivationLabel::new(format!("{:.1}", value)))
}

pub fn resolve_label(
    acquisition: &Path,
    strategy: LabelStrategy,
) -> Result<ActivationLabel, MetadataResolutionError> {
    match strategy {
        LabelStrategy::FileName => Ok(label_from_file_name(acquisition)),
        LabelStrategy::Method => label_from_method(acquisition),
    }
}

/// Like [`resolve_label`], but an unresolvable acquisition is labeled `unknown`.
pub fn resolve_label_or_fallback(acquisition: &Path, strategy: LabelStrategy) -> ActivationLabel {
    match resolve_label(acquisition, strategy) {
        Ok(label) => label,
        Err(e) => {
            warn!(
                "Could not resolve a label for {}: {}; using '{}'",
                acquisition.display(),
                e,
                UNKNOWN_LABEL
            );
            ActivationLabel::unknown()
        }
    }
}
