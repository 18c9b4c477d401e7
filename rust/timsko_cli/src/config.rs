use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};
use timsko::reader::{
    BrukerSdkReader,
    NativeReader,
    ReaderBackend,
};
use timsko::{
    CcsSettings,
    MobilityPrecision,
    RunParameters,
};
use tracing::info;

use crate::cli::{
    BatchArgs,
    ExtractArgs,
    ReaderArgs,
};
use crate::error::CliError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Pure rust reader (timsrust).
    #[default]
    Native,
    /// Bruker's timsdata library.
    BrukerSdk,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub sdk_library: Option<PathBuf>,
}

impl ReaderConfig {
    pub fn with_args(mut self, args: &ReaderArgs) -> Self {
        if let Some(lib) = &args.sdk_library {
            self.sdk_library = Some(lib.clone());
            self.backend = BackendKind::BrukerSdk;
        }
        if let Some(backend) = args.backend {
            self.backend = backend;
        }
        self
    }

    pub fn build(&self) -> Result<ReaderBackend, CliError> {
        let backend = match self.backend {
            BackendKind::Native => ReaderBackend::Native(NativeReader),
            BackendKind::BrukerSdk => {
                let lib = self.sdk_library.as_ref().ok_or_else(|| {
                    CliError::Config(
                        "The bruker_sdk backend needs the path to the timsdata library, \
                         set it with --sdk-library or reader.sdk_library"
                            .to_string(),
                    )
                })?;
                ReaderBackend::BrukerSdk(BrukerSdkReader::new(lib)?)
            }
        };
        info!("Using the {} reader", backend.name());
        Ok(backend)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Defaults for `extract`; `batch` only takes the settings its table has no column for.
    #[serde(default)]
    pub extraction: Option<RunParameters>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let config: Config = serde_json::from_str(&text)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => Ok(Config::default()),
        }
    }

    pub fn template() -> Self {
        Self {
            reader: ReaderConfig::default(),
            extraction: Some(RunParameters::new(622.0, 623.0)),
        }
    }

    /// Config values overridden by whatever was given on the command line.
    pub fn extract_parameters(&self, args: &ExtractArgs) -> Result<RunParameters, CliError> {
        let base = self.extraction.as_ref();
        let mz_min = args
            .mz_min
            .or(base.map(|b| b.mz_min))
            .ok_or_else(|| CliError::Config("No m/z lower bound, pass --mz-min".to_string()))?;
        let mz_max = args
            .mz_max
            .or(base.map(|b| b.mz_max))
            .ok_or_else(|| CliError::Config("No m/z upper bound, pass --mz-max".to_string()))?;

        let mut params = match base {
            Some(b) => RunParameters {
                mz_min,
                mz_max,
                ..b.clone()
            },
            None => RunParameters::new(mz_min, mz_max),
        };
        params.window()?;

        if let Some(strategy) = args.label_strategy {
            params.label_strategy = strategy;
        }
        if args.no_sort {
            params.sort_columns = false;
        }
        if args.ccs {
            let from_config = params.ccs;
            params.ccs = Some(CcsSettings::from_parts(
                args.charge.or(from_config.map(|c| c.charge())),
                args.reference_mz.or(from_config.map(|c| c.reference_mz())),
            )?);
        } else if args.charge.is_some() || args.reference_mz.is_some() {
            return Err(CliError::Config(
                "--charge and --reference-mz only apply together with --ccs".to_string(),
            ));
        }
        if args.no_recalibration {
            params.open_options.use_recalibrated_state = false;
        }
        if let Some(strategy) = args.pressure_compensation {
            params.open_options.pressure_compensation = strategy;
        }
        apply_common(&mut params, args.mobility_decimals, args.parallel)?;
        Ok(params)
    }

    /// Template for batch rows. The m/z window and CCS settings always come from the table.
    pub fn batch_template(&self, args: &BatchArgs) -> Result<RunParameters, CliError> {
        let mut params = self
            .extraction
            .clone()
            .unwrap_or_else(|| RunParameters::new(0.0, 0.0));
        apply_common(&mut params, args.mobility_decimals, args.parallel)?;
        Ok(params)
    }
}

fn apply_common(
    params: &mut RunParameters,
    mobility_decimals: Option<u32>,
    parallel: bool,
) -> Result<(), CliError> {
    if let Some(decimals) = mobility_decimals {
        params.mobility_precision = MobilityPrecision::try_decimals(decimals)?;
    }
    if parallel {
        params.parallel_extraction = true;
    }
    Ok(())
}
