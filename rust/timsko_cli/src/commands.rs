use std::path::Path;
use timsko::batch::write_batch_template;
use timsko::{
    RunError,
    read_batch_table,
    run_batch,
    run_folder,
    spawn_run,
};
use tracing::{
    error,
    info,
    instrument,
    warn,
};

use crate::cli::{
    BatchArgs,
    ExtractArgs,
    WriteTemplateArgs,
};
use crate::config::Config;
use crate::error::CliError;
use crate::processing::follow_run;

/// Main function for the 'extract' subcommand.
#[instrument(skip(config))]
pub fn main_extract(args: ExtractArgs, config: Config) -> Result<(), CliError> {
    let params = config.extract_parameters(&args)?;
    let backend = config.reader.clone().with_args(&args.reader).build()?;
    info!("Using parameters: {:#?}", params);

    let folder = args.folder.clone();
    let handle = spawn_run(move |obs| run_folder(&backend, &folder, &params, obs));
    let report = follow_run(handle)?.inspect_err(|e| {
        if let RunError::NoData { excluded, .. } = e {
            for acq in excluded {
                warn!("Excluded {}: {}", acq.folder_name, acq.reason);
            }
        }
    })?;

    for excluded in &report.excluded {
        warn!("Excluded {}: {}", excluded.folder_name, excluded.reason);
    }
    println!(
        "Merged {} acquisitions ({} excluded) into {} rows, written to {}",
        report.merged.len(),
        report.excluded.len(),
        report.rows,
        report.output_path.display()
    );
    Ok(())
}

/// Main function for the 'batch' subcommand.
#[instrument(skip(config))]
pub fn main_batch(args: BatchArgs, config: Config) -> Result<(), CliError> {
    let rows = read_batch_table(&args.table)?;
    info!("Read {} jobs from {}", rows.len(), args.table.display());
    let template = config.batch_template(&args)?;
    let backend = config.reader.clone().with_args(&args.reader).build()?;

    let handle = spawn_run(move |obs| run_batch(&backend, &rows, &template, obs));
    let report = follow_run(handle)?;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(run) => println!("Row {}: wrote {}", outcome.row, run.output_path.display()),
            Err(e) => error!("{}", e),
        }
    }
    println!(
        "Batch finished: {} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
    if report.failed() > 0 {
        return Err(CliError::BatchFailures {
            failed: report.failed(),
            total: report.outcomes.len(),
        });
    }
    Ok(())
}

pub const CONFIG_TEMPLATE_NAME: &str = "timsko_config_template.json";
pub const BATCH_TEMPLATE_NAME: &str = "batch_template.csv";

pub fn write_templates(target_dir: &Path) -> Result<(), CliError> {
    std::fs::create_dir_all(target_dir)?;

    let config_path = target_dir.join(CONFIG_TEMPLATE_NAME);
    std::fs::write(
        &config_path,
        serde_json::to_string_pretty(&Config::template())?,
    )?;
    println!("Wrote config template to: {}", config_path.display());

    let batch_path = target_dir.join(BATCH_TEMPLATE_NAME);
    write_batch_template(std::fs::File::create(&batch_path)?)?;
    println!("Wrote batch table template to: {}", batch_path.display());
    Ok(())
}

/// Main function for the 'write-template' subcommand.
pub fn main_write_template(args: WriteTemplateArgs) -> Result<(), CliError> {
    write_templates(&args.output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use timsko::RunParameters;

    #[test]
    fn test_templates_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        write_templates(dir.path()).unwrap();

        let config = Config::load(Some(dir.path().join(CONFIG_TEMPLATE_NAME).as_path())).unwrap();
        assert_eq!(config, Config::template());

        let rows = read_batch_table(&dir.path().join(BATCH_TEMPLATE_NAME)).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].to_job(&RunParameters::new(0.0, 0.0)).is_ok());
    }
}
