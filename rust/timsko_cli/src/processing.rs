use indicatif::{
    ProgressBar,
    ProgressStyle,
};
use std::time::Instant;
use timsko::{
    RunEvent,
    RunHandle,
};
use tracing::{
    debug,
    info,
};

use crate::error::CliError;

const BAR_LENGTH: u64 = 1000;

fn progress_bar() -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    let pb = ProgressBar::new(BAR_LENGTH);
    pb.set_style(style);
    pb
}

/// Mirrors the events of a running job on a progress bar until it finishes.
pub fn follow_run<T>(handle: RunHandle<T>) -> Result<T, CliError> {
    let start = Instant::now();
    let pb = progress_bar();
    for event in handle.events().iter() {
        match event {
            RunEvent::Progress(fraction) => {
                pb.set_position((fraction.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64);
            }
            RunEvent::Status(message) => {
                debug!("{}", message);
                pb.set_message(message);
            }
        }
    }
    pb.finish();
    let out = handle.wait()?;
    info!("Finished in {:?}", start.elapsed());
    Ok(out)
}
