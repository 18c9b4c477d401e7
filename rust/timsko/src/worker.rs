//! Runs a pipeline off the calling thread.
//!
//! The submitted closure gets a [`ChannelObserver`]; the caller gets a
//! [`RunHandle`] to drain events from and to wait on.

use crate::errors::WorkerError;
use crate::observer::ProgressObserver;
use crossbeam_channel::{
    Receiver,
    Sender,
    unbounded,
};
use std::any::Any;
use std::thread::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress(f64),
    Status(String),
}

/// Sends every observation down a channel. A gone receiver is not an error.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<RunEvent>,
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, fraction: f64) {
        let _ = self.tx.send(RunEvent::Progress(fraction));
    }

    fn on_status(&self, message: &str) {
        let _ = self.tx.send(RunEvent::Status(message.to_string()));
    }
}

pub struct RunHandle<T> {
    events: Receiver<RunEvent>,
    join: JoinHandle<T>,
}

impl<T> RunHandle<T> {
    /// Event stream of the run; it disconnects when the run returns.
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn wait(self) -> Result<T, WorkerError> {
        self.join
            .join()
            .map_err(|payload| WorkerError::Panicked(panic_message(payload)))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub fn spawn_run<T, F>(f: F) -> RunHandle<T>
where
    F: FnOnce(&ChannelObserver) -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = unbounded();
    let join = std::thread::spawn(move || {
        let observer = ChannelObserver { tx };
        f(&observer)
    });
    RunHandle { events: rx, join }
}
