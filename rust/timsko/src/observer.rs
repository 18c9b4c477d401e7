use tracing::{
    debug,
    info,
};

/// Receives progress (a fraction in `0.0..=1.0`) and status messages from a run.
pub trait ProgressObserver {
    fn on_progress(&self, fraction: f64);
    fn on_status(&self, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _fraction: f64) {}
    fn on_status(&self, _message: &str) {}
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ProgressObserver for LoggingObserver {
    fn on_progress(&self, fraction: f64) {
        debug!("Progress: {:.1}%", fraction * 100.0);
    }

    fn on_status(&self, message: &str) {
        info!("{}", message);
    }
}

/// Maps a child's `0..=1` progress onto `[start, start + span]` of a parent.
pub struct SubRangeObserver<'a> {
    parent: &'a dyn ProgressObserver,
    start: f64,
    span: f64,
}

impl<'a> SubRangeObserver<'a> {
    pub fn new(parent: &'a dyn ProgressObserver, start: f64, span: f64) -> Self {
        Self {
            parent,
            start,
            span,
        }
    }

    /// Slot `index` of `total` equally sized slots.
    pub fn slot(parent: &'a dyn ProgressObserver, index: usize, total: usize) -> Self {
        let span = 1.0 / total.max(1) as f64;
        Self::new(parent, index as f64 * span, span)
    }
}

impl ProgressObserver for SubRangeObserver<'_> {
    fn on_progress(&self, fraction: f64) {
        self.parent
            .on_progress(self.start + fraction.clamp(0.0, 1.0) * self.span);
    }

    fn on_status(&self, message: &str) {
        self.parent.on_status(message);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingObserver;
    use super::*;

    #[test]
    fn test_sub_range_maps_progress() {
        let parent = RecordingObserver::default();
        let child = SubRangeObserver::slot(&parent, 1, 4);
        child.on_progress(0.0);
        child.on_progress(0.5);
        child.on_progress(2.0);
        child.on_status("hello");

        assert_eq!(*parent.progress.lock().unwrap(), vec![0.25, 0.375, 0.5]);
        assert_eq!(*parent.statuses.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_zero_slots_does_not_divide_by_zero() {
        let parent = RecordingObserver::default();
        SubRangeObserver::slot(&parent, 0, 0).on_progress(1.0);
        assert_eq!(*parent.progress.lock().unwrap(), vec![1.0]);
    }
}
