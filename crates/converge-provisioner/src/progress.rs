use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Failed,
}

/// One progress notification for a resource being applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Resource name.
    pub target_id: String,
    /// Resource kind.
    pub object_kind: String,
    /// Index of the plan operation in progress.
    pub step_index: usize,
    pub steps_done: usize,
    /// Precomputed at plan time.
    pub total_steps: usize,
    pub status: StepStatus,
}

pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Default)]
struct Counters {
    done: AtomicUsize,
    step_index: AtomicUsize,
    /// `done` may not pass this mark until the next operation begins.
    operation_end: AtomicUsize,
}

/// Progress accounting for one plan action.
///
/// Cloned into every unit of work of the action; all clones share one
/// counter. Units reported beyond the running operation's budget are
/// ignored so a miscounting resource cannot overshoot the total.
#[derive(Clone)]
pub struct StepReporter {
    sink: Option<ProgressSink>,
    target_id: Arc<str>,
    object_kind: Arc<str>,
    total: usize,
    counters: Arc<Counters>,
}

impl StepReporter {
    pub fn new(
        sink: Option<ProgressSink>,
        target_id: &str,
        object_kind: &str,
        total: usize,
    ) -> Self {
        Self {
            sink,
            target_id: target_id.into(),
            object_kind: object_kind.into(),
            total,
            counters: Arc::new(Counters::default()),
        }
    }

    /// A reporter that records nothing and notifies nobody.
    pub fn silent() -> Self {
        Self::new(None, "", "", 0)
    }

    pub fn steps_done(&self) -> usize {
        self.counters.done.load(Ordering::SeqCst)
    }

    pub fn total_steps(&self) -> usize {
        self.total
    }

    /// Start operation `index` worth `steps` units.
    pub fn begin_operation(&self, index: usize, steps: usize) {
        let done = self.steps_done();
        self.counters.step_index.store(index, Ordering::SeqCst);
        self.counters
            .operation_end
            .store(done + steps, Ordering::SeqCst);
    }

    /// Record `units` finished units of the running operation.
    pub fn advance(&self, units: usize) {
        if units == 0 {
            return;
        }
        let end = self.counters.operation_end.load(Ordering::SeqCst);
        let result = self
            .counters
            .done
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |done| {
                (done < end).then(|| (done + units).min(end))
            });
        if let Ok(previous) = result {
            let now = (previous + units).min(end);
            self.emit(now, StepStatus::Done);
        }
    }

    /// Account for any units of the running operation not yet reported.
    pub fn finish_operation(&self) {
        let end = self.counters.operation_end.load(Ordering::SeqCst);
        let done = self.steps_done();
        if done < end {
            self.advance(end - done);
        }
    }

    pub fn fail(&self) {
        self.emit(self.steps_done(), StepStatus::Failed);
    }

    fn emit(&self, steps_done: usize, status: StepStatus) {
        if let Some(sink) = &self.sink {
            sink(&ProgressEvent {
                target_id: self.target_id.to_string(),
                object_kind: self.object_kind.to_string(),
                step_index: self.counters.step_index.load(Ordering::SeqCst),
                steps_done,
                total_steps: self.total,
                status,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording() -> (ProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: ProgressSink = Arc::new(move |e: &ProgressEvent| {
            sink_events.lock().unwrap().push(e.clone());
        });
        (sink, events)
    }

    #[test]
    fn units_are_capped_per_operation() {
        let (sink, events) = recording();
        let reporter = StepReporter::new(Some(sink), "site", "bucket", 4);

        reporter.begin_operation(0, 1);
        reporter.advance(5);
        assert_eq!(reporter.steps_done(), 1);

        reporter.begin_operation(1, 3);
        reporter.advance(1);
        reporter.finish_operation();
        assert_eq!(reporter.steps_done(), 4);

        let done: Vec<_> = events.lock().unwrap().iter().map(|e| e.steps_done).collect();
        assert_eq!(done, [1, 2, 4]);
        let indexes: Vec<_> = events.lock().unwrap().iter().map(|e| e.step_index).collect();
        assert_eq!(indexes, [0, 1, 1]);
    }

    #[test]
    fn failure_reports_current_position() {
        let (sink, events) = recording();
        let reporter = StepReporter::new(Some(sink), "db", "sql_instance", 2);
        reporter.begin_operation(0, 1);
        reporter.finish_operation();
        reporter.begin_operation(1, 1);
        reporter.fail();

        let last = events.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.status, StepStatus::Failed);
        assert_eq!(last.steps_done, 1);
        assert_eq!(last.step_index, 1);
    }
}
