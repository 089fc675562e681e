use crate::{
    client::ApiClient,
    error::MonitorError,
    monitor::{
        source::{ClientStatusSource, TaskStatusSource},
        status::{TaskSnapshot, TaskState, TaskStatusDocument},
    },
};
use rapi_config::client::DEFAULT_POLL_INTERVAL;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, instrument, warn};

pub type ProgressCallback = Arc<dyn Fn(&TaskSnapshot) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(MonitorError) + Send + Sync>;

/// Callbacks and overrides for one monitored task. All callbacks are
/// optional; `on_complete` and `on_error` fire at most once.
#[derive(Clone, Default)]
pub struct MonitorOptions {
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
    poll_interval: Option<Duration>,
}

impl MonitorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl Fn(&TaskSnapshot) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(MonitorError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

impl std::fmt::Debug for MonitorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

struct MonitorEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<String, MonitorEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, MonitorEntry>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

/// Polls background tasks until they reach a terminal state.
///
/// Each task id has at most one polling loop. Cancelling a monitor is purely
/// local: the server-side task keeps running and no callback fires. Dropping
/// the monitor cancels every loop it started.
pub struct TaskMonitor {
    source: Arc<dyn TaskStatusSource>,
    poll_interval: Duration,
    entries: Entries,
    generation: AtomicU64,
}

impl TaskMonitor {
    pub fn new(source: Arc<dyn TaskStatusSource>) -> Self {
        Self {
            source,
            poll_interval: DEFAULT_POLL_INTERVAL,
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Monitor polling `/tasks/{task_id}` through `client` at the client's
    /// configured poll interval.
    pub fn from_client(client: &ApiClient) -> Self {
        let interval = client.config().poll_interval;
        Self::new(Arc::new(ClientStatusSource::new(client.clone()))).with_poll_interval(interval)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Starts polling `task_id`, replacing any monitor already running for
    /// it. The first poll happens one interval from now.
    pub fn start_monitoring(&self, task_id: impl Into<String>, options: MonitorOptions) {
        let task_id = task_id.into();
        let interval = options
            .poll_interval
            .filter(|i| !i.is_zero())
            .unwrap_or(self.poll_interval);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut entries = lock(&self.entries);
        if let Some(previous) = entries.remove(&task_id) {
            debug!("replacing monitor for task {}", task_id);
            previous.handle.abort();
        }

        let poller = Poller {
            task_id: task_id.clone(),
            source: Arc::clone(&self.source),
            options,
            interval,
            entries: Arc::clone(&self.entries),
            generation,
        };
        let handle = tokio::spawn(poller.run());
        info!("Monitoring task {} every {:?}", task_id, interval);
        entries.insert(task_id, MonitorEntry { generation, handle });
    }

    /// Returns whether a monitor was running. Calling it again is a no-op.
    pub fn stop_monitoring(&self, task_id: &str) -> bool {
        match lock(&self.entries).remove(task_id) {
            Some(entry) => {
                entry.handle.abort();
                info!("Stopped monitoring task {}", task_id);
                true
            }
            None => false,
        }
    }

    pub fn stop_all_monitoring(&self) {
        let drained: Vec<(String, MonitorEntry)> = lock(&self.entries).drain().collect();
        for (task_id, entry) in drained {
            entry.handle.abort();
            debug!("Stopped monitoring task {}", task_id);
        }
    }

    pub fn is_monitoring(&self, task_id: &str) -> bool {
        lock(&self.entries).contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.entries).len()
    }
}

impl Drop for TaskMonitor {
    fn drop(&mut self) {
        self.stop_all_monitoring();
    }
}

impl std::fmt::Debug for TaskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMonitor")
            .field("poll_interval", &self.poll_interval)
            .field("active", &self.active_count())
            .finish()
    }
}

enum Tick {
    Continue,
    Done,
}

/// One task's polling loop.
struct Poller {
    task_id: String,
    source: Arc<dyn TaskStatusSource>,
    options: MonitorOptions,
    interval: Duration,
    entries: Entries,
    generation: u64,
}

impl Poller {
    #[instrument(skip_all, fields(task_id = %self.task_id))]
    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<TaskSnapshot> = None;

        loop {
            ticker.tick().await;
            let fetched = self.source.fetch_status(&self.task_id).await;
            if let Tick::Done = self.handle(fetched, &mut last) {
                return;
            }
        }
    }

    fn handle(
        &self,
        fetched: Result<TaskStatusDocument, crate::error::NetworkError>,
        last: &mut Option<TaskSnapshot>,
    ) -> Tick {
        let document = match fetched {
            Ok(document) => document,
            Err(e) => {
                warn!("Status fetch for task {} failed: {}", self.task_id, e);
                return self.fail(MonitorError::Fetch(e));
            }
        };
        let state = match document.state() {
            Ok(state) => state,
            Err(e) => {
                warn!("Task {} reported {}", self.task_id, e);
                return self.fail(e);
            }
        };

        if let Some(previous) = last.as_ref() {
            if !previous.state.can_transition_to(state) {
                warn!(
                    "Ignoring status {} for task {} after {}",
                    state, self.task_id, previous.state
                );
                return Tick::Continue;
            }
        }

        let snapshot = TaskSnapshot::new(&self.task_id, state, &document);
        if last.as_ref() != Some(&snapshot) {
            if let Some(on_progress) = &self.options.on_progress {
                on_progress(&snapshot);
            }
            *last = Some(snapshot);
        }

        match state {
            TaskState::Completed => {
                self.finish();
                info!("Task {} completed", self.task_id);
                if let Some(on_complete) = &self.options.on_complete {
                    on_complete(document.result.unwrap_or(Value::Null));
                }
                Tick::Done
            }
            TaskState::Failed => self.fail(MonitorError::TaskFailed {
                task_id: self.task_id.clone(),
                reason: document.failure_reason(),
            }),
            _ => Tick::Continue,
        }
    }

    fn fail(&self, error: MonitorError) -> Tick {
        self.finish();
        if let Some(on_error) = &self.options.on_error {
            on_error(error);
        }
        Tick::Done
    }

    /// Removes this loop's entry unless a newer monitor took the id over.
    fn finish(&self) {
        let mut entries = lock(&self.entries);
        if entries
            .get(&self.task_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            entries.remove(&self.task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Replays `script` one document per poll, repeating the last one.
    fn scripted(script: Vec<TaskStatusDocument>) -> (Arc<dyn TaskStatusSource>, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let source = move |_task_id: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let document = script[n.min(script.len() - 1)].clone();
            async move { Ok::<_, NetworkError>(document) }
        };
        let source: Arc<dyn TaskStatusSource> = Arc::new(source);
        (source, polls)
    }

    fn running(progress: f64) -> TaskStatusDocument {
        TaskStatusDocument {
            progress_percentage: Some(progress),
            ..TaskStatusDocument::new("running")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_then_completion() {
        let completed = TaskStatusDocument {
            result: Some(json!({"rows": 12})),
            ..TaskStatusDocument::new("completed")
        };
        let (source, polls) = scripted(vec![running(10.0), running(10.0), running(60.0), completed]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));

        let progress = Arc::new(Mutex::new(Vec::new()));
        let result = Arc::new(Mutex::new(None));
        let options = MonitorOptions::new()
            .on_progress({
                let progress = progress.clone();
                move |s: &TaskSnapshot| progress.lock().unwrap().push(s.progress_percentage)
            })
            .on_complete({
                let result = result.clone();
                move |value| *result.lock().unwrap() = Some(value)
            });

        monitor.start_monitoring("sync-1", options);
        assert!(monitor.is_monitoring("sync-1"));

        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(polls.load(Ordering::SeqCst), 4);
        // the repeated 10% snapshot is reported once
        assert_eq!(*progress.lock().unwrap(), vec![Some(10.0), Some(60.0), None]);
        assert_eq!(*result.lock().unwrap(), Some(json!({"rows": 12})));
        assert!(!monitor.is_monitoring("sync-1"));
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_without_result_yields_null() {
        let (source, polls) = scripted(vec![TaskStatusDocument::new("completed")]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));

        let results = Arc::new(Mutex::new(Vec::new()));
        monitor.start_monitoring(
            "sync-0",
            MonitorOptions::new().on_complete({
                let results = results.clone();
                move |value| results.lock().unwrap().push(value)
            }),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*results.lock().unwrap(), vec![Value::Null]);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_monitoring("sync-0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reports_reason() {
        let failed = TaskStatusDocument {
            error: Some(json!("Login failed for user 'sa'")),
            ..TaskStatusDocument::new("error")
        };
        let (source, polls) = scripted(vec![failed]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));

        let errors = Arc::new(Mutex::new(Vec::new()));
        monitor.start_monitoring(
            "sync-2",
            MonitorOptions::new().on_error({
                let errors = errors.clone();
                move |e| errors.lock().unwrap().push(e.to_string())
            }),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["Task sync-2 failed: Login failed for user 'sa'".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_stops_monitor() {
        let (source, polls) = scripted(vec![TaskStatusDocument::new("paused")]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));

        let errors = Arc::new(AtomicUsize::new(0));
        monitor.start_monitoring(
            "t",
            MonitorOptions::new().on_error({
                let errors = errors.clone();
                move |e| {
                    assert!(matches!(e, MonitorError::UnknownStatus(_)));
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backward_transition_is_ignored() {
        let (source, _) = scripted(vec![
            running(50.0),
            TaskStatusDocument::new("queued"),
            TaskStatusDocument::new("success"),
        ]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));

        let states = Arc::new(Mutex::new(Vec::new()));
        monitor.start_monitoring(
            "t",
            MonitorOptions::new().on_progress({
                let states = states.clone();
                move |s: &TaskSnapshot| states.lock().unwrap().push(s.state)
            }),
        );

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(
            *states.lock().unwrap(),
            vec![TaskState::Running, TaskState::Completed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_silent_and_idempotent() {
        let (source, polls) = scripted(vec![running(1.0)]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));

        let fired = Arc::new(AtomicUsize::new(0));
        let options = MonitorOptions::new()
            .on_complete({
                let fired = fired.clone();
                move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_error({
                let fired = fired.clone();
                move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
            });
        monitor.start_monitoring("t", options);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(monitor.stop_monitoring("t"));
        assert!(!monitor.stop_monitoring("t"));
        let seen = polls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(polls.load(Ordering::SeqCst), seen);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_existing_loop() {
        let (source, polls) = scripted(vec![running(1.0)]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));

        monitor.start_monitoring("t", MonitorOptions::new());
        monitor.start_monitoring("t", MonitorOptions::new());
        assert_eq!(monitor.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(550)).await;
        // a single loop polled five times, not two loops
        assert_eq!(polls.load(Ordering::SeqCst), 5);

        monitor.stop_all_monitoring();
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_loops() {
        let (source, polls) = scripted(vec![running(1.0)]);
        let monitor = TaskMonitor::new(source).with_poll_interval(Duration::from_millis(100));
        monitor.start_monitoring("a", MonitorOptions::new());
        monitor.start_monitoring("b", MonitorOptions::new().poll_interval(Duration::from_millis(50)));

        tokio::time::sleep(Duration::from_millis(120)).await;
        drop(monitor);
        let seen = polls.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(polls.load(Ordering::SeqCst), seen);
    }
}
