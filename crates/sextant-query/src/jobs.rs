//! Background job runner: bounded queue, std worker threads, SQLite-persisted state.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sextant_core::config::JobsConfig;
use sextant_core::error::{ErrorCode, QueryError, StateError};
use sextant_core::ids::new_job_id;
use sextant_core::time::now_iso8601;
use sextant_core::types::JobStatus;
use sextant_state::jobs::{self, JobRecord};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub type JobHandler = Box<dyn FnOnce(&JobContext) -> Result<Value, String> + Send + 'static>;

/// Job persistence over one SQLite connection.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|_| StateError::Sqlite("job store lock poisoned".to_string()))
    }

    pub fn create(&self, job: &JobRecord) -> Result<(), StateError> {
        jobs::create_job(&*self.lock()?, job)
    }

    pub fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), StateError> {
        jobs::update_job_status(&*self.lock()?, job_id, status, result, error, &now_iso8601())
    }

    pub fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), StateError> {
        jobs::update_progress(&*self.lock()?, job_id, progress)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StateError> {
        jobs::get_job(&*self.lock()?, job_id)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<JobRecord>, StateError> {
        jobs::list_jobs(&*self.lock()?, limit)
    }

    pub fn mark_interrupted(&self) -> Result<usize, StateError> {
        jobs::mark_interrupted_jobs(&*self.lock()?, &now_iso8601())
    }
}

/// Handed to a running job for progress reports and cooperative cancellation.
pub struct JobContext {
    job_id: String,
    cancelled: Arc<AtomicBool>,
    store: Arc<JobStore>,
}

impl JobContext {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Persist progress (clamped to 100). Failures are logged, never surfaced.
    pub fn report_progress(&self, progress: u8) {
        if let Err(e) = self.store.update_progress(&self.job_id, progress.min(100)) {
            warn!(job_id = %self.job_id, error = %e, "Failed to persist job progress");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct QueuedJob {
    job_id: String,
    handler: JobHandler,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunnerStats {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queued: usize,
    pub running: usize,
    pub accepting: bool,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
}

pub struct JobRunner {
    sender: Mutex<Option<SyncSender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    store: Arc<JobStore>,
    cancels: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    counters: Arc<Counters>,
    worker_count: usize,
    queue_capacity: usize,
}

impl JobRunner {
    /// Start the workers. Jobs a previous process left queued or running are failed first.
    pub fn start(store: Arc<JobStore>, config: &JobsConfig) -> Self {
        match store.mark_interrupted() {
            Ok(0) => {}
            Ok(n) => info!(count = n, "Marked interrupted jobs as failed"),
            Err(e) => warn!(error = %e, "Failed to mark interrupted jobs"),
        }

        let queue_capacity = config.queue_size.max(1);
        let worker_count = config.workers.max(1);
        let (sender, receiver) = mpsc::sync_channel::<QueuedJob>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancels: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>> = Arc::default();
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&store);
            let cancels = Arc::clone(&cancels);
            let counters = Arc::clone(&counters);
            let spawned = thread::Builder::new()
                .name(format!("sextant-job-{n}"))
                .spawn(move || worker_loop(receiver, store, cancels, counters));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(error = %e, worker = n, "Failed to spawn job worker"),
            }
        }
        debug!(workers = workers.len(), queue_capacity, "Job runner started");

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            store,
            cancels,
            counters,
            worker_count,
            queue_capacity,
        }
    }

    /// Persist a queued job and hand it to the workers. A full queue is `rate_limited`.
    pub fn submit(
        &self,
        job_type: &str,
        scope: Option<String>,
        handler: JobHandler,
    ) -> Result<JobRecord, QueryError> {
        let record = JobRecord::queued(new_job_id(), job_type, scope, now_iso8601());
        let cancelled = Arc::new(AtomicBool::new(false));
        let queued = QueuedJob {
            job_id: record.job_id.clone(),
            handler,
            cancelled: Arc::clone(&cancelled),
        };

        let sender = self
            .sender
            .lock()
            .map_err(|_| QueryError::internal("job queue lock poisoned"))?;
        let Some(sender) = sender.as_ref() else {
            return Err(QueryError::new(
                ErrorCode::BackendUnavailable,
                "job runner is stopped",
            ));
        };

        self.store.create(&record)?;
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.insert(record.job_id.clone(), cancelled);
        }
        self.counters.queued.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = sender.try_send(queued) {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            if let Ok(mut cancels) = self.cancels.lock() {
                cancels.remove(&record.job_id);
            }
            let (code, message) = match e {
                TrySendError::Full(_) => (
                    ErrorCode::RateLimited,
                    format!("job queue is full ({} pending)", self.queue_capacity),
                ),
                TrySendError::Disconnected(_) => {
                    (ErrorCode::BackendUnavailable, "job runner is stopped".to_string())
                }
            };
            if let Err(err) =
                self.store
                    .update_status(&record.job_id, JobStatus::Failed, None, Some(&message))
            {
                warn!(job_id = %record.job_id, error = %err, "Failed to record rejected job");
            }
            return Err(QueryError::new(code, message)
                .with_details(json!({ "queueCapacity": self.queue_capacity })));
        }

        info!(job_id = %record.job_id, job_type, "Job queued");
        Ok(record)
    }

    pub fn get(&self, job_id: &str) -> Result<JobRecord, QueryError> {
        self.store.get(job_id)?.ok_or_else(|| job_not_found(job_id))
    }

    pub fn list(&self, limit: usize) -> Result<Vec<JobRecord>, QueryError> {
        Ok(self.store.list(limit)?)
    }

    /// Request cancellation. Queued jobs are cancelled at once; running jobs stop
    /// when their handler next checks `is_cancelled`. Terminal jobs are returned unchanged.
    pub fn cancel(&self, job_id: &str) -> Result<JobRecord, QueryError> {
        let record = self.get(job_id)?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        if let Ok(cancels) = self.cancels.lock()
            && let Some(flag) = cancels.get(job_id)
        {
            flag.store(true, Ordering::Release);
        }
        if record.status == JobStatus::Queued {
            self.store
                .update_status(job_id, JobStatus::Cancelled, None, Some("cancelled by request"))?;
        }
        info!(job_id, status = record.status.as_str(), "Job cancellation requested");
        self.get(job_id)
    }

    pub fn stats(&self) -> JobRunnerStats {
        JobRunnerStats {
            workers: self.worker_count,
            queue_capacity: self.queue_capacity,
            queued: self.counters.queued.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
            accepting: self.sender.lock().map(|s| s.is_some()).unwrap_or(false),
        }
    }

    /// Close the queue and wait up to `timeout` for workers to drain. Returns true when all exited.
    pub fn stop(&self, timeout: Duration) -> bool {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let Ok(mut workers) = self.workers.lock() else {
            return false;
        };

        let deadline = Instant::now() + timeout;
        while workers.iter().any(|w| !w.is_finished()) {
            if Instant::now() >= deadline {
                warn!(
                    pending = workers.iter().filter(|w| !w.is_finished()).count(),
                    "Job workers still busy at stop timeout"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                warn!("Job worker panicked during shutdown");
            }
        }
        info!("Job runner stopped");
        true
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

fn job_not_found(job_id: &str) -> QueryError {
    QueryError::new(ErrorCode::ResourceNotFound, format!("job not found: {job_id}"))
        .with_details(json!({ "jobId": job_id }))
}

fn worker_loop(
    receiver: Arc<Mutex<Receiver<QueuedJob>>>,
    store: Arc<JobStore>,
    cancels: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    counters: Arc<Counters>,
) {
    loop {
        let next = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(job) = next else {
            return;
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        run_job(job, &store, &counters);
        if let Ok(mut cancels) = cancels.lock() {
            cancels.retain(|_, flag| Arc::strong_count(flag) > 1);
        }
    }
}

fn run_job(job: QueuedJob, store: &Arc<JobStore>, counters: &Counters) {
    let QueuedJob {
        job_id,
        handler,
        cancelled,
    } = job;

    if cancelled.load(Ordering::Acquire) {
        debug!(%job_id, "Skipping job cancelled while queued");
        return;
    }
    if let Err(e) = store.update_status(&job_id, JobStatus::Running, None, None) {
        warn!(%job_id, error = %e, "Failed to mark job running");
    }

    counters.running.fetch_add(1, Ordering::SeqCst);
    let ctx = JobContext {
        job_id: job_id.clone(),
        cancelled,
        store: Arc::clone(store),
    };
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| handler(&ctx)))
        .unwrap_or_else(|_| Err("job handler panicked".to_string()));
    counters.running.fetch_sub(1, Ordering::SeqCst);

    let persisted = if ctx.is_cancelled() {
        info!(%job_id, "Job cancelled");
        store.update_status(&job_id, JobStatus::Cancelled, None, Some("cancelled by request"))
    } else {
        match outcome {
            Ok(result) => {
                info!(%job_id, elapsed_ms = started.elapsed().as_millis() as u64, "Job completed");
                store.update_status(&job_id, JobStatus::Completed, Some(&result), None)
            }
            Err(message) => {
                warn!(%job_id, error = %message, "Job failed");
                store.update_status(&job_id, JobStatus::Failed, None, Some(&message))
            }
        }
    };
    if let Err(e) = persisted {
        warn!(%job_id, error = %e, "Failed to persist job outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_state::{db, schema};

    fn runner(queue_size: usize) -> JobRunner {
        let conn = db::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        JobRunner::start(
            Arc::new(JobStore::new(conn)),
            &JobsConfig {
                queue_size,
                workers: 1,
            },
        )
    }

    fn handler(
        f: impl FnOnce(&JobContext) -> Result<Value, String> + Send + 'static,
    ) -> JobHandler {
        Box::new(f)
    }

    fn wait_terminal(runner: &JobRunner, job_id: &str) -> JobRecord {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let job = runner.get(job_id).unwrap();
            if job.status.is_terminal() || Instant::now() > deadline {
                return job;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn job_runs_to_completion_with_result() {
        let runner = runner(4);
        let queued = runner
            .submit(
                "refresh-architecture",
                None,
                handler(|ctx| {
                    ctx.report_progress(10);
                    ctx.report_progress(50);
                    Ok(json!({"modules": 2}))
                }),
            )
            .unwrap();
        assert_eq!(queued.status, JobStatus::Queued);

        let done = wait_terminal(&runner, &queued.job_id);
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result, Some(json!({"modules": 2})));
        assert!(done.started_at.is_some());
        assert!(runner.stop(Duration::from_secs(5)));
    }

    #[test]
    fn failing_and_panicking_jobs_are_failed() {
        let runner = runner(4);
        let failed = runner
            .submit("x", None, handler(|_| Err("boom".to_string())))
            .unwrap();
        let panicked = runner
            .submit("x", None, handler(|_| panic!("handler bug")))
            .unwrap();
        let failed = wait_terminal(&runner, &failed.job_id);
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        let panicked = wait_terminal(&runner, &panicked.job_id);
        assert_eq!(panicked.error.as_deref(), Some("job handler panicked"));
    }

    #[test]
    fn running_job_observes_cancellation() {
        let runner = runner(4);
        let (started_tx, started_rx) = mpsc::channel();
        let job = runner
            .submit(
                "x",
                None,
                handler(move |ctx| {
                    let _ = started_tx.send(());
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while !ctx.is_cancelled() && Instant::now() < deadline {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Ok(Value::Null)
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        runner.cancel(&job.job_id).unwrap();
        assert_eq!(wait_terminal(&runner, &job.job_id).status, JobStatus::Cancelled);
    }

    #[test]
    fn full_queue_is_rate_limited_and_queued_jobs_cancel() {
        let runner = runner(1);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocker = runner
            .submit(
                "x",
                None,
                handler(move |_| {
                    let _ = started_tx.send(());
                    let _ = release_rx.recv_timeout(Duration::from_secs(10));
                    Ok(Value::Null)
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let waiting = runner.submit("x", None, handler(|_| Ok(Value::Null))).unwrap();
        let err = runner
            .submit("x", None, handler(|_| Ok(Value::Null)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);

        let cancelled = runner.cancel(&waiting.job_id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        release_tx.send(()).unwrap();
        assert_eq!(wait_terminal(&runner, &blocker.job_id).status, JobStatus::Completed);
        assert_eq!(runner.get(&waiting.job_id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn unknown_job_is_resource_not_found_and_stop_rejects_submits() {
        let runner = runner(2);
        assert_eq!(runner.get("job-missing").unwrap_err().code, ErrorCode::ResourceNotFound);
        assert!(runner.stop(Duration::from_secs(5)));
        assert!(!runner.stats().accepting);
        let err = runner
            .submit("x", None, handler(|_| Ok(Value::Null)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BackendUnavailable);
    }
}
