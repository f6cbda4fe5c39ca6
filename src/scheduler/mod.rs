use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::cron::{Cron, CronContext};
use crate::rate::RateLimiter;
use crate::stats::StatsRecorder;

/// Endpoint type reported when a task body itself errors out.
const CRON_FAILURE_TYPE: &str = "cron";
/// How long `stop` waits for in-flight executions to finish.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Job {
    cron: Box<dyn Cron>,
    epoch: u64,
}

/// Fixed-parallelism execution engine over a bounded work queue.
///
/// Each submission results in exactly one execution on a pool worker; on
/// completion the worker re-submits the clone, producing an infinite loop
/// per virtual client. `stop` advances the epoch: queued or completing
/// clones from an older epoch are disposed instead of re-run, which both
/// drains the queue and makes late submissions no-ops.
pub(crate) struct Scheduler {
    tx: mpsc::Sender<Job>,
    epoch: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
    recorder: StatsRecorder,
    disposed: AtomicBool,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub(crate) fn new(config: &WorkerConfig, recorder: StatsRecorder) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.buffer_size);
        let rx = Arc::new(Mutex::new(rx));
        let epoch = Arc::new(AtomicU64::new(0));
        let active = Arc::new(AtomicU64::new(0));
        let limiter = Arc::new(RateLimiter::new(rps_rate(config.max_rps)));

        let workers = (0..config.threads)
            .map(|index| {
                tokio::spawn(run_worker(WorkerShared {
                    index,
                    rx: rx.clone(),
                    tx: tx.clone(),
                    epoch: epoch.clone(),
                    active: active.clone(),
                    recorder: recorder.clone(),
                    limiter: limiter.clone(),
                }))
            })
            .collect();

        Self {
            tx,
            epoch,
            active,
            recorder,
            disposed: AtomicBool::new(false),
            workers,
        }
    }

    /// Execution handle for clones hatched into the current epoch.
    pub(crate) fn context(&self) -> CronContext {
        CronContext::new(
            self.recorder.clone(),
            self.epoch.clone(),
            self.epoch.load(Ordering::Acquire),
        )
    }

    /// Queue one execution of the given clone. Blocks while the queue is
    /// full, applying backpressure to the hatcher.
    pub(crate) async fn submit(&self, cron: Box<dyn Cron>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let job = Job {
            cron,
            epoch: self.epoch.load(Ordering::Acquire),
        };
        if self.tx.send(job).await.is_err() {
            debug!("Submission dropped: scheduler disposed");
        }
    }

    /// Cease re-submission and drain in-flight executions within a bounded
    /// time. Workers stay alive for a subsequent hatch.
    pub(crate) async fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.drain(STOP_DRAIN_TIMEOUT).await;
    }

    /// Release pool resources. Idempotent.
    pub(crate) async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.drain(STOP_DRAIN_TIMEOUT).await;
        for worker in &self.workers {
            worker.abort();
        }
    }

    async fn drain(&self, limit: Duration) {
        let deadline = Instant::now() + limit;
        loop {
            let active = self.active.load(Ordering::Acquire);
            let queue_empty = self.tx.capacity() == self.tx.max_capacity();
            if active == 0 && queue_empty {
                return;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Scheduler drain timed out ({} active, queue_empty={})",
                    active, queue_empty
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

fn rps_rate(max_rps: u64) -> f64 {
    if max_rps >= (1 << 53) {
        9_007_199_254_740_992.0
    } else {
        max_rps as f64
    }
}

struct WorkerShared {
    index: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    tx: mpsc::Sender<Job>,
    epoch: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
    recorder: StatsRecorder,
    limiter: Arc<RateLimiter>,
}

async fn run_worker(shared: WorkerShared) {
    debug!("Pool worker {} started", shared.index);
    loop {
        let job = {
            let mut rx = shared.rx.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => break,
            }
        };
        shared.active.fetch_add(1, Ordering::AcqRel);

        let Job { mut cron, epoch } = job;
        if epoch != shared.epoch.load(Ordering::Acquire) {
            cron.dispose();
            shared.active.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        shared.limiter.acquire().await;

        let ctx = CronContext::new(shared.recorder.clone(), shared.epoch.clone(), epoch);
        if let Err(err) = cron.execute(&ctx).await {
            shared
                .recorder
                .failure(CRON_FAILURE_TYPE, cron.name(), 0, &err.to_string());
        }

        let still_current = epoch == shared.epoch.load(Ordering::Acquire);
        if still_current {
            // Re-submit before releasing the active slot so a concurrent
            // drain never observes the clone in neither place.
            if shared.tx.send(Job { cron, epoch }).await.is_err() {
                shared.active.fetch_sub(1, Ordering::AcqRel);
                break;
            }
            shared.active.fetch_sub(1, Ordering::AcqRel);
        } else {
            cron.dispose();
            shared.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
    debug!("Pool worker {} exited", shared.index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::stats::StatsService;
    use async_trait::async_trait;
    use std::future::Future;
    use tokio::time::timeout;

    fn run_async_test<F>(future: F) -> AppResult<()>
    where
        F: Future<Output = AppResult<()>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::Message(format!("Failed to build runtime: {}", err)))?;
        runtime.block_on(future)
    }

    fn test_recorder() -> (StatsService, StatsRecorder) {
        let service = StatsService::start(Duration::from_secs(3600), Box::new(|_snapshot| {}));
        let recorder = service.recorder();
        (service, recorder)
    }

    fn test_config(buffer_size: usize, threads: usize) -> WorkerConfig {
        WorkerConfig {
            buffer_size,
            threads,
            ..WorkerConfig::default()
        }
    }

    struct CountingCron {
        executed: Arc<AtomicU64>,
        disposed: Arc<AtomicU64>,
        pause: Duration,
    }

    #[async_trait]
    impl Cron for CountingCron {
        fn name(&self) -> &str {
            "counting"
        }

        fn weight(&self) -> f64 {
            1.0
        }

        fn clone_cron(&self) -> Box<dyn Cron> {
            Box::new(CountingCron {
                executed: self.executed.clone(),
                disposed: self.disposed.clone(),
                pause: self.pause,
            })
        }

        async fn execute(&mut self, _ctx: &CronContext) -> AppResult<()> {
            self.executed.fetch_add(1, Ordering::AcqRel);
            tokio::time::sleep(self.pause).await;
            Ok(())
        }

        fn dispose(&mut self) {
            self.disposed.fetch_add(1, Ordering::AcqRel);
        }
    }

    #[test]
    fn submissions_loop_until_stop_then_clones_are_disposed() -> AppResult<()> {
        run_async_test(async {
            let (service, recorder) = test_recorder();
            let scheduler = Scheduler::new(&test_config(16, 2), recorder);
            let executed = Arc::new(AtomicU64::new(0));
            let disposed = Arc::new(AtomicU64::new(0));
            let prototype = CountingCron {
                executed: executed.clone(),
                disposed: disposed.clone(),
                pause: Duration::from_millis(5),
            };

            for _ in 0..3 {
                scheduler.submit(prototype.clone_cron()).await;
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
            if executed.load(Ordering::Acquire) < 3 {
                return Err(AppError::Message(format!(
                    "Expected at least one execution per clone, got {}",
                    executed.load(Ordering::Acquire)
                )));
            }

            scheduler.stop().await;
            let settled = executed.load(Ordering::Acquire);
            tokio::time::sleep(Duration::from_millis(100)).await;
            if executed.load(Ordering::Acquire) != settled {
                return Err(AppError::Message(
                    "Executions continued after stop".to_owned(),
                ));
            }
            if disposed.load(Ordering::Acquire) != 3 {
                return Err(AppError::Message(format!(
                    "Expected 3 disposed clones, got {}",
                    disposed.load(Ordering::Acquire)
                )));
            }

            scheduler.dispose().await;
            service.dispose();
            Ok(())
        })
    }

    #[test]
    fn full_queue_blocks_the_submitter() -> AppResult<()> {
        run_async_test(async {
            let (service, recorder) = test_recorder();
            let scheduler = Scheduler::new(&test_config(2, 1), recorder);
            let executed = Arc::new(AtomicU64::new(0));
            let disposed = Arc::new(AtomicU64::new(0));
            let prototype = CountingCron {
                executed: executed.clone(),
                disposed: disposed.clone(),
                pause: Duration::from_secs(30),
            };

            // One clone occupies the single worker, two fill the queue.
            for _ in 0..3 {
                scheduler.submit(prototype.clone_cron()).await;
            }

            let blocked = timeout(
                Duration::from_millis(100),
                scheduler.submit(prototype.clone_cron()),
            )
            .await;
            if blocked.is_ok() {
                return Err(AppError::Message(
                    "Submission into a full queue did not block".to_owned(),
                ));
            }

            scheduler.dispose().await;
            service.dispose();
            Ok(())
        })
    }

    struct FailingCron;

    #[async_trait]
    impl Cron for FailingCron {
        fn name(&self) -> &str {
            "faulty"
        }

        fn weight(&self) -> f64 {
            1.0
        }

        fn clone_cron(&self) -> Box<dyn Cron> {
            Box::new(FailingCron)
        }

        async fn execute(&mut self, _ctx: &CronContext) -> AppResult<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(AppError::Message("task exploded".to_owned()))
        }
    }

    #[test]
    fn task_errors_become_failure_outcomes() -> AppResult<()> {
        run_async_test(async {
            let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel();
            let service = StatsService::start(
                Duration::from_millis(50),
                Box::new(move |snapshot| {
                    drop(snapshot_tx.send(snapshot));
                }),
            );
            let scheduler = Scheduler::new(&test_config(16, 1), service.recorder());
            scheduler.submit(Box::new(FailingCron)).await;

            let mut failures = 0;
            let deadline = Instant::now() + Duration::from_secs(5);
            while failures == 0 && Instant::now() < deadline {
                let snapshot = timeout(Duration::from_secs(2), snapshot_rx.recv())
                    .await
                    .map_err(|err| AppError::Message(format!("No flush: {}", err)))?
                    .ok_or_else(|| AppError::Message("Collector dropped".to_owned()))?;
                failures = snapshot.stats_total.num_failures;
                if failures > 0 && !snapshot.errors.contains_key("cron.faulty.task exploded") {
                    return Err(AppError::Message(format!(
                        "Missing grouped error entry, have {:?}",
                        snapshot.errors.keys().collect::<Vec<_>>()
                    )));
                }
            }
            if failures == 0 {
                return Err(AppError::Message(
                    "Failing task produced no failure outcomes".to_owned(),
                ));
            }

            scheduler.dispose().await;
            service.dispose();
            Ok(())
        })
    }

    #[test]
    fn dispose_is_idempotent() -> AppResult<()> {
        run_async_test(async {
            let (service, recorder) = test_recorder();
            let scheduler = Scheduler::new(&test_config(16, 2), recorder);
            scheduler.dispose().await;
            scheduler.dispose().await;
            service.dispose();
            Ok(())
        })
    }
}
