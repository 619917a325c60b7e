use crate::core_modules::averager::average_color;
use crate::core_modules::collector::ColorRecorder;
use crate::core_modules::frame::frame::Frame;
use crate::error::{ErrorSink, PipelineError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Counters reported once the pool has been joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Frames admitted into the pool.
    pub submitted: u64,
    /// Admitted frames that produced no color.
    pub failed: u64,
    /// Highest number of averaging tasks that were in flight at once.
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct Gauges {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failed: AtomicU64,
}

/// A held concurrency slot. The in-flight count drops before the permit is
/// released, so the gauge never reads above the slot count.
struct Slot {
    gauges: Arc<Gauges>,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    fn occupy(gauges: Arc<Gauges>, permit: OwnedSemaphorePermit) -> Self {
        let now = gauges.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gauges.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self {
            gauges,
            _permit: permit,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauges.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded pool of averaging tasks.
///
/// At most `max_concurrency` frames are being averaged (or waiting to hand
/// their color to the collector) at any moment; `submit` waits for a free slot
/// otherwise. Slots are granted in FIFO order.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    recorder: ColorRecorder,
    errors: Arc<dyn ErrorSink>,
    tasks: JoinSet<()>,
    gauges: Arc<Gauges>,
    next_index: u64,
    progress_interval: Duration,
    last_progress: Instant,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize, recorder: ColorRecorder, errors: Arc<dyn ErrorSink>) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(PipelineError::InvalidConfig("max_concurrency must be at least 1".into()));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(max_concurrency)),
            recorder,
            errors,
            tasks: JoinSet::new(),
            gauges: Arc::new(Gauges::default()),
            next_index: 0,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            last_progress: Instant::now(),
        })
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.gauges.in_flight.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> u64 {
        self.next_index
    }

    /// Admits one frame, waiting while every slot is taken.
    pub async fn submit(&mut self, frame: Frame) -> Result<()> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Worker("worker pool slots were closed".into()))?;
        let slot = Slot::occupy(Arc::clone(&self.gauges), permit);

        let index = self.next_index;
        self.next_index += 1;

        self.reap_finished();
        self.log_progress();

        let recorder = self.recorder.clone();
        let errors = Arc::clone(&self.errors);
        let gauges = Arc::clone(&self.gauges);
        self.tasks.spawn(async move {
            let _slot = slot;
            let outcome = match tokio::task::spawn_blocking(move || average_color(&frame)).await {
                Ok(Ok(color)) => recorder.record(index, color).await,
                Ok(Err(error)) => Err(error),
                Err(join_error) => Err(PipelineError::Worker(format!("frame {}: {}", index, join_error))),
            };
            if let Err(error) = outcome {
                gauges.failed.fetch_add(1, Ordering::SeqCst);
                errors.report(error);
            }
        });
        Ok(())
    }

    /// Waits for every outstanding task, then releases the recorder handle.
    pub async fn join(mut self) -> PoolStats {
        tracing::debug!(outstanding = self.tasks.len(), "waiting on averaging tasks");
        while let Some(result) = self.tasks.join_next().await {
            self.note_join(result);
        }
        let stats = PoolStats {
            submitted: self.next_index,
            failed: self.gauges.failed.load(Ordering::SeqCst),
            peak_in_flight: self.gauges.peak_in_flight.load(Ordering::SeqCst),
        };
        drop(self.recorder);
        stats
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.note_join(result);
        }
    }

    fn note_join(&self, result: std::result::Result<(), JoinError>) {
        if let Err(join_error) = result {
            self.gauges.failed.fetch_add(1, Ordering::SeqCst);
            self.errors.report(PipelineError::Worker(join_error.to_string()));
        }
    }

    fn log_progress(&mut self) {
        if self.last_progress.elapsed() < self.progress_interval {
            return;
        }
        self.last_progress = Instant::now();
        tracing::info!(
            submitted = self.next_index,
            in_flight = self.in_flight(),
            "averaging frames"
        );
    }
}
