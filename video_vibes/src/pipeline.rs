// THEORY:
// The `pipeline` module is the top-level API of the engine. `BarcodePipeline`
// wires the worker pool to the result collector and owns the only piece of
// control state: which phase the run is in.
//
//   Running  --end of stream-->  Draining  --join + drain-->  Drained
//
// - **Running**: frames are admitted into the pool as they arrive.
// - **Draining**: the source has said it is done. New `submit` calls are
//   refused, but frames the source had already buffered at that moment are
//   still swept into the pool under the same concurrency ceiling. Anything the
//   source produces later is never read. Then every in-flight task is joined,
//   which drops the last recorder handle, and the collector drains.
// - **Drained**: terminal. The `ColorSequence` has been handed out by value and
//   nothing in the engine can touch it again.
//
// Every transition happens inside this struct; no other component signals
// another about shutdown.

use crate::core_modules::collector::{RecordOrder, ResultCollector};
use crate::core_modules::frame::frame::Frame;
use crate::core_modules::sequence::ColorSequence;
use crate::error::{ErrorSink, LoggingErrorSink, PipelineError, Result, SourceError};
use crate::parallel_pipeline::WorkerPool;
use futures::FutureExt;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_BARCODE_WIDTH: u32 = 5120;
const DEFAULT_BARCODE_HEIGHT: u32 = 1440;

/// Configuration for the frame-averaging stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ceiling on concurrently running averaging tasks. Must be at least 1.
    pub max_concurrency: usize,
    /// Whether the sequence follows submission or completion order.
    pub record_order: RecordOrder,
    /// Capacity of the worker-to-collector channel; `None` uses `max_concurrency`.
    pub collector_buffer: Option<usize>,
    /// Minimum time between progress log lines.
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get(),
            record_order: RecordOrder::default(),
            collector_buffer: None,
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(PipelineError::InvalidConfig("max_concurrency must be at least 1".into()));
        }
        if self.collector_buffer == Some(0) {
            return Err(PipelineError::InvalidConfig("collector_buffer must be at least 1".into()));
        }
        Ok(())
    }
}

/// Shape of the rendered barcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeConfig {
    /// Output columns; one window of the color sequence each.
    pub width: u32,
    pub height: u32,
    /// How many window-widths each column averages over. 1 means disjoint windows.
    pub smoothing: usize,
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_BARCODE_WIDTH,
            height: DEFAULT_BARCODE_HEIGHT,
            smoothing: 1,
        }
    }
}

impl BarcodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "barcode must be at least 1x1, got {}x{}",
                self.width, self.height
            )));
        }
        if self.smoothing == 0 {
            return Err(PipelineError::InvalidConfig("smoothing must be at least 1".into()));
        }
        Ok(())
    }
}

/// Lifecycle phase of a `BarcodePipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Drained,
}

/// One item from a frame source.
#[derive(Debug)]
pub enum FrameEvent {
    Frame(Frame),
    /// A decode failure; reported and skipped.
    Error(SourceError),
    /// No more frames will be produced.
    EndOfStream,
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_submitted: u64,
    pub frames_failed: u64,
    pub source_errors: u64,
    pub peak_in_flight: usize,
}

/// The result of a fully drained run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub sequence: ColorSequence,
    pub stats: PipelineStats,
}

struct Stages {
    pool: WorkerPool,
    collector: ResultCollector,
}

/// Coordinates the worker pool and result collector through one run.
pub struct BarcodePipeline {
    config: PipelineConfig,
    state: PipelineState,
    stages: Option<Stages>,
    errors: Arc<dyn ErrorSink>,
    source_errors: u64,
}

impl BarcodePipeline {
    /// Starts a pipeline that logs skipped frames. Requires a tokio runtime.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_error_sink(config, Arc::new(LoggingErrorSink))
    }

    pub fn with_error_sink(config: PipelineConfig, errors: Arc<dyn ErrorSink>) -> Result<Self> {
        config.validate()?;
        let buffer = config.collector_buffer.unwrap_or(config.max_concurrency);
        let (collector, recorder) = ResultCollector::spawn(config.record_order, buffer);
        let pool = WorkerPool::new(config.max_concurrency, recorder, Arc::clone(&errors))?
            .with_progress_interval(config.progress_interval);

        tracing::debug!(
            max_concurrency = config.max_concurrency,
            record_order = ?config.record_order,
            "pipeline running"
        );
        Ok(Self {
            config,
            state: PipelineState::Running,
            stages: Some(Stages { pool, collector }),
            errors,
            source_errors: 0,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Admits a frame, waiting while the concurrency ceiling is reached.
    pub async fn submit(&mut self, frame: Frame) -> Result<()> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotAccepting(self.state));
        }
        self.admit(frame).await
    }

    /// Forwards a source decode failure to the error sink.
    pub fn report(&mut self, error: SourceError) {
        self.source_errors += 1;
        self.errors.report(error.into());
    }

    /// Marks the source as exhausted; `submit` is refused from here on.
    pub fn end_of_stream(&mut self) {
        if self.state == PipelineState::Running {
            tracing::info!(
                submitted = self.submitted(),
                "end of stream; draining"
            );
            self.state = PipelineState::Draining;
        }
    }

    /// Consumes a frame source until it signals or reaches its end, then drains.
    ///
    /// Events already buffered in the source when `EndOfStream` arrives are
    /// handled before the drain; the source is not awaited again after that. A
    /// source that closes without `EndOfStream` is treated as having sent it.
    pub async fn run<S>(&mut self, mut source: S) -> Result<PipelineReport>
    where
        S: Stream<Item = FrameEvent> + Unpin,
    {
        let mut signalled = false;
        while let Some(event) = source.next().await {
            match event {
                FrameEvent::Frame(frame) => self.admit(frame).await?,
                FrameEvent::Error(error) => self.report(error),
                FrameEvent::EndOfStream => {
                    signalled = true;
                    break;
                }
            }
        }
        self.end_of_stream();

        // A closed source must not be polled again.
        if signalled {
            let swept = self.sweep_ready(&mut source).await?;
            if swept > 0 {
                tracing::debug!(swept, "handled frames buffered after end of stream");
            }
        } else {
            tracing::debug!("source closed without end of stream");
        }
        self.finish().await
    }

    /// Completes the drain: joins every task, drains the collector and moves
    /// to `Drained`.
    pub async fn finish(&mut self) -> Result<PipelineReport> {
        self.end_of_stream();
        let Stages { pool, collector } = self.stages.take().ok_or(PipelineError::AlreadyDrained)?;

        let pool_stats = pool.join().await;
        let sequence = collector.drain().await?;
        self.state = PipelineState::Drained;

        let stats = PipelineStats {
            frames_submitted: pool_stats.submitted,
            frames_failed: pool_stats.failed,
            source_errors: self.source_errors,
            peak_in_flight: pool_stats.peak_in_flight,
        };
        tracing::info!(
            colors = sequence.len(),
            failed = stats.frames_failed,
            source_errors = stats.source_errors,
            peak_in_flight = stats.peak_in_flight,
            "pipeline drained"
        );
        Ok(PipelineReport { sequence, stats })
    }

    /// Admits whatever the source has ready right now, without waiting for more.
    async fn sweep_ready<S>(&mut self, source: &mut S) -> Result<u64>
    where
        S: Stream<Item = FrameEvent> + Unpin,
    {
        let mut swept = 0u64;
        // Unconstrained so the cooperative budget cannot hide ready events.
        while let Some(Some(event)) = tokio::task::unconstrained(source.next()).now_or_never() {
            match event {
                FrameEvent::Frame(frame) => {
                    self.admit(frame).await?;
                    swept += 1;
                }
                FrameEvent::Error(error) => self.report(error),
                FrameEvent::EndOfStream => {}
            }
        }
        Ok(swept)
    }

    async fn admit(&mut self, frame: Frame) -> Result<()> {
        let stages = self.stages.as_mut().ok_or(PipelineError::AlreadyDrained)?;
        stages.pool.submit(frame).await
    }

    fn submitted(&self) -> u64 {
        self.stages.as_ref().map_or(0, |stages| stages.pool.submitted())
    }
}

/// Adapts a bounded channel into a frame source for `BarcodePipeline::run`.
pub fn event_stream(receiver: mpsc::Receiver<FrameEvent>) -> BoxStream<'static, FrameEvent> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|event| (event, receiver))
    })
    .boxed()
}

/// A bounded frame buffer: the sender feeds a decoder's output, the stream
/// feeds `BarcodePipeline::run`.
pub fn frame_channel(capacity: usize) -> (mpsc::Sender<FrameEvent>, BoxStream<'static, FrameEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (sender, event_stream(receiver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::color::color::Color;
    use crate::core_modules::frame::frame::PixelLayout;

    fn config(max_concurrency: usize, record_order: RecordOrder) -> PipelineConfig {
        PipelineConfig {
            max_concurrency,
            record_order,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(PipelineConfig::default().max_concurrency >= 1);
        assert_eq!(BarcodeConfig::default().width, 5120);
        assert!(BarcodeConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero = config(0, RecordOrder::Submission);
        assert!(matches!(zero.validate(), Err(PipelineError::InvalidConfig(_))));

        let no_buffer = PipelineConfig {
            collector_buffer: Some(0),
            ..PipelineConfig::default()
        };
        assert!(no_buffer.validate().is_err());

        let flat = BarcodeConfig {
            height: 0,
            ..BarcodeConfig::default()
        };
        assert!(flat.validate().is_err());
    }

    #[tokio::test]
    async fn new_rejects_zero_concurrency() {
        assert!(matches!(
            BarcodePipeline::new(config(0, RecordOrder::Submission)),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn state_machine_walks_running_draining_drained() {
        let mut pipeline = BarcodePipeline::new(config(2, RecordOrder::Submission)).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);

        pipeline.submit(Frame::solid(4, 4, 9, 9, 9)).await.unwrap();
        pipeline.end_of_stream();
        assert_eq!(pipeline.state(), PipelineState::Draining);
        assert!(matches!(
            pipeline.submit(Frame::solid(4, 4, 1, 1, 1)).await,
            Err(PipelineError::NotAccepting(PipelineState::Draining))
        ));

        let report = pipeline.finish().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Drained);
        assert_eq!(report.sequence.as_slice(), &[Color::opaque(9, 9, 9)]);

        assert!(matches!(
            pipeline.submit(Frame::solid(4, 4, 1, 1, 1)).await,
            Err(PipelineError::NotAccepting(PipelineState::Drained))
        ));
        assert!(matches!(pipeline.finish().await, Err(PipelineError::AlreadyDrained)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_buffered_after_end_of_stream_are_swept() {
        let events = vec![
            FrameEvent::Frame(Frame::solid(2, 2, 1, 0, 0)),
            FrameEvent::EndOfStream,
            FrameEvent::Frame(Frame::solid(2, 2, 2, 0, 0)),
            FrameEvent::Frame(Frame::solid(2, 2, 3, 0, 0)),
        ];
        let mut pipeline = BarcodePipeline::new(config(1, RecordOrder::Submission)).unwrap();
        let report = pipeline.run(futures::stream::iter(events)).await.unwrap();

        let reds: Vec<u8> = report.sequence.iter().map(|c| c.red).collect();
        assert_eq!(reds, vec![1, 2, 3]);
        assert_eq!(report.stats.frames_submitted, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn source_and_frame_errors_are_reported_and_skipped() {
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let mut pipeline =
            BarcodePipeline::with_error_sink(config(2, RecordOrder::Submission), Arc::new(error_tx)).unwrap();

        let events = vec![
            FrameEvent::Frame(Frame::solid(2, 2, 10, 10, 10)),
            FrameEvent::Error(SourceError::new("corrupt packet")),
            FrameEvent::Frame(Frame::new(0, 3, PixelLayout::Rgb8, Vec::new()).unwrap()),
            FrameEvent::Frame(Frame::solid(2, 2, 20, 20, 20)),
            FrameEvent::EndOfStream,
        ];
        let report = pipeline.run(futures::stream::iter(events)).await.unwrap();

        assert_eq!(report.sequence.len(), 2);
        assert_eq!(report.stats.frames_submitted, 3);
        assert_eq!(report.stats.frames_failed, 1);
        assert_eq!(report.stats.source_errors, 1);

        let mut reported = Vec::new();
        while let Ok(error) = error_rx.try_recv() {
            reported.push(error);
        }
        assert_eq!(reported.len(), 2);
        assert!(reported.iter().any(|e| matches!(e, PipelineError::Source(_))));
        assert!(reported.iter().any(|e| matches!(e, PipelineError::InvalidFrame { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closed_source_without_end_of_stream_still_drains() {
        let (sender, source) = frame_channel(4);
        let producer = tokio::spawn(async move {
            for i in 0..5u8 {
                sender.send(FrameEvent::Frame(Frame::solid(3, 3, i, i, i))).await.unwrap();
            }
        });

        let mut pipeline = BarcodePipeline::new(config(2, RecordOrder::Submission)).unwrap();
        let report = pipeline.run(source).await.unwrap();
        producer.await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::Drained);
        let reds: Vec<u8> = report.sequence.iter().map(|c| c.red).collect();
        assert_eq!(reds, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn end_of_stream_drains_while_source_stays_open() {
        let (sender, source) = frame_channel(8);
        for i in 1..=3u8 {
            sender.send(FrameEvent::Frame(Frame::solid(2, 2, i, 0, 0))).await.unwrap();
        }
        sender.send(FrameEvent::EndOfStream).await.unwrap();

        let mut pipeline = BarcodePipeline::new(config(2, RecordOrder::Submission)).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), pipeline.run(source))
            .await
            .expect("run must not wait for the source to close")
            .unwrap();

        assert_eq!(pipeline.state(), PipelineState::Drained);
        let reds: Vec<u8> = report.sequence.iter().map(|c| c.red).collect();
        assert_eq!(reds, vec![1, 2, 3]);
        // The source was released with the run; later frames have nowhere to go.
        assert!(sender.send(FrameEvent::Frame(Frame::solid(2, 2, 4, 0, 0))).await.is_err());
    }

    #[tokio::test]
    async fn empty_source_drains_to_empty_sequence() {
        let mut pipeline = BarcodePipeline::new(config(1, RecordOrder::Completion)).unwrap();
        let report = pipeline
            .run(futures::stream::iter(vec![FrameEvent::EndOfStream]))
            .await
            .unwrap();
        assert!(report.sequence.is_empty());
        assert_eq!(report.stats, PipelineStats::default());
    }
}
