// THEORY:
// The `error` module is the single vocabulary of failure for the whole engine.
// Failures fall into two camps:
// 1.  **Per-frame failures** (`Source`, `InvalidFrame`, `Worker`): one frame is
//     lost, nothing else is. These never travel back up the call stack of the
//     pipeline; they are handed to an `ErrorSink` and the frame is skipped.
// 2.  **Call failures** (`InsufficientFrames`, `InvalidConfig`, `NotAccepting`,
//     `AlreadyDrained`, I/O): the operation the caller asked for cannot be
//     performed, so they are returned as `Err` like any other Rust error.

use crate::pipeline::PipelineState;
use thiserror::Error;
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// An upstream decode failure reported by a frame source instead of a frame.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },
    #[error("insufficient frames: {frames} recorded colors cannot fill {width} output columns")]
    InsufficientFrames { frames: usize, width: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("pipeline is {0:?} and no longer accepts frames")]
    NotAccepting(PipelineState),
    #[error("pipeline has already drained")]
    AlreadyDrained,
    #[error("averaging task failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    pub(crate) fn invalid_frame(reason: impl Into<String>) -> Self {
        PipelineError::InvalidFrame {
            reason: reason.into(),
        }
    }
}

/// Receives per-frame failures without halting the pipeline.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, error: PipelineError);
}

/// Default sink: every skipped frame becomes a warning in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn report(&self, error: PipelineError) {
        tracing::warn!(%error, "frame skipped");
    }
}

impl ErrorSink for mpsc::UnboundedSender<PipelineError> {
    fn report(&self, error: PipelineError) {
        if let Err(mpsc::error::SendError(error)) = self.send(error) {
            // Receiver is gone; keep the failure visible.
            tracing::warn!(%error, "frame skipped (error receiver closed)");
        }
    }
}
