// THEORY:
// The `collector` serializes the output of every averaging task into one
// `ColorSequence`. Instead of a shared vector behind a lock, the sequence is
// owned by a single actor task; workers only hold a cheap `ColorRecorder`
// handle and send it `(index, color)` messages over a bounded channel.
//
// Key architectural principles:
// 1.  **Single writer**: only the actor touches the sequence, so there is no
//     torn or lost append, whatever the number of concurrent workers.
// 2.  **Drain by channel closure**: the actor keeps receiving until every
//     recorder has been dropped *and* the channel buffer is empty. Whatever was
//     still buffered when the last worker finished is therefore recorded before
//     `drain` returns. No separate "done" signal can race the last message.
// 3.  **Explicit ordering**: workers finish in arbitrary order. Each message
//     carries its frame's submission index, and `RecordOrder` decides whether
//     the final sequence follows that index (chronological, the default) or the
//     order the messages arrived in.

use crate::core_modules::color::color::Color;
use crate::core_modules::sequence::ColorSequence;
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How the collector orders colors in the finished sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    /// Position follows the frame's submission index (video timeline order).
    #[default]
    Submission,
    /// Position follows the order in which averaging tasks completed.
    Completion,
}

/// One averaged frame on its way to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameColor {
    /// Zero-based admission index assigned by the worker pool.
    pub index: u64,
    pub color: Color,
}

/// Cloneable handle workers use to hand results to the collector.
#[derive(Debug, Clone)]
pub struct ColorRecorder {
    sender: mpsc::Sender<FrameColor>,
}

impl ColorRecorder {
    /// Queues one result, waiting only while the collector's buffer is full.
    pub async fn record(&self, index: u64, color: Color) -> Result<()> {
        self.sender
            .send(FrameColor { index, color })
            .await
            .map_err(|_| PipelineError::Worker(format!("result collector stopped before frame {}", index)))
    }
}

#[cfg(test)]
impl ColorRecorder {
    /// A recorder whose results land in a plain receiver instead of a collector.
    pub(crate) fn detached(buffer: usize) -> (Self, mpsc::Receiver<FrameColor>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

/// Owns the actor task that builds the `ColorSequence`.
#[derive(Debug)]
pub struct ResultCollector {
    handle: JoinHandle<ColorSequence>,
}

impl ResultCollector {
    /// Starts the collector actor. Must be called from within a tokio runtime.
    pub fn spawn(order: RecordOrder, buffer: usize) -> (Self, ColorRecorder) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(collect(receiver, order));
        (Self { handle }, ColorRecorder { sender })
    }

    /// Waits for every buffered result and returns the finished sequence.
    ///
    /// Completes only once all `ColorRecorder` clones have been dropped.
    pub async fn drain(self) -> Result<ColorSequence> {
        self.handle
            .await
            .map_err(|error| PipelineError::Worker(format!("result collector failed: {}", error)))
    }
}

enum Accumulator {
    Completion(Vec<Color>),
    Submission(BTreeMap<u64, Color>),
}

impl Accumulator {
    fn new(order: RecordOrder) -> Self {
        match order {
            RecordOrder::Completion => Accumulator::Completion(Vec::new()),
            RecordOrder::Submission => Accumulator::Submission(BTreeMap::new()),
        }
    }

    fn push(&mut self, entry: FrameColor) {
        match self {
            Accumulator::Completion(colors) => colors.push(entry.color),
            Accumulator::Submission(colors) => {
                let previous = colors.insert(entry.index, entry.color);
                debug_assert!(previous.is_none(), "frame {} recorded twice", entry.index);
            }
        }
    }

    fn finish(self) -> Vec<Color> {
        match self {
            Accumulator::Completion(colors) => colors,
            // Missing indices (failed frames) simply close up.
            Accumulator::Submission(colors) => colors.into_values().collect(),
        }
    }
}

async fn collect(mut receiver: mpsc::Receiver<FrameColor>, order: RecordOrder) -> ColorSequence {
    let mut accumulator = Accumulator::new(order);
    while let Some(entry) = receiver.recv().await {
        accumulator.push(entry);
    }
    let colors = accumulator.finish();
    tracing::debug!(colors = colors.len(), ?order, "result collector drained");
    ColorSequence::from_colors(colors)
}
