//! Progress sink for pipeline stage changes.
//!
//! Pipelines report stage boundaries (`normalizing`, `splitting`,
//! `zipping`, …) to a [`ProgressSink`] and know nothing about where the
//! events go. The inline path uses [`NoopProgress`]; the background path
//! hands the pipeline a [`ChannelProgress`] and persists every event it
//! receives onto the job record.
//!
//! # Why a channel on the background path?
//!
//! The sink is called from synchronous pipeline code (sometimes from inside
//! `spawn_blocking`), while persisting is async repository I/O. Pushing
//! events into an unbounded channel keeps `stage()` non-blocking and lets a
//! single subscriber apply them in order. When the pipeline finishes the
//! sender is dropped, the subscriber drains what is left, and only then is
//! the terminal state written, so a late stage can never overwrite it.
//!
//! # Example
//!
//! ```rust
//! use edgequake_fileops::{ChannelProgress, ProgressSink, Stage};
//!
//! let (sink, mut events) = ChannelProgress::new();
//! sink.stage(Stage::Normalizing);
//! sink.stage(Stage::Splitting);
//! drop(sink);
//!
//! assert_eq!(events.try_recv().ok(), Some(Stage::Normalizing));
//! assert_eq!(events.try_recv().ok(), Some(Stage::Splitting));
//! ```

use crate::model::Stage;
use tokio::sync::mpsc;

/// Receives stage-change events from a running pipeline.
///
/// Implementations must be `Send + Sync`: pipelines may report from a
/// blocking-pool thread.
pub trait ProgressSink: Send + Sync {
    /// Called when the pipeline enters `stage`.
    fn stage(&self, stage: Stage) {
        let _ = stage;
    }
}

/// Discards every event. Used for inline execution.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<Stage>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Stage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn stage(&self, stage: Stage) {
        // Receiver gone means the job record is already being finalised.
        let _ = self.tx.send(stage);
    }
}
