//! Progress-callback trait for per-stage conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves through its [`Stage`]s.
//!
//! # Example
//!
//! ```rust
//! use edgequake_tex2epub::{ConversionProgressCallback, ConversionConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: Stage, detail: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: {detail}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::convert::Stage;
use std::sync::Arc;

/// Called by the orchestrator at every stage transition.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive in stage order from a single thread.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first stage runs.
    ///
    /// # Arguments
    /// * `source` — human-readable description of the input (arXiv id, path)
    fn on_conversion_start(&self, source: &str) {
        let _ = source;
    }

    /// Called just before a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage has finished.
    ///
    /// # Arguments
    /// * `stage`  — the stage that was reached
    /// * `detail` — short summary (entry path, template, counts)
    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        let _ = (stage, detail);
    }

    /// Called when a stage fails; no further stage events follow.
    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called once after the document has been emitted.
    ///
    /// # Arguments
    /// * `output_len` — byte length of the normalised LaTeX
    fn on_conversion_complete(&self, output_len: usize) {
        let _ = output_len;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConversionProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start {stage}"));
        }

        fn on_stage_complete(&self, stage: Stage, detail: &str) {
            self.events.lock().unwrap().push(format!("done {stage} {detail}"));
        }

        fn on_stage_failed(&self, stage: Stage, _error: &str) {
            self.events.lock().unwrap().push(format!("failed {stage}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start("2401.00001");
        cb.on_stage_start(Stage::Included);
        cb.on_stage_complete(Stage::Included, "3 files");
        cb.on_stage_failed(Stage::Stripped, "boom");
        cb.on_conversion_complete(42);
    }

    #[test]
    fn recorder_sees_events_in_order() {
        let rec = Recorder::default();
        rec.on_stage_start(Stage::EntryResolved);
        rec.on_stage_complete(Stage::EntryResolved, "main.tex");
        rec.on_stage_failed(Stage::Included, "cycle");
        let events = rec.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["start entry_resolved", "done entry_resolved main.tex", "failed included"]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Fetched);
        cb.on_conversion_complete(1);
    }
}
