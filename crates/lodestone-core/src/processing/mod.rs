//! Bulk synchronization of a document collection into the index.
//!
//! The document source (a directory walker, a file watcher, a notes app)
//! produces a list of [`FileOperation`]s; [`SyncPipeline`] applies them one
//! at a time and reports what happened.
//!
//! - Unchanged files are skipped using the persisted `FileRecord`s
//! - Files that keep failing are skipped after `max_retries` attempts until
//!   they change on disk
//! - One file's failure never aborts the rest of the batch
//!
//! # Example
//!
//! ```ignore
//! use lodestone_core::processing::{FileOperation, SyncPipeline};
//!
//! let pipeline = SyncPipeline::new(engine.clone(), 3);
//! let summary = pipeline
//!     .run(ops, |progress| {
//!         println!("{:.0}% complete", progress.fraction() * 100.0);
//!     })
//!     .await;
//! println!("indexed {}, failed {}", summary.indexed, summary.failed);
//! ```

mod progress;
mod sync;

pub use progress::{BatchProgress, ProgressTimer};
pub use sync::{FileFailure, FileOperation, SyncPipeline, SyncSummary};
