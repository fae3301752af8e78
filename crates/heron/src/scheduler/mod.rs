//! Work scheduling.
//!
//! Two single-worker queues keep the slow paths apart: the interactive queue
//! owns the analyzer and serializes every call into it, the index queue owns
//! the symbol index writer so persistence never delays an interactive
//! request. The [`Debouncer`] collapses bursts of change signals into one
//! lint pass.

pub mod debouncer;
pub mod worker_queue;

pub use debouncer::{CancelCheck, Debouncer};
pub use worker_queue::{Pending, WorkerHandle, WorkerQueue};

use crate::analyzer::AnalyzerSlot;
use crate::index::SymbolIndex;

/// Queue serializing analyzer access
pub type InteractiveQueue = WorkerQueue<AnalyzerSlot>;

/// Queue serializing symbol index writes
pub type IndexQueue = WorkerQueue<SymbolIndex>;

pub const INTERACTIVE_WORKER: &str = "interactive";
pub const INDEX_WORKER: &str = "index";
