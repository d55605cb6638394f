//! Page capture
//!
//! Turns a stream of page insertions into conversation deltas:
//! - `node`: the structural view of inserted page content
//! - `debounce` / `collector`: quiet-period batching of insertions
//! - `classifier`: per-service markup adapters
//! - `extractor`: prompt/response pairing over a flushed batch
//! - `pipeline`: the async driver emitting `PageMessage`s

pub mod classifier;
pub mod collector;
pub mod debounce;
pub mod extractor;
pub mod node;
pub mod pipeline;

pub use classifier::{classifier_for, Classified, TurnClassifier};
pub use collector::BatchCollector;
pub use debounce::{DebounceState, QuietPeriodTimer, DEFAULT_QUIET_PERIOD};
pub use extractor::{pair_texts, PairExtractor, ProcessedNodeSet};
pub use node::{NodeHandle, PageElement, PageNode};
pub use pipeline::{CaptureError, CapturePipeline, CaptureStats, PageEvent};
