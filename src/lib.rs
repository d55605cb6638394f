// Weaver Library
// Capture and session reconciliation, shared by the CLI binary and tests

pub mod backend;
pub mod cache;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod flow;
pub mod identity;
pub mod logging;
pub mod message;
pub mod turn;
pub mod upload;

// Re-export commonly used types for CLI
pub use backend::{BackendClient, BackendError, DeltaUpload, SessionBackend, SessionSummary};
pub use cache::{CacheError, JsonFileStore, MemoryStore, SessionCache, SessionRecord, SessionStore};
pub use capture::{CaptureError, CapturePipeline, CaptureStats, PageElement, PageEvent, PageNode};
pub use config::{ConfigError, WeaverConfig};
pub use coordinator::Coordinator;
pub use flow::{Activation, ExistingView, FlowError, FlowState, NewSessionChoice, SessionFlow};
pub use identity::{is_real_id, real_conversation_id, resolve_page, PageIdentity, Service, SessionKey};
pub use message::PageMessage;
pub use turn::{ConversationDelta, ConversationTurn};
pub use upload::{UploadCoordinator, UploadResult};
