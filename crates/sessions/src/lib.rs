//! Session lifecycle: boundary detection, the distributed boundary
//! lock, and archival with deferred summarization.
//!
//! A conversation "session" is the anchor for constraints and episode
//! memory. Boundaries between sessions are detected from temporal and
//! semantic signals under a per-(phone, clinic) lock, so concurrent
//! inbound messages cannot double-create or double-archive.

pub mod boundary;
pub mod lock;
pub mod manager;
pub mod store;

pub use boundary::{ResetKind, SplitSignals};
pub use lock::BoundaryLock;
pub use manager::{BoundaryOutcome, SessionManager};
pub use store::{
    EpisodeState, MemorySessionRepo, Session, SessionRepo, SessionState, SummaryStatus,
    TranscriptMessage,
};
