//! Short-TTL key-value storage abstraction.
//!
//! Constraint blocks, boundary locks, warm-cache flags, the language
//! cache, and LIMIT_OCCURRENCE counters all live behind [`KvStore`].
//! [`MemoryKv`] is the in-process implementation used by the gateway
//! and tests; a Redis-backed implementation satisfies the same contract
//! with scripts for the compound operations.

pub mod kv;

pub use kv::{KvStore, MemoryKv, WindowReserve};
