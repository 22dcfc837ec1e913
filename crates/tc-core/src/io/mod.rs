//! File I/O primitives for the team-chat storage engine
//!
//! - **Advisory locks**: per-team, per-resource exclusive locks with
//!   exponential backoff retry and guaranteed release on drop
//! - **Atomic replace**: JSON state written to a sibling temp file and
//!   renamed into place, so readers never observe partial content
//! - **JSONL append/stream**: one compact object per LF-terminated line;
//!   malformed lines are skipped and fingerprinted, never fatal
//!
//! Visibility is atomic; durability is best-effort (no fsync).

pub mod atomic;
pub mod error;
pub mod hash;
pub mod jsonl;
pub mod lock;

pub use error::StoreError;
pub use lock::{lock_resource, FileLock, LockResource};
