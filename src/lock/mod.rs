//! Locking substrate.
//!
//! Two independent domains: process-local session-operation locks
//! ([`SessionLocks`]) serializing work per `(project, session, operation)`,
//! and a cross-process advisory file lock ([`ManifestLock`]) serializing
//! manifest reads and writes. No lock is ever held across summarizer
//! invocations.

mod manifest;
mod session;

pub use manifest::{ManifestLock, ManifestLockGuard};
pub use session::{OperationType, SessionLockGuard, SessionLocks};
