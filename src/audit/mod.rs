//! Audit Trail
//!
//! Derives a semantic timeline (registration, consent changes, uploads,
//! views) purely by replaying ledger history.

pub mod events;
pub mod replay;
pub mod trail;

pub use events::{AuditEvent, AuditEventKind, SkippedEntry};
pub use replay::{merge_newest_first, record_events, replay_profile_history, ProfileReplay};
pub use trail::{AuditReport, AuditTrail};
