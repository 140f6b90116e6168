//! Consent Graph
//!
//! User profiles, privileged registration, and the per-patient consent set
//! that gates every record read and write.

pub mod manager;
pub mod profile;
pub mod registry;

pub use manager::{ConsentManager, ConsentUpdate};
pub use profile::{UserProfile, USER_DOC_TYPE};
pub use registry::UserRegistry;
