//! Canonical verification state.

mod record;
mod verification;

pub use record::{VerificationRecord, VerificationResult, CURRENT_SCHEMA_VERSION};
pub use verification::VerificationStore;
