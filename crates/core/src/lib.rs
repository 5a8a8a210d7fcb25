//! Address derivation and location inheritance for job postings.
//!
//! Everything in this crate is deterministic and free of IO so that the
//! creation, update, display and backfill paths share one implementation.

pub mod composer;
pub mod reference;
pub mod resolver;
pub mod types;

pub use composer::compose;
pub use reference::{resolve_business_ref, BusinessId, ReferenceResolution, UnresolvedReason};
pub use resolver::{BackfillDecision, LocationInheritanceResolver, Resolution};
pub use types::{
    AddressField, BusinessEntry, BusinessRecord, BusinessRef, JobEntry, JobLocationPatch,
    JobRecord, LocationRecord,
};
