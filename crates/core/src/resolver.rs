use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::composer::compose;
use crate::types::{non_blank, AddressField, JobLocationPatch, JobRecord, LocationRecord};

/// Provenance note stamped on locations copied while a job is written.
pub const INHERITED_NOTE: &str = "system: copied from business location";
/// Provenance note stamped on locations copied by the backfill migrator.
pub const BACKFILL_NOTE: &str = "system: backfilled from business location";

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Decides which address and location a job inherits from its business.
#[derive(Clone)]
pub struct LocationInheritanceResolver {
    clock: Clock,
}

impl Default for LocationInheritanceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocationInheritanceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationInheritanceResolver").finish_non_exhaustive()
    }
}

impl LocationInheritanceResolver {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }

    /// Overrides the clock used for `setAt` stamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolves address and location for a job being created.
    ///
    /// A non-blank `provided_address` is kept verbatim; otherwise the address
    /// is composed from the business location. The business location, when
    /// non-empty, is copied onto the job with provenance in either case.
    pub fn resolve(
        &self,
        provided_address: Option<&str>,
        business_location: Option<&LocationRecord>,
        actor: &str,
    ) -> Resolution {
        self.resolve_with_note(provided_address, business_location, actor, INHERITED_NOTE)
    }

    /// Resolves the fields written by a job update.
    ///
    /// An explicit address is written as-is and never triggers a location
    /// copy. An omitted or cleared address falls back to the creation rules.
    pub fn resolve_update(
        &self,
        address: &AddressField,
        business_location: Option<&LocationRecord>,
        actor: &str,
    ) -> Resolution {
        match address {
            AddressField::Provided(text) => Resolution {
                address: Some(text.clone()),
                location: None,
            },
            AddressField::Omitted | AddressField::Cleared => {
                self.resolve(None, business_location, actor)
            }
        }
    }

    /// Evaluates a pre-existing job for retroactive population.
    ///
    /// Jobs that already display an address are left alone. A job whose own
    /// location is non-empty but lacks a display line only receives
    /// `businessAddress`, so its location is never overwritten. A location
    /// holding only coordinates or labels is completed, never replaced.
    pub fn backfill(
        &self,
        job: &JobRecord,
        business_location: Option<&LocationRecord>,
        fallback_actor: &str,
    ) -> BackfillDecision {
        if job.has_location() {
            return BackfillDecision::AlreadySatisfied;
        }

        let Some(source) = business_location.filter(|location| !location.is_empty()) else {
            return BackfillDecision::NoSource;
        };

        let actor = job.actor().unwrap_or(fallback_actor);
        let mut resolution = self.resolve_with_note(None, Some(source), actor, BACKFILL_NOTE);
        if let Some(own) = job.location.as_ref() {
            resolution.location = if own.is_empty() {
                resolution.location.map(|copied| own.filled_from(&copied))
            } else {
                None
            };
        }

        let patch = resolution.into_patch();
        if patch.is_empty() {
            return BackfillDecision::NoSource;
        }
        BackfillDecision::Apply(patch)
    }

    fn resolve_with_note(
        &self,
        provided_address: Option<&str>,
        business_location: Option<&LocationRecord>,
        actor: &str,
        note: &str,
    ) -> Resolution {
        let source = business_location.filter(|location| !location.is_empty());
        let location = source.map(|location| location.copied_by(actor, self.now(), note));

        let address = match provided_address {
            Some(text) if non_blank(Some(text)).is_some() => Some(text.to_string()),
            _ => compose(source),
        };

        Resolution { address, location }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

/// Address and location a job should carry after resolution.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub address: Option<String>,
    pub location: Option<LocationRecord>,
}

impl Resolution {
    /// Converts the resolution into the fields to write. An absent address
    /// yields no `businessAddress` key at all.
    pub fn into_patch(self) -> JobLocationPatch {
        JobLocationPatch {
            location: self.location,
            business_address: self.address,
        }
    }
}

/// Result of evaluating a job during backfill.
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillDecision {
    AlreadySatisfied,
    NoSource,
    Apply(JobLocationPatch),
}
