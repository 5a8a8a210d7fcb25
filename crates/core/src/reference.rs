use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{non_blank, BusinessRef, JobRecord};

/// Normalized business identifier used for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessId(String);

impl BusinessId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusinessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of normalizing a job's business reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceResolution {
    Resolved(BusinessId),
    Unresolved(UnresolvedReason),
}

/// Why a business reference could not be turned into an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Neither `business` nor `businessId` is present.
    Missing,
    /// A reference is present but every identifier field is blank.
    Blank,
    /// An embedded business object carries no identifier field.
    EmbeddedWithoutId,
    /// The reference is neither a string nor an object.
    UnsupportedShape,
}

impl UnresolvedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "reference:missing",
            Self::Blank => "reference:blank",
            Self::EmbeddedWithoutId => "reference:embedded_without_id",
            Self::UnsupportedShape => "reference:unsupported_shape",
        }
    }
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the owning business of a job to a single identifier.
///
/// The primary `business` field wins when it yields an identifier (bare
/// string, or embedded object exposing `_id`/`id`). Otherwise the legacy
/// `businessId` field is consulted.
pub fn resolve_business_ref(job: &JobRecord) -> ReferenceResolution {
    let primary_failure = match job.business.as_ref().map(primary_identifier) {
        Some(Ok(id)) => return ReferenceResolution::Resolved(BusinessId::new(id)),
        Some(Err(reason)) => Some(reason),
        None => None,
    };

    if let Some(legacy) = non_blank(job.business_id.as_deref()) {
        return ReferenceResolution::Resolved(BusinessId::new(legacy));
    }

    let reason = primary_failure.unwrap_or(if job.business_id.is_some() {
        UnresolvedReason::Blank
    } else {
        UnresolvedReason::Missing
    });
    ReferenceResolution::Unresolved(reason)
}

fn primary_identifier(reference: &BusinessRef) -> Result<&str, UnresolvedReason> {
    match reference {
        BusinessRef::Id(value) => non_blank(Some(value.as_str())).ok_or(UnresolvedReason::Blank),
        BusinessRef::Embedded(embedded) => {
            if embedded.object_id.is_none() && embedded.id.is_none() {
                return Err(UnresolvedReason::EmbeddedWithoutId);
            }
            non_blank(embedded.object_id.as_deref())
                .or_else(|| non_blank(embedded.id.as_deref()))
                .ok_or(UnresolvedReason::Blank)
        }
        BusinessRef::Other(_) => Err(UnresolvedReason::UnsupportedShape),
    }
}
