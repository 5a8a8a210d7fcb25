use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Structured place data attached to a business or a job.
///
/// Every field is optional so that an absent value stays distinguishable from
/// an empty string all the way to the persistence API.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub formatted_address: Option<String>,
    pub line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub name: Option<String>,
    pub place_id: Option<String>,
    pub allowed_radius: Option<f64>,
    pub set_by: Option<String>,
    pub set_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl LocationRecord {
    /// Address components in display order.
    pub fn address_components(&self) -> [Option<&str>; 6] {
        [
            self.formatted_address.as_deref(),
            self.line1.as_deref(),
            self.city.as_deref(),
            self.state.as_deref(),
            self.postal_code.as_deref(),
            self.country.as_deref(),
        ]
    }

    /// Returns `true` when no address component carries a non-blank value.
    ///
    /// Coordinates, labels and provenance do not count: a record holding only
    /// a latitude/longitude pair cannot produce a display address.
    pub fn is_empty(&self) -> bool {
        self.address_components()
            .into_iter()
            .all(|component| non_blank(component).is_none())
    }

    /// Returns `true` when the record already carries a primary display line
    /// (`formattedAddress` or `line1`).
    pub fn has_display_line(&self) -> bool {
        non_blank(self.formatted_address.as_deref()).is_some()
            || non_blank(self.line1.as_deref()).is_some()
    }

    /// Returns a copy of the record stamped with system provenance.
    pub fn copied_by(&self, actor: &str, at: DateTime<Utc>, note: &str) -> Self {
        Self {
            set_by: Some(actor.to_string()),
            set_at: Some(at),
            notes: Some(note.to_string()),
            ..self.clone()
        }
    }

    /// Completes this record with values from `source` without dropping
    /// anything already set. Provenance is taken from `source`.
    pub fn filled_from(&self, source: &Self) -> Self {
        Self {
            latitude: self.latitude.or(source.latitude),
            longitude: self.longitude.or(source.longitude),
            formatted_address: keep_text(&self.formatted_address, &source.formatted_address),
            line1: keep_text(&self.line1, &source.line1),
            city: keep_text(&self.city, &source.city),
            state: keep_text(&self.state, &source.state),
            country: keep_text(&self.country, &source.country),
            postal_code: keep_text(&self.postal_code, &source.postal_code),
            name: keep_text(&self.name, &source.name),
            place_id: keep_text(&self.place_id, &source.place_id),
            allowed_radius: self.allowed_radius.or(source.allowed_radius),
            set_by: source.set_by.clone(),
            set_at: source.set_at,
            notes: source.notes.clone(),
        }
    }
}

fn keep_text(own: &Option<String>, fallback: &Option<String>) -> Option<String> {
    match non_blank(own.as_deref()) {
        Some(_) => own.clone(),
        None => fallback.clone(),
    }
}

/// Business as exposed by the persistence API. Only the fields the
/// derivation engine reads are modelled.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "BusinessDocument")]
pub struct BusinessRecord {
    pub id: String,
    pub name: Option<String>,
    pub location: Option<LocationRecord>,
}

impl BusinessRecord {
    /// Returns the business location when it holds at least one address component.
    pub fn location_source(&self) -> Option<&LocationRecord> {
        self.location.as_ref().filter(|location| !location.is_empty())
    }
}

#[derive(Deserialize)]
struct BusinessDocument {
    #[serde(default, rename = "_id")]
    object_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location: Option<LocationRecord>,
}

impl TryFrom<BusinessDocument> for BusinessRecord {
    type Error = RecordError;

    fn try_from(document: BusinessDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: document_identifier(document.object_id, document.id)?,
            name: document.name,
            location: document.location,
        })
    }
}

/// Decoding outcome for a single business document within a listing page.
#[derive(Debug, Clone, PartialEq)]
pub enum BusinessEntry {
    Record(BusinessRecord),
    Malformed { id: Option<String>, reason: String },
}

impl BusinessEntry {
    /// Decodes one raw business document without failing the surrounding page.
    pub fn from_value(value: Value) -> Self {
        let id = raw_identifier(&value);
        match serde_json::from_value(value) {
            Ok(record) => Self::Record(record),
            Err(err) => Self::Malformed {
                id,
                reason: RecordError::Decode(err).to_string(),
            },
        }
    }
}

/// Reference from a job to its owning business, in any of the shapes callers send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusinessRef {
    Id(String),
    Embedded(EmbeddedBusiness),
    Other(Value),
}

/// Business object embedded inside a job document.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedBusiness {
    #[serde(default, rename = "_id")]
    pub object_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

/// Job as exposed by the persistence API.
///
/// Documents may carry `_id`, `id` or both; `_id` wins when both are set.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "JobDocument")]
pub struct JobRecord {
    pub id: String,
    pub title: Option<String>,
    pub business: Option<BusinessRef>,
    /// Legacy reference field kept by older job documents.
    pub business_id: Option<String>,
    pub location: Option<LocationRecord>,
    pub business_address: Option<String>,
    pub created_by: Option<String>,
    pub employer: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobDocument {
    #[serde(default, rename = "_id")]
    object_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    business: Option<BusinessRef>,
    #[serde(default)]
    business_id: Option<String>,
    #[serde(default)]
    location: Option<LocationRecord>,
    #[serde(default)]
    business_address: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    employer: Option<String>,
}

impl TryFrom<JobDocument> for JobRecord {
    type Error = RecordError;

    fn try_from(document: JobDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: document_identifier(document.object_id, document.id)?,
            title: document.title,
            business: document.business,
            business_id: document.business_id,
            location: document.location,
            business_address: document.business_address,
            created_by: document.created_by,
            employer: document.employer,
        })
    }
}

impl JobRecord {
    /// Returns `true` when the job already carries a usable display address,
    /// either through its own location or through `businessAddress`.
    pub fn has_location(&self) -> bool {
        self.location
            .as_ref()
            .is_some_and(LocationRecord::has_display_line)
            || non_blank(self.business_address.as_deref()).is_some()
    }

    /// Identifier of the user that owns the job, preferring `createdBy`.
    pub fn actor(&self) -> Option<&str> {
        non_blank(self.created_by.as_deref()).or_else(|| non_blank(self.employer.as_deref()))
    }
}

/// Decoding outcome for a single job document within a listing page.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEntry {
    Record(JobRecord),
    Malformed { id: Option<String>, reason: String },
}

impl JobEntry {
    /// Decodes one raw job document without failing the surrounding page.
    pub fn from_value(value: Value) -> Self {
        let id = raw_identifier(&value);
        match decode_job(value) {
            Ok(record) => Self::Record(record),
            Err(err) => Self::Malformed {
                id,
                reason: err.to_string(),
            },
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Record(record) => Some(record.id.as_str()),
            Self::Malformed { id, .. } => id.as_deref(),
        }
    }
}

/// Partial job update carrying only derived location fields.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLocationPatch {
    pub location: Option<LocationRecord>,
    pub business_address: Option<String>,
}

impl JobLocationPatch {
    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.business_address.is_none()
    }

    /// Applies the patch onto a job, touching only the patched fields.
    pub fn apply_to(&self, job: &mut JobRecord) {
        if let Some(location) = &self.location {
            job.location = Some(location.clone());
        }
        if let Some(address) = &self.business_address {
            job.business_address = Some(address.clone());
        }
    }
}

/// Address field of a job update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressField {
    /// The request did not mention the address.
    Omitted,
    /// The request sent `null` or a blank string.
    Cleared,
    /// The request sent a non-blank address, kept verbatim.
    Provided(String),
}

impl AddressField {
    /// Builds the field from a double option where the outer layer tracks
    /// key presence and the inner layer tracks `null`.
    pub fn from_update(value: Option<Option<String>>) -> Self {
        match value {
            None => Self::Omitted,
            Some(None) => Self::Cleared,
            Some(Some(text)) if text.trim().is_empty() => Self::Cleared,
            Some(Some(text)) => Self::Provided(text),
        }
    }
}

/// Errors produced while decoding raw persistence documents.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is missing an identifier")]
    MissingId,
    #[error("failed to decode record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Decodes a raw job document, rejecting documents without an identifier.
pub fn decode_job(value: Value) -> Result<JobRecord, RecordError> {
    Ok(serde_json::from_value(value)?)
}

fn document_identifier(
    object_id: Option<String>,
    id: Option<String>,
) -> Result<String, RecordError> {
    object_id
        .filter(|value| !value.trim().is_empty())
        .or_else(|| id.filter(|value| !value.trim().is_empty()))
        .ok_or(RecordError::MissingId)
}

/// Returns the trimmed value when it is present and non-empty.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn raw_identifier(value: &Value) -> Option<String> {
    ["_id", "id"]
        .into_iter()
        .find_map(|key| non_blank(value.get(key).and_then(Value::as_str)))
        .map(str::to_string)
}
