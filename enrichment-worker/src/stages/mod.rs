//! Enrichment stages. Each stage is a function of a record and an identity API handle, invoked
//! uniformly by the pipeline in the order returned by `default_stages`.
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::StageClient;
use crate::error::StageCallError;
use crate::record::{EnrichmentOutcome, Field, Record, StageKind};

mod classification;
mod company;
mod contact;
mod new_contact;
mod search;

pub use classification::ClassificationStage;
pub use company::CompanyEnrichStage;
pub use contact::ContactEnrichStage;
pub use new_contact::NewContactStage;
pub use search::ContactSearchStage;

#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Enrich `record`. Ordinary misses are `NotFound` outcomes; errors are reserved for calls
    /// that could not be completed.
    async fn enrich(
        &self,
        record: &Record,
        client: &StageClient<'_>,
    ) -> Result<(Record, EnrichmentOutcome), StageCallError>;
}

/// Every stage, in dependency order.
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(CompanyEnrichStage),
        Box::new(ClassificationStage),
        Box::new(ContactEnrichStage),
        Box::new(ContactSearchStage),
        Box::new(NewContactStage),
    ]
}

/// Person attributes returned by the contact endpoints.
pub(crate) const PERSON_FIELDS: &[(&str, Field)] = &[
    ("id", Field::PersonId),
    ("firstName", Field::FirstName),
    ("lastName", Field::LastName),
    ("email", Field::Email),
    ("phone", Field::Phone),
    ("jobTitle", Field::JobTitle),
];

/// Text of a JSON string or number. Null, blank strings and structures have none.
pub(crate) fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The best match of an enrich response. `data.result[0].data` holds either the match itself or a
/// list of matches, best first.
pub(crate) fn first_match(response: &Value) -> Option<&Map<String, Value>> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        return None;
    }

    match response.pointer("/data/result/0/data")? {
        Value::Object(data) => Some(data),
        Value::Array(matches) => matches.first()?.as_object(),
        _ => None,
    }
}

/// Copy the mapped attributes of `source` into the empty fields of `record`.
pub(crate) fn fill_from(
    record: &mut Record,
    source: &Map<String, Value>,
    mapping: &[(&str, Field)],
) {
    for (key, field) in mapping {
        if let Some(value) = source.get(*key).and_then(text) {
            record.fill(*field, &value);
        }
    }
}
