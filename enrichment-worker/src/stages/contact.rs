use async_trait::async_trait;
use serde_json::{json, Value};

use super::{fill_from, first_match, Stage, PERSON_FIELDS};
use crate::client::{Endpoint, StageClient};
use crate::error::StageCallError;
use crate::record::{EnrichmentOutcome, Field, Record, StageKind};

const MATCH_STATUSES: [&str; 2] = ["FULL_MATCH", "CONTACT_ONLY_MATCH"];

/// Confirms the supplier's own contact and completes its details.
pub struct ContactEnrichStage;

#[async_trait]
impl Stage for ContactEnrichStage {
    fn kind(&self) -> StageKind {
        StageKind::ContactEnrich
    }

    async fn enrich(
        &self,
        record: &Record,
        client: &StageClient<'_>,
    ) -> Result<(Record, EnrichmentOutcome), StageCallError> {
        let named = record.has(Field::FirstName)
            && record.has(Field::LastName)
            && record.has(Field::CompanyName);
        if !named && !record.has(Field::Email) && !record.has(Field::Phone) {
            return Ok((record.clone(), EnrichmentOutcome::Skipped));
        }

        let query = json!({
            "matchPersonInput": [{
                "companyName": record.get(Field::CompanyName),
                "firstName": record.get(Field::FirstName),
                "lastName": record.get(Field::LastName),
                "emailAddress": record.get(Field::Email),
                "phone": record.get(Field::Phone),
            }],
            "outputFields": PERSON_FIELDS.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
        });

        let mut record = record.clone();
        let Some(response) = client.call_optional(Endpoint::ContactEnrich, &query).await? else {
            return Ok((record, EnrichmentOutcome::NotFound));
        };

        match matched_person(&response) {
            Some(person) => {
                fill_from(&mut record, person, PERSON_FIELDS);
                Ok((record, EnrichmentOutcome::Enriched))
            }
            None => Ok((record, EnrichmentOutcome::NotFound)),
        }
    }
}

fn matched_person(response: &Value) -> Option<&serde_json::Map<String, Value>> {
    let status = response
        .pointer("/data/result/0/matchStatus")
        .and_then(Value::as_str)?;

    if MATCH_STATUSES.contains(&status) {
        first_match(response)
    } else {
        None
    }
}
