use async_trait::async_trait;
use serde_json::{json, Value};

use super::{text, Stage};
use crate::client::{Endpoint, StageClient};
use crate::error::{ApiError, StageCallError};
use crate::record::{EnrichmentOutcome, Field, Record, StageKind};

/// Registers the supplier's contact when the identity API confirmed it does not know them.
pub struct NewContactStage;

#[async_trait]
impl Stage for NewContactStage {
    fn kind(&self) -> StageKind {
        StageKind::NewContact
    }

    async fn enrich(
        &self,
        record: &Record,
        client: &StageClient<'_>,
    ) -> Result<(Record, EnrichmentOutcome), StageCallError> {
        // A failed lookup is not a confirmed miss: creating then could duplicate the contact.
        let confirmed_unknown = record.outcome(StageKind::ContactEnrich)
            == Some(EnrichmentOutcome::NotFound)
            && record.outcome(StageKind::ContactSearch) != Some(EnrichmentOutcome::Enriched)
            && !record.has(Field::PersonId);
        let identifiable = record.has(Field::FirstName)
            && record.has(Field::LastName)
            && record.has(Field::CompanyName);
        if !confirmed_unknown || !identifiable {
            return Ok((record.clone(), EnrichmentOutcome::Skipped));
        }

        let body = json!({
            "firstName": record.get(Field::FirstName),
            "lastName": record.get(Field::LastName),
            "companyName": record.get(Field::CompanyName),
            "companyId": record.get(Field::ZoominfoCompanyId),
            "email": record.get(Field::Email),
            "phone": record.get(Field::Phone),
            "jobTitle": record.get(Field::JobTitle),
        });

        let response = client.call(Endpoint::ContactCreate, &body).await?;
        let person_id = created_id(&response).ok_or_else(|| {
            ApiError::Malformed("contact creation returned no identifier".to_owned())
        })?;

        let mut record = record.clone();
        record.set(Field::PersonId, person_id);
        record.set(Field::ContactMatchCriteria, "created");

        Ok((record, EnrichmentOutcome::Enriched))
    }
}

fn created_id(response: &Value) -> Option<String> {
    ["/data/id", "/data/0/id", "/id"]
        .iter()
        .find_map(|pointer| response.pointer(pointer).and_then(text))
}
