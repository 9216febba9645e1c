use async_trait::async_trait;
use serde_json::{json, Value};

use super::{fill_from, first_match, text, Stage, PERSON_FIELDS};
use crate::client::{Endpoint, StageClient};
use crate::error::StageCallError;
use crate::record::{EnrichmentOutcome, Field, Record, StageKind};

const MANAGEMENT_LEVELS: &str = "C Level Exec, VP Level Exec, Director, Manager";
const DEPARTMENTS: &str = "C-Suite, Operations, Marketing, Engineering & Technical";

#[derive(Debug, Clone, Copy)]
enum Scope {
    Location,
    Company,
}

impl Scope {
    fn id_field(&self) -> Field {
        match self {
            Scope::Location => Field::LocationId,
            Scope::Company => Field::ZoominfoCompanyId,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Scope::Location => "locationId",
            Scope::Company => "companyId",
        }
    }
}

/// Narrowest first: the resolved location before the whole company, senior roles before anyone.
const STRATEGIES: [(Scope, bool); 4] = [
    (Scope::Location, true),
    (Scope::Location, false),
    (Scope::Company, true),
    (Scope::Company, false),
];

/// Finds a contact at the resolved company for suppliers that came without one.
pub struct ContactSearchStage;

#[async_trait]
impl Stage for ContactSearchStage {
    fn kind(&self) -> StageKind {
        StageKind::ContactSearch
    }

    async fn enrich(
        &self,
        record: &Record,
        client: &StageClient<'_>,
    ) -> Result<(Record, EnrichmentOutcome), StageCallError> {
        let contact_known = record.outcome(StageKind::ContactEnrich)
            == Some(EnrichmentOutcome::Enriched)
            || record.get(Field::NeedsNewContact) != "Yes";
        let company_known = record.has(Field::LocationId) || record.has(Field::ZoominfoCompanyId);
        if contact_known || !company_known {
            return Ok((record.clone(), EnrichmentOutcome::Skipped));
        }

        let mut record = record.clone();
        for (scope, strict) in STRATEGIES {
            if !record.has(scope.id_field()) {
                continue;
            }

            let query = search_query(scope, record.get(scope.id_field()), strict);
            let Some(response) = client.call_optional(Endpoint::ContactSearch, &query).await?
            else {
                continue;
            };
            let Some(person_id) = response.pointer("/data/0/id").and_then(text) else {
                continue;
            };

            let criteria = if strict { "strict" } else { "loose" };
            record.set(Field::PersonId, person_id.as_str());
            record.set(
                Field::ContactMatchCriteria,
                format!("{}_{criteria}", scope.as_str()),
            );
            record.set(Field::NewContactFound, "Yes");

            let details = json!({
                "matchPersonInput": [{"personId": person_id}],
                "outputFields": PERSON_FIELDS.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
            });
            if let Some(response) = client.call_optional(Endpoint::ContactEnrich, &details).await? {
                if let Some(person) = first_match(&response) {
                    fill_from(&mut record, person, PERSON_FIELDS);
                }
            }

            return Ok((record, EnrichmentOutcome::Enriched));
        }

        record.set(Field::NewContactFound, "No");
        Ok((record, EnrichmentOutcome::NotFound))
    }
}

fn search_query(scope: Scope, id: &str, strict: bool) -> Value {
    let mut query = json!({
        "requiredFields": "email, phone",
        "sortBy": "hierarchy",
        "rpp": 1,
        "page": 1,
    });

    match scope {
        Scope::Location => query["locationCompanyId"] = json!([id]),
        Scope::Company => query["companyId"] = json!(id),
    }

    if strict {
        query["managementLevel"] = json!(MANAGEMENT_LEVELS);
        query["department"] = json!(DEPARTMENTS);
    }

    query
}
