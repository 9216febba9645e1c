use async_trait::async_trait;
use serde_json::json;

use super::{fill_from, first_match, Stage};
use crate::client::{Endpoint, StageClient};
use crate::error::StageCallError;
use crate::naics;
use crate::record::{EnrichmentOutcome, Field, Record, StageKind};

const INDUSTRY_FIELDS: &[(&str, Field)] = &[
    ("zi_c_naics6", Field::Naics6),
    ("zi_c_industry_primary", Field::PrimaryIndustry),
    ("zi_c_sub_industry_primary", Field::SubIndustry),
];

/// Maps the company's NAICS code to its sector, looking the code up first when the company
/// stage did not provide one.
pub struct ClassificationStage;

#[async_trait]
impl Stage for ClassificationStage {
    fn kind(&self) -> StageKind {
        StageKind::Classification
    }

    async fn enrich(
        &self,
        record: &Record,
        client: &StageClient<'_>,
    ) -> Result<(Record, EnrichmentOutcome), StageCallError> {
        if !record.has(Field::Naics6)
            && !record.has(Field::ZoominfoCompanyId)
            && !record.has(Field::CompanyName)
        {
            return Ok((record.clone(), EnrichmentOutcome::Skipped));
        }

        let mut record = record.clone();
        if !record.has(Field::Naics6) {
            let company = if record.has(Field::ZoominfoCompanyId) {
                json!({"zi_c_company_id": record.get(Field::ZoominfoCompanyId)})
            } else {
                json!({"zi_c_name": record.get(Field::CompanyName)})
            };
            let query = json!({
                "matchCompanyInput": [company],
                "outputFields": INDUSTRY_FIELDS.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
            });

            if let Some(response) = client.call_optional(Endpoint::CompanyEnrich, &query).await? {
                if let Some(industry) = first_match(&response) {
                    fill_from(&mut record, industry, INDUSTRY_FIELDS);
                }
            }
        }

        let sector = naics::sector_for(record.get(Field::Naics6));
        match sector {
            Some(sector) => {
                record.set(Field::SectorCode, sector.code);
                record.set(Field::SectorTitle, sector.title);
                Ok((record, EnrichmentOutcome::Enriched))
            }
            None => Ok((record, EnrichmentOutcome::NotFound)),
        }
    }
}
