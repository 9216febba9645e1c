use async_trait::async_trait;
use serde_json::{json, Value};

use super::{fill_from, first_match, Stage};
use crate::client::{Endpoint, StageClient};
use crate::error::StageCallError;
use crate::record::{EnrichmentOutcome, Field, Record, StageKind};

const OUTPUT_FIELDS: &[&str] = &[
    "zi_c_location_id",
    "zi_c_name",
    "zi_c_company_name",
    "zi_c_phone",
    "zi_c_url",
    "zi_c_company_url",
    "zi_c_linkedin_url",
    "zi_c_naics6",
    "zi_c_industry_primary",
    "zi_c_sub_industry_primary",
    "zi_c_employees",
    "zi_c_street",
    "zi_c_city",
    "zi_c_state",
    "zi_c_zip",
    "zi_c_country",
    "zi_c_company_id",
];

const COMPANY_FIELDS: &[(&str, Field)] = &[
    ("zi_c_name", Field::ZoominfoCompanyName),
    ("zi_c_company_id", Field::ZoominfoCompanyId),
    ("zi_c_company_name", Field::HqName),
    ("zi_c_phone", Field::CompanyPhone),
    ("zi_c_url", Field::Website),
    ("zi_c_company_url", Field::Website),
    ("zi_c_linkedin_url", Field::LinkedinUrl),
    ("zi_c_naics6", Field::Naics6),
    ("zi_c_industry_primary", Field::PrimaryIndustry),
    ("zi_c_sub_industry_primary", Field::SubIndustry),
    ("zi_c_employees", Field::Employees),
    ("zi_c_street", Field::CompanyStreet),
    ("zi_c_city", Field::CompanyCity),
    ("zi_c_state", Field::CompanyState),
    ("zi_c_zip", Field::CompanyZipCode),
    ("zi_c_country", Field::CompanyCountry),
    ("zi_c_location_id", Field::LocationId),
];

/// Supplier address fields and the resolved company fields that replace them when all are empty.
const ADDRESS: [(Field, Field); 4] = [
    (Field::Street, Field::CompanyStreet),
    (Field::City, Field::CompanyCity),
    (Field::State, Field::CompanyState),
    (Field::ZipCode, Field::CompanyZipCode),
];

/// Resolves the supplier's company, first by name, phone and full address, then by name, phone
/// and country only.
pub struct CompanyEnrichStage;

#[async_trait]
impl Stage for CompanyEnrichStage {
    fn kind(&self) -> StageKind {
        StageKind::Company
    }

    async fn enrich(
        &self,
        record: &Record,
        client: &StageClient<'_>,
    ) -> Result<(Record, EnrichmentOutcome), StageCallError> {
        if !record.has(Field::CompanyName) {
            return Ok((record.clone(), EnrichmentOutcome::Skipped));
        }

        let mut record = record.clone();
        let queries = [
            ("strict", strict_query(&record)),
            ("loose", loose_query(&record)),
        ];
        for (criteria, query) in queries {
            let Some(response) = client.call_optional(Endpoint::CompanyEnrich, &query).await?
            else {
                continue;
            };

            if let Some(company) = first_match(&response) {
                fill_from(&mut record, company, COMPANY_FIELDS);
                record.fill(Field::CompanyMatchCriteria, criteria);
                copy_address_when_missing(&mut record);

                return Ok((record, EnrichmentOutcome::Enriched));
            }
        }

        Ok((record, EnrichmentOutcome::NotFound))
    }
}

fn strict_query(record: &Record) -> Value {
    let mut input = json!({
        "zi_c_name": record.get(Field::CompanyName),
        "phone": {"zi_c_phone": record.get(Field::Phone)},
        "address": {
            "zi_c_street": record.get(Field::Street),
            "zi_c_city": record.get(Field::City),
            "zi_c_state": record.get(Field::State),
            "zi_c_zip": record.get(Field::ZipCode),
            "zi_c_country": record.get(Field::Country),
        },
        "match_reasons": [{"zi_c_country": "E", "zi_c_name": "F"}],
    });
    add_email(&mut input, record);

    json!({"matchCompanyInput": [input], "outputFields": OUTPUT_FIELDS})
}

fn loose_query(record: &Record) -> Value {
    let mut input = json!({
        "zi_c_name": record.get(Field::CompanyName),
        "phone": {"zi_c_phone": record.get(Field::Phone)},
        "address": {"zi_c_country": record.get(Field::Country)},
        "match_reasons": [{"zi_c_country": "E"}],
    });
    add_email(&mut input, record);

    json!({"matchCompanyInput": [input], "outputFields": OUTPUT_FIELDS})
}

fn add_email(input: &mut Value, record: &Record) {
    if record.has(Field::Email) {
        input["email"] = json!(record.get(Field::Email));
    }
}

fn copy_address_when_missing(record: &mut Record) {
    if ADDRESS.iter().any(|(supplier, _)| record.has(*supplier)) {
        return;
    }

    for (supplier, company) in ADDRESS {
        let value = record.get(company).to_owned();
        record.set(supplier, value);
    }
}
