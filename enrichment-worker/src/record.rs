//! The record model shared by the codec, the stages and the pipeline.
use std::collections::BTreeMap;

/// A named value of a record: either a supplier input column or a column added by enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    CompanyName,
    FirstName,
    LastName,
    Email,
    Phone,
    Street,
    City,
    State,
    ZipCode,
    Country,
    SiteName,
    SiteId,
    AdditionalContactInfo,

    ZoominfoCompanyName,
    ZoominfoCompanyId,
    HqName,
    CompanyPhone,
    Website,
    LinkedinUrl,
    JobTitle,
    Naics6,
    SectorCode,
    SectorTitle,
    PrimaryIndustry,
    SubIndustry,
    Employees,
    CompanyStreet,
    CompanyCity,
    CompanyState,
    CompanyZipCode,
    CompanyCountry,
    LocationId,
    NeedsNewContact,
    NewContactFound,
    PersonId,
    ContactMatchCriteria,
    CompanyMatchCriteria,
}

impl Field {
    /// Supplier columns, in template order.
    pub const INPUT: [Field; 13] = [
        Field::CompanyName,
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::Phone,
        Field::Street,
        Field::City,
        Field::State,
        Field::ZipCode,
        Field::Country,
        Field::SiteName,
        Field::SiteId,
        Field::AdditionalContactInfo,
    ];

    /// Columns added by enrichment, in output order.
    pub const ENRICHMENT: [Field; 24] = [
        Field::ZoominfoCompanyName,
        Field::ZoominfoCompanyId,
        Field::HqName,
        Field::CompanyPhone,
        Field::Website,
        Field::LinkedinUrl,
        Field::JobTitle,
        Field::Naics6,
        Field::SectorCode,
        Field::SectorTitle,
        Field::PrimaryIndustry,
        Field::SubIndustry,
        Field::Employees,
        Field::CompanyStreet,
        Field::CompanyCity,
        Field::CompanyState,
        Field::CompanyZipCode,
        Field::CompanyCountry,
        Field::LocationId,
        Field::NeedsNewContact,
        Field::NewContactFound,
        Field::PersonId,
        Field::ContactMatchCriteria,
        Field::CompanyMatchCriteria,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            Field::CompanyName => "Supplier Company",
            Field::FirstName => "Supplier First Name",
            Field::LastName => "Supplier Last Name",
            Field::Email => "Supplier Email",
            Field::Phone => "Supplier Phone",
            Field::Street => "Supplier Street",
            Field::City => "Supplier City",
            Field::State => "Supplier State",
            Field::ZipCode => "Supplier Zip Code",
            Field::Country => "Supplier Country",
            Field::SiteName => "Site Name",
            Field::SiteId => "Site ID",
            Field::AdditionalContactInfo => "Additional Contact Info",
            Field::ZoominfoCompanyName => "Zoominfo Company Name",
            Field::ZoominfoCompanyId => "Zoominfo Company ID",
            Field::HqName => "Company HQ Name",
            Field::CompanyPhone => "Company Phone",
            Field::Website => "Website",
            Field::LinkedinUrl => "Company LinkedIn URL",
            Field::JobTitle => "Contact Job Title",
            Field::Naics6 => "6-digit NAICS Code",
            Field::SectorCode => "Sector Code",
            Field::SectorTitle => "Sector Title",
            Field::PrimaryIndustry => "Primary Industry",
            Field::SubIndustry => "Sub Industry",
            Field::Employees => "Number of Employees",
            Field::CompanyStreet => "Company Street",
            Field::CompanyCity => "Company City",
            Field::CompanyState => "Company State",
            Field::CompanyZipCode => "Company Zip Code",
            Field::CompanyCountry => "Company Country",
            Field::LocationId => "Company Location ID",
            Field::NeedsNewContact => "Needs New Contact",
            Field::NewContactFound => "New Contact Found",
            Field::PersonId => "Contact Person ID",
            Field::ContactMatchCriteria => "Contact Match Criteria",
            Field::CompanyMatchCriteria => "Company Match Criteria",
        }
    }
}

/// The enrichment stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Company,
    Classification,
    ContactEnrich,
    ContactSearch,
    NewContact,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Company,
        StageKind::Classification,
        StageKind::ContactEnrich,
        StageKind::ContactSearch,
        StageKind::NewContact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Company => "company_enrich",
            StageKind::Classification => "industry_classification",
            StageKind::ContactEnrich => "contact_enrich",
            StageKind::ContactSearch => "contact_search",
            StageKind::NewContact => "new_contact",
        }
    }

    /// Header of the column holding this stage's outcome.
    pub fn header(&self) -> &'static str {
        match self {
            StageKind::Company => "Company Enrichment",
            StageKind::Classification => "Industry Classification",
            StageKind::ContactEnrich => "Contact Enrichment",
            StageKind::ContactSearch => "Contact Search",
            StageKind::NewContact => "New Contact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentOutcome {
    Enriched,
    /// The record lacks the input the stage requires.
    Skipped,
    NotFound,
    /// The stage's calls failed after retries.
    Failed,
}

impl EnrichmentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentOutcome::Enriched => "enriched",
            EnrichmentOutcome::Skipped => "skipped",
            EnrichmentOutcome::NotFound => "not_found",
            EnrichmentOutcome::Failed => "failed",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "enriched" => Some(EnrichmentOutcome::Enriched),
            "skipped" => Some(EnrichmentOutcome::Skipped),
            "not_found" => Some(EnrichmentOutcome::NotFound),
            "failed" => Some(EnrichmentOutcome::Failed),
            _ => None,
        }
    }
}

/// One supplier row and everything enrichment learned about it.
///
/// Empty values are not stored, so a record read back from its own encoding compares equal to
/// the original.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<Field, String>,
    outcomes: BTreeMap<StageKind, EnrichmentOutcome>,
    error_message: String,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: Field) -> &str {
        self.fields.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn has(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    /// Set `field` only when it has no value yet. Returns whether the record changed.
    pub fn fill(&mut self, field: Field, value: &str) -> bool {
        if self.has(field) || value.is_empty() {
            return false;
        }
        self.fields.insert(field, value.to_owned());
        true
    }

    pub fn outcome(&self, stage: StageKind) -> Option<EnrichmentOutcome> {
        self.outcomes.get(&stage).copied()
    }

    pub fn set_outcome(&mut self, stage: StageKind, outcome: EnrichmentOutcome) {
        self.outcomes.insert(stage, outcome);
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .values()
            .any(|outcome| *outcome == EnrichmentOutcome::Failed)
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
    }

    pub fn push_error(&mut self, message: &str) {
        if !self.error_message.is_empty() {
            self.error_message.push_str("; ");
        }
        self.error_message.push_str(message);
    }

    /// Value of the `Enrichment Status` column.
    pub fn status(&self) -> &'static str {
        if self.has_failures() {
            "Failed"
        } else {
            "Success"
        }
    }

    /// Normalize whitespace in every value and work out whether the supplier still needs a
    /// contact. Preparing a prepared record changes nothing.
    pub fn prepared(&self) -> Record {
        let mut record = self.clone();
        for value in record.fields.values_mut() {
            *value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        record.fields.retain(|_, value| !value.is_empty());

        let needs_contact = [Field::FirstName, Field::LastName, Field::Email, Field::Phone]
            .iter()
            .all(|field| !record.has(*field));
        record.set(
            Field::NeedsNewContact,
            if needs_contact { "Yes" } else { "No" },
        );

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_are_not_stored() {
        let mut record = Record::new().with(Field::CompanyName, "Acme");
        record.set(Field::CompanyName, "");

        assert_eq!(record, Record::new());
        assert_eq!(record.get(Field::CompanyName), "");
    }

    #[test]
    fn test_fill_keeps_existing_values() {
        let mut record = Record::new().with(Field::Phone, "555-0100");

        assert!(!record.fill(Field::Phone, "555-0199"));
        assert!(!record.fill(Field::Email, ""));
        assert!(record.fill(Field::Email, "ops@acme.test"));

        assert_eq!(record.get(Field::Phone), "555-0100");
        assert_eq!(record.get(Field::Email), "ops@acme.test");
    }

    #[test]
    fn test_prepared_normalizes_whitespace() {
        let record = Record::new()
            .with(Field::CompanyName, "  Acme   Industrial\tSupply ")
            .with(Field::FirstName, "   ")
            .with(Field::Email, " ops@acme.test");

        let prepared = record.prepared();

        assert_eq!(prepared.get(Field::CompanyName), "Acme Industrial Supply");
        assert!(!prepared.has(Field::FirstName));
        assert_eq!(prepared.get(Field::NeedsNewContact), "No");
        assert_eq!(prepared.prepared(), prepared);
    }

    #[test]
    fn test_prepared_flags_missing_contact() {
        let record = Record::new()
            .with(Field::CompanyName, "Acme")
            .with(Field::SiteName, "Plant 4");

        assert_eq!(record.prepared().get(Field::NeedsNewContact), "Yes");
    }

    #[test]
    fn test_status_and_errors() {
        let mut record = Record::new();
        record.set_outcome(StageKind::Company, EnrichmentOutcome::Enriched);
        assert_eq!(record.status(), "Success");

        record.set_outcome(StageKind::ContactEnrich, EnrichmentOutcome::Failed);
        record.push_error("contact_enrich: timeout");
        record.push_error("contact_search: timeout");

        assert_eq!(record.status(), "Failed");
        assert_eq!(
            record.error_message(),
            "contact_enrich: timeout; contact_search: timeout"
        );
    }

    #[test]
    fn test_outcome_labels() {
        for outcome in [
            EnrichmentOutcome::Enriched,
            EnrichmentOutcome::Skipped,
            EnrichmentOutcome::NotFound,
            EnrichmentOutcome::Failed,
        ] {
            assert_eq!(EnrichmentOutcome::from_label(outcome.as_str()), Some(outcome));
        }
        assert_eq!(EnrichmentOutcome::from_label("partial"), None);
    }
}
