//! CSV encoding of records.
use std::collections::{HashMap, HashSet};

use crate::error::FormatError;
use crate::record::{EnrichmentOutcome, Field, Record, StageKind};

const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Field(Field),
    Outcome(StageKind),
    Status,
    ErrorMessage,
}

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Column::Field(field) => field.header(),
            Column::Outcome(stage) => stage.header(),
            Column::Status => "Enrichment Status",
            Column::ErrorMessage => "Error Message",
        }
    }

    fn value<'r>(&self, record: &'r Record) -> &'r str {
        match self {
            Column::Field(field) => record.get(*field),
            Column::Outcome(stage) => record
                .outcome(*stage)
                .map(|outcome| outcome.as_str())
                .unwrap_or(""),
            Column::Status => record.status(),
            Column::ErrorMessage => record.error_message(),
        }
    }
}

/// An ordered set of columns a file is expected to have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    columns: Vec<Column>,
}

impl Template {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// The columns of a raw supplier file.
    pub fn supplier_input() -> Self {
        Self::new(Field::INPUT.into_iter().map(Column::Field).collect())
    }

    /// The supplier columns followed by every column enrichment adds.
    pub fn enriched_output() -> Self {
        let columns = Field::INPUT
            .into_iter()
            .chain(Field::ENRICHMENT)
            .map(Column::Field)
            .chain(StageKind::ALL.into_iter().map(Column::Outcome))
            .chain([Column::Status, Column::ErrorMessage])
            .collect();

        Self::new(columns)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&'static str> {
        self.columns.iter().map(Column::header).collect()
    }

    /// Map each header of a file to its column, requiring the same set of names in any order.
    fn resolve(&self, headers: &csv::StringRecord) -> Result<Vec<Column>, FormatError> {
        if headers.is_empty() {
            return Err(FormatError::MissingHeader);
        }

        let by_header: HashMap<&str, Column> = self
            .columns
            .iter()
            .map(|column| (column.header(), *column))
            .collect();

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(headers.len());
        let mut unexpected = Vec::new();
        for header in headers.iter().map(str::trim) {
            if !seen.insert(header) {
                return Err(FormatError::DuplicateHeader(header.to_owned()));
            }
            match by_header.get(header) {
                Some(column) => resolved.push(*column),
                None => unexpected.push(header.to_owned()),
            }
        }

        let missing: Vec<String> = self
            .headers()
            .into_iter()
            .filter(|header| !seen.contains(header))
            .map(str::to_owned)
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(FormatError::HeaderMismatch {
                missing,
                unexpected,
            });
        }

        Ok(resolved)
    }
}

/// Parse a CSV file whose header must match `template`.
pub fn decode(raw: &[u8], template: &Template) -> Result<Vec<Record>, FormatError> {
    let raw = raw.strip_prefix(BOM).unwrap_or(raw);
    let text = std::str::from_utf8(raw).map_err(|e| FormatError::Encoding(e.to_string()))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let columns = template.resolve(reader.headers()?)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = Record::new();

        for (column, value) in columns.iter().zip(row.iter()) {
            match column {
                Column::Field(field) => record.set(*field, value),
                Column::Outcome(_) if value.is_empty() => {}
                Column::Outcome(stage) => {
                    let outcome = EnrichmentOutcome::from_label(value).ok_or_else(|| {
                        FormatError::InvalidOutcome {
                            column: stage.header().to_owned(),
                            value: value.to_owned(),
                        }
                    })?;
                    record.set_outcome(*stage, outcome);
                }
                // Derived from the outcomes.
                Column::Status => {}
                Column::ErrorMessage => record.set_error_message(value),
            }
        }

        records.push(record);
    }

    Ok(records)
}

/// Write `records` with the columns of `template`, in template order, behind a UTF-8 byte order
/// mark. The same records always produce the same bytes.
pub fn encode(records: &[Record], template: &Template) -> Result<Vec<u8>, FormatError> {
    let mut writer = csv::Writer::from_writer(BOM.to_vec());

    writer.write_record(template.headers())?;
    for record in records {
        writer.write_record(template.columns().iter().map(|column| column.value(record)))?;
    }

    writer
        .into_inner()
        .map_err(|e| FormatError::Csv(e.to_string()))
}
