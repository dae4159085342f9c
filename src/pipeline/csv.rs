//! CSV parsing and header aliasing for uploaded batches.
//!
//! File-shape problems surface as `IngestError` variants; the batch task
//! turns them into a terminal failed job.

use csv::{ReaderBuilder, Trim};

use crate::error::IngestError;

/// One parsed input row, trimmed, with canonical fields extracted.
#[derive(Debug, Clone, Default)]
pub struct ParsedRow {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    /// True when every cell in the row (canonical or not) is blank.
    pub blank: bool,
}

/// Column indices resolved from the header row.
#[derive(Debug, Default)]
struct HeaderMap {
    name: Option<usize>,
    email: Option<usize>,
    phone: Option<usize>,
    company: Option<usize>,
}

impl HeaderMap {
    fn resolve(headers: &csv::StringRecord) -> Self {
        let mut map = Self::default();
        for (idx, header) in headers.iter().enumerate() {
            let slot = match header.trim().to_lowercase().as_str() {
                "name" => &mut map.name,
                "email" => &mut map.email,
                "phone" => &mut map.phone,
                "company" => &mut map.company,
                _ => continue,
            };
            // First occurrence wins when a header repeats.
            if slot.is_none() {
                *slot = Some(idx);
            }
        }
        map
    }

    fn has_canonical_column(&self) -> bool {
        self.name.is_some() || self.email.is_some() || self.phone.is_some()
    }
}

/// Parse an uploaded file body into rows.
///
/// Fails on an empty body, unparsable CSV, a header with none of the
/// canonical columns, or a table with zero data rows.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<ParsedRow>, IngestError> {
    if bytes.is_empty() || bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::EmptyFile);
    }

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| IngestError::Unparsable(e.to_string()))?
        .clone();

    let map = HeaderMap::resolve(&headers);
    if !map.has_canonical_column() {
        return Err(IngestError::NoCanonicalColumns);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::Unparsable(e.to_string()))?;
        rows.push(parse_row(&record, &map));
    }

    if rows.is_empty() {
        return Err(IngestError::NoDataRows);
    }
    Ok(rows)
}

fn parse_row(record: &csv::StringRecord, map: &HeaderMap) -> ParsedRow {
    let cell = |idx: Option<usize>| -> String {
        idx.and_then(|i| record.get(i))
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    ParsedRow {
        name: cell(map.name),
        email: cell(map.email),
        phone: cell(map.phone),
        company: cell(map.company),
        blank: record.iter().all(|c| c.trim().is_empty()),
    }
}
