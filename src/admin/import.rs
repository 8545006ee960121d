// Bulk import of movie records from a JSON file

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

use crate::models::ItemFields;
use crate::store::{CatalogStore, ImportRecord, MAX_BATCH_WRITES};

/// Records per batch, kept under the store's write limit
pub const IMPORT_CHUNK_SIZE: usize = 450;

const _: () = assert!(IMPORT_CHUNK_SIZE <= MAX_BATCH_WRITES);

pub const DEFAULT_IMPORT_FILE: &str = "import_data/complete_movie_data.json";

fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(doc: &Map<String, Value>, key: &str) -> Option<i64> {
    doc.get(key).and_then(Value::as_i64)
}

/// Build one import record. The id comes from `id_field` when given and
/// present, otherwise from `id`; without either the store assigns one.
fn to_record(mut doc: Map<String, Value>, id_field: Option<&str>) -> Result<ImportRecord> {
    let from_field = id_field.and_then(|field| id_value(doc.get(field)));
    let id = from_field.or_else(|| id_value(doc.get("id")));
    doc.remove("id");

    // Exported data sometimes carries the year as a string
    if let Some(Value::String(year)) = doc.get("year") {
        let year = year.trim().parse::<i64>().map(Value::from).unwrap_or(Value::Null);
        doc.insert("year".to_string(), year);
    }

    let created_at = timestamp(&doc, "createdAt");
    let updated_at = timestamp(&doc, "updatedAt");
    let last_watched_at = timestamp(&doc, "lastWatchedAt");
    let fields: ItemFields = serde_json::from_value(Value::Object(doc))?;

    Ok(ImportRecord {
        id,
        fields,
        created_at,
        updated_at,
        last_watched_at,
    })
}

/// A record that could not be imported, by its position in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

/// Parsed import file: the records to write and the ones left out.
#[derive(Debug, Default)]
pub struct ImportBatch {
    pub records: Vec<ImportRecord>,
    pub rejected: Vec<RejectedRecord>,
}

/// Normalize parsed JSON into import records. An array holds records; an
/// object maps ids to records. Invalid records are collected in
/// `rejected` and the rest are still imported.
pub fn parse_records(data: Value, id_field: Option<&str>) -> Result<ImportBatch> {
    let docs: Vec<Option<Map<String, Value>>> = match data {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(doc) => Some(doc),
                _ => None,
            })
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(id, doc)| match doc {
                Value::Object(mut doc) => {
                    doc.insert("id".to_string(), Value::String(id));
                    Some(doc)
                }
                _ => None,
            })
            .collect(),
        _ => bail!("Unsupported JSON shape. Provide an array or an object map."),
    };

    let mut batch = ImportBatch::default();
    for (index, doc) in docs.into_iter().enumerate() {
        let parsed = match doc {
            Some(doc) => to_record(doc, id_field).map_err(|e| e.to_string()),
            None => Err("record is not an object".to_string()),
        };
        match parsed {
            Ok(record) => batch.records.push(record),
            Err(reason) => {
                tracing::warn!("Skipping invalid record at index {}: {}", index, reason);
                batch.rejected.push(RejectedRecord { index, reason });
            }
        }
    }
    Ok(batch)
}

pub fn read_records(path: &Path, id_field: Option<&str>) -> Result<ImportBatch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("File not found: {}", path.display()))?;
    let data: Value = serde_json::from_str(&raw).context("Failed to parse JSON")?;
    parse_records(data, id_field)
}

/// Merge-write all valid records, one atomic batch per chunk. Returns the
/// number of records written.
pub async fn run(store: &dyn CatalogStore, batch: &ImportBatch) -> Result<usize> {
    let records = &batch.records;
    let skipped = batch.rejected.len();

    if records.is_empty() {
        println!("No records to import ({} skipped).", skipped);
        return Ok(0);
    }

    println!(
        "Importing {} documents into collection '{}'",
        records.len(),
        store.collection()
    );

    let mut written = 0;
    for chunk in records.chunks(IMPORT_CHUNK_SIZE) {
        written += store
            .write_batch(chunk)
            .await
            .with_context(|| format!("Batch failed after {} committed records", written))?;
        if skipped > 0 {
            println!("Committed {}/{} ({} skipped)", written, records.len(), skipped);
        } else {
            println!("Committed {}/{}", written, records.len());
        }
    }

    println!("Import complete");
    Ok(written)
}
