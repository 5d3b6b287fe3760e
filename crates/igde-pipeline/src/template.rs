//! Destination layers and the source reference table.

use anyhow::Result;
use igde_core::{full_database_templates, source_table, Dataset, MappingSet};
use igde_store_sqlite::{OverwritePolicy, SqliteStore};

/// Columns of the sources CSV, loaded under the same names.
const SOURCE_FIELDS: [&str; 10] = [
    "SOURCE_CODE",
    "SOURCE_NAME",
    "SOURCE_BODY",
    "LAYER",
    "SOURCE_LINK",
    "SOURCE_CITE",
    "MAP_METHOD",
    "MAP_UNIT",
    "COMMENTS",
    "SOURCE_YEAR",
];

/// Create every catalog layer in `store`, returning the names created.
///
/// # Errors
/// Returns an error when a layer already exists under [`OverwritePolicy::Never`]
/// or any DDL fails.
pub fn create_templates(store: &mut SqliteStore, policy: OverwritePolicy) -> Result<Vec<String>> {
    let mut created = Vec::new();
    for template in full_database_templates() {
        store.create_layer(&template, policy)?;
        created.push(template.name);
    }
    tracing::info!(layers = created.len(), ?policy, "created database templates");
    Ok(created)
}

/// # Errors
/// Returns an error when a target is not part of the Source_tbl template.
pub fn source_mapping() -> Result<MappingSet> {
    let pairs: Vec<(&str, &str)> = SOURCE_FIELDS.iter().map(|field| (*field, *field)).collect();
    Ok(MappingSet::from_pairs(&source_table(), &pairs)?)
}

/// Trim the source rows to those carrying a provenance code.
pub fn clean_sources(sources: &mut Dataset) -> usize {
    sources.retain(|row| !row.get("SOURCE_CODE").is_null()).removed
}
