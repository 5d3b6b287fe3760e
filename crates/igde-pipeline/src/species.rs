//! NNHP species records → Species_tbl (unique names) and Species (hexagon counts).

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use igde_core::{
    source_codes, species, species_table, Dataset, FilterRule, GeometryEngine, LayerKind,
    MappingSet, Recode, Value,
};

use crate::config::SpeciesConfig;
use crate::derive::tag_source;
use crate::PassReport;

pub const PASS: &str = "species";
const NAME_FIELD: &str = "SNAME";
const ENDEMISM_FIELD: &str = "ENDEMISM";
const HEX_FIELD: &str = "Hex_ID";

/// Buffer point and line records into polygons and merge them with the polygon
/// record sets.
///
/// # Errors
/// Returns an error when the buffer fails or a polygon input is not a polygon layer.
pub fn merge_records<E: GeometryEngine>(
    to_buffer: Vec<Dataset>,
    polygons: Vec<Dataset>,
    distance: f64,
    engine: &E,
    report: &mut PassReport,
) -> Result<Dataset> {
    let mut merged = Dataset::new("species_nnhp", LayerKind::Polygon);
    for dataset in to_buffer {
        let buffered = engine.buffer(&dataset, distance)?;
        report.record_counts(&format!("buffer {}", dataset.name()), dataset.len(), buffered.len());
        merged = merged.merge(buffered)?;
    }
    for dataset in polygons {
        merged = merged.merge(dataset)?;
    }
    tracing::info!(rows = merged.len(), "merged species records");
    Ok(merged)
}

/// Drop location fields and extirpated records, correct names, fill blank
/// endemism from the corrections table, and tag the rows `nnhp`.
///
/// # Errors
/// Returns an error when SNAME, S_RANK, or the corrections' columns are missing.
pub fn process_species_records(
    mut records: Dataset,
    endemism: &Dataset,
    config: &SpeciesConfig,
    report: &mut PassReport,
) -> Result<Dataset> {
    let dropped: Vec<&str> = config.dropped_fields.iter().map(String::as_str).collect();
    records.drop_fields(&dropped);
    report.record(
        "extirpated",
        records.apply_filter(&FilterRule::ExcludeContaining {
            field: "S_RANK".to_string(),
            needle: config.extirpated_rank.clone(),
        })?,
    );
    for correction in &config.name_corrections {
        let changed = records.apply_recode(&Recode::ReplaceText {
            field: NAME_FIELD.to_string(),
            from: correction.from.clone(),
            to: correction.to.clone(),
        })?;
        tracing::info!(
            from = correction.from.as_str(),
            to = correction.to.as_str(),
            changed,
            "corrected name"
        );
    }
    fill_endemism(&mut records, endemism)?;
    tag_source(&mut records, "SOURCECODE", source_codes::NNHP)?;
    Ok(records)
}

/// Copy ENDEMISM from `corrections` (matched on SNAME) into rows where it is blank.
/// Returns the number of rows filled.
///
/// # Errors
/// Returns an error when either side lacks SNAME or the corrections lack ENDEMISM.
pub fn fill_endemism(records: &mut Dataset, corrections: &Dataset) -> Result<usize> {
    records.add_field(ENDEMISM_FIELD);
    let before = records.fields().len();
    records.join_field(NAME_FIELD, corrections, NAME_FIELD, &[ENDEMISM_FIELD])?;
    let joined = records
        .fields()
        .get(before)
        .cloned()
        .ok_or_else(|| anyhow!("endemism join added no field"))?;
    let filled = records.apply_recode(&Recode::FillBlankFrom {
        field: ENDEMISM_FIELD.to_string(),
        from_field: joined.clone(),
    })?;
    records.drop_fields(&[joined.as_str()]);
    tracing::info!(filled, "filled blank endemism");
    Ok(filled)
}

/// One row per distinct non-null scientific name; the first record wins.
#[must_use]
pub fn unique_species(records: &Dataset) -> Dataset {
    let mut unique = records.first_by(NAME_FIELD);
    unique.rename("species_nnhp_unique");
    unique
}

/// Per hexagon: COUNT_NNHP distinct names and COUNT_EN distinct endemic names among
/// intersecting records. Hexagons without records count 0.
///
/// # Errors
/// Returns an error when Hex_ID, SNAME, or ENDEMISM is missing.
pub fn hexagon_counts<E: GeometryEngine>(
    hexagons: &Dataset,
    records: &Dataset,
    engine: &E,
) -> Result<Dataset> {
    hexagons.require_fields(&[HEX_FIELD])?;
    records.require_fields(&[NAME_FIELD, ENDEMISM_FIELD])?;

    let mut output = hexagons.clone();
    output.add_field("COUNT_NNHP");
    output.add_field("COUNT_EN");
    let mut features = Vec::with_capacity(hexagons.len());
    for hexagon in hexagons.features() {
        let mut names = BTreeSet::new();
        let mut endemic = BTreeSet::new();
        if let Some(cell) = hexagon.geometry.as_ref() {
            for record in records.features() {
                let Some(name) = record.get(NAME_FIELD).render() else {
                    continue;
                };
                let hit =
                    record.geometry.as_ref().is_some_and(|shape| engine.intersects(cell, shape));
                if !hit {
                    continue;
                }
                if record.get(ENDEMISM_FIELD).as_text() == Some("Y") {
                    endemic.insert(name.clone());
                }
                names.insert(name);
            }
        }
        let mut counted = hexagon.clone();
        counted.set("COUNT_NNHP", Value::Integer(i64::try_from(names.len())?));
        counted.set("COUNT_EN", Value::Integer(i64::try_from(endemic.len())?));
        features.push(counted);
    }
    output.replace_features(features);
    output.rename("species_hexagons");
    Ok(output)
}

/// # Errors
/// Returns an error when a target is not part of the Species_tbl template.
pub fn species_table_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &species_table(),
        &[
            ("SNAME", "SCI_NAME"),
            ("SCOMNAME", "COM_NAME"),
            ("MAJORGROUP", "MAJOR_GROUP"),
            ("MINORGROUP", "MINOR_GROUP"),
            ("S_RANK", "NV_RANK"),
            ("G_RANK", "G_RANK"),
            ("NV_STAT", "NV_STATUS"),
            ("USESA_NV", "ESA_STATUS"),
            ("BLM_STAT", "BLM_STATUS"),
            ("USFS_STAT", "USFS_STATUS"),
            ("NNPS_STAT", "NNPS_STATUS"),
            ("WAP2012", "WAP2012"),
            ("ENDEMISM", "ENDEMISM"),
            ("NNHP_TRACK", "NNHP_LIST"),
            ("SOURCECODE", "SOURCE_CODE"),
        ],
    )?)
}

/// # Errors
/// Returns an error when a target is not part of the Species template.
pub fn species_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &species(),
        &[
            ("Hex_ID", "HEX_ID"),
            ("COUNT_NNHP", "COUNT_NNHP"),
            ("COUNT_EN", "COUNT_EN"),
            ("SOURCE_CODE", "SOURCE_CODE"),
        ],
    )?)
}
