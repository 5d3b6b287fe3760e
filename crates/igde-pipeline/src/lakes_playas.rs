//! NHD waterbodies → Lakes_Playas.

use anyhow::Result;
use igde_core::{
    lakes_playas, source_codes, AreaUnit, Dataset, FilterRule, GeometryEngine, MappingSet,
};

use crate::derive::{add_area, clip_to_state, tag_source};
use crate::PassReport;

pub const PASS: &str = "lakes_playas";

/// Keep allow-listed FCodes, clip, measure acres, attach the lookup names and tag
/// the rows `nhdw`.
///
/// # Errors
/// Returns an error when a required source field is missing or the clip fails.
pub fn process_lakes_playas<E: GeometryEngine>(
    mut waterbodies: Dataset,
    lookup: &Dataset,
    state: &Dataset,
    fcodes: &[i64],
    engine: &E,
    report: &mut PassReport,
) -> Result<Dataset> {
    let outcome = waterbodies.apply_filter(&FilterRule::allow_codes("FCode", fcodes))?;
    report.record("FCode allow-list", outcome);

    let mut clipped = clip_to_state(&waterbodies, state, engine, report)?;
    add_area(&mut clipped, "AREA_ACRES", AreaUnit::Acres, engine);

    let matched = clipped.join_field("FCode", lookup, "FCode", &["Type", "Description"])?;
    tracing::debug!(matched, rows = clipped.len(), "joined waterbody lookup");
    tag_source(&mut clipped, "SOURCE_CODE", source_codes::NHD_WATERBODY)?;
    Ok(clipped)
}

/// # Errors
/// Returns an error when a target is not part of the Lakes_Playas template.
pub fn lakes_playas_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &lakes_playas(),
        &[
            ("FCode", "BODY_CODE"),
            ("Type", "BODY_TYPE"),
            ("Description", "BODY_DESC"),
            ("GNIS_Name", "BODY_NAME"),
            ("Permanent_Identifier", "PERM_ID"),
            ("AREA_ACRES", "AREA_ACRES"),
            ("SOURCE_CODE", "SOURCE_CODE"),
        ],
    )?)
}
