//! Geometry attributes and provenance tags shared by the passes.

use anyhow::Result;
use igde_core::{AreaUnit, Dataset, GeometryEngine, LengthUnit, SourceCode, Value};

use crate::PassReport;

/// Planar area of every feature in `unit`; rows without geometry get null.
pub fn add_area<E: GeometryEngine>(dataset: &mut Dataset, field: &str, unit: AreaUnit, engine: &E) {
    dataset.compute(field, |feature| {
        feature
            .geometry
            .as_ref()
            .map_or(Value::Null, |geometry| Value::Double(engine.area(geometry, unit)))
    });
}

/// Planar length of every feature in `unit`; rows without geometry get null.
pub fn add_length<E: GeometryEngine>(
    dataset: &mut Dataset,
    field: &str,
    unit: LengthUnit,
    engine: &E,
) {
    dataset.compute(field, |feature| {
        feature
            .geometry
            .as_ref()
            .map_or(Value::Null, |geometry| Value::Double(engine.length(geometry, unit)))
    });
}

/// Stamp every row with a validated provenance code.
///
/// # Errors
/// Returns an error when `code` is not a valid source code.
pub fn tag_source(dataset: &mut Dataset, field: &str, code: &str) -> Result<()> {
    let code = SourceCode::parse(code)?;
    dataset.assign(field, &code.to_value());
    Ok(())
}

/// Clip to the state boundary, recording the row counts before and after.
///
/// # Errors
/// Returns an error when the boundary is not a polygon layer.
pub fn clip_to_state<E: GeometryEngine>(
    dataset: &Dataset,
    state: &Dataset,
    engine: &E,
    report: &mut PassReport,
) -> Result<Dataset> {
    let clipped = engine.clip(dataset, state)?;
    let step = format!("clip {} to state", dataset.name());
    report.record_counts(&step, dataset.len(), clipped.len());
    Ok(clipped)
}
