//! Per-unit coverage, counts and the GDE evidence score for hexagons or
//! hydrographic basins.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use igde_core::{
    summary_fields, AreaUnit, CoverageTheme, Dataset, FilterRule, GeometryEngine, LayerTemplate,
    LengthUnit, SummaryUnitKind, UnitMetrics, Value,
};

/// Thematic layers read back from the destination database.
#[derive(Debug, Clone)]
pub struct ThematicLayers {
    pub phreatophytes: Dataset,
    pub wetlands: Dataset,
    pub springs: Dataset,
    pub lakes_playas: Dataset,
    pub rivers: Dataset,
}

/// Rows of a thematic layer that belong to `theme`.
fn theme_source(layers: &ThematicLayers, theme: CoverageTheme) -> Result<Dataset> {
    let (layer, filter) = match theme {
        CoverageTheme::Phreatophytes => (&layers.phreatophytes, None),
        CoverageTheme::Forest => (&layers.phreatophytes, Some(("PHR_GROUP", "Forest"))),
        CoverageTheme::Shrubland => (&layers.phreatophytes, Some(("PHR_GROUP", "Shrubland"))),
        CoverageTheme::UnknownPhreatophytes => {
            (&layers.phreatophytes, Some(("PHR_GROUP", "Unknown")))
        }
        CoverageTheme::Wetlands => (&layers.wetlands, None),
        CoverageTheme::LakesPlayas => (&layers.lakes_playas, None),
        CoverageTheme::Lakes => (&layers.lakes_playas, Some(("BODY_TYPE", "Lake"))),
        CoverageTheme::Playas => (&layers.lakes_playas, Some(("BODY_TYPE", "Playa"))),
    };
    let mut source = layer.clone();
    if let Some((field, value)) = filter {
        let outcome = source.apply_filter(&FilterRule::allow_values(field, &[value]))?;
        tracing::debug!(theme = theme.label(), kept = outcome.kept, "selected theme rows");
    }
    Ok(source)
}

/// Sum of `measure` over the dissolved intersection of `theme` with each unit, by unit id.
fn per_unit<E, F>(
    theme: &Dataset,
    units: &Dataset,
    id_field: &str,
    engine: &E,
    measure: F,
) -> Result<BTreeMap<String, f64>>
where
    E: GeometryEngine,
    F: Fn(&E, &geo_types::Geometry<f64>) -> f64,
{
    let mut totals = BTreeMap::new();
    if theme.is_empty() {
        return Ok(totals);
    }
    let dissolved = engine.dissolve(theme, &[])?;
    let pieces = engine.intersect(&dissolved, units)?;
    let by_unit = engine.dissolve(&pieces, &[id_field])?;
    for row in by_unit.features() {
        let (Some(id), Some(geometry)) = (row.get(id_field).render(), row.geometry.as_ref()) else {
            continue;
        };
        *totals.entry(id).or_insert(0.0) += measure(engine, geometry);
    }
    Ok(totals)
}

/// Springs with a source code intersecting each unit.
fn spring_counts<E: GeometryEngine>(
    springs: &Dataset,
    units: &Dataset,
    id_field: &str,
    engine: &E,
) -> BTreeMap<String, i64> {
    let mut counts = BTreeMap::new();
    for unit in units.features() {
        let (Some(id), Some(shape)) = (unit.get(id_field).render(), unit.geometry.as_ref()) else {
            continue;
        };
        let found = springs
            .features()
            .iter()
            .filter(|spring| !spring.get("SOURCE_CODE").is_null())
            .filter_map(|spring| spring.geometry.as_ref())
            .filter(|point| engine.intersects(shape, point))
            .count();
        if found > 0 {
            counts.insert(id, i64::try_from(found).unwrap_or(i64::MAX));
        }
    }
    counts
}

/// Layer template of the summarized units: the unit's own attributes followed
/// by the summary fields of `kind`.
///
/// # Errors
/// Returns an error when a unit attribute is not a valid field name.
pub fn summary_template(units: &Dataset, kind: SummaryUnitKind) -> Result<LayerTemplate> {
    let summary = summary_fields(kind);
    let names: Vec<&str> = summary.iter().map(|field| field.name.as_str()).collect();
    let mut template = units
        .infer_template(kind.scratch_layer())
        .with_context(|| format!("failed to derive a template from {}", units.name()))?
        .without_fields(&names);
    template.fields.extend(summary);
    template.validate()?;
    Ok(template)
}

/// Attach every summary field to `units`.
///
/// # Errors
/// Returns an error when the unit id field is missing or an overlay fails.
pub fn summarize_units<E: GeometryEngine>(
    units: &Dataset,
    kind: SummaryUnitKind,
    layers: &ThematicLayers,
    engine: &E,
) -> Result<Dataset> {
    let id_field = kind.id_field();
    units.require_fields(&[id_field])?;
    let acres = |engine: &E, shape: &geo_types::Geometry<f64>| engine.area(shape, AreaUnit::Acres);
    let miles =
        |engine: &E, shape: &geo_types::Geometry<f64>| engine.length(shape, LengthUnit::Miles);

    let mut coverage = BTreeMap::new();
    for theme in CoverageTheme::ALL {
        let source = theme_source(layers, theme)?;
        let areas = per_unit(&source, units, id_field, engine, acres)
            .with_context(|| format!("failed to summarize {} cover", theme.label()))?;
        tracing::info!(
            unit = kind.as_str(),
            theme = theme.label(),
            units = areas.len(),
            "summarized cover"
        );
        coverage.insert(theme, areas);
    }
    let springs = spring_counts(&layers.springs, units, id_field, engine);
    let rivers = per_unit(&layers.rivers, units, id_field, engine, miles)
        .context("failed to summarize river miles")?;
    tracing::info!(
        unit = kind.as_str(),
        with_springs = springs.len(),
        with_rivers = rivers.len(),
        "summarized counts"
    );

    let mut output = units.clone();
    output.rename(kind.scratch_layer());
    let mut rows = output.clone().into_features();
    for row in &mut rows {
        let id = row.get(id_field).render();
        let metrics = UnitMetrics {
            poly_area: row
                .geometry
                .as_ref()
                .map_or(0.0, |shape| engine.area(shape, AreaUnit::Acres)),
            coverage: coverage
                .iter()
                .filter_map(|(theme, areas)| {
                    id.as_ref().and_then(|id| areas.get(id)).map(|area| (*theme, *area))
                })
                .collect(),
            spring_count: id.as_ref().and_then(|id| springs.get(id)).copied(),
            river_miles: id.as_ref().and_then(|id| rivers.get(id)).copied(),
        };
        for (field, value) in metrics.finalize(kind) {
            row.set(field, value);
        }
    }
    for field in summary_fields(kind) {
        output.add_field(&field.name);
    }
    output.replace_features(rows);
    Ok(output)
}

/// Units with a positive evidence count, for log summaries.
#[must_use]
pub fn units_with_evidence(summary: &Dataset) -> usize {
    summary
        .features()
        .iter()
        .filter(|row| matches!(row.get("GDE_COUNT"), Value::Integer(count) if *count > 0))
        .count()
}
