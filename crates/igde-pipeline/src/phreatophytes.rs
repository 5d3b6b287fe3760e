//! Phreatophyte polygons from three sources, in priority order: TNC classified
//! rasters, LANDFIRE biophysical settings outside the TNC mapped areas, and DRI
//! evapotranspiration units outside both.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use igde_core::{
    phreatophytes, source_codes, AreaUnit, Dataset, FilterRule, GeometryEngine, LayerKind,
    MappingSet, Raster, Recode, Value,
};

use crate::config::{LandfireConfig, OverlapMask, TncRasterConfig};
use crate::derive::{add_area, clip_to_state, tag_source};
use crate::loaders::code_column;
use crate::PassReport;

pub const PASS: &str = "phreatophytes";
const CODE_FIELDS: [&str; 3] = ["SYS_CODE", "BSYS_CODE", "BSYSCODE"];

/// A classified raster together with its configuration.
#[derive(Debug, Clone)]
pub struct TncRaster {
    pub config: TncRasterConfig,
    pub raster: Raster,
}

impl TncRaster {
    /// Configured value field, else the first system-code attribute in the value
    /// table, else the raw cell value.
    #[must_use]
    pub fn value_field(&self) -> String {
        if let Some(field) = &self.config.value_field {
            return field.clone();
        }
        self.raster
            .classes()
            .and_then(|classes| classes.first())
            .and_then(|class| {
                CODE_FIELDS.iter().find(|field| class.attributes.contains_key(**field))
            })
            .map_or_else(|| "Value".to_string(), |field| (*field).to_string())
    }

    /// Polygonize, apply the code patches, and tag the source.
    ///
    /// # Errors
    /// Returns an error when polygonizing fails or the source code is invalid.
    pub fn polygonize<E: GeometryEngine>(&self, engine: &E) -> Result<Dataset> {
        let mut polygons = engine.raster_to_polygon(&self.raster, &self.value_field())?;
        polygons.rename(&self.config.name);
        for patch in &self.config.patches {
            let changed = polygons.apply_recode(&Recode::ReplaceCode {
                field: "gridcode".to_string(),
                from: patch.from,
                to: patch.to,
            })?;
            tracing::info!(
                raster = self.config.name.as_str(),
                from = patch.from,
                to = patch.to,
                changed,
                "patched code"
            );
        }
        tag_source(&mut polygons, "SOURCECODE", &self.config.source_code)?;
        Ok(polygons)
    }

    /// Dissolved footprint with RES_METERS, FILENAME, and SOURCECODE.
    ///
    /// # Errors
    /// Returns an error when the dissolve fails.
    pub fn mapped_area<E: GeometryEngine>(
        &self,
        polygons: &Dataset,
        engine: &E,
    ) -> Result<Dataset> {
        let mut boundary = engine.dissolve(polygons, &[])?;
        let resolution = (self.raster.cell_size * 10.0).round() / 10.0;
        boundary.assign("RES_METERS", &Value::Double(resolution));
        boundary.assign("FILENAME", &Value::text(&self.config.name));
        tag_source(&mut boundary, "SOURCECODE", &self.config.source_code)?;
        Ok(boundary)
    }
}

/// TNC results: phreatophytes to append, wetland-type polygons for hand-off, and
/// the clipped mapped areas that take priority over the other sources.
#[derive(Debug, Clone)]
pub struct TncOutput {
    pub phreatophytes: Dataset,
    pub wetlands: Dataset,
    pub mapped_areas: Dataset,
}

/// # Errors
/// Returns an error when a raster cannot be polygonized, an overlay fails, or the
/// GDE systems table lacks SYS_CODE, SYS_NAME, or Wetland.
pub fn process_tnc<E: GeometryEngine>(
    rasters: &[TncRaster],
    masks: &[OverlapMask],
    gde_systems: &Dataset,
    state: &Dataset,
    engine: &E,
    report: &mut PassReport,
) -> Result<TncOutput> {
    gde_systems.require_fields(&["SYS_CODE", "SYS_NAME", "Wetland"])?;
    let mut polygons = Vec::with_capacity(rasters.len());
    let mut areas = Dataset::new("TNC_MappedAreas", LayerKind::Polygon);
    for raster in rasters {
        let polygonized = raster.polygonize(engine)?;
        report.record_counts(&format!("polygonize {}", raster.config.name), 0, polygonized.len());
        areas = areas.merge(raster.mapped_area(&polygonized, engine)?)?;
        polygons.push(polygonized);
    }

    let mut mapped_areas = clip_to_state(&areas, state, engine, report)?;
    mapped_areas.rename("TNC_MappedAreas_NV");
    add_area(&mut mapped_areas, "Acres", AreaUnit::Acres, engine);

    for mask in masks {
        let target = polygons.iter().position(|dataset| dataset.name() == mask.target);
        let mut cover = mapped_areas.clone();
        cover.retain(|row| row.get("FILENAME").as_text() == Some(mask.mask.as_str()));
        match target {
            Some(index) if !cover.is_empty() => {
                let erased = engine.erase(&polygons[index], &cover)?;
                let step = format!("erase {} under {}", mask.target, mask.mask);
                report.record_counts(&step, polygons[index].len(), erased.len());
                polygons[index] = erased;
            }
            _ => tracing::warn!(
                target = mask.target.as_str(),
                mask = mask.mask.as_str(),
                "overlap mask skipped, raster not loaded"
            ),
        }
    }

    let gde_codes = code_column(gde_systems, "SYS_CODE")?;
    let mut combined = Dataset::new("TNC_AllGDE", LayerKind::Polygon);
    for dataset in &polygons {
        let mut dissolved = engine.dissolve(dataset, &["gridcode", "SOURCECODE"])?;
        report.record(
            &format!("GDE systems in {}", dataset.name()),
            dissolved.apply_filter(&FilterRule::allow_codes("gridcode", &gde_codes))?,
        );
        combined = combined.merge(dissolved)?;
    }
    combined.join_field("gridcode", gde_systems, "SYS_CODE", &["SYS_CODE", "SYS_NAME"])?;

    let mut clipped = clip_to_state(&combined, state, engine, report)?;
    clipped.join_field("SYS_CODE", gde_systems, "SYS_CODE", &["Wetland"])?;

    let mut wetlands = clipped.clone();
    wetlands.rename("tnc_wetland_phreatophytes");
    let outcome = wetlands.apply_filter(&FilterRule::deny_values("Wetland", &["No"]))?;
    report.record("wetland-type systems", outcome);
    let outcome = clipped.apply_filter(&FilterRule::allow_values("Wetland", &["No"]))?;
    report.record("phreatophyte systems", outcome);
    clipped.drop_fields(&["Wetland"]);

    Ok(TncOutput { phreatophytes: clipped, wetlands, mapped_areas })
}

/// Attach SYS_GROUP from the phreatophyte groups table.
///
/// # Errors
/// Returns an error when SYS_CODE or SYS_GROUP is missing.
pub fn attach_groups(dataset: &mut Dataset, groups: &Dataset) -> Result<usize> {
    Ok(dataset.join_field("SYS_CODE", groups, "SYS_CODE", &["SYS_GROUP"])?)
}

/// LANDFIRE inputs that do not come from the config file directly.
#[derive(Debug, Clone, Copy)]
pub struct LandfireInputs<'a> {
    pub gde_codes: &'a [i64],
    pub groups: &'a Dataset,
    pub et_units: &'a Dataset,
    pub et_unit_types: &'a [String],
    pub tnc_cover: &'a Dataset,
    pub state: &'a Dataset,
}

/// # Errors
/// Returns an error when the raster has no value attribute table, a field is
/// missing, or an overlay fails.
pub fn process_landfire<E: GeometryEngine>(
    mut raster: Raster,
    inputs: LandfireInputs<'_>,
    config: &LandfireConfig,
    engine: &E,
    report: &mut PassReport,
) -> Result<Dataset> {
    if raster.classes().is_none() {
        bail!("LANDFIRE raster {} needs a value attribute table", raster.name);
    }
    let codes: BTreeSet<i64> = inputs.gde_codes.iter().copied().collect();
    let models: BTreeSet<i64> = config.excluded_models.iter().copied().collect();
    report.record(
        "LANDFIRE GDE classes",
        raster.retain_classes(|class| {
            let code = class.attributes.get(&config.code_field).and_then(Value::as_i64);
            code.is_some_and(|code| codes.contains(&code))
        }),
    );
    report.record(
        "LANDFIRE excluded models",
        raster.retain_classes(|class| {
            let model = class.attributes.get(&config.model_field).and_then(Value::as_i64);
            !model.is_some_and(|model| models.contains(&model))
        }),
    );

    let polygons = engine.raster_to_polygon(&raster, &config.code_field)?;
    let clipped = clip_to_state(&polygons, inputs.state, engine, report)?;
    let erased = engine.erase(&clipped, inputs.tnc_cover)?;
    report.record_counts("erase TNC mapped areas", clipped.len(), erased.len());

    let mut vegetation = engine.dissolve(&erased, &["gridcode"])?;
    vegetation.join_field(
        "gridcode",
        inputs.groups,
        "SYS_CODE",
        &["SYS_GROUP", "SYS_CODE", "SYS_NAME"],
    )?;

    let greasewood_code = [config.greasewood_code];
    let mut greasewood = vegetation.clone();
    report.record(
        "LANDFIRE greasewood",
        greasewood.apply_filter(&FilterRule::allow_codes("SYS_CODE", &greasewood_code))?,
    );
    let mut basins = inputs.et_units.clone();
    let types: Vec<&str> = inputs.et_unit_types.iter().map(String::as_str).collect();
    let outcome = basins.apply_filter(&FilterRule::allow_values("Type", &types))?;
    report.record("phreatophyte ET units", outcome);
    let limited = engine.clip(&greasewood, &basins)?;
    report.record_counts("greasewood within ET units", greasewood.len(), limited.len());

    report.record(
        "LANDFIRE non-greasewood",
        vegetation.apply_filter(&FilterRule::deny_codes("SYS_CODE", &greasewood_code))?,
    );
    let mut fixed = vegetation.merge(limited)?;
    fixed.rename("LF_PHR_Fixed");
    tag_source(&mut fixed, "SOURCECODE", source_codes::LANDFIRE)?;
    Ok(fixed)
}

/// # Errors
/// Returns an error when Type, HYD_AREA, or HYD_AREA_N is missing or an overlay fails.
pub fn process_dri<E: GeometryEngine>(
    et_units: &Dataset,
    needle: &str,
    state: &Dataset,
    covers: &[&Dataset],
    engine: &E,
    report: &mut PassReport,
) -> Result<Dataset> {
    let mut basins = et_units.clone();
    report.record(
        "phreatophyte ET unit types",
        basins.apply_filter(&FilterRule::ContainsAny {
            field: "Type".to_string(),
            needles: vec![needle.to_string()],
        })?,
    );
    let mut clipped = clip_to_state(&basins, state, engine, report)?;
    tag_source(&mut clipped, "SOURCE_CODE", source_codes::DRI_PHREATOPHYTES)?;
    clipped.add_field("PHR_GROUP");
    clipped.add_field("PHR_TYPE");
    let dissolve_fields = ["HYD_AREA", "HYD_AREA_N", "PHR_GROUP", "PHR_TYPE", "SOURCE_CODE"];
    let mut remaining = engine.dissolve(&clipped, &dissolve_fields)?;
    for cover in covers {
        let erased = engine.erase(&remaining, cover)?;
        report.record_counts(&format!("erase {}", cover.name()), remaining.len(), erased.len());
        remaining = erased;
    }
    remaining.assign("PHR_TYPE", &Value::text("Unknown Phreatophytes"));
    remaining.assign("PHR_GROUP", &Value::text("Unknown"));
    remaining.rename("dri_phreatophytes");
    Ok(remaining)
}

/// TNC and LANDFIRE rows share one mapping.
///
/// # Errors
/// Returns an error when a target is not part of the Phreatophytes template.
pub fn vegetation_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &phreatophytes(),
        &[("SYS_NAME", "PHR_TYPE"), ("SYS_GROUP", "PHR_GROUP"), ("SOURCECODE", "SOURCE_CODE")],
    )?)
}

/// # Errors
/// Returns an error when a target is not part of the Phreatophytes template.
pub fn dri_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &phreatophytes(),
        &[
            ("PHR_TYPE", "PHR_TYPE"),
            ("PHR_GROUP", "PHR_GROUP"),
            ("SOURCE_CODE", "SOURCE_CODE"),
            ("HYD_AREA_N", "COMMENTS"),
        ],
    )?)
}
