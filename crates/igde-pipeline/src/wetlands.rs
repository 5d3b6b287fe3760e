//! DRI/EPA wetland polygons → Wetlands.

use anyhow::Result;
use igde_core::{source_codes, wetlands, Dataset, FilterRule, MappingSet};

use crate::config::WetlandsConfig;
use crate::derive::tag_source;
use crate::PassReport;

pub const PASS: &str = "wetlands";

/// Drop lake-typed and dry-subtyped polygons and tag the rest `driw`.
///
/// # Errors
/// Returns an error when WETLAND_TYPE or WETLAND_SUBTYPE is missing.
pub fn process_wetlands(
    mut wetlands: Dataset,
    config: &WetlandsConfig,
    report: &mut PassReport,
) -> Result<Dataset> {
    let types: Vec<&str> = config.excluded_types.iter().map(String::as_str).collect();
    let outcome = wetlands.apply_filter(&FilterRule::deny_values("WETLAND_TYPE", &types))?;
    report.record("excluded types", outcome);
    let subtypes: Vec<&str> = config.excluded_subtypes.iter().map(String::as_str).collect();
    report.record(
        "excluded subtypes",
        wetlands.apply_filter(&FilterRule::deny_values("WETLAND_SUBTYPE", &subtypes))?,
    );
    tag_source(&mut wetlands, "SOURCE_CODE", source_codes::DRI_WETLANDS)?;
    Ok(wetlands)
}

/// # Errors
/// Returns an error when a target is not part of the Wetlands template.
pub fn wetlands_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &wetlands(),
        &[
            ("WETLAND_TYPE", "WET_TYPE"),
            ("WETLAND_SUBTYPE", "WET_SUBTYPE"),
            ("SOURCE_CODE", "SOURCE_CODE"),
        ],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::square;
    use igde_core::{Feature, LayerKind, Value};

    fn wetland(kind: &str, subtype: Option<&str>) -> Feature {
        Feature::new(Some(square(0.0, 0.0, 10.0)))
            .with("WETLAND_TYPE", kind)
            .with("WETLAND_SUBTYPE", Value::from(subtype))
    }

    #[test]
    fn lakes_and_dry_subtypes_are_dropped_nulls_kept() -> Result<()> {
        let dataset = Dataset::from_features(
            "wetlands",
            LayerKind::Polygon,
            vec![
                wetland("Lake", Some("permanent")),
                wetland("Marsh", Some("dry")),
                wetland("Marsh", None),
                wetland("Meadow", Some("wet")),
            ],
        );
        let mut report = PassReport::new(PASS);
        let output = process_wetlands(dataset, &WetlandsConfig::default(), &mut report)?;
        assert_eq!(output.len(), 2);
        let codes: Vec<Option<&str>> =
            output.features().iter().map(|row| row.get("SOURCE_CODE").as_text()).collect();
        assert_eq!(codes, [Some("driw"), Some("driw")]);
        assert_eq!(report.step("excluded types").map(|step| step.removed), Some(1));
        wetlands_mapping()?.validate_source(&output)?;
        Ok(())
    }

    #[test]
    fn missing_type_field_is_a_schema_error() {
        let dataset = Dataset::from_features(
            "wetlands",
            LayerKind::Polygon,
            vec![Feature::new(Some(square(0.0, 0.0, 10.0))).with("TYPE", "Marsh")],
        );
        let mut report = PassReport::new(PASS);
        assert!(process_wetlands(dataset, &WetlandsConfig::default(), &mut report).is_err());
    }
}
