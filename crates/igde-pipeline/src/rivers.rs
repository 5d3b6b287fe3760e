//! NHD flowlines → Rivers_Streams: major named rivers plus every perennial reach.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use igde_core::{
    rivers_streams, source_codes, Dataset, FilterRule, GeometryEngine, LengthUnit, MappingSet,
    Recode,
};
use serde::Serialize;

use crate::config::RiversConfig;
use crate::derive::{add_length, clip_to_state, tag_source};
use crate::PassReport;

pub const PASS: &str = "rivers";
const ID_FIELD: &str = "Permanent_Identifier";
const NAME_FIELD: &str = "GNIS_Name";

/// Row counts behind the merge of the major and perennial subsets.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MergeCheck {
    pub major: usize,
    pub perennial: usize,
    pub duplicates_removed: usize,
    pub merged: usize,
}

impl MergeCheck {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.merged + self.duplicates_removed == self.major + self.perennial
    }
}

/// Major rivers: allowed FCodes whose name contains a listed river, minus the
/// excluded id range and names.
///
/// # Errors
/// Returns an error when a filtered field is missing.
pub fn major_rivers(
    flowlines: &Dataset,
    river_names: &[String],
    config: &RiversConfig,
    report: &mut PassReport,
) -> Result<Dataset> {
    let mut major = flowlines.clone();
    major.rename("major_rivers");
    let outcome = major.apply_filter(&FilterRule::allow_codes("FCode", &config.major_fcodes))?;
    report.record("major FCodes", outcome);
    report.record(
        "major river names",
        major.apply_filter(&FilterRule::ContainsAny {
            field: NAME_FIELD.to_string(),
            needles: river_names.to_vec(),
        })?,
    );
    if let Some(range) = &config.excluded_ids {
        report.record(
            "excluded identifier range",
            major.apply_filter(&FilterRule::ExcludeRange {
                field: ID_FIELD.to_string(),
                low: range.low.clone(),
                high: range.high.clone(),
            })?,
        );
    }
    let excluded: Vec<&str> = config.excluded_names.iter().map(String::as_str).collect();
    let outcome = major.apply_filter(&FilterRule::deny_values(NAME_FIELD, &excluded))?;
    report.record("excluded names", outcome);
    Ok(major)
}

/// Merge major rivers with the perennial reaches they do not already contain.
///
/// # Errors
/// Returns an error when a field is missing, or when the merge breaks count
/// consistency or leaves an identifier on both sides.
pub fn merge_rivers(
    major: Dataset,
    mut perennial: Dataset,
    report: &mut PassReport,
) -> Result<(Dataset, MergeCheck)> {
    perennial.require_fields(&[ID_FIELD])?;
    let mut seen = BTreeMap::new();
    for id in major.features().iter().filter_map(|row| row.get(ID_FIELD).render()) {
        *seen.entry(id).or_insert(0_usize) += 1;
    }
    let repeated = seen.values().filter(|count| **count > 1).count();
    report.check(
        "major identifiers unique",
        repeated == 0,
        format!("{repeated} identifiers appear more than once"),
    );
    let major_ids: BTreeSet<String> = seen.into_keys().collect();

    let perennial_count = perennial.len();
    let dedup = perennial.retain(|row| {
        !row.get(ID_FIELD).render().is_some_and(|id| major_ids.contains(&id))
    });
    report.record("perennial minus major", dedup);

    let overlap = perennial
        .features()
        .iter()
        .filter_map(|row| row.get(ID_FIELD).render())
        .filter(|id| major_ids.contains(id))
        .count();
    report.check(
        "major and perennial disjoint",
        overlap == 0,
        format!("{overlap} perennial identifiers remain in the major subset"),
    );

    let major_count = major.len();
    let merged = major.merge(perennial)?;
    let check = MergeCheck {
        major: major_count,
        perennial: perennial_count,
        duplicates_removed: dedup.removed,
        merged: merged.len(),
    };
    report.check(
        "merge consistency",
        check.is_consistent(),
        format!(
            "{} merged = {} major + {} perennial - {} duplicates",
            check.merged, check.major, check.perennial, check.duplicates_removed
        ),
    );
    if overlap != 0 || !check.is_consistent() {
        bail!("river merge is inconsistent: {check:?}, {overlap} shared identifiers");
    }
    Ok((merged, check))
}

/// Full rivers pass up to the append: subsets, merge, clip, length and type.
///
/// # Errors
/// Returns an error when a required field is missing or a merge check fails.
pub fn process_rivers<E: GeometryEngine>(
    flowlines: &Dataset,
    river_names: &[String],
    state: &Dataset,
    config: &RiversConfig,
    engine: &E,
    report: &mut PassReport,
) -> Result<(Dataset, MergeCheck)> {
    let mut perennial = flowlines.clone();
    perennial.rename("perennial");
    report.record(
        "perennial FCode",
        perennial.apply_filter(&FilterRule::allow_codes("FCode", &[config.perennial_fcode]))?,
    );

    let major = major_rivers(flowlines, river_names, config, report)?;
    report.check(
        "major subset within perennial count",
        major.len() <= perennial.len(),
        format!("{} major, {} perennial", major.len(), perennial.len()),
    );

    let (mut merged, check) = merge_rivers(major, perennial, report)?;
    merged.rename("rivers_streams");
    let mut clipped = clip_to_state(&merged, state, engine, report)?;
    add_length(&mut clipped, "LENGTH_MI", LengthUnit::Miles, engine);
    clipped.apply_recode(&Recode::MapCode {
        field: "FCode".to_string(),
        target: "RIVER_TYPE".to_string(),
        labels: BTreeMap::from([(config.perennial_fcode, "Perennial Stream/River".to_string())]),
        default: Some("Artificial Path".to_string()),
    })?;
    tag_source(&mut clipped, "SOURCE_CODE", source_codes::NHD_FLOWLINE)?;
    Ok((clipped, check))
}

/// # Errors
/// Returns an error when a target is not part of the Rivers_Streams template.
pub fn rivers_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &rivers_streams(),
        &[
            ("GNIS_Name", "RIVER_NAME"),
            ("RIVER_TYPE", "RIVER_TYPE"),
            ("FCode", "RIVER_CODE"),
            ("LENGTH_MI", "LENGTH_MI"),
            ("Permanent_Identifier", "PERM_ID"),
            ("SOURCE_CODE", "SOURCE_CODE"),
        ],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{flowline, state_boundary};
    use igde_core::LayerKind;
    use igde_geometry::GeoEngine;

    fn flowlines() -> Dataset {
        Dataset::from_features(
            "NHDFlowline",
            LayerKind::Polyline,
            vec![
                flowline("100", 46006, Some("Humboldt River"), 0.0),
                flowline("101", 55800, Some("Humboldt River"), 10.0),
                flowline("152068050", 55800, Some("Quinn River"), 20.0),
                flowline("102", 46006, Some("White River Wash"), 30.0),
                flowline("103", 46006, Some("Cottonwood Creek"), 40.0),
                flowline("104", 46006, None, 50.0),
                flowline("105", 33600, Some("Humboldt River"), 60.0),
            ],
        )
    }

    fn names() -> Vec<String> {
        vec!["Humboldt River".to_string(), "Quinn River".to_string(), "White River".to_string()]
    }

    #[test]
    fn major_subset_holds_only_named_allowed_reaches() -> Result<()> {
        let mut report = PassReport::new(PASS);
        let major = major_rivers(&flowlines(), &names(), &RiversConfig::default(), &mut report)?;
        let ids: Vec<_> =
            major.features().iter().filter_map(|row| row.get(ID_FIELD).render()).collect();
        assert_eq!(ids, ["100", "101"]);
        for row in major.features() {
            let name = row.get(NAME_FIELD).render().unwrap_or_default();
            assert!(names().iter().any(|river| name.contains(river.as_str())));
        }
        Ok(())
    }

    #[test]
    fn merge_counts_are_consistent_and_disjoint() -> Result<()> {
        let mut report = PassReport::new(PASS);
        let (merged, check) = process_rivers(
            &flowlines(),
            &names(),
            &state_boundary(),
            &RiversConfig::default(),
            &GeoEngine::new(),
            &mut report,
        )?;
        assert_eq!(check, MergeCheck { major: 2, perennial: 4, duplicates_removed: 1, merged: 5 });
        assert_eq!(merged.len(), 5);
        assert!(report.checks.iter().all(|check| check.passed));

        let types: Vec<_> =
            merged.features().iter().filter_map(|row| row.get("RIVER_TYPE").render()).collect();
        assert_eq!(types[1], "Artificial Path");
        assert_eq!(types[0], "Perennial Stream/River");
        let miles = merged.features()[0].get("LENGTH_MI").as_f64().unwrap_or_default();
        assert!((miles - 1_000.0 / 1_609.347_218_694_4).abs() < 1e-9);

        let mapping = rivers_mapping()?;
        mapping.validate_source(&merged)?;
        mapping.validate_against(&rivers_streams())?;
        Ok(())
    }

    #[test]
    fn duplicate_major_identifiers_are_reported() -> Result<()> {
        let major = Dataset::from_features(
            "major",
            LayerKind::Polyline,
            vec![flowline("1", 46006, Some("A"), 0.0), flowline("1", 46006, Some("A"), 5.0)],
        );
        let perennial = Dataset::from_features(
            "perennial",
            LayerKind::Polyline,
            vec![flowline("1", 46006, Some("A"), 0.0), flowline("2", 46006, None, 5.0)],
        );
        let mut report = PassReport::new(PASS);
        let (merged, check) = merge_rivers(major, perennial, &mut report)?;
        assert_eq!(merged.len(), 3);
        assert_eq!(check.duplicates_removed, 1);
        assert!(!report.checks[0].passed);
        Ok(())
    }
}
