//! Spring survey sites → Springs, with per-site taxa counts.

use anyhow::Result;
use igde_core::{
    source_codes, springs, Dataset, FilterRule, MappingSet, Recode, ScientificNameRule,
};

use crate::config::SpringsConfig;
use crate::derive::tag_source;
use crate::PassReport;

pub const PASS: &str = "springs";
const SITE_FIELD: &str = "SiteID";

/// Taxa observations of one group, with the fields naming each organism.
#[derive(Debug, Clone)]
pub struct TaxaTable {
    pub observations: Dataset,
    pub rule: ScientificNameRule,
}

impl TaxaTable {
    #[must_use]
    pub fn vertebrates(observations: Dataset) -> Self {
        let rule = ScientificNameRule::new("FaunaGenus", "FaunaSpecies", "VertSciName");
        Self { observations, rule }
    }

    #[must_use]
    pub fn invertebrates(observations: Dataset) -> Self {
        Self { observations, rule: ScientificNameRule::new("Genus", "Species", "InvertSciName") }
    }

    /// Flora keeps a few records named only in `FloraSpecies`.
    #[must_use]
    pub fn flora(observations: Dataset, exceptions: &[String]) -> Self {
        let names: Vec<&str> = exceptions.iter().map(String::as_str).collect();
        Self {
            observations,
            rule: ScientificNameRule::new("Genus", "Species", "FloraSciName")
                .with_exceptions("FloraSpecies", &names),
        }
    }

    /// Blank-normalize names, build scientific names, and count them per site.
    /// The result has `SiteID` and `COUNT_<name field>`.
    ///
    /// # Errors
    /// Returns an error when the site or name fields are missing.
    pub fn site_counts(self, report: &mut PassReport) -> Result<Dataset> {
        let mut observations = self.observations;
        for field in [&self.rule.genus_field, &self.rule.species_field] {
            let recode = Recode::NormalizeBlank { field: field.clone() };
            let normalized = observations.apply_recode(&recode)?;
            tracing::debug!(field = field.as_str(), normalized, "normalized blank names");
        }
        let outcome = observations.synthesize_scientific_name(&self.rule)?;
        report.record(&format!("{} named", self.rule.target_field), outcome);
        Ok(observations.count_by(SITE_FIELD, &self.rule.target_field)?)
    }
}

/// Tag sites `ssi`, join the taxa counts, and drop visits that found no spring.
/// Sites without observations keep null counts.
///
/// # Errors
/// Returns an error when a joined or filtered field is missing.
pub fn process_springs(
    mut sites: Dataset,
    taxa: Vec<TaxaTable>,
    config: &SpringsConfig,
    report: &mut PassReport,
) -> Result<Dataset> {
    tag_source(&mut sites, "SOURCECODE", source_codes::SSI)?;
    for table in taxa {
        let count_field = format!("COUNT_{}", table.rule.target_field);
        let counts = table.site_counts(report)?;
        let matched = sites.join_field(SITE_FIELD, &counts, SITE_FIELD, &[count_field.as_str()])?;
        tracing::info!(
            field = count_field.as_str(),
            matched,
            sites = sites.len(),
            "joined taxa counts"
        );
    }

    let excluded: Vec<&str> = config.excluded_inventory.iter().map(String::as_str).collect();
    let outcome = sites.apply_filter(&FilterRule::deny_values("InventoryLevel", &excluded))?;
    report.record("not a spring", outcome);
    Ok(sites)
}

/// # Errors
/// Returns an error when a target is not part of the Springs template.
pub fn springs_mapping() -> Result<MappingSet> {
    Ok(MappingSet::from_pairs(
        &springs(),
        &[
            ("SOURCECODE", "SOURCE_CODE"),
            ("SiteID", "SPRING_ID"),
            ("ShortName", "SPRING_NAME"),
            ("SpringType1", "SPRING_TYPE1"),
            ("SpringType2", "SPRING_TYPE2"),
            ("CastImageHyperlink", "IMAGE_LINK"),
            ("CastSketchHyperlink", "SKETCH_LINK"),
            ("LatitudeDD", "LATITUDE"),
            ("LongitudeDD", "LONGITUDE"),
            ("ElevationM", "ELEVATION"),
            ("InventoryLevel", "INV_STAT"),
            ("SurveyCount", "SURV_COUNT"),
            ("Flow_Mean", "FLOW_MEAN"),
            ("pH_Mean", "PH_MEAN"),
            ("Water_Temp_Mean", "WATER_TEMP_MEAN"),
            ("Spec_Cond_Mean", "SPEC_COND_MEAN"),
            ("Alkalinity_Mean", "ALKALINITY_MEAN"),
            ("TotalAreaSQM", "SPRING_AREA"),
            ("COUNT_VertSciName", "VERT_COUNT"),
            ("COUNT_InvertSciName", "INVERT_COUNT"),
            ("COUNT_FloraSciName", "FLORA_COUNT"),
        ],
    )?)
}
