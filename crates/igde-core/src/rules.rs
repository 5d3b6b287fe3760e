use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Feature, Value};

/// Blank means null or text with fewer than two non-whitespace-trimmed characters.
#[must_use]
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(text) => text.trim().chars().count() < 2,
        _ => false,
    }
}

/// Missing means null or whitespace-only text. Used for single-letter code fields,
/// where [`is_blank`] would discard real values such as `"Y"`.
#[must_use]
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(text) => text.trim().is_empty(),
        _ => false,
    }
}

/// Row predicate; rows for which [`FilterRule::keeps`] is false are removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FilterRule {
    /// Keep rows whose integer code is listed. Null codes are dropped.
    AllowCodes { field: String, codes: BTreeSet<i64> },
    /// Drop rows whose integer code is listed. Null codes are kept.
    DenyCodes { field: String, codes: BTreeSet<i64> },
    /// Keep rows whose value is listed. Nulls are dropped.
    AllowValues { field: String, values: BTreeSet<String> },
    /// Drop rows whose value is listed. Nulls are kept.
    DenyValues { field: String, values: BTreeSet<String> },
    /// Keep rows whose text contains any needle (case-sensitive).
    ContainsAny { field: String, needles: Vec<String> },
    /// Drop rows whose text contains the needle (case-sensitive).
    ExcludeContaining { field: String, needle: String },
    /// Keep rows outside `low..=high` by text comparison; nulls are dropped as in SQL.
    ExcludeRange { field: String, low: String, high: String },
    RequirePresent { field: String },
}

impl FilterRule {
    #[must_use]
    pub fn allow_codes(field: &str, codes: &[i64]) -> Self {
        Self::AllowCodes { field: field.to_string(), codes: codes.iter().copied().collect() }
    }

    #[must_use]
    pub fn deny_codes(field: &str, codes: &[i64]) -> Self {
        Self::DenyCodes { field: field.to_string(), codes: codes.iter().copied().collect() }
    }

    #[must_use]
    pub fn allow_values(field: &str, values: &[&str]) -> Self {
        Self::AllowValues {
            field: field.to_string(),
            values: values.iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn deny_values(field: &str, values: &[&str]) -> Self {
        Self::DenyValues {
            field: field.to_string(),
            values: values.iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::AllowCodes { field, .. }
            | Self::DenyCodes { field, .. }
            | Self::AllowValues { field, .. }
            | Self::DenyValues { field, .. }
            | Self::ContainsAny { field, .. }
            | Self::ExcludeContaining { field, .. }
            | Self::ExcludeRange { field, .. }
            | Self::RequirePresent { field } => field,
        }
    }

    #[must_use]
    pub fn keeps(&self, feature: &Feature) -> bool {
        let value = feature.get(self.field());
        match self {
            Self::AllowCodes { codes, .. } => {
                value.as_i64().is_some_and(|code| codes.contains(&code))
            }
            Self::DenyCodes { codes, .. } => {
                !value.as_i64().is_some_and(|code| codes.contains(&code))
            }
            Self::AllowValues { values, .. } => {
                value.render().is_some_and(|text| values.contains(&text))
            }
            Self::DenyValues { values, .. } => {
                !value.render().is_some_and(|text| values.contains(&text))
            }
            Self::ContainsAny { needles, .. } => value
                .render()
                .is_some_and(|text| needles.iter().any(|needle| text.contains(needle.as_str()))),
            Self::ExcludeContaining { needle, .. } => {
                !value.render().is_some_and(|text| text.contains(needle.as_str()))
            }
            Self::ExcludeRange { low, high, .. } => value
                .render()
                .is_some_and(|text| text.as_str() < low.as_str() || text.as_str() > high.as_str()),
            Self::RequirePresent { .. } => !value.is_null(),
        }
    }
}

/// Row rewrite. Recodes never remove rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "recode", rename_all = "snake_case")]
pub enum Recode {
    ReplaceCode { field: String, from: i64, to: i64 },
    ReplaceText { field: String, from: String, to: String },
    /// Set `field` on the row whose `key_field` renders as `key`.
    PatchByKey { key_field: String, key: String, field: String, value: Value },
    NormalizeBlank { field: String },
    /// Copy `from_field` into `field` where `field` is missing (see [`is_missing`]).
    FillBlankFrom { field: String, from_field: String },
    Assign { field: String, value: Value },
    /// Write a label for each code into `target`; unlisted codes get `default`.
    MapCode {
        field: String,
        target: String,
        labels: BTreeMap<i64, String>,
        default: Option<String>,
    },
}

impl Recode {
    /// Fields that must exist before the recode runs.
    #[must_use]
    pub fn reads(&self) -> Vec<&str> {
        match self {
            Self::ReplaceCode { field, .. }
            | Self::ReplaceText { field, .. }
            | Self::NormalizeBlank { field }
            | Self::MapCode { field, .. } => vec![field.as_str()],
            Self::PatchByKey { key_field, field, .. } => vec![key_field.as_str(), field.as_str()],
            Self::FillBlankFrom { field, from_field } => vec![field.as_str(), from_field.as_str()],
            Self::Assign { .. } => Vec::new(),
        }
    }

    /// Field created when absent.
    #[must_use]
    pub fn writes(&self) -> Option<&str> {
        match self {
            Self::Assign { field, .. } => Some(field.as_str()),
            Self::MapCode { target, .. } => Some(target.as_str()),
            _ => None,
        }
    }

    /// Rewrite one row; returns whether it changed.
    #[allow(clippy::cast_precision_loss)]
    pub fn apply(&self, feature: &mut Feature) -> bool {
        let next = match self {
            Self::ReplaceCode { field, from, to } => {
                let current = feature.get(field);
                if current.as_i64() != Some(*from) {
                    return false;
                }
                let replacement = match current {
                    Value::Text(_) => Value::Text(to.to_string()),
                    Value::Double(_) => Value::Double(*to as f64),
                    _ => Value::Integer(*to),
                };
                Some((field, replacement))
            }
            Self::ReplaceText { field, from, to } => (feature.get(field).as_text()
                == Some(from.as_str()))
            .then(|| (field, Value::text(to))),
            Self::PatchByKey { key_field, key, field, value } => (feature.get(key_field).render()
                .as_deref()
                == Some(key.as_str()))
            .then(|| (field, value.clone())),
            Self::NormalizeBlank { field } => {
                let current = feature.get(field);
                (!current.is_null() && is_blank(current)).then_some((field, Value::Null))
            }
            Self::FillBlankFrom { field, from_field } => {
                let source = feature.get(from_field);
                (is_missing(feature.get(field)) && !is_missing(source))
                    .then(|| (field, source.clone()))
            }
            Self::Assign { field, value } => Some((field, value.clone())),
            Self::MapCode { field, target, labels, default } => {
                let label = feature
                    .get(field)
                    .as_i64()
                    .and_then(|code| labels.get(&code).cloned())
                    .or_else(|| default.clone());
                Some((target, Value::from(label)))
            }
        };

        match next {
            Some((field, value)) if feature.get(field) != &value => {
                feature.set(field, value);
                true
            }
            _ => false,
        }
    }
}

/// Scientific name = genus + " " + species. Rows without a species keep a name only
/// when `exception_field` holds one of `exceptions`; all other such rows are dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScientificNameRule {
    pub genus_field: String,
    pub species_field: String,
    pub target_field: String,
    pub exception_field: Option<String>,
    pub exceptions: Vec<String>,
}

impl ScientificNameRule {
    #[must_use]
    pub fn new(genus_field: &str, species_field: &str, target_field: &str) -> Self {
        Self {
            genus_field: genus_field.to_string(),
            species_field: species_field.to_string(),
            target_field: target_field.to_string(),
            exception_field: None,
            exceptions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_exceptions(mut self, field: &str, names: &[&str]) -> Self {
        self.exception_field = Some(field.to_string());
        self.exceptions = names.iter().map(ToString::to_string).collect();
        self
    }

    /// Blank-normalize genus and species, then write the name. Returns false when
    /// the row should be dropped: a missing genus or species drops it unless the
    /// exception field names a listed taxon.
    pub fn apply(&self, feature: &mut Feature) -> bool {
        for field in [&self.genus_field, &self.species_field] {
            if is_blank(feature.get(field)) {
                feature.set(field, Value::Null);
            }
        }

        let genus = feature.get(&self.genus_field).render();
        let species = feature.get(&self.species_field).render();
        let name = match (genus, species) {
            (Some(genus), Some(species)) => Some(format!("{} {}", genus.trim(), species.trim())),
            _ => self.exception_field.as_ref().and_then(|field| {
                feature
                    .get(field)
                    .as_text()
                    .filter(|candidate| self.exceptions.iter().any(|name| name == candidate))
                    .map(ToString::to_string)
            }),
        };

        match name {
            Some(name) => {
                feature.set(&self.target_field, Value::Text(name));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{Dataset, LayerKind};

    fn waterbodies(codes: &[i64]) -> Dataset {
        Dataset::from_features(
            "NHDWaterbody",
            LayerKind::Polygon,
            codes.iter().map(|code| Feature::new(None).with("FCode", *code)).collect(),
        )
    }

    #[test]
    fn waterbody_allow_list_keeps_known_codes_only() -> Result<(), crate::IgdeError> {
        let mut dataset = waterbodies(&[36100, 39004, 99999]);
        let outcome = dataset
            .apply_filter(&FilterRule::allow_codes("FCode", &[36100, 39004, 39009, 39011]))?;
        assert_eq!(outcome.kept, 2);
        assert_eq!(outcome.removed, 1);
        let codes: Vec<Option<i64>> =
            dataset.features().iter().map(|f| f.get("FCode").as_i64()).collect();
        assert_eq!(codes, vec![Some(36100), Some(39004)]);
        Ok(())
    }

    #[test]
    fn blank_covers_short_and_whitespace_text() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&Value::text("")));
        assert!(is_blank(&Value::text(" ")));
        assert!(is_blank(&Value::text("x")));
        assert!(!is_blank(&Value::text("ab")));
        assert!(!is_blank(&Value::Integer(0)));
    }

    #[test]
    fn exclude_range_compares_text_and_drops_nulls() {
        let rule = FilterRule::ExcludeRange {
            field: "Permanent_Identifier".to_string(),
            low: "152068036".to_string(),
            high: "152068098".to_string(),
        };
        let inside = Feature::new(None).with("Permanent_Identifier", "152068050");
        let outside = Feature::new(None).with("Permanent_Identifier", "152068099");
        let null = Feature::new(None);
        assert!(!rule.keeps(&inside));
        assert!(rule.keeps(&outside));
        assert!(!rule.keeps(&null));
    }

    #[test]
    fn contains_any_is_case_sensitive_substring() {
        let rule = FilterRule::ContainsAny {
            field: "GNIS_Name".to_string(),
            needles: vec!["Humboldt".to_string()],
        };
        assert!(rule.keeps(&Feature::new(None).with("GNIS_Name", "Humboldt River")));
        assert!(!rule.keeps(&Feature::new(None).with("GNIS_Name", "humboldt river")));
        assert!(!rule.keeps(&Feature::new(None)));
    }

    #[test]
    fn deny_rules_keep_nulls() {
        let rule = FilterRule::deny_values("WETLAND_TYPE", &["Lake"]);
        assert!(rule.keeps(&Feature::new(None)));
        assert!(!rule.keeps(&Feature::new(None).with("WETLAND_TYPE", "Lake")));
        let rule = FilterRule::ExcludeContaining {
            field: "S_RANK".to_string(),
            needle: "SX".to_string(),
        };
        assert!(!rule.keeps(&Feature::new(None).with("S_RANK", "SX")));
        assert!(rule.keeps(&Feature::new(None).with("S_RANK", "S1")));
    }

    #[test]
    fn replace_code_preserves_value_type() {
        let recode = Recode::ReplaceCode { field: "gridcode".to_string(), from: 11550, to: 11551 };
        let mut integer = Feature::new(None).with("gridcode", 11550_i64);
        let mut text = Feature::new(None).with("gridcode", "11550");
        assert!(recode.apply(&mut integer));
        assert!(recode.apply(&mut text));
        assert_eq!(integer.get("gridcode"), &Value::Integer(11551));
        assert_eq!(text.get("gridcode"), &Value::text("11551"));
        assert!(!recode.apply(&mut integer));
    }

    #[test]
    fn patch_by_key_touches_only_the_matching_row() {
        let recode = Recode::PatchByKey {
            key_field: "SiteID".to_string(),
            key: "42".to_string(),
            field: "ShortName".to_string(),
            value: Value::text("Corrected Spring"),
        };
        let mut hit = Feature::new(None).with("SiteID", 42_i64).with("ShortName", "Typo");
        let mut miss = Feature::new(None).with("SiteID", 43_i64).with("ShortName", "Other");
        assert!(recode.apply(&mut hit));
        assert!(!recode.apply(&mut miss));
        assert_eq!(hit.get("ShortName"), &Value::text("Corrected Spring"));
    }

    #[test]
    fn fill_blank_fills_missing_codes_only() {
        let recode = Recode::FillBlankFrom {
            field: "ENDEMISM".to_string(),
            from_field: "ENDEMISM_1".to_string(),
        };
        for blank in [Value::Null, Value::text(""), Value::text(" ")] {
            let mut row = Feature::new(None).with("ENDEMISM", blank).with("ENDEMISM_1", "Y");
            assert!(recode.apply(&mut row));
            assert_eq!(row.get("ENDEMISM"), &Value::text("Y"));
        }
        let mut set = Feature::new(None).with("ENDEMISM", "N").with("ENDEMISM_1", "Y");
        assert!(!recode.apply(&mut set));
    }

    #[test]
    fn map_code_labels_river_types() {
        let recode = Recode::MapCode {
            field: "FCode".to_string(),
            target: "RIVER_TYPE".to_string(),
            labels: BTreeMap::from([(46006, "Perennial Stream/River".to_string())]),
            default: Some("Artificial Path".to_string()),
        };
        let mut perennial = Feature::new(None).with("FCode", 46006_i64);
        let mut path = Feature::new(None).with("FCode", 55800_i64);
        recode.apply(&mut perennial);
        recode.apply(&mut path);
        assert_eq!(perennial.get("RIVER_TYPE"), &Value::text("Perennial Stream/River"));
        assert_eq!(path.get("RIVER_TYPE"), &Value::text("Artificial Path"));
    }

    #[test]
    fn scientific_names_honor_exception_list() {
        let rule = ScientificNameRule::new("Genus", "Species", "SciName")
            .with_exceptions("FloraSpecies", &["Spirogyra parula"]);

        let mut full = Feature::new(None).with("Genus", "Carex").with("Species", "nebrascensis");
        assert!(rule.apply(&mut full));
        assert_eq!(full.get("SciName"), &Value::text("Carex nebrascensis"));

        let mut exception = Feature::new(None)
            .with("Genus", "Spirogyra")
            .with("Species", "x")
            .with("FloraSpecies", "Spirogyra parula");
        assert!(rule.apply(&mut exception));
        assert_eq!(exception.get("Species"), &Value::Null);
        assert_eq!(exception.get("SciName"), &Value::text("Spirogyra parula"));

        let mut genus_only = Feature::new(None)
            .with("Genus", "Juncus")
            .with("Species", Value::Null)
            .with("FloraSpecies", "Juncus sp.");
        assert!(!rule.apply(&mut genus_only));
    }

    proptest! {
        #[test]
        fn property_allow_list_filter_is_idempotent(
            codes in proptest::collection::vec(0_i64..50, 0..64),
            allowed in proptest::collection::vec(0_i64..50, 0..8),
        ) {
            let rule = FilterRule::allow_codes("FCode", &allowed);
            let mut dataset = waterbodies(&codes);
            let first = dataset.apply_filter(&rule);
            prop_assert!(first.is_ok());
            let second = dataset.apply_filter(&rule);
            prop_assert_eq!(second.map(|outcome| outcome.removed), Ok(0));
        }

        #[test]
        fn property_normalize_blank_leaves_no_blank_text(text in ".{0,4}") {
            let mut row = Feature::new(None).with("Genus", text.as_str());
            Recode::NormalizeBlank { field: "Genus".to_string() }.apply(&mut row);
            let value = row.get("Genus");
            prop_assert!(value.is_null() || !is_blank(value));
        }
    }
}
