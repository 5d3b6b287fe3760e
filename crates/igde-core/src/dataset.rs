use std::collections::{BTreeMap, BTreeSet};

use geo_types::Geometry;
use serde::{Deserialize, Serialize};

use crate::{
    is_valid_identifier, FieldSpec, FieldType, FilterRule, IgdeError, LayerKind, LayerTemplate,
    Recode, ScientificNameRule, Value,
};

pub type Attributes = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

/// One row of a dataset: attributes plus an optional geometry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub attributes: Attributes,
}

impl Feature {
    #[must_use]
    pub fn new(geometry: Option<Geometry<f64>>) -> Self {
        Self { geometry, attributes: Attributes::new() }
    }

    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.to_string(), value.into());
        self
    }

    /// Attribute value, `Null` when absent.
    #[must_use]
    pub fn get(&self, field: &str) -> &Value {
        self.attributes.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.attributes.insert(field.to_string(), value);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct FilterOutcome {
    pub kept: usize,
    pub removed: usize,
}

/// Working copy of a source dataset. Every transform consumes rows and
/// materializes the result; the source file itself is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    kind: LayerKind,
    fields: Vec<String>,
    features: Vec<Feature>,
}

impl Dataset {
    #[must_use]
    pub fn new(name: &str, kind: LayerKind) -> Self {
        Self { name: name.to_string(), kind, fields: Vec::new(), features: Vec::new() }
    }

    /// Build a dataset whose schema is the union of the feature attribute names.
    #[must_use]
    pub fn from_features(name: &str, kind: LayerKind, features: Vec<Feature>) -> Self {
        let mut dataset = Self::new(name, kind);
        for feature in features {
            dataset.push(feature);
        }
        dataset
    }

    #[must_use]
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        for field in fields {
            self.register_field(field);
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    #[must_use]
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|name| name == field)
    }

    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    #[must_use]
    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn push(&mut self, feature: Feature) {
        for key in feature.attributes.keys() {
            if !self.has_field(key) {
                self.fields.push(key.clone());
            }
        }
        self.features.push(feature);
    }

    /// Replace the rows, keeping the current schema.
    pub fn replace_features(&mut self, features: Vec<Feature>) {
        self.features = features;
    }

    fn register_field(&mut self, field: &str) {
        if !self.has_field(field) {
            self.fields.push(field.to_string());
        }
    }

    /// # Errors
    /// Returns [`IgdeError::Schema`] naming the first field missing from this dataset.
    pub fn require_fields(&self, fields: &[&str]) -> Result<(), IgdeError> {
        for field in fields {
            if !self.has_field(field) {
                return Err(IgdeError::Schema(format!(
                    "dataset {} has no field {field}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Add a field initialized to null on every row; no-op when present.
    pub fn add_field(&mut self, field: &str) {
        if self.has_field(field) {
            return;
        }
        self.register_field(field);
        for feature in &mut self.features {
            feature.attributes.entry(field.to_string()).or_insert(Value::Null);
        }
    }

    /// Set `field` to `value` on every row.
    pub fn assign(&mut self, field: &str, value: &Value) {
        self.register_field(field);
        for feature in &mut self.features {
            feature.set(field, value.clone());
        }
    }

    /// Set `field` on every row to the value derived from that row.
    pub fn compute<F>(&mut self, field: &str, mut derive: F)
    where
        F: FnMut(&Feature) -> Value,
    {
        self.register_field(field);
        for feature in &mut self.features {
            let value = derive(feature);
            feature.set(field, value);
        }
    }

    pub fn drop_fields(&mut self, fields: &[&str]) {
        self.fields.retain(|name| !fields.contains(&name.as_str()));
        for feature in &mut self.features {
            for field in fields {
                feature.attributes.remove(*field);
            }
        }
    }

    pub fn retain<F>(&mut self, mut keep: F) -> FilterOutcome
    where
        F: FnMut(&Feature) -> bool,
    {
        let before = self.features.len();
        self.features =
            std::mem::take(&mut self.features).into_iter().filter(|f| keep(f)).collect();
        FilterOutcome { kept: self.features.len(), removed: before - self.features.len() }
    }

    /// # Errors
    /// Returns [`IgdeError::Schema`] when the rule's field is not part of this dataset.
    pub fn apply_filter(&mut self, rule: &FilterRule) -> Result<FilterOutcome, IgdeError> {
        self.require_fields(&[rule.field()])?;
        Ok(self.retain(|feature| rule.keeps(feature)))
    }

    /// Apply a rewrite rule and return the number of rows whose value changed.
    ///
    /// # Errors
    /// Returns [`IgdeError::Schema`] when a field read by the rule is missing.
    pub fn apply_recode(&mut self, recode: &Recode) -> Result<usize, IgdeError> {
        self.require_fields(&recode.reads())?;
        if let Some(written) = recode.writes() {
            self.register_field(written);
        }
        let mut changed = 0;
        for feature in &mut self.features {
            if recode.apply(feature) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// # Errors
    /// Returns [`IgdeError::Schema`] when the genus, species, or exception field is missing.
    pub fn synthesize_scientific_name(
        &mut self,
        rule: &ScientificNameRule,
    ) -> Result<FilterOutcome, IgdeError> {
        let mut required = vec![rule.genus_field.as_str(), rule.species_field.as_str()];
        if let Some(field) = rule.exception_field.as_deref() {
            required.push(field);
        }
        self.require_fields(&required)?;
        self.register_field(&rule.target_field);

        let before = self.features.len();
        let mut kept = Vec::with_capacity(before);
        for mut feature in std::mem::take(&mut self.features) {
            if rule.apply(&mut feature) {
                kept.push(feature);
            }
        }
        self.features = kept;
        Ok(FilterOutcome { kept: self.features.len(), removed: before - self.features.len() })
    }

    /// Copy `fields` from the first row of `other` whose `other_key` equals this row's `key`.
    /// A copied name that already exists here receives a numeric suffix (`_1`, `_2`, ...).
    /// Returns the number of rows that found a match.
    ///
    /// # Errors
    /// Returns [`IgdeError::Schema`] when a key or copied field is missing.
    pub fn join_field(
        &mut self,
        key: &str,
        other: &Dataset,
        other_key: &str,
        fields: &[&str],
    ) -> Result<usize, IgdeError> {
        self.require_fields(&[key])?;
        other.require_fields(&[other_key])?;
        other.require_fields(fields)?;

        let mut lookup: BTreeMap<String, &Feature> = BTreeMap::new();
        for feature in &other.features {
            if let Some(value) = feature.get(other_key).render() {
                lookup.entry(value).or_insert(feature);
            }
        }

        let mut targets = Vec::with_capacity(fields.len());
        for field in fields {
            let target = self.unused_name(field);
            self.register_field(&target);
            targets.push(target);
        }

        let mut matched = 0;
        for feature in &mut self.features {
            let found = feature.get(key).render().and_then(|value| lookup.get(&value).copied());
            if found.is_some() {
                matched += 1;
            }
            for (field, target) in fields.iter().zip(&targets) {
                let value = found.map_or(Value::Null, |row| row.get(field).clone());
                feature.set(target, value);
            }
        }
        Ok(matched)
    }

    fn unused_name(&self, field: &str) -> String {
        if !self.has_field(field) {
            return field.to_string();
        }
        let mut suffix = 1;
        loop {
            let candidate = format!("{field}_{suffix}");
            if !self.has_field(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Concatenate two datasets of the same kind; the schema becomes the union.
    ///
    /// # Errors
    /// Returns [`IgdeError::Validation`] when the geometry kinds differ.
    pub fn merge(mut self, other: Dataset) -> Result<Dataset, IgdeError> {
        if self.kind != other.kind {
            return Err(IgdeError::Validation(format!(
                "cannot merge {} ({}) with {} ({})",
                self.name,
                self.kind.as_str(),
                other.name,
                other.kind.as_str()
            )));
        }
        for field in &other.fields {
            self.register_field(field);
        }
        self.features.extend(other.features);
        Ok(self)
    }

    /// Distinct non-null values of `field` in first-seen order.
    #[must_use]
    pub fn distinct_values(&self, field: &str) -> Vec<Value> {
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for feature in &self.features {
            let value = feature.get(field);
            if let Some(key) = value.render() {
                if seen.insert(key) {
                    values.push(value.clone());
                }
            }
        }
        values
    }

    /// One row per distinct non-null `field` value; the first occurrence wins.
    #[must_use]
    pub fn first_by(&self, field: &str) -> Dataset {
        let mut seen = BTreeSet::new();
        let mut unique = Dataset::new(&self.name, self.kind);
        unique.fields.clone_from(&self.fields);
        for feature in &self.features {
            if let Some(key) = feature.get(field).render() {
                if seen.insert(key) {
                    unique.features.push(feature.clone());
                }
            }
        }
        unique
    }

    /// Count of non-null `value_field` entries per `group_field`, as a table with
    /// columns `group_field` and `COUNT_<value_field>`. Rows with a null group are skipped.
    ///
    /// # Errors
    /// Returns [`IgdeError::Schema`] when either field is missing.
    pub fn count_by(&self, group_field: &str, value_field: &str) -> Result<Dataset, IgdeError> {
        self.require_fields(&[group_field, value_field])?;
        let mut counts: BTreeMap<String, (Value, i64)> = BTreeMap::new();
        let mut order = Vec::new();
        for feature in &self.features {
            let group = feature.get(group_field);
            let Some(key) = group.render() else {
                continue;
            };
            let entry = counts.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                (group.clone(), 0)
            });
            if !feature.get(value_field).is_null() {
                entry.1 += 1;
            }
        }

        let count_field = format!("COUNT_{value_field}");
        let mut table = Dataset::new(&format!("{}_count", self.name), LayerKind::Table)
            .with_fields(&[group_field, &count_field]);
        for key in order {
            if let Some((group, count)) = counts.remove(&key) {
                table.push(Feature::new(None).with(group_field, group).with(&count_field, count));
            }
        }
        Ok(table)
    }

    /// Derive a template from the values present: text becomes TEXT sized to the
    /// longest value, integers LONG (DOUBLE when out of range), doubles DOUBLE.
    ///
    /// # Errors
    /// Returns [`IgdeError::Validation`] when a field name is not a valid identifier.
    pub fn infer_template(&self, name: &str) -> Result<LayerTemplate, IgdeError> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if !is_valid_identifier(field) {
                return Err(IgdeError::Validation(format!(
                    "field {field:?} of {} is not a valid identifier",
                    self.name
                )));
            }
            let mut inferred: Option<FieldType> = None;
            let mut longest = 1_usize;
            for feature in &self.features {
                let next = match feature.get(field) {
                    Value::Null => continue,
                    Value::Text(text) => {
                        longest = longest.max(text.chars().count());
                        FieldType::Text
                    }
                    Value::Integer(value) if i32::try_from(*value).is_ok() => FieldType::Long,
                    Value::Integer(_) | Value::Double(_) => FieldType::Double,
                    Value::Date(_) => FieldType::Date,
                };
                inferred = Some(match (inferred, next) {
                    (None, next) => next,
                    (Some(current), next) if current == next => current,
                    (
                        Some(FieldType::Long | FieldType::Double),
                        FieldType::Long | FieldType::Double,
                    ) => FieldType::Double,
                    _ => FieldType::Text,
                });
            }
            let spec = match inferred.unwrap_or(FieldType::Text) {
                FieldType::Text => {
                    let length = u32::try_from(longest.max(1)).unwrap_or(u32::MAX);
                    FieldSpec::text(field, field, length.max(255))
                }
                FieldType::Long | FieldType::Short => FieldSpec::long(field, field),
                FieldType::Double => FieldSpec::double(field, field),
                FieldType::Date => FieldSpec::date(field, field),
            };
            fields.push(spec);
        }
        Ok(LayerTemplate::new(name, self.kind, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxa() -> Dataset {
        Dataset::from_features(
            "taxa",
            LayerKind::Table,
            vec![
                Feature::new(None).with("SiteID", 1_i64).with("SciName", "Rana pipiens"),
                Feature::new(None).with("SiteID", 1_i64).with("SciName", "Bufo boreas"),
                Feature::new(None).with("SiteID", 2_i64).with("SciName", Value::Null),
                Feature::new(None).with("SiteID", 3_i64).with("SciName", "Bufo boreas"),
            ],
        )
    }

    #[test]
    fn count_by_counts_non_null_values_per_group() -> Result<(), IgdeError> {
        let counts = taxa().count_by("SiteID", "SciName")?;
        assert_eq!(counts.fields(), ["SiteID", "COUNT_SciName"]);
        let pairs: Vec<(Option<i64>, Option<i64>)> = counts
            .features()
            .iter()
            .map(|row| (row.get("SiteID").as_i64(), row.get("COUNT_SciName").as_i64()))
            .collect();
        assert_eq!(pairs, vec![(Some(1), Some(2)), (Some(2), Some(0)), (Some(3), Some(1))]);
        Ok(())
    }

    #[test]
    fn join_field_takes_first_match_and_suffixes_collisions() -> Result<(), IgdeError> {
        let mut sites = Dataset::from_features(
            "sites",
            LayerKind::Point,
            vec![
                Feature::new(None).with("SiteID", 1_i64).with("COUNT_SciName", 9_i64),
                Feature::new(None).with("SiteID", 4_i64).with("COUNT_SciName", 9_i64),
            ],
        );
        let counts = taxa().count_by("SiteID", "SciName")?;
        let matched = sites.join_field("SiteID", &counts, "SiteID", &["COUNT_SciName"])?;
        assert_eq!(matched, 1);
        assert!(sites.has_field("COUNT_SciName_1"));
        assert_eq!(sites.features()[0].get("COUNT_SciName_1"), &Value::Integer(2));
        assert_eq!(sites.features()[1].get("COUNT_SciName_1"), &Value::Null);
        Ok(())
    }

    #[test]
    fn first_by_keeps_one_row_per_name() {
        let unique = taxa().first_by("SciName");
        assert_eq!(unique.len(), 2);
        assert_eq!(unique.features()[0].get("SiteID"), &Value::Integer(1));
        assert_eq!(unique.distinct_values("SciName").len(), unique.len());
    }

    #[test]
    fn merge_rejects_mixed_geometry_kinds() {
        let points = Dataset::new("points", LayerKind::Point);
        let polygons = Dataset::new("polygons", LayerKind::Polygon);
        assert!(points.merge(polygons).is_err());
    }

    #[test]
    fn merge_unions_schemas() -> Result<(), IgdeError> {
        let left = Dataset::from_features(
            "a",
            LayerKind::Table,
            vec![Feature::new(None).with("A", 1_i64)],
        );
        let right = Dataset::from_features(
            "b",
            LayerKind::Table,
            vec![Feature::new(None).with("B", 2_i64)],
        );
        let merged = left.merge(right)?;
        assert_eq!(merged.fields(), ["A", "B"]);
        assert_eq!(merged.len(), 2);
        Ok(())
    }

    #[test]
    fn infer_template_widens_mixed_numeric_columns() -> Result<(), IgdeError> {
        let dataset = Dataset::from_features(
            "units",
            LayerKind::Polygon,
            vec![
                Feature::new(None).with("HYD_AREA", "101A").with("ACRES", 3_i64),
                Feature::new(None).with("HYD_AREA", "102").with("ACRES", 4.5),
            ],
        );
        let template = dataset.infer_template("hydrobasin_units")?;
        assert_eq!(template.field("HYD_AREA").map(|f| f.field_type), Some(FieldType::Text));
        assert_eq!(template.field("ACRES").map(|f| f.field_type), Some(FieldType::Double));
        Ok(())
    }

    #[test]
    fn missing_fields_are_schema_errors() {
        let mut dataset = taxa();
        let rule = FilterRule::RequirePresent { field: "Genus".to_string() };
        assert!(matches!(dataset.apply_filter(&rule), Err(IgdeError::Schema(_))));
    }
}
