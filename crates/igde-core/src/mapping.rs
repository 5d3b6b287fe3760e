use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Dataset, Feature, FieldType, IgdeError, LayerTemplate, Value};

/// Source field → destination (name, alias, type).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
    pub alias: String,
    pub field_type: FieldType,
}

impl FieldMapping {
    #[must_use]
    pub fn new(source: &str, target: &str, alias: &str, field_type: FieldType) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            alias: alias.to_string(),
            field_type,
        }
    }
}

/// Ordered mappings with unique destination names. Only mapped columns are written.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct MappingSet {
    mappings: Vec<FieldMapping>,
}

impl MappingSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`IgdeError::Validation`] when the destination name is already mapped.
    pub fn push(&mut self, mapping: FieldMapping) -> Result<(), IgdeError> {
        if self.mappings.iter().any(|existing| existing.target == mapping.target) {
            return Err(IgdeError::Validation(format!(
                "destination field {} is mapped more than once",
                mapping.target
            )));
        }
        self.mappings.push(mapping);
        Ok(())
    }

    /// Build mappings from `(source, target)` pairs, taking alias and type from the template.
    ///
    /// # Errors
    /// Returns [`IgdeError::Validation`] when a target is not in `template` or repeats.
    pub fn from_pairs(template: &LayerTemplate, pairs: &[(&str, &str)]) -> Result<Self, IgdeError> {
        let mut set = Self::new();
        for (source, target) in pairs {
            let field = template.field(target).ok_or_else(|| {
                IgdeError::Validation(format!(
                    "mapping target {target} does not exist in {}",
                    template.name
                ))
            })?;
            set.push(FieldMapping::new(source, &field.name, &field.alias, field.field_type))?;
        }
        Ok(set)
    }

    /// Map every template field onto the same-named source field.
    #[must_use]
    pub fn identity(template: &LayerTemplate) -> Self {
        Self {
            mappings: template
                .fields
                .iter()
                .map(|field| {
                    FieldMapping::new(&field.name, &field.name, &field.alias, field.field_type)
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Every target must exist in the destination with the declared type.
    ///
    /// # Errors
    /// Returns [`IgdeError::Validation`] on an unknown target, a type disagreement, or
    /// a duplicate target.
    pub fn validate_against(&self, template: &LayerTemplate) -> Result<(), IgdeError> {
        let mut seen = BTreeSet::new();
        for mapping in &self.mappings {
            if !seen.insert(mapping.target.as_str()) {
                return Err(IgdeError::Validation(format!(
                    "destination field {} is mapped more than once",
                    mapping.target
                )));
            }
            let field = template.field(&mapping.target).ok_or_else(|| {
                IgdeError::Validation(format!(
                    "mapping target {} does not exist in {}",
                    mapping.target, template.name
                ))
            })?;
            if field.field_type != mapping.field_type {
                return Err(IgdeError::Validation(format!(
                    "mapping {} -> {}.{} declares {} but the layer field is {}",
                    mapping.source,
                    template.name,
                    mapping.target,
                    mapping.field_type.as_str(),
                    field.field_type.as_str()
                )));
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`IgdeError::Schema`] when a mapped source field is absent from `dataset`.
    pub fn validate_source(&self, dataset: &Dataset) -> Result<(), IgdeError> {
        for mapping in &self.mappings {
            if !dataset.has_field(&mapping.source) {
                return Err(IgdeError::Schema(format!(
                    "mapped source field {} does not exist in {}",
                    mapping.source,
                    dataset.name()
                )));
            }
        }
        Ok(())
    }

    /// Project one row into template field order. Unmapped template fields are null.
    ///
    /// # Errors
    /// Returns [`IgdeError::Schema`] when a value cannot be coerced to its destination type.
    pub fn project(
        &self,
        feature: &Feature,
        template: &LayerTemplate,
    ) -> Result<Vec<Value>, IgdeError> {
        let mut row = Vec::with_capacity(template.fields.len());
        for field in &template.fields {
            let value = match self.mappings.iter().find(|mapping| mapping.target == field.name) {
                Some(mapping) => feature.get(&mapping.source).coerce(field)?,
                None => Value::Null,
            };
            row.push(value);
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{wetlands, LayerKind};

    #[test]
    fn from_pairs_takes_alias_and_type_from_template() -> Result<(), IgdeError> {
        let template = wetlands();
        let set = MappingSet::from_pairs(&template, &[("WETLAND_TYPE", "WET_TYPE")])?;
        assert_eq!(set.mappings()[0].alias, "Wetland Type");
        assert_eq!(set.mappings()[0].field_type, FieldType::Text);
        Ok(())
    }

    #[test]
    fn unknown_or_duplicate_targets_are_rejected() {
        let template = wetlands();
        assert!(MappingSet::from_pairs(&template, &[("x", "SKECTH_LINK")]).is_err());
        assert!(MappingSet::from_pairs(&template, &[("a", "WET_TYPE"), ("b", "WET_TYPE")])
            .is_err());
    }

    #[test]
    fn validate_against_catches_type_disagreement() -> Result<(), IgdeError> {
        let mut set = MappingSet::new();
        set.push(FieldMapping::new("WETLAND_TYPE", "WET_TYPE", "Wetland Type", FieldType::Long))?;
        assert!(matches!(set.validate_against(&wetlands()), Err(IgdeError::Validation(_))));
        Ok(())
    }

    #[test]
    fn project_drops_unmapped_and_nulls_missing_targets() -> Result<(), IgdeError> {
        let template = wetlands();
        let set = MappingSet::from_pairs(
            &template,
            &[("WETLAND_TYPE", "WET_TYPE"), ("SOURCECODE", "SOURCE_CODE")],
        )?;
        let feature = Feature::new(None)
            .with("WETLAND_TYPE", "Marsh")
            .with("SOURCECODE", "driw")
            .with("ACRES", 4.0);
        let row = set.project(&feature, &template)?;
        assert_eq!(
            row,
            vec![Value::text("Marsh"), Value::Null, Value::text("driw"), Value::Null]
        );
        Ok(())
    }

    #[test]
    fn validate_source_requires_mapped_fields() -> Result<(), IgdeError> {
        let template = wetlands();
        let set = MappingSet::from_pairs(&template, &[("WETLAND_TYPE", "WET_TYPE")])?;
        let dataset = Dataset::new("epa", LayerKind::Polygon).with_fields(&["WETLAND_SUBTYPE"]);
        assert!(matches!(set.validate_source(&dataset), Err(IgdeError::Schema(_))));
        Ok(())
    }
}
