use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::IgdeError;

/// Column names the store manages itself; templates may not declare them.
pub const RESERVED_COLUMNS: [&str; 3] = ["OBJECTID", "SHAPE", "BATCH_ID"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Long,
    Short,
    Double,
    Date,
}

impl FieldType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Double => "DOUBLE",
            Self::Date => "DATE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TEXT" => Some(Self::Text),
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            "DOUBLE" => Some(Self::Double),
            "DATE" => Some(Self::Date),
            _ => None,
        }
    }

    /// `SQLite` storage class used for columns of this type.
    #[must_use]
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text | Self::Date => "TEXT",
            Self::Long | Self::Short => "INTEGER",
            Self::Double => "REAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub alias: String,
    pub length: Option<u32>,
}

impl FieldSpec {
    #[must_use]
    pub fn text(name: &str, alias: &str, length: u32) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Text,
            alias: alias.to_string(),
            length: Some(length),
        }
    }

    #[must_use]
    pub fn long(name: &str, alias: &str) -> Self {
        Self::numeric(name, alias, FieldType::Long)
    }

    #[must_use]
    pub fn short(name: &str, alias: &str) -> Self {
        Self::numeric(name, alias, FieldType::Short)
    }

    #[must_use]
    pub fn double(name: &str, alias: &str) -> Self {
        Self::numeric(name, alias, FieldType::Double)
    }

    #[must_use]
    pub fn date(name: &str, alias: &str) -> Self {
        Self::numeric(name, alias, FieldType::Date)
    }

    fn numeric(name: &str, alias: &str, field_type: FieldType) -> Self {
        Self { name: name.to_string(), field_type, alias: alias.to_string(), length: None }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Point,
    Polyline,
    Polygon,
    Table,
}

impl LayerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Polyline => "polyline",
            Self::Polygon => "polygon",
            Self::Table => "table",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "point" => Some(Self::Point),
            "polyline" => Some(Self::Polyline),
            "polygon" => Some(Self::Polygon),
            "table" => Some(Self::Table),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_spatial(self) -> bool {
        !matches!(self, Self::Table)
    }
}

/// Named schema container: geometry kind plus an ordered, typed field list.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LayerTemplate {
    pub name: String,
    pub kind: LayerKind,
    pub fields: Vec<FieldSpec>,
}

impl LayerTemplate {
    #[must_use]
    pub fn new(name: &str, kind: LayerKind, fields: Vec<FieldSpec>) -> Self {
        Self { name: name.to_string(), kind, fields }
    }

    /// Check identifiers, uniqueness, and text lengths.
    ///
    /// # Errors
    /// Returns [`IgdeError::Validation`] when the layer name or any field is malformed,
    /// a field name repeats (case-insensitively), or a reserved column is declared.
    pub fn validate(&self) -> Result<(), IgdeError> {
        if !is_valid_identifier(&self.name) {
            return Err(IgdeError::Validation(format!("invalid layer name: {:?}", self.name)));
        }
        if self.fields.is_empty() {
            return Err(IgdeError::Validation(format!("layer {} declares no fields", self.name)));
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !is_valid_identifier(&field.name) {
                return Err(IgdeError::Validation(format!(
                    "layer {} has invalid field name {:?}",
                    self.name, field.name
                )));
            }
            let folded = field.name.to_ascii_uppercase();
            if RESERVED_COLUMNS.contains(&folded.as_str()) {
                return Err(IgdeError::Validation(format!(
                    "layer {} declares reserved field {}",
                    self.name, field.name
                )));
            }
            if !seen.insert(folded) {
                return Err(IgdeError::Validation(format!(
                    "layer {} declares field {} more than once",
                    self.name, field.name
                )));
            }
            match (field.field_type, field.length) {
                (FieldType::Text, Some(0) | None) => {
                    return Err(IgdeError::Validation(format!(
                        "text field {}.{} requires a positive length",
                        self.name, field.name
                    )));
                }
                (FieldType::Text, Some(_)) | (_, None) => {}
                (_, Some(_)) => {
                    return Err(IgdeError::Validation(format!(
                        "field {}.{} of type {} cannot carry a length",
                        self.name,
                        field.name,
                        field.field_type.as_str()
                    )));
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    /// Copy of this template under another name.
    #[must_use]
    pub fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_string(), kind: self.kind, fields: self.fields.clone() }
    }

    /// Copy of this template without the named fields; unknown names are ignored.
    #[must_use]
    pub fn without_fields(&self, names: &[&str]) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            fields: self
                .fields
                .iter()
                .filter(|field| !names.contains(&field.name.as_str()))
                .cloned()
                .collect(),
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 64 characters.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 64
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LayerTemplate {
        LayerTemplate::new(
            "Wetlands",
            LayerKind::Polygon,
            vec![
                FieldSpec::text("WET_TYPE", "Wetland Type", 30),
                FieldSpec::text("SOURCE_CODE", "Source Code", 10),
            ],
        )
    }

    #[test]
    fn valid_template_passes() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn duplicate_field_names_are_rejected_case_insensitively() {
        let mut template = sample();
        template.fields.push(FieldSpec::text("wet_type", "dup", 10));
        assert!(matches!(template.validate(), Err(IgdeError::Validation(_))));
    }

    #[test]
    fn reserved_and_malformed_names_are_rejected() {
        let mut template = sample();
        template.fields.push(FieldSpec::long("OBJECTID", "Object ID"));
        assert!(template.validate().is_err());

        let mut template = sample();
        template.name = "Lakes Playas".to_string();
        assert!(template.validate().is_err());
    }

    #[test]
    fn text_fields_need_length_and_numeric_fields_reject_it() {
        let mut template = sample();
        template.fields[0].length = None;
        assert!(template.validate().is_err());

        let mut template = sample();
        template.fields.push(FieldSpec {
            name: "AREA".to_string(),
            field_type: FieldType::Double,
            alias: "Area".to_string(),
            length: Some(8),
        });
        assert!(template.validate().is_err());
    }

    #[test]
    fn without_fields_keeps_order() {
        let template = sample().without_fields(&["WET_TYPE", "MISSING"]);
        assert_eq!(template.field_names(), vec!["SOURCE_CODE"]);
    }

    #[test]
    fn field_type_round_trips_through_str() {
        for field_type in
            [FieldType::Text, FieldType::Long, FieldType::Short, FieldType::Double, FieldType::Date]
        {
            assert_eq!(FieldType::parse(field_type.as_str()), Some(field_type));
        }
        assert_eq!(LayerKind::parse("polyline"), Some(LayerKind::Polyline));
        assert!(!LayerKind::Table.is_spatial());
    }
}
