use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::macros::format_description;
use time::Date;

use crate::{FieldSpec, FieldType, IgdeError};

/// Attribute value carried by a feature or table row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Integer(i64),
    Double(f64),
    Date(Date),
}

impl Value {
    #[must_use]
    pub fn text(value: &str) -> Self {
        Self::Text(value.to_string())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Integer view: integers, integral doubles, and numeric text.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Double(value)
                if value.is_finite()
                    && value.fract() == 0.0
                    && value.abs() < 9_007_199_254_740_992.0 =>
            {
                Some(*value as i64)
            }
            Self::Text(value) => value.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Double(value) => Some(*value),
            Self::Text(value) => value.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Text rendering used for comparisons and TEXT coercion; `None` for null.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(value) => Some(value.clone()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Double(value) => Some(render_double(*value)),
            Self::Date(value) => Some(format_date(*value)),
        }
    }

    /// Coerce into the declared destination field type.
    ///
    /// # Errors
    /// Returns [`IgdeError::Schema`] when the value cannot be represented in `field`,
    /// including text longer than the field length and integers outside LONG/SHORT range.
    pub fn coerce(&self, field: &FieldSpec) -> Result<Self, IgdeError> {
        if self.is_null() {
            return Ok(Self::Null);
        }

        let mismatch = || {
            IgdeError::Schema(format!(
                "cannot convert {self} to {} for field {}",
                field.field_type.as_str(),
                field.name
            ))
        };

        match field.field_type {
            FieldType::Text => {
                let rendered = self.render().unwrap_or_default();
                let length = rendered.chars().count();
                if let Some(limit) = field.length {
                    if length > limit as usize {
                        return Err(IgdeError::Schema(format!(
                            "value of {length} characters exceeds {}({limit})",
                            field.name
                        )));
                    }
                }
                Ok(Self::Text(rendered))
            }
            FieldType::Long => {
                let value = self.as_i64().ok_or_else(mismatch)?;
                i32::try_from(value).map_err(|_| mismatch())?;
                Ok(Self::Integer(value))
            }
            FieldType::Short => {
                let value = self.as_i64().ok_or_else(mismatch)?;
                i16::try_from(value).map_err(|_| mismatch())?;
                Ok(Self::Integer(value))
            }
            FieldType::Double => {
                let value = self.as_f64().ok_or_else(mismatch)?;
                if value.is_finite() {
                    Ok(Self::Double(value))
                } else {
                    Err(mismatch())
                }
            }
            FieldType::Date => match self {
                Self::Date(value) => Ok(Self::Date(*value)),
                Self::Text(value) => parse_date(value).map(Self::Date).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
        }
    }

    /// Canonical JSON form used for storage, hashing, and export.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Text(value) => serde_json::Value::String(value.clone()),
            Self::Integer(value) => serde_json::Value::from(*value),
            Self::Double(value) => serde_json::Number::from_f64(*value)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Date(value) => serde_json::Value::String(format_date(*value)),
        }
    }

    /// Inverse of [`Value::to_json`]; booleans become 0/1 and nested values are kept as JSON text.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Integer(i64::from(*flag)),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().map(Self::Double))
                .unwrap_or(Self::Null),
            serde_json::Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.render() {
            Some(text) => write!(f, "{text:?}"),
            None => write!(f, "null"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&raw))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn render_double(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

fn format_date(value: Date) -> String {
    value.format(format_description!("[year]-[month]-[day]")).unwrap_or_else(|_| value.to_string())
}

fn parse_date(value: &str) -> Option<Date> {
    let trimmed = value.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    Date::parse(head, format_description!("[year]-[month]-[day]")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_coercion_enforces_length() {
        let field = FieldSpec::text("SOURCE_CODE", "Source Code", 10);
        assert_eq!(Value::text("nhdw").coerce(&field), Ok(Value::text("nhdw")));
        assert!(matches!(
            Value::text("much-too-long-code").coerce(&field),
            Err(IgdeError::Schema(_))
        ));
        assert_eq!(Value::Integer(36100).coerce(&field), Ok(Value::text("36100")));
    }

    #[test]
    fn integer_coercion_respects_field_width() {
        let long = FieldSpec::long("BODY_CODE", "Waterbody Code");
        let short = FieldSpec::short("SURV_COUNT", "Survey Count");
        assert_eq!(Value::text(" 39004 ").coerce(&long), Ok(Value::Integer(39004)));
        assert_eq!(Value::Double(12.0).coerce(&short), Ok(Value::Integer(12)));
        assert!(Value::Integer(70_000).coerce(&short).is_err());
        assert!(Value::Double(1.5).coerce(&long).is_err());
        assert!(Value::text("Lake").coerce(&long).is_err());
    }

    #[test]
    fn null_survives_every_coercion() {
        for field in [
            FieldSpec::text("A", "A", 5),
            FieldSpec::long("B", "B"),
            FieldSpec::double("C", "C"),
            FieldSpec::date("D", "D"),
        ] {
            assert_eq!(Value::Null.coerce(&field), Ok(Value::Null));
        }
    }

    #[test]
    fn date_coercion_accepts_iso_text() {
        let field = FieldSpec::date("SOURCE_DATE", "Source Date");
        let coerced = Value::text("2019-05-09T00:00:00").coerce(&field);
        assert_eq!(coerced.map(|value| value.render()), Ok(Some("2019-05-09".to_string())));
        assert!(Value::text("May 2019").coerce(&field).is_err());
    }

    #[test]
    fn json_round_trip_preserves_scalars() {
        for value in [Value::Null, Value::text("Playa"), Value::Integer(-4), Value::Double(2.5)] {
            assert_eq!(Value::from_json(&value.to_json()), value);
        }
        assert_eq!(Value::from_json(&serde_json::json!(true)), Value::Integer(1));
    }

    #[test]
    fn integral_doubles_render_without_fraction() {
        assert_eq!(Value::Double(46006.0).render(), Some("46006".to_string()));
        assert_eq!(Value::Double(0.25).render(), Some("0.25".to_string()));
        assert_eq!(Value::Double(46006.0).as_i64(), Some(46006));
    }
}
