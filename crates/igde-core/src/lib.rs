mod catalog;
mod dataset;
mod engine;
mod mapping;
mod provenance;
mod rules;
mod schema;
mod summary;
mod value;

pub use catalog::{
    full_database_templates, lakes_playas, phreatophytes, photo_points, rivers_streams,
    source_table, species, species_table, springs, wetlands, LAKES_PLAYAS, PHOTO_POINTS,
    PHREATOPHYTES, RIVERS_STREAMS, SOURCE_TABLE, SPECIES, SPECIES_TABLE, SPRINGS, WETLANDS,
};
pub use dataset::{Attributes, Dataset, Feature, FilterOutcome};
pub use engine::{AreaUnit, GeometryEngine, LengthUnit, Raster, RasterClass};
pub use mapping::{FieldMapping, MappingSet};
pub use provenance::{source_codes, SourceCode};
pub use rules::{is_blank, is_missing, FilterRule, Recode, ScientificNameRule};
pub use schema::{
    is_valid_identifier, FieldSpec, FieldType, LayerKind, LayerTemplate, RESERVED_COLUMNS,
};
pub use summary::{
    density, gde_count, percent_cover, summary_fields, CoverageTheme, SummaryUnitKind,
    UnitMetrics, GDE_EVIDENCE_FIELDS,
};
pub use value::Value;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum IgdeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("geometry error: {0}")]
    Geometry(String),
    #[error("input error: {0}")]
    Input(String),
}

/// NAD 1983 UTM Zone 11N, the single projected reference for every spatial layer.
pub const NAD83_UTM_11N_WKID: i32 = 26911;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct SpatialReference {
    pub wkid: i32,
}

impl SpatialReference {
    #[must_use]
    pub fn nad83_utm_11n() -> Self {
        Self { wkid: NAD83_UTM_11N_WKID }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self.wkid {
            NAD83_UTM_11N_WKID => "NAD_1983_UTM_Zone_11N",
            _ => "unknown",
        }
    }
}

impl Default for SpatialReference {
    fn default() -> Self {
        Self::nad83_utm_11n()
    }
}
