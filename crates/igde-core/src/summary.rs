use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{FieldSpec, Value};

/// Metrics that count toward `GDE_COUNT`, in the order they are evaluated.
pub const GDE_EVIDENCE_FIELDS: [&str; 5] =
    ["PER_PHR", "PER_WET", "COUNT_SPR", "PER_LKPL", "MILES_RVST"];

/// Area unit that thematic layers are aggregated into. Each run picks exactly one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SummaryUnitKind {
    Hexagon,
    HydroBasin,
}

impl SummaryUnitKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hexagon => "hexagon",
            Self::HydroBasin => "hydro_basin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hexagon" => Some(Self::Hexagon),
            "hydro_basin" => Some(Self::HydroBasin),
            _ => None,
        }
    }

    #[must_use]
    pub fn id_field(self) -> &'static str {
        match self {
            Self::Hexagon => "Hex_ID",
            Self::HydroBasin => "HYD_AREA",
        }
    }

    /// Layer the aggregator writes into the scratch database.
    #[must_use]
    pub fn scratch_layer(self) -> &'static str {
        match self {
            Self::Hexagon => "hexagon_units",
            Self::HydroBasin => "hydrobasin_units",
        }
    }

    /// Public layer name in the story map database.
    #[must_use]
    pub fn story_layer(self) -> &'static str {
        match self {
            Self::Hexagon => "NV_Hexagons",
            Self::HydroBasin => "NV_HydrographicAreas",
        }
    }

    /// Source attributes removed before publishing.
    #[must_use]
    pub fn unpublished_fields(self) -> &'static [&'static str] {
        match self {
            Self::Hexagon => &[],
            Self::HydroBasin => &[
                "COUNT_HYD_",
                "HA750_2003",
                "HA750_2004",
                "PLTSYM",
                "DES_REAS",
                "SCALE",
                "DESIG_ORDE",
                "PERIMETER",
            ],
        }
    }

    /// River miles per acre is only reported for hydrographic basins.
    #[must_use]
    pub fn reports_river_density(self) -> bool {
        matches!(self, Self::HydroBasin)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CoverageTheme {
    Phreatophytes,
    Forest,
    Shrubland,
    UnknownPhreatophytes,
    Wetlands,
    LakesPlayas,
    Lakes,
    Playas,
}

impl CoverageTheme {
    pub const ALL: [Self; 8] = [
        Self::Phreatophytes,
        Self::Forest,
        Self::Shrubland,
        Self::UnknownPhreatophytes,
        Self::Wetlands,
        Self::LakesPlayas,
        Self::Lakes,
        Self::Playas,
    ];

    #[must_use]
    pub fn area_field(self) -> &'static str {
        match self {
            Self::Phreatophytes => "AREA_PHR",
            Self::Forest => "AREA_FRST",
            Self::Shrubland => "AREA_SHRUB",
            Self::UnknownPhreatophytes => "AREA_UNK",
            Self::Wetlands => "AREA_WET",
            Self::LakesPlayas => "AREA_LKPL",
            Self::Lakes => "AREA_LAKE",
            Self::Playas => "AREA_PLAYA",
        }
    }

    #[must_use]
    pub fn percent_field(self) -> &'static str {
        match self {
            Self::Phreatophytes => "PER_PHR",
            Self::Forest => "PER_FRST",
            Self::Shrubland => "PER_SHRUB",
            Self::UnknownPhreatophytes => "PER_UNK",
            Self::Wetlands => "PER_WET",
            Self::LakesPlayas => "PER_LKPL",
            Self::Lakes => "PER_LAKE",
            Self::Playas => "PER_PLAYA",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Phreatophytes => "Phreatophyte",
            Self::Forest => "Forest Phreatophyte",
            Self::Shrubland => "Shrubland Phreatophyte",
            Self::UnknownPhreatophytes => "Unknown Phreatophyte",
            Self::Wetlands => "Wetland",
            Self::LakesPlayas => "Lake and Playa",
            Self::Lakes => "Lake",
            Self::Playas => "Playa",
        }
    }
}

/// `100 * sub / unit`, clamped to `[0, 100]`. A missing sub-area or a
/// non-positive unit area yields 0.
#[must_use]
pub fn percent_cover(sub_area: Option<f64>, unit_area: f64) -> f64 {
    match sub_area {
        Some(sub) if unit_area > 0.0 && sub.is_finite() => {
            (100.0 * sub / unit_area).clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

/// Amount per acre of unit area; 0 when either side is missing or degenerate.
#[must_use]
pub fn density(amount: Option<f64>, unit_area: f64) -> f64 {
    match amount {
        Some(amount) if unit_area > 0.0 && amount.is_finite() => (amount / unit_area).max(0.0),
        _ => 0.0,
    }
}

/// Number of evidence metrics strictly greater than zero.
#[must_use]
pub fn gde_count(evidence: [f64; 5]) -> i64 {
    let present = evidence.iter().filter(|value| **value > 0.0).count();
    i64::try_from(present).unwrap_or(0)
}

/// Raw per-unit results before null coercion. Absent entries are nulls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnitMetrics {
    pub poly_area: f64,
    pub coverage: BTreeMap<CoverageTheme, f64>,
    pub spring_count: Option<i64>,
    pub river_miles: Option<f64>,
}

impl UnitMetrics {
    /// Final field values in [`summary_fields`] order: nulls become 0, percentages are
    /// clamped, densities and `GDE_COUNT` are derived.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finalize(&self, kind: SummaryUnitKind) -> Vec<(&'static str, Value)> {
        let mut values = vec![("POLY_AREA", Value::Double(self.poly_area.max(0.0)))];
        let mut percents = BTreeMap::new();
        for theme in CoverageTheme::ALL {
            let area = self.coverage.get(&theme).copied();
            let percent = percent_cover(area, self.poly_area);
            percents.insert(theme, percent);
            values.push((theme.area_field(), Value::Double(area.unwrap_or(0.0).max(0.0))));
            values.push((theme.percent_field(), Value::Double(percent)));
        }

        let springs = self.spring_count.unwrap_or(0).max(0);
        let miles = self.river_miles.unwrap_or(0.0).max(0.0);
        values.push(("COUNT_SPR", Value::Integer(springs)));
        values.push(("AREA_SPR", Value::Double(density(Some(springs as f64), self.poly_area))));
        values.push(("MILES_RVST", Value::Double(miles)));
        if kind.reports_river_density() {
            values.push(("AREA_RVST", Value::Double(density(Some(miles), self.poly_area))));
        }

        let evidence = [
            percents.get(&CoverageTheme::Phreatophytes).copied().unwrap_or(0.0),
            percents.get(&CoverageTheme::Wetlands).copied().unwrap_or(0.0),
            springs as f64,
            percents.get(&CoverageTheme::LakesPlayas).copied().unwrap_or(0.0),
            miles,
        ];
        values.push(("GDE_COUNT", Value::Integer(gde_count(evidence))));
        values
    }
}

/// Fields the aggregator appends to a summary unit layer.
#[must_use]
pub fn summary_fields(kind: SummaryUnitKind) -> Vec<FieldSpec> {
    let mut fields = vec![FieldSpec::double("POLY_AREA", "Polygon Area (acres)")];
    for theme in CoverageTheme::ALL {
        fields.push(FieldSpec::double(
            theme.area_field(),
            &format!("{} Area (acres)", theme.label()),
        ));
        fields.push(FieldSpec::double(
            theme.percent_field(),
            &format!("{} Percent Cover", theme.label()),
        ));
    }
    fields.push(FieldSpec::long("COUNT_SPR", "Spring Count"));
    fields.push(FieldSpec::double("AREA_SPR", "Springs per Acre"));
    fields.push(FieldSpec::double("MILES_RVST", "River/Stream Length (miles)"));
    if kind.reports_river_density() {
        fields.push(FieldSpec::double("AREA_RVST", "River/Stream Miles per Acre"));
    }
    fields.push(FieldSpec::short("GDE_COUNT", "GDE Count"));
    fields
}
