//! Shared test inputs.

use geo_types::{coord, line_string, point, Geometry, Rect};
use igde_core::{Dataset, Feature, LayerKind, Value};

pub(crate) fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
    let rect = Rect::new(coord! { x: x, y: y }, coord! { x: x + size, y: y + size });
    Geometry::Polygon(rect.to_polygon())
}

/// 10 km square standing in for the Nevada boundary.
pub(crate) fn state_boundary() -> Dataset {
    Dataset::from_features(
        "NV_State_Boundary",
        LayerKind::Polygon,
        vec![Feature::new(Some(square(0.0, 0.0, 10_000.0))).with("NAME", "Nevada")],
    )
}

pub(crate) fn lookup_table() -> Dataset {
    let row = |fcode: i64, kind: &str, description: &str| {
        Feature::new(None).with("FCode", fcode).with("Type", kind).with("Description", description)
    };
    Dataset::from_features(
        "waterbody_lookup",
        LayerKind::Table,
        vec![
            row(36100, "Lake/Pond", "Lake/Pond: Hydrographic Category = Perennial"),
            row(39004, "Playa", "Playa"),
            row(39009, "Lake/Pond", "Lake/Pond: Hydrographic Category = Intermittent"),
            row(39011, "Lake/Pond", "Lake/Pond: Hydrographic Category = Ephemeral"),
        ],
    )
}

/// 100 m square NHD waterbody at (`x`, 0).
pub(crate) fn waterbody(id: &str, fcode: i64, name: &str, x: f64) -> Feature {
    Feature::new(Some(square(x, 0.0, 100.0)))
        .with("Permanent_Identifier", id)
        .with("FCode", fcode)
        .with("GNIS_Name", name)
}

/// 1 km horizontal NHD flowline inside the state, `offset` meters up.
pub(crate) fn flowline(id: &str, fcode: i64, name: Option<&str>, offset: f64) -> Feature {
    let y = 1_000.0 + offset;
    Feature::new(Some(Geometry::LineString(line_string![(x: 1_000.0, y: y), (x: 2_000.0, y: y)])))
        .with("Permanent_Identifier", id)
        .with("FCode", fcode)
        .with("GNIS_Name", Value::from(name))
}

/// SSI site point with every field the springs mapping reads.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn spring_site(id: i64, name: &str, inventory: &str) -> Feature {
    let x = 100.0 * id as f64;
    Feature::new(Some(Geometry::Point(point!(x: x, y: 100.0))))
        .with("SiteID", id)
        .with("ShortName", name)
        .with("SpringType1", "Rheocrene")
        .with("SpringType2", Value::Null)
        .with("CastImageHyperlink", format!("https://springs.example.org/{id}.jpg"))
        .with("CastSketchHyperlink", Value::Null)
        .with("LatitudeDD", 38.5)
        .with("LongitudeDD", -115.0)
        .with("ElevationM", 1_650.0)
        .with("InventoryLevel", inventory)
        .with("SurveyCount", 2_i64)
        .with("Flow_Mean", 1.25)
        .with("pH_Mean", 7.4)
        .with("Water_Temp_Mean", 21.0)
        .with("Spec_Cond_Mean", 540.0)
        .with("Alkalinity_Mean", 180.0)
        .with("TotalAreaSQM", 35.0)
}

/// NNHP observation with the columns of the source feature classes.
pub(crate) fn nnhp_record(
    name: Option<&str>,
    s_rank: &str,
    endemism: &str,
    geometry: Geometry<f64>,
) -> Feature {
    Feature::new(Some(geometry))
        .with("SNAME", Value::from(name))
        .with("SCOMNAME", "common name")
        .with("MAJORGROUP", "Animal")
        .with("MINORGROUP", "Fish")
        .with("S_RANK", s_rank)
        .with("G_RANK", "G2")
        .with("NV_STAT", "YES")
        .with("USESA_NV", "LE")
        .with("BLM_STAT", "S")
        .with("USFS_STAT", Value::Null)
        .with("NNPS_STAT", Value::Null)
        .with("WAP2012", "SOCP")
        .with("ENDEMISM", endemism)
        .with("NNHP_TRACK", "Y")
        .with("REFERENCE_", "ref")
        .with("REFERENCE1", "ref")
}
