//! Destination layer definitions for the full iGDE database and the story map.

use crate::{FieldSpec, LayerKind, LayerTemplate};

pub const PHREATOPHYTES: &str = "Phreatophytes";
pub const SPRINGS: &str = "Springs";
pub const WETLANDS: &str = "Wetlands";
pub const LAKES_PLAYAS: &str = "Lakes_Playas";
pub const RIVERS_STREAMS: &str = "Rivers_Streams";
pub const SPECIES_TABLE: &str = "Species_tbl";
pub const SPECIES: &str = "Species";
pub const SOURCE_TABLE: &str = "Source_tbl";
pub const PHOTO_POINTS: &str = "NV_Photos";

fn source_code() -> FieldSpec {
    FieldSpec::text("SOURCE_CODE", "Source Code", 10)
}

fn comments(length: u32) -> FieldSpec {
    FieldSpec::text("COMMENTS", "Comments", length)
}

#[must_use]
pub fn phreatophytes() -> LayerTemplate {
    LayerTemplate::new(
        PHREATOPHYTES,
        LayerKind::Polygon,
        vec![
            source_code(),
            FieldSpec::text("PHR_TYPE", "Phreatophyte Type", 55),
            FieldSpec::text("PHR_GROUP", "Phreatophyte Group", 20),
            comments(200),
        ],
    )
}

#[must_use]
pub fn springs() -> LayerTemplate {
    LayerTemplate::new(
        SPRINGS,
        LayerKind::Point,
        vec![
            source_code(),
            FieldSpec::long("SPRING_ID", "Spring ID"),
            FieldSpec::text("SPRING_NAME", "Spring Name", 255),
            FieldSpec::text("SPRING_TYPE1", "Spring Type 1", 20),
            FieldSpec::text("SPRING_TYPE2", "Spring Type 2", 20),
            FieldSpec::text("IMAGE_LINK", "Image Hyperlink", 255),
            FieldSpec::text("SKETCH_LINK", "Sketch Hyperlink", 255),
            FieldSpec::double("LATITUDE", "Latitude"),
            FieldSpec::double("LONGITUDE", "Longitude"),
            FieldSpec::double("ELEVATION", "Elevation (m)"),
            FieldSpec::text("INV_STAT", "Inventory Status", 20),
            FieldSpec::short("SURV_COUNT", "Survey Count"),
            FieldSpec::double("FLOW_MEAN", "Flow Mean (L/s)"),
            FieldSpec::double("PH_MEAN", "pH Mean"),
            FieldSpec::double("WATER_TEMP_MEAN", "Water Temperature Mean (C)"),
            FieldSpec::double("SPEC_COND_MEAN", "Specific Conductance Mean (uS/cm)"),
            FieldSpec::double("ALKALINITY_MEAN", "Alkalinity Mean (mg/L)"),
            FieldSpec::double("SPRING_AREA", "Spring Area (m2)"),
            FieldSpec::long("VERT_COUNT", "Vertebrate Species Count"),
            FieldSpec::long("INVERT_COUNT", "Invertebrate Species Count"),
            FieldSpec::long("FLORA_COUNT", "Plant Species Count"),
            comments(200),
        ],
    )
}

#[must_use]
pub fn wetlands() -> LayerTemplate {
    LayerTemplate::new(
        WETLANDS,
        LayerKind::Polygon,
        vec![
            FieldSpec::text("WET_TYPE", "Wetland Type", 30),
            FieldSpec::text("WET_SUBTYPE", "Wetland Subtype", 30),
            source_code(),
            comments(200),
        ],
    )
}

#[must_use]
pub fn lakes_playas() -> LayerTemplate {
    LayerTemplate::new(
        LAKES_PLAYAS,
        LayerKind::Polygon,
        vec![
            FieldSpec::text("PERM_ID", "Permanent Identifier", 255),
            FieldSpec::text("BODY_NAME", "Waterbody Name", 200),
            FieldSpec::text("BODY_TYPE", "Waterbody Type", 50),
            FieldSpec::long("BODY_CODE", "Waterbody Code"),
            FieldSpec::text("BODY_DESC", "Waterbody Description", 200),
            FieldSpec::double("AREA_ACRES", "Area (acres)"),
            source_code(),
            comments(200),
        ],
    )
}

#[must_use]
pub fn rivers_streams() -> LayerTemplate {
    LayerTemplate::new(
        RIVERS_STREAMS,
        LayerKind::Polyline,
        vec![
            FieldSpec::text("PERM_ID", "Permanent Identifier", 255),
            FieldSpec::text("RIVER_NAME", "River Name", 200),
            FieldSpec::long("RIVER_CODE", "River Code"),
            FieldSpec::text("RIVER_TYPE", "River Type", 100),
            FieldSpec::double("LENGTH_MI", "Length (miles)"),
            source_code(),
            comments(200),
        ],
    )
}

#[must_use]
pub fn species_table() -> LayerTemplate {
    LayerTemplate::new(
        SPECIES_TABLE,
        LayerKind::Table,
        vec![
            FieldSpec::text("SCI_NAME", "Scientific Name", 80),
            FieldSpec::text("COM_NAME", "Common Name", 80),
            FieldSpec::text("MAJOR_GROUP", "Major Taxonomic Group", 20),
            FieldSpec::text("MINOR_GROUP", "Minor Taxonomic Group", 20),
            FieldSpec::text("NV_RANK", "NV Conservation Status Rank", 20),
            FieldSpec::text("G_RANK", "Global Conservation Status Rank", 20),
            FieldSpec::text("NV_STATUS", "NV Protection Status", 20),
            FieldSpec::text("ESA_STATUS", "ESA Conservation Status", 20),
            FieldSpec::text("BLM_STATUS", "BLM Conservation Status", 20),
            FieldSpec::text("USFS_STATUS", "USFS Conservation Status", 20),
            FieldSpec::text("NNPS_STATUS", "NNPS Conservation Status", 20),
            FieldSpec::text("WAP2012", "WAP 2012 Species of Conservation Priority", 20),
            FieldSpec::text("ENDEMISM", "Endemism", 20),
            FieldSpec::text("NNHP_LIST", "NNHP List", 20),
            source_code(),
            comments(200),
        ],
    )
}

#[must_use]
pub fn species() -> LayerTemplate {
    LayerTemplate::new(
        SPECIES,
        LayerKind::Polygon,
        vec![
            FieldSpec::long("HEX_ID", "Hexagon ID"),
            FieldSpec::long("COUNT_NNHP", "NNHP Species Count"),
            FieldSpec::long("COUNT_EN", "Endemic Species Count"),
            source_code(),
            comments(200),
        ],
    )
}

#[must_use]
pub fn source_table() -> LayerTemplate {
    LayerTemplate::new(
        SOURCE_TABLE,
        LayerKind::Table,
        vec![
            source_code(),
            FieldSpec::text("SOURCE_NAME", "Source Name", 255),
            FieldSpec::text("SOURCE_BODY", "Source Originating Body", 255),
            FieldSpec::text("LAYER", "Layers Using Source", 80),
            FieldSpec::text("SOURCE_LINK", "Source Link", 255),
            FieldSpec::text("SOURCE_CITE", "Source Citation", 255),
            FieldSpec::text("MAP_METHOD", "Mapping Method", 255),
            FieldSpec::double("MAP_UNIT", "Minimum Mapping Unit"),
            comments(255),
            FieldSpec::long("SOURCE_YEAR", "SOURCE_YEAR"),
        ],
    )
}

/// Story map photo locations.
#[must_use]
pub fn photo_points() -> LayerTemplate {
    LayerTemplate::new(
        PHOTO_POINTS,
        LayerKind::Point,
        vec![
            FieldSpec::text("LAYER", "Layer", 25),
            FieldSpec::text("GDE_TYPE", "GDE Type", 100),
            FieldSpec::text("CAPTION", "Caption", 255),
            FieldSpec::text("FLICKR", "Flickr Link", 255),
            FieldSpec::text("JPEG", "JPEG Link", 255),
        ],
    )
}

/// Every layer of the full database, in creation order.
#[must_use]
pub fn full_database_templates() -> Vec<LayerTemplate> {
    vec![
        phreatophytes(),
        springs(),
        wetlands(),
        lakes_playas(),
        rivers_streams(),
        species_table(),
        species(),
        source_table(),
    ]
}
