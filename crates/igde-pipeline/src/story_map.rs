//! Publish the summarized units and photo points into the story map database.

use anyhow::Result;
use igde_core::{photo_points, Dataset, MappingSet, SummaryUnitKind, PHOTO_POINTS};
use igde_store_sqlite::{AppendOptions, AppendSummary, OverwritePolicy, SqliteStore};
use serde::Serialize;

/// What a publish run wrote.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublishSummary {
    pub layers: Vec<AppendSummary>,
    pub missing_units: Vec<String>,
    pub photos: Option<AppendSummary>,
}

/// Copy each summarized unit layer present in `scratch` under its public name,
/// then create the photo layer and load `photos` into it when given. `scratch`
/// must already be migrated.
///
/// # Errors
/// Returns an error when a layer exists under [`OverwritePolicy::Never`], a copy
/// fails, or the photo points do not fit the photo template.
pub fn publish(
    scratch: &SqliteStore,
    story: &mut SqliteStore,
    photos: Option<&Dataset>,
    policy: OverwritePolicy,
) -> Result<PublishSummary> {
    let mut layers = Vec::new();
    let mut missing_units = Vec::new();
    for kind in [SummaryUnitKind::Hexagon, SummaryUnitKind::HydroBasin] {
        if scratch.layer_template(kind.scratch_layer())?.is_none() {
            tracing::warn!(
                layer = kind.scratch_layer(),
                "summary units not found, run summarize first"
            );
            missing_units.push(kind.scratch_layer().to_string());
            continue;
        }
        let copied = story.copy_layer_from(
            scratch,
            kind.scratch_layer(),
            kind.story_layer(),
            policy,
            kind.unpublished_fields(),
        )?;
        tracing::info!(
            from = kind.scratch_layer(),
            to = kind.story_layer(),
            rows = copied.rows_appended,
            "published units"
        );
        layers.push(copied);
    }

    let template = photo_points();
    story.create_layer(&template, policy)?;
    let photos = match photos {
        Some(points) => Some(story.append(
            PHOTO_POINTS,
            points,
            &MappingSet::identity(&template),
            &AppendOptions::labelled("story_map:photos"),
        )?),
        None => None,
    };
    Ok(PublishSummary { layers, missing_units, photos })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::square;
    use geo_types::{point, Geometry};
    use igde_core::{Feature, FieldSpec, LayerKind, LayerTemplate};

    fn temp_store(label: &str) -> Result<SqliteStore> {
        let file = format!("igde-story-{label}-{}.sqlite3", ulid::Ulid::new());
        let path = std::env::temp_dir().join(file);
        SqliteStore::open(&path)
    }

    fn basin_template() -> LayerTemplate {
        LayerTemplate::new(
            SummaryUnitKind::HydroBasin.scratch_layer(),
            LayerKind::Polygon,
            vec![
                FieldSpec::text("HYD_AREA", "HYD_AREA", 10),
                FieldSpec::double("PERIMETER", "PERIMETER"),
                FieldSpec::short("GDE_COUNT", "GDE Count"),
            ],
        )
    }

    fn photo(layer: &str) -> Feature {
        Feature::new(Some(Geometry::Point(point!(x: 5.0, y: 5.0))))
            .with("LAYER", layer)
            .with("GDE_TYPE", "Spring")
            .with("CAPTION", "Ash Springs outflow")
            .with("FLICKR", "https://flickr.com/photos/1")
            .with("JPEG", "https://example.org/1.jpg")
    }

    #[test]
    fn basins_are_published_without_unpublished_fields() -> Result<()> {
        let mut scratch = temp_store("scratch")?;
        let mut story = temp_store("story")?;
        scratch.create_layer(&basin_template(), OverwritePolicy::Never)?;
        let basins = Dataset::from_features(
            "basins",
            LayerKind::Polygon,
            vec![Feature::new(Some(square(0.0, 0.0, 10.0)))
                .with("HYD_AREA", "212")
                .with("PERIMETER", 40.0)
                .with("GDE_COUNT", 3_i64)],
        );
        let template = basin_template();
        let mapping = MappingSet::identity(&template);
        scratch.append(&template.name, &basins, &mapping, &AppendOptions::labelled("test"))?;

        let photos = Dataset::from_features(PHOTO_POINTS, LayerKind::Point, vec![photo("Springs")]);
        let summary = publish(&scratch, &mut story, Some(&photos), OverwritePolicy::Never)?;
        assert_eq!(summary.missing_units, ["hexagon_units"]);
        assert_eq!(summary.layers.len(), 1);
        assert_eq!(summary.photos.as_ref().map(|append| append.rows_appended), Some(1));

        let published =
            story.layer_template("NV_HydrographicAreas")?.map(|t| t.field_names().join(","));
        assert_eq!(published.as_deref(), Some("HYD_AREA,GDE_COUNT"));
        assert_eq!(story.count("NV_HydrographicAreas")?, 1);
        assert_eq!(story.count(PHOTO_POINTS)?, 1);
        Ok(())
    }

    #[test]
    fn republishing_requires_overwrite() -> Result<()> {
        let mut scratch = temp_store("scratch")?;
        scratch.migrate()?;
        let mut story = temp_store("story")?;
        let first = publish(&scratch, &mut story, None, OverwritePolicy::Never)?;
        assert!(first.photos.is_none());
        assert_eq!(first.missing_units.len(), 2);
        assert!(publish(&scratch, &mut story, None, OverwritePolicy::Never).is_err());
        publish(&scratch, &mut story, None, OverwritePolicy::Always)?;
        assert_eq!(story.count(PHOTO_POINTS)?, 0);
        Ok(())
    }
}
