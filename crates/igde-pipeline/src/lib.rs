mod aggregate;
mod config;
mod derive;
#[cfg(test)]
mod fixtures;
mod lakes_playas;
mod loaders;
mod phreatophytes;
mod report;
mod rivers;
mod species;
mod springs;
mod story_map;
mod template;
mod wetlands;

use std::path::Path;

use anyhow::{Context, Result};
use igde_core::{
    source_codes, Dataset, LayerKind, LayerTemplate, MappingSet, SummaryUnitKind,
    LAKES_PLAYAS, PHREATOPHYTES, RIVERS_STREAMS, SOURCE_TABLE, SPECIES, SPECIES_TABLE, SPRINGS,
    WETLANDS,
};
use igde_geometry::GeoEngine;
use igde_store_sqlite::{
    AppendOptions, AppendSummary, ExportManifest, IntegrityReport, LayerInfo, OverwritePolicy,
    SchemaStatus, SqliteStore,
};
use serde::{Deserialize, Serialize};

pub use aggregate::{summarize_units, summary_template, units_with_evidence, ThematicLayers};
pub use config::{
    required, CodePatch, ConfigError, IdRange, LakesPlayasConfig, LandfireConfig, NameCorrection,
    OverlapMask, PhreatophytesConfig, PipelineConfig, RiversConfig, SourcesConfig, SpeciesConfig,
    SpringsConfig, StoryMapConfig, SummaryConfig, TncRasterConfig, WetlandsConfig,
};
pub use loaders::{
    code_column, parse_ascii_grid, read_csv_table, read_geojson, read_raster, read_value_table,
    text_column, write_geojson,
};
pub use phreatophytes::{LandfireInputs, TncOutput, TncRaster};
pub use report::{CheckResult, PassReport, StepCount};
pub use rivers::MergeCheck;
pub use springs::TaxaTable;
pub use story_map::PublishSummary;

pub const PIPELINE_CONTRACT_VERSION: &str = "pipeline.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadOptions {
    /// Append even when an identical batch is already in the layer.
    pub allow_duplicate: bool,
}

/// Result of aggregating one summary unit kind into the scratch database.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SummaryResult {
    pub kind: SummaryUnitKind,
    pub layer: String,
    pub units: usize,
    pub units_with_evidence: usize,
    pub append: AppendSummary,
}

/// Runs each pass against the databases named in a [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct IgdePipeline {
    config: PipelineConfig,
    engine: GeoEngine,
}

impl IgdePipeline {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, engine: GeoEngine::new() }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn open_destination(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.config.database)
    }

    fn open_migrated(path: &Path) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    fn state(&self) -> Result<Dataset> {
        let path = required(self.config.state_boundary.as_ref(), "state_boundary")?;
        let state = read_geojson(path)?;
        if state.kind() != LayerKind::Polygon {
            anyhow::bail!("state boundary {} must be a polygon layer", path.display());
        }
        Ok(state)
    }

    fn append(
        store: &mut SqliteStore,
        layer: &str,
        dataset: &Dataset,
        mapping: &MappingSet,
        label: &str,
        options: LoadOptions,
        report: &mut PassReport,
    ) -> Result<()> {
        let summary = store
            .append(
                layer,
                dataset,
                mapping,
                &AppendOptions::labelled(label).allow_duplicate(options.allow_duplicate),
            )
            .with_context(|| format!("failed to append {label} into {layer}"))?;
        report.appended(summary);
        Ok(())
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_destination()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_destination()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the database cannot be opened or inspected.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let mut store = self.open_destination()?;
        store.migrate()?;
        store.integrity_check()
    }

    /// # Errors
    /// Returns an error when the backup cannot be written.
    pub fn backup(&self, out_file: &Path) -> Result<()> {
        let store = self.open_destination()?;
        store.backup_database(out_file)
    }

    /// # Errors
    /// Returns an error when any layer cannot be exported.
    pub fn export(&self, out_dir: &Path) -> Result<ExportManifest> {
        let mut store = self.open_destination()?;
        store.migrate()?;
        store.export_snapshot(out_dir)
    }

    /// # Errors
    /// Returns an error when the layer metadata cannot be read.
    pub fn list_layers(&self) -> Result<Vec<LayerInfo>> {
        let mut store = self.open_destination()?;
        store.migrate()?;
        store.list_layers()
    }

    /// # Errors
    /// Returns an error when the layer metadata cannot be read.
    pub fn layer_template(&self, name: &str) -> Result<Option<LayerTemplate>> {
        let mut store = self.open_destination()?;
        store.migrate()?;
        store.layer_template(name)
    }

    /// Create every destination layer. Existing layers are only replaced under
    /// [`OverwritePolicy::Always`].
    ///
    /// # Errors
    /// Returns an error when a layer exists and overwriting was not requested.
    pub fn create_template(&self, policy: OverwritePolicy) -> Result<Vec<String>> {
        let mut store = self.open_destination()?;
        template::create_templates(&mut store, policy)
    }

    /// # Errors
    /// Returns an error when the sources CSV is missing or does not fit Source_tbl.
    pub fn load_sources(&self, options: LoadOptions) -> Result<PassReport> {
        let mut report = PassReport::new("sources");
        let path = required(self.config.sources.source_table.as_ref(), "sources.source_table")?;
        let mut sources = read_csv_table(path)?;
        let removed = template::clean_sources(&mut sources);
        report.record_counts("rows with a source code", sources.len() + removed, sources.len());

        let mut store = Self::open_migrated(&self.config.database)?;
        Self::append(
            &mut store,
            SOURCE_TABLE,
            &sources,
            &template::source_mapping()?,
            "sources",
            options,
            &mut report,
        )?;
        Ok(report)
    }

    /// # Errors
    /// Returns an error when an input is missing or the processed rows do not fit
    /// Lakes_Playas.
    pub fn load_lakes_playas(&self, options: LoadOptions) -> Result<PassReport> {
        let config = &self.config.lakes_playas;
        let mut report = PassReport::new(lakes_playas::PASS);
        let waterbodies =
            read_geojson(required(config.waterbodies.as_ref(), "lakes_playas.waterbodies")?)?;
        let lookup = read_csv_table(required(config.lookup.as_ref(), "lakes_playas.lookup")?)?;
        let processed = lakes_playas::process_lakes_playas(
            waterbodies,
            &lookup,
            &self.state()?,
            &config.fcodes,
            &self.engine,
            &mut report,
        )?;

        let mut store = Self::open_migrated(&self.config.database)?;
        let mapping = lakes_playas::lakes_playas_mapping()?;
        Self::append(
            &mut store,
            LAKES_PLAYAS,
            &processed,
            &mapping,
            source_codes::NHD_WATERBODY,
            options,
            &mut report,
        )?;
        Ok(report)
    }

    /// # Errors
    /// Returns an error when an input is missing, a merge check fails, or the
    /// rows do not fit Rivers_Streams.
    pub fn load_rivers(&self, options: LoadOptions) -> Result<PassReport> {
        let config = &self.config.rivers;
        let mut report = PassReport::new(rivers::PASS);
        let flowlines = read_geojson(required(config.flowlines.as_ref(), "rivers.flowlines")?)?;
        let major = read_csv_table(required(config.major_rivers.as_ref(), "rivers.major_rivers")?)?;
        let names = text_column(&major, "Name")?;
        let state = self.state()?;
        let (processed, check) =
            rivers::process_rivers(&flowlines, &names, &state, config, &self.engine, &mut report)?;
        tracing::info!(?check, "merged rivers");

        let mut store = Self::open_migrated(&self.config.database)?;
        let mapping = rivers::rivers_mapping()?;
        Self::append(
            &mut store,
            RIVERS_STREAMS,
            &processed,
            &mapping,
            source_codes::NHD_FLOWLINE,
            options,
            &mut report,
        )?;
        Ok(report)
    }

    /// # Errors
    /// Returns an error when the wetlands input is missing or does not fit Wetlands.
    pub fn load_wetlands(&self, options: LoadOptions) -> Result<PassReport> {
        let config = &self.config.wetlands;
        let mut report = PassReport::new(wetlands::PASS);
        let input = read_geojson(required(config.wetlands.as_ref(), "wetlands.wetlands")?)?;
        let processed = wetlands::process_wetlands(input, config, &mut report)?;

        let mut store = Self::open_migrated(&self.config.database)?;
        let mapping = wetlands::wetlands_mapping()?;
        Self::append(
            &mut store,
            WETLANDS,
            &processed,
            &mapping,
            source_codes::DRI_WETLANDS,
            options,
            &mut report,
        )?;
        Ok(report)
    }

    /// Taxa tables that are not configured are skipped and their counts stay null.
    ///
    /// # Errors
    /// Returns an error when the sites are missing or a taxa table lacks its fields.
    pub fn load_springs(&self, options: LoadOptions) -> Result<PassReport> {
        let config = &self.config.springs;
        let mut report = PassReport::new(springs::PASS);
        let sites = read_geojson(required(config.sites.as_ref(), "springs.sites")?)?;
        let mut taxa = Vec::new();
        if let Some(path) = &config.vertebrates {
            taxa.push(TaxaTable::vertebrates(read_csv_table(path)?));
        }
        if let Some(path) = &config.invertebrates {
            taxa.push(TaxaTable::invertebrates(read_csv_table(path)?));
        }
        if let Some(path) = &config.flora {
            taxa.push(TaxaTable::flora(read_csv_table(path)?, &config.flora_exceptions));
        }
        let processed = springs::process_springs(sites, taxa, config, &mut report)?;

        let mut store = Self::open_migrated(&self.config.database)?;
        let mapping = springs::springs_mapping()?;
        Self::append(
            &mut store,
            SPRINGS,
            &processed,
            &mapping,
            source_codes::SSI,
            options,
            &mut report,
        )?;
        Ok(report)
    }

    /// Loads Species_tbl from the unique names and Species from the hexagon counts.
    ///
    /// # Errors
    /// Returns an error when the endemism table or hexagons are missing, a record
    /// set has the wrong geometry, or the rows do not fit either layer.
    pub fn load_species(&self, options: LoadOptions) -> Result<PassReport> {
        let config = &self.config.species;
        let mut report = PassReport::new(species::PASS);
        let mut to_buffer = Vec::new();
        for path in [&config.points, &config.lines].into_iter().flatten() {
            to_buffer.push(read_geojson(path)?);
        }
        let mut polygons = Vec::new();
        for path in [&config.polygons, &config.sensitive].into_iter().flatten() {
            polygons.push(read_geojson(path)?);
        }
        if to_buffer.is_empty() && polygons.is_empty() {
            return Err(ConfigError::Missing("species.points").into());
        }
        let endemism = read_csv_table(required(config.endemism.as_ref(), "species.endemism")?)?;
        let hexagons = read_geojson(required(config.hexagons.as_ref(), "species.hexagons")?)?;

        let merged = species::merge_records(
            to_buffer,
            polygons,
            config.buffer_meters,
            &self.engine,
            &mut report,
        )?;
        let records = species::process_species_records(merged, &endemism, config, &mut report)?;
        let unique = species::unique_species(&records);
        report.record_counts("unique names", records.len(), unique.len());
        let mut counts = species::hexagon_counts(&hexagons, &records, &self.engine)?;
        derive::tag_source(&mut counts, "SOURCE_CODE", source_codes::NNHP)?;

        let mut store = Self::open_migrated(&self.config.database)?;
        let table_mapping = species::species_table_mapping()?;
        Self::append(
            &mut store,
            SPECIES_TABLE,
            &unique,
            &table_mapping,
            "nnhp:unique",
            options,
            &mut report,
        )?;
        let count_mapping = species::species_mapping()?;
        Self::append(
            &mut store,
            SPECIES,
            &counts,
            &count_mapping,
            "nnhp:hexagons",
            options,
            &mut report,
        )?;
        Ok(report)
    }

    /// Runs the TNC rasters, then LANDFIRE and the DRI units when configured; each
    /// source only fills area the earlier ones left uncovered.
    ///
    /// # Errors
    /// Returns an error when a lookup table or raster is missing or malformed, or the
    /// rows do not fit Phreatophytes.
    pub fn load_phreatophytes(&self, options: LoadOptions) -> Result<PassReport> {
        let config = &self.config.phreatophytes;
        let mut report = PassReport::new(phreatophytes::PASS);
        let state = self.state()?;
        let gde_systems =
            read_csv_table(required(config.gde_systems.as_ref(), "phreatophytes.gde_systems")?)?;
        let groups = read_csv_table(required(
            config.phreatophyte_groups.as_ref(),
            "phreatophytes.phreatophyte_groups",
        )?)?;
        let et_units = config.et_units.as_deref().map(read_geojson).transpose()?;

        let mut rasters = Vec::with_capacity(config.tnc_rasters.len());
        for raster in &config.tnc_rasters {
            rasters.push(TncRaster {
                config: raster.clone(),
                raster: read_raster(&raster.name, &raster.grid, raster.value_table.as_deref())?,
            });
        }
        let mut tnc = phreatophytes::process_tnc(
            &rasters,
            &config.overlap_masks,
            &gde_systems,
            &state,
            &self.engine,
            &mut report,
        )?;
        if let Some(path) = &config.wetland_handoff {
            write_geojson(path, &tnc.wetlands)?;
            tracing::info!(
                path = %path.display(),
                rows = tnc.wetlands.len(),
                "wrote wetland-type TNC polygons"
            );
        }
        phreatophytes::attach_groups(&mut tnc.phreatophytes, &groups)?;

        let mut store = Self::open_migrated(&self.config.database)?;
        let vegetation = phreatophytes::vegetation_mapping()?;
        Self::append(
            &mut store,
            PHREATOPHYTES,
            &tnc.phreatophytes,
            &vegetation,
            "phreatophytes:tnc",
            options,
            &mut report,
        )?;

        let landfire = match &config.landfire.grid {
            Some(grid) => {
                let codes_path = required(
                    config.landfire.gde_codes.as_ref(),
                    "phreatophytes.landfire.gde_codes",
                )?;
                let gde_codes =
                    code_column(&read_csv_table(codes_path)?, &config.landfire.code_field)?;
                let basins =
                    et_units.as_ref().ok_or(ConfigError::Missing("phreatophytes.et_units"))?;
                let raster =
                    read_raster("landfire_bps", grid, config.landfire.value_table.as_deref())?;
                let inputs = LandfireInputs {
                    gde_codes: &gde_codes,
                    groups: &groups,
                    et_units: basins,
                    et_unit_types: &config.et_unit_types,
                    tnc_cover: &tnc.mapped_areas,
                    state: &state,
                };
                let fixed = phreatophytes::process_landfire(
                    raster,
                    inputs,
                    &config.landfire,
                    &self.engine,
                    &mut report,
                )?;
                Self::append(
                    &mut store,
                    PHREATOPHYTES,
                    &fixed,
                    &vegetation,
                    source_codes::LANDFIRE,
                    options,
                    &mut report,
                )?;
                fixed
            }
            None => {
                tracing::info!("LANDFIRE grid not configured, skipping");
                Dataset::new("LF_PHR_Fixed", LayerKind::Polygon)
            }
        };

        if let Some(basins) = &et_units {
            let dri = phreatophytes::process_dri(
                basins,
                &config.et_type_needle,
                &state,
                &[&tnc.mapped_areas, &landfire],
                &self.engine,
                &mut report,
            )?;
            let mapping = phreatophytes::dri_mapping()?;
            Self::append(
                &mut store,
                PHREATOPHYTES,
                &dri,
                &mapping,
                source_codes::DRI_PHREATOPHYTES,
                options,
                &mut report,
            )?;
        }
        Ok(report)
    }

    /// Aggregate the destination's thematic layers into `kind` units and write them
    /// to the scratch database, replacing any earlier run.
    ///
    /// # Errors
    /// Returns an error when the units are missing, a thematic layer does not exist,
    /// or the scratch write fails.
    pub fn summarize(&self, kind: SummaryUnitKind) -> Result<SummaryResult> {
        let (path, key) = match kind {
            SummaryUnitKind::Hexagon => {
                (self.config.summary.hexagons.as_ref(), "summary.hexagons")
            }
            SummaryUnitKind::HydroBasin => {
                (self.config.summary.hydro_basins.as_ref(), "summary.hydro_basins")
            }
        };
        let units = read_geojson(required(path, key)?)?;

        let destination = Self::open_migrated(&self.config.database)?;
        let layers = ThematicLayers {
            phreatophytes: destination.read_layer(PHREATOPHYTES)?,
            wetlands: destination.read_layer(WETLANDS)?,
            springs: destination.read_layer(SPRINGS)?,
            lakes_playas: destination.read_layer(LAKES_PLAYAS)?,
            rivers: destination.read_layer(RIVERS_STREAMS)?,
        };
        let summarized = summarize_units(&units, kind, &layers, &self.engine)?;
        let template = summary_template(&summarized, kind)?;

        let mut scratch = Self::open_migrated(&self.config.scratch_database)?;
        scratch.create_layer(&template, OverwritePolicy::Always)?;
        let append = scratch.append(
            &template.name,
            &summarized,
            &MappingSet::identity(&template),
            &AppendOptions::labelled(&format!("summary:{}", kind.as_str())),
        )?;
        let result = SummaryResult {
            kind,
            layer: template.name,
            units: summarized.len(),
            units_with_evidence: units_with_evidence(&summarized),
            append,
        };
        tracing::info!(
            unit = kind.as_str(),
            units = result.units,
            with_evidence = result.units_with_evidence,
            "wrote summary units"
        );
        Ok(result)
    }

    /// # Errors
    /// Returns an error when the story map layers exist and overwriting was not
    /// requested, or the photo points cannot be loaded.
    pub fn publish_story_map(&self, policy: OverwritePolicy) -> Result<PublishSummary> {
        let scratch = Self::open_migrated(&self.config.scratch_database)?;
        let mut story = SqliteStore::open(&self.config.story_database)?;
        let photos = self.config.story_map.photos.as_deref().map(read_geojson).transpose()?;
        story_map::publish(&scratch, &mut story, photos.as_ref(), policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{lookup_table, square, state_boundary, waterbody};
    use igde_core::Feature;
    use std::path::PathBuf;

    fn unique_temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("igde-pipeline-{}", ulid::Ulid::new()))
    }

    fn write_csv(path: &Path, table: &Dataset) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(table.fields())?;
        for row in table.features() {
            let cells =
                table.fields().iter().map(|field| row.get(field).render().unwrap_or_default());
            writer.write_record(cells)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn fixture_config(dir: &Path) -> Result<PipelineConfig> {
        std::fs::create_dir_all(dir)?;
        write_geojson(&dir.join("state.geojson"), &state_boundary())?;
        write_geojson(
            &dir.join("waterbodies.geojson"),
            &Dataset::from_features(
                "NHDWaterbody",
                LayerKind::Polygon,
                vec![
                    waterbody("w1", 36100, "Ruby Lake", 0.0),
                    waterbody("w2", 39004, "Pyramid Lake", 300.0),
                    waterbody("w3", 99999, "Reservoir", 600.0),
                ],
            ),
        )?;
        write_csv(&dir.join("lookup.csv"), &lookup_table())?;
        std::fs::write(
            dir.join("sources.csv"),
            "SOURCE_CODE,SOURCE_NAME,SOURCE_BODY,LAYER,SOURCE_LINK,SOURCE_CITE,\
             MAP_METHOD,MAP_UNIT,COMMENTS,SOURCE_YEAR\n\
             nhdw,NHD Waterbody,USGS,Lakes_Playas,https://www.usgs.gov/nhd,USGS 2019,\
             Digitized,24000,,2019\n",
        )?;
        write_geojson(
            &dir.join("hexagons.geojson"),
            &Dataset::from_features(
                "hexagons",
                LayerKind::Polygon,
                vec![
                    Feature::new(Some(square(0.0, 0.0, 200.0))).with("Hex_ID", 1_i64),
                    Feature::new(Some(square(5_000.0, 5_000.0, 200.0))).with("Hex_ID", 2_i64),
                ],
            ),
        )?;

        let yaml = "\
state_boundary: state.geojson
sources:
  source_table: sources.csv
lakes_playas:
  waterbodies: waterbodies.geojson
  lookup: lookup.csv
summary:
  hexagons: hexagons.geojson
";
        let config_path = dir.join("igde.yaml");
        std::fs::write(&config_path, yaml)?;
        Ok(PipelineConfig::from_path(&config_path)?)
    }

    // Test IDs: TPIPE-001
    #[test]
    fn migrate_dry_run_reports_plan_without_applying() -> Result<()> {
        let dir = unique_temp_dir();
        let mut config = PipelineConfig::default();
        config.database = dir.join("NV_iGDE.sqlite3");
        let pipeline = IgdePipeline::new(config);

        let planned = pipeline.migrate(true)?;
        assert!(planned.dry_run);
        assert_eq!(planned.would_apply_versions, vec![1]);
        assert_eq!(planned.after_version, None);

        let applied = pipeline.migrate(false)?;
        assert_eq!(applied.after_version, Some(1));
        assert_eq!(applied.up_to_date, Some(true));
        assert_eq!(pipeline.schema_status()?.pending_versions, Vec::<i64>::new());

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    // Test IDs: TPIPE-002
    #[test]
    fn lakes_playas_load_end_to_end_and_guard_reruns() -> Result<()> {
        let dir = unique_temp_dir();
        let pipeline = IgdePipeline::new(fixture_config(&dir)?);
        assert_eq!(pipeline.create_template(OverwritePolicy::Never)?.len(), 8);

        let sources = pipeline.load_sources(LoadOptions::default())?;
        assert_eq!(sources.rows_appended(), 1);

        let first = pipeline.load_lakes_playas(LoadOptions::default())?;
        assert_eq!(first.rows_appended(), 2);
        assert_eq!(first.step("FCode allow-list").map(|step| step.removed), Some(1));

        let again = pipeline.load_lakes_playas(LoadOptions::default())?;
        assert_eq!(again.rows_appended(), 0);
        assert!(again.appends.iter().all(|append| append.skipped_duplicate));

        let forced = pipeline.load_lakes_playas(LoadOptions { allow_duplicate: true })?;
        assert_eq!(forced.rows_appended(), 2);

        let layers = pipeline.list_layers()?;
        let lakes =
            layers.iter().find(|layer| layer.name == LAKES_PLAYAS).map(|layer| layer.row_count);
        assert_eq!(lakes, Some(4));
        assert!(pipeline.integrity_check()?.is_healthy());

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    // Test IDs: TPIPE-003
    #[test]
    fn summary_units_reach_the_story_map() -> Result<()> {
        let dir = unique_temp_dir();
        let pipeline = IgdePipeline::new(fixture_config(&dir)?);
        pipeline.create_template(OverwritePolicy::Never)?;
        pipeline.load_lakes_playas(LoadOptions::default())?;

        let summary = pipeline.summarize(SummaryUnitKind::Hexagon)?;
        assert_eq!(summary.layer, "hexagon_units");
        assert_eq!(summary.units, 2);
        assert_eq!(summary.units_with_evidence, 1);
        let rerun = pipeline.summarize(SummaryUnitKind::Hexagon)?;
        assert_eq!(rerun.append.rows_appended, 2);

        let published = pipeline.publish_story_map(OverwritePolicy::Never)?;
        assert_eq!(published.layers.len(), 1);
        assert_eq!(published.missing_units, ["hydrobasin_units"]);
        assert!(pipeline.publish_story_map(OverwritePolicy::Never).is_err());

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn unconfigured_inputs_name_their_key() {
        let dir = unique_temp_dir();
        let mut config = PipelineConfig::default();
        config.database = dir.join("NV_iGDE.sqlite3");
        let pipeline = IgdePipeline::new(config);
        let err = pipeline.load_wetlands(LoadOptions::default()).err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("missing input: wetlands.wetlands is not configured"));
        assert!(pipeline.summarize(SummaryUnitKind::HydroBasin).is_err());
    }
}
