//! YAML pipeline configuration.
//! Names every database and input path plus the tunable constants of each pass.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use igde_core::{source_codes, SourceCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("missing input: {0} is not configured")]
    Missing(&'static str),
}

/// Root configuration passed explicitly to every pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Destination iGDE database
    #[serde(default = "default_database")]
    pub database: PathBuf,
    /// Working database for summary unit layers
    #[serde(default = "default_scratch_database")]
    pub scratch_database: PathBuf,
    /// Public story map database
    #[serde(default = "default_story_database")]
    pub story_database: PathBuf,
    /// Nevada boundary polygon (GeoJSON) every layer is clipped to
    #[serde(default)]
    pub state_boundary: Option<PathBuf>,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub lakes_playas: LakesPlayasConfig,
    #[serde(default)]
    pub rivers: RiversConfig,
    #[serde(default)]
    pub wetlands: WetlandsConfig,
    #[serde(default)]
    pub springs: SpringsConfig,
    #[serde(default)]
    pub species: SpeciesConfig,
    #[serde(default)]
    pub phreatophytes: PhreatophytesConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub story_map: StoryMapConfig,
}

fn default_database() -> PathBuf {
    PathBuf::from("NV_iGDE.sqlite3")
}

fn default_scratch_database() -> PathBuf {
    PathBuf::from("NV_iGDE_scratch.sqlite3")
}

fn default_story_database() -> PathBuf {
    PathBuf::from("NV_iGDE_StoryMap.sqlite3")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            scratch_database: default_scratch_database(),
            story_database: default_story_database(),
            state_boundary: None,
            sources: SourcesConfig::default(),
            lakes_playas: LakesPlayasConfig::default(),
            rivers: RiversConfig::default(),
            wetlands: WetlandsConfig::default(),
            springs: SpringsConfig::default(),
            species: SpeciesConfig::default(),
            phreatophytes: PhreatophytesConfig::default(),
            summary: SummaryConfig::default(),
            story_map: StoryMapConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    /// CSV with the ten Source_tbl columns
    pub source_table: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LakesPlayasConfig {
    /// NHD waterbody polygons
    pub waterbodies: Option<PathBuf>,
    /// CSV with FCode, Type and Description
    pub lookup: Option<PathBuf>,
    /// FCodes kept: lakes/ponds, perennial and intermittent playas
    pub fcodes: Vec<i64>,
}

impl Default for LakesPlayasConfig {
    fn default() -> Self {
        Self { waterbodies: None, lookup: None, fcodes: vec![36100, 39004, 39009, 39011] }
    }
}

/// Inclusive text range of permanent identifiers to drop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRange {
    pub low: String,
    pub high: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiversConfig {
    /// NHD flowlines
    pub flowlines: Option<PathBuf>,
    /// CSV whose `Name` column lists major river names
    pub major_rivers: Option<PathBuf>,
    pub perennial_fcode: i64,
    pub major_fcodes: Vec<i64>,
    /// Quinn River artificial path segments
    pub excluded_ids: Option<IdRange>,
    pub excluded_names: Vec<String>,
}

impl Default for RiversConfig {
    fn default() -> Self {
        Self {
            flowlines: None,
            major_rivers: None,
            perennial_fcode: 46006,
            major_fcodes: vec![55800, 46006],
            excluded_ids: Some(IdRange {
                low: "152068036".to_string(),
                high: "152068098".to_string(),
            }),
            excluded_names: vec!["White River Wash".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WetlandsConfig {
    /// DRI/EPA wetland polygons
    pub wetlands: Option<PathBuf>,
    pub excluded_types: Vec<String>,
    pub excluded_subtypes: Vec<String>,
}

impl Default for WetlandsConfig {
    fn default() -> Self {
        Self {
            wetlands: None,
            excluded_types: vec!["Lake".to_string()],
            excluded_subtypes: vec!["dry".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpringsConfig {
    /// Spring survey sites (points)
    pub sites: Option<PathBuf>,
    pub vertebrates: Option<PathBuf>,
    pub invertebrates: Option<PathBuf>,
    pub flora: Option<PathBuf>,
    /// Flora names kept from `FloraSpecies` when genus or species is blank
    pub flora_exceptions: Vec<String>,
    /// InventoryLevel values marking sites that are not springs
    pub excluded_inventory: Vec<String>,
}

impl Default for SpringsConfig {
    fn default() -> Self {
        Self {
            sites: None,
            vertebrates: None,
            invertebrates: None,
            flora: None,
            flora_exceptions: [
                "Philonotis fontana",
                "Primula fragrans",
                "Scirpus americanus",
                "Spirogyra parula",
            ]
            .map(str::to_string)
            .to_vec(),
            excluded_inventory: vec!["No Spring".to_string(), "NoSpring".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameCorrection {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeciesConfig {
    pub points: Option<PathBuf>,
    pub lines: Option<PathBuf>,
    pub polygons: Option<PathBuf>,
    pub sensitive: Option<PathBuf>,
    /// CSV with SNAME and ENDEMISM corrections
    pub endemism: Option<PathBuf>,
    /// Hexagon grid the species counts are reported on
    pub hexagons: Option<PathBuf>,
    /// Buffer applied to point and line records (meters)
    pub buffer_meters: f64,
    pub dropped_fields: Vec<String>,
    /// Records whose S_RANK contains this are extirpated
    pub extirpated_rank: String,
    pub name_corrections: Vec<NameCorrection>,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        Self {
            points: None,
            lines: None,
            polygons: None,
            sensitive: None,
            endemism: None,
            hexagons: None,
            buffer_meters: 5.0,
            dropped_fields: vec!["REFERENCE_".to_string(), "REFERENCE1".to_string()],
            extirpated_rank: "SX".to_string(),
            name_corrections: vec![NameCorrection {
                from: "Juga laurae".to_string(),
                to: "Juga acutifilosa".to_string(),
            }],
        }
    }
}

/// Raster code rewritten after polygonizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodePatch {
    pub from: i64,
    pub to: i64,
}

/// One classified vegetation raster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TncRasterConfig {
    /// File name recorded in the mapped-area boundary
    pub name: String,
    /// ESRI ASCII grid
    pub grid: PathBuf,
    /// Value attribute table CSV
    #[serde(default)]
    pub value_table: Option<PathBuf>,
    /// Attribute holding the system code; detected from the value table when absent
    #[serde(default)]
    pub value_field: Option<String>,
    pub source_code: String,
    #[serde(default)]
    pub patches: Vec<CodePatch>,
}

/// Erase the part of `target` covered by the mapped area of `mask`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlapMask {
    pub target: String,
    pub mask: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LandfireConfig {
    /// Biophysical settings grid
    pub grid: Option<PathBuf>,
    pub value_table: Option<PathBuf>,
    /// CSV whose `code_field` column lists GDE biophysical settings
    pub gde_codes: Option<PathBuf>,
    pub code_field: String,
    pub model_field: String,
    /// Warm desert riparian models outside Nevada
    pub excluded_models: Vec<i64>,
    /// Greasewood, limited to phreatophyte ET units
    pub greasewood_code: i64,
}

impl Default for LandfireConfig {
    fn default() -> Self {
        Self {
            grid: None,
            value_table: None,
            gde_codes: None,
            code_field: "BPS_CODE".to_string(),
            model_field: "BPS_MODEL".to_string(),
            excluded_models: vec![1_411_551, 1_511_551],
            greasewood_code: 11530,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhreatophytesConfig {
    pub tnc_rasters: Vec<TncRasterConfig>,
    pub overlap_masks: Vec<OverlapMask>,
    /// CSV with SYS_CODE, SYS_NAME and Wetland for every GDE system
    pub gde_systems: Option<PathBuf>,
    /// CSV with SYS_CODE, SYS_GROUP and SYS_NAME
    pub phreatophyte_groups: Option<PathBuf>,
    /// GeoJSON written with the wetland-type TNC polygons
    pub wetland_handoff: Option<PathBuf>,
    pub landfire: LandfireConfig,
    /// DRI evapotranspiration units
    pub et_units: Option<PathBuf>,
    /// ET unit types that bound greasewood
    pub et_unit_types: Vec<String>,
    /// ET units whose Type contains this become DRI phreatophytes
    pub et_type_needle: String,
}

impl Default for PhreatophytesConfig {
    fn default() -> Self {
        Self {
            tnc_rasters: Vec::new(),
            overlap_masks: vec![OverlapMask {
                target: "Wassuk_MaskSYSxCLA052918.tif".to_string(),
                mask: "MtGrant_MaskSYSxCLA052918.tif".to_string(),
            }],
            gde_systems: None,
            phreatophyte_groups: None,
            wetland_handoff: None,
            landfire: LandfireConfig::default(),
            et_units: None,
            et_unit_types: vec!["Phreatophyte".to_string(), "Phreatophytes".to_string()],
            et_type_needle: "Phreatophyte".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummaryConfig {
    /// Hexagon grid carrying Hex_ID
    pub hexagons: Option<PathBuf>,
    /// Hydrographic basins carrying HYD_AREA
    pub hydro_basins: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoryMapConfig {
    /// Photo points with LAYER, GDE_TYPE, CAPTION, FLICKR and JPEG
    pub photos: Option<PathBuf>,
}

impl PipelineConfig {
    /// Parse a YAML config file; relative paths resolve against its directory.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, parsed, or validated.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(content.as_str())?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Load `path` when it exists, otherwise the built-in defaults.
    ///
    /// # Errors
    /// Returns an error when an existing file is invalid.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_path(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse a YAML config from a string
    ///
    /// # Errors
    /// Returns an error when the YAML is malformed or fails validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let databases = [&self.database, &self.scratch_database, &self.story_database];
        if databases.iter().any(|path| path.as_os_str().is_empty()) {
            return Err(ConfigError::Validation("database paths cannot be empty".into()));
        }
        let distinct: BTreeSet<&PathBuf> = databases.into_iter().collect();
        if distinct.len() != 3 {
            return Err(ConfigError::Validation(
                "database, scratch_database and story_database must differ".into(),
            ));
        }

        if !(self.species.buffer_meters.is_finite() && self.species.buffer_meters > 0.0) {
            return Err(ConfigError::Validation(format!(
                "species.buffer_meters must be positive, got {}",
                self.species.buffer_meters
            )));
        }
        if let Some(range) = &self.rivers.excluded_ids {
            if range.low > range.high {
                return Err(ConfigError::Validation(format!(
                    "rivers.excluded_ids low {} sorts after high {}",
                    range.low, range.high
                )));
            }
        }
        if self.lakes_playas.fcodes.is_empty() {
            return Err(ConfigError::Validation("lakes_playas.fcodes cannot be empty".into()));
        }

        let mut names = BTreeSet::new();
        for raster in &self.phreatophytes.tnc_rasters {
            if !names.insert(raster.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "raster {} is listed more than once",
                    raster.name
                )));
            }
            SourceCode::parse(&raster.source_code)
                .map_err(|err| ConfigError::Validation(format!("raster {}: {err}", raster.name)))?;
            if !source_codes::TNC_RASTERS.contains(&raster.source_code.as_str()) {
                tracing::warn!(
                    raster = raster.name.as_str(),
                    source_code = raster.source_code.as_str(),
                    "raster source code is not one of the registered TNC codes"
                );
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        resolve(base, &mut self.database);
        resolve(base, &mut self.scratch_database);
        resolve(base, &mut self.story_database);
        for path in [
            &mut self.state_boundary,
            &mut self.sources.source_table,
            &mut self.lakes_playas.waterbodies,
            &mut self.lakes_playas.lookup,
            &mut self.rivers.flowlines,
            &mut self.rivers.major_rivers,
            &mut self.wetlands.wetlands,
            &mut self.springs.sites,
            &mut self.springs.vertebrates,
            &mut self.springs.invertebrates,
            &mut self.springs.flora,
            &mut self.species.points,
            &mut self.species.lines,
            &mut self.species.polygons,
            &mut self.species.sensitive,
            &mut self.species.endemism,
            &mut self.species.hexagons,
            &mut self.phreatophytes.gde_systems,
            &mut self.phreatophytes.phreatophyte_groups,
            &mut self.phreatophytes.wetland_handoff,
            &mut self.phreatophytes.landfire.grid,
            &mut self.phreatophytes.landfire.value_table,
            &mut self.phreatophytes.landfire.gde_codes,
            &mut self.phreatophytes.et_units,
            &mut self.summary.hexagons,
            &mut self.summary.hydro_basins,
            &mut self.story_map.photos,
        ] {
            if let Some(path) = path.as_mut() {
                resolve(base, path);
            }
        }
        for raster in &mut self.phreatophytes.tnc_rasters {
            resolve(base, &mut raster.grid);
            if let Some(path) = raster.value_table.as_mut() {
                resolve(base, path);
            }
        }
    }
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

/// The configured path for `key`, or [`ConfigError::Missing`].
///
/// # Errors
/// Returns [`ConfigError::Missing`] when the path is not configured.
pub fn required<'a>(path: Option<&'a PathBuf>, key: &'static str) -> Result<&'a Path, ConfigError> {
    path.map(PathBuf::as_path).ok_or(ConfigError::Missing(key))
}
