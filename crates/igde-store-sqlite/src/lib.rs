use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use geo_types::Geometry;
use igde_core::{
    Attributes, Dataset, Feature, FieldSpec, FieldType, LayerKind, LayerTemplate, MappingSet,
    SpatialReference, Value, SOURCE_TABLE,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, DatabaseName, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS layers (
  name TEXT PRIMARY KEY COLLATE NOCASE,
  kind TEXT NOT NULL CHECK (kind IN ('point', 'polyline', 'polygon', 'table')),
  wkid INTEGER,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS layer_fields (
  layer_name TEXT NOT NULL REFERENCES layers(name) ON DELETE CASCADE,
  position INTEGER NOT NULL CHECK (position >= 0),
  name TEXT NOT NULL,
  field_type TEXT NOT NULL CHECK (field_type IN ('TEXT', 'LONG', 'SHORT', 'DOUBLE', 'DATE')),
  alias TEXT NOT NULL,
  length INTEGER CHECK (length IS NULL OR length > 0),
  PRIMARY KEY (layer_name, position)
);

CREATE TABLE IF NOT EXISTS append_batches (
  batch_id TEXT PRIMARY KEY,
  layer_name TEXT NOT NULL REFERENCES layers(name) ON DELETE CASCADE,
  source_label TEXT NOT NULL,
  content_sha256 TEXT NOT NULL,
  row_count INTEGER NOT NULL CHECK (row_count >= 0),
  appended_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_append_batches_layer_hash
  ON append_batches(layer_name, content_sha256);
";

const METADATA_TABLES: [&str; 4] =
    ["schema_migrations", "layers", "layer_fields", "append_batches"];

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// What `create_layer` does when a layer with the same name already exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    #[default]
    Never,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub kind: String,
    pub wkid: Option<i64>,
    pub field_count: usize,
    pub row_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppendOptions {
    pub source_label: String,
    pub allow_duplicate: bool,
}

impl AppendOptions {
    #[must_use]
    pub fn labelled(source_label: &str) -> Self {
        Self { source_label: source_label.to_string(), allow_duplicate: false }
    }

    #[must_use]
    pub fn allow_duplicate(mut self, allow: bool) -> Self {
        self.allow_duplicate = allow;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppendSummary {
    pub layer: String,
    pub batch_id: Option<String>,
    pub rows_appended: usize,
    pub skipped_duplicate: bool,
    pub content_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanSourceCode {
    pub layer: String,
    pub source_code: String,
    pub rows: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchRowMismatch {
    pub layer: String,
    pub ledger_rows: i64,
    pub table_rows: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
    pub source_table_present: bool,
    pub orphan_source_codes: Vec<OrphanSourceCode>,
    pub batch_row_mismatches: Vec<BatchRowMismatch>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.quick_check_ok
            && self.foreign_key_violations.is_empty()
            && self.schema_status.pending_versions.is_empty()
            && self.orphan_source_codes.is_empty()
            && self.batch_row_mismatches.is_empty()
    }
}

impl SqliteStore {
    /// Open a SQLite-backed layer store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for database {}", path.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "database schema version {version} is newer than supported version \
                 {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 001")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 001")?;
            tracing::info!(version = 1, "applied schema migration");
        }

        Ok(())
    }

    /// Create an empty layer with exactly the template's fields in order.
    ///
    /// # Errors
    /// Returns an error when the template is invalid, the name collides under
    /// [`OverwritePolicy::Never`], or any DDL statement fails.
    pub fn create_layer(
        &mut self,
        template: &LayerTemplate,
        policy: OverwritePolicy,
    ) -> Result<()> {
        self.migrate()?;
        template.validate()?;
        if METADATA_TABLES.iter().any(|table| table.eq_ignore_ascii_case(&template.name))
            || template.name.to_ascii_lowercase().starts_with("sqlite_")
        {
            return Err(anyhow!("layer name {} is reserved", template.name));
        }

        let existing = self.resolve_layer_name(&template.name)?;
        let tx = self.conn.transaction().context("failed to start create-layer transaction")?;
        if let Some(existing) = existing {
            match policy {
                OverwritePolicy::Never => {
                    return Err(anyhow!(
                        "layer {existing} already exists; pass the overwrite policy to recreate it"
                    ));
                }
                OverwritePolicy::Always => {
                    tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(&existing)))
                        .with_context(|| format!("failed to drop layer table {existing}"))?;
                    tx.execute("DELETE FROM layers WHERE name = ?1", params![existing])
                        .with_context(|| {
                            format!("failed to delete layer metadata for {existing}")
                        })?;
                    tracing::warn!(layer = %existing, "overwrote existing layer");
                }
            }
        }

        let wkid = template.kind.is_spatial().then(|| SpatialReference::default().wkid);
        tx.execute(
            "INSERT INTO layers(name, kind, wkid, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![template.name, template.kind.as_str(), wkid, now_rfc3339()?],
        )
        .with_context(|| format!("failed to insert layer metadata for {}", template.name))?;
        insert_field_metadata(&tx, &template.name, &template.fields)?;
        tx.execute_batch(&create_table_sql(template))
            .with_context(|| format!("failed to create layer table {}", template.name))?;
        tx.commit().context("failed to commit create-layer transaction")?;

        tracing::info!(
            layer = %template.name,
            kind = template.kind.as_str(),
            fields = template.fields.len(),
            "created layer"
        );
        Ok(())
    }

    /// # Errors
    /// Returns an error when layer metadata cannot be read or is malformed.
    pub fn layer_template(&self, name: &str) -> Result<Option<LayerTemplate>> {
        let row = self
            .conn
            .query_row("SELECT name, kind FROM layers WHERE name = ?1", params![name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()
            .with_context(|| format!("failed to read layer metadata for {name}"))?;
        let Some((stored_name, kind)) = row else {
            return Ok(None);
        };
        let kind = LayerKind::parse(&kind)
            .ok_or_else(|| anyhow!("invalid layer kind {kind} stored for {stored_name}"))?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, field_type, alias, length FROM layer_fields
                 WHERE layer_name = ?1 ORDER BY position",
            )
            .context("failed to prepare layer field query")?;
        let rows = stmt.query_map(params![stored_name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<u32>>(3)?,
            ))
        })?;

        let mut fields = Vec::new();
        for row in rows {
            let (field_name, field_type, alias, length) = row?;
            let field_type = FieldType::parse(&field_type).ok_or_else(|| {
                anyhow!("invalid field type {field_type} stored for {stored_name}.{field_name}")
            })?;
            fields.push(FieldSpec { name: field_name, field_type, alias, length });
        }

        Ok(Some(LayerTemplate::new(&stored_name, kind, fields)))
    }

    /// # Errors
    /// Returns an error when layer metadata or row counts cannot be read.
    pub fn list_layers(&self) -> Result<Vec<LayerInfo>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT l.name, l.kind, l.wkid, l.created_at,
                        (SELECT COUNT(*) FROM layer_fields f WHERE f.layer_name = l.name)
                 FROM layers l ORDER BY l.name",
            )
            .context("failed to prepare layer listing")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut layers = Vec::new();
        for row in rows {
            let (name, kind, wkid, created_at, field_count) = row?;
            let field_count = usize::try_from(field_count).context("negative field count")?;
            let row_count = self.count(&name)?;
            layers.push(LayerInfo { name, kind, wkid, field_count, row_count, created_at });
        }
        Ok(layers)
    }

    /// # Errors
    /// Returns an error when the layer does not exist or cannot be counted.
    pub fn count(&self, layer: &str) -> Result<i64> {
        let name = self.require_layer_name(layer)?;
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(&name)), [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {name}"))
    }

    /// Materialize a layer as a scratch dataset in `OBJECTID` order.
    ///
    /// # Errors
    /// Returns an error when the layer does not exist or a stored geometry cannot be decoded.
    pub fn read_layer(&self, layer: &str) -> Result<Dataset> {
        let template = self.require_layer(layer)?;
        let mut columns = Vec::with_capacity(template.fields.len() + 1);
        columns.push(if template.kind.is_spatial() { "SHAPE" } else { "NULL" }.to_string());
        columns.extend(template.fields.iter().map(|field| quote(&field.name)));

        let sql = format!(
            "SELECT {} FROM {} ORDER BY OBJECTID",
            columns.join(", "),
            quote(&template.name)
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare read of {}", template.name))?;
        let mut rows = stmt.query([])?;

        let field_names = template.field_names();
        let mut dataset = Dataset::new(&template.name, template.kind).with_fields(&field_names);
        while let Some(row) = rows.next()? {
            let geometry = match row.get::<_, Option<String>>(0)? {
                Some(text) => Some(decode_geometry(&text)?),
                None => None,
            };
            let mut attributes = Attributes::new();
            for (index, field) in template.fields.iter().enumerate() {
                let value = value_from_sql(row.get_ref(index + 1)?, field)?;
                attributes.insert(field.name.clone(), value);
            }
            dataset.push(Feature { geometry, attributes });
        }
        Ok(dataset)
    }

    /// Project `dataset` through `mapping` and insert every row in order as one batch.
    ///
    /// Rows are projected before anything is written, and the insert runs in a single
    /// transaction, so a schema or coercion failure leaves the layer untouched. A batch
    /// whose content hash was already appended to this layer is skipped unless
    /// `options.allow_duplicate` is set.
    ///
    /// # Errors
    /// Returns an error when the layer is missing, the mapping does not fit the template
    /// or the dataset, a value cannot be coerced, or any write fails.
    pub fn append(
        &mut self,
        layer: &str,
        dataset: &Dataset,
        mapping: &MappingSet,
        options: &AppendOptions,
    ) -> Result<AppendSummary> {
        self.migrate()?;
        let template = self.require_layer(layer)?;
        mapping
            .validate_against(&template)
            .with_context(|| format!("mapping does not fit layer {}", template.name))?;
        mapping
            .validate_source(dataset)
            .with_context(|| format!("mapping does not fit source {}", dataset.name()))?;
        if template.kind.is_spatial() && dataset.kind() != template.kind {
            return Err(anyhow!(
                "cannot append {} features from {} into {} layer {}",
                dataset.kind().as_str(),
                dataset.name(),
                template.kind.as_str(),
                template.name
            ));
        }

        let mut projected = Vec::with_capacity(dataset.len());
        let mut hasher = Sha256::new();
        for (index, feature) in dataset.features().iter().enumerate() {
            let shape = match &feature.geometry {
                Some(geometry) if template.kind.is_spatial() => Some(encode_geometry(geometry)?),
                _ => None,
            };
            let values = mapping.project(feature, &template).with_context(|| {
                let source = dataset.name();
                format!("failed to project row {index} of {source} into {}", template.name)
            })?;
            let canonical = serde_json::to_string(&(
                shape.as_deref(),
                values.iter().map(Value::to_json).collect::<Vec<_>>(),
            ))
            .context("failed to serialize projected row")?;
            hasher.update(canonical.as_bytes());
            hasher.update(b"\n");
            projected.push((shape, values));
        }
        let content_sha256 = hex::encode(hasher.finalize());

        let already_appended = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM append_batches
                 WHERE layer_name = ?1 AND content_sha256 = ?2)",
                params![template.name, content_sha256],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to query append ledger")?
            == 1;
        if already_appended && !options.allow_duplicate {
            tracing::warn!(
                layer = %template.name,
                source = %options.source_label,
                sha256 = %content_sha256,
                "skipped duplicate append batch"
            );
            return Ok(AppendSummary {
                layer: template.name,
                batch_id: None,
                rows_appended: 0,
                skipped_duplicate: true,
                content_sha256,
            });
        }

        let batch_id = Ulid::new().to_string();
        let mut columns = Vec::with_capacity(template.fields.len() + 2);
        if template.kind.is_spatial() {
            columns.push("SHAPE".to_string());
        }
        columns.push("BATCH_ID".to_string());
        columns.extend(template.fields.iter().map(|field| quote(&field.name)));
        let placeholders = (1..=columns.len()).map(|n| format!("?{n}")).collect::<Vec<_>>();
        let insert_sql = format!(
            "INSERT INTO {}({}) VALUES ({})",
            quote(&template.name),
            columns.join(", "),
            placeholders.join(", ")
        );

        let tx = self.conn.transaction().context("failed to start append transaction")?;
        tx.execute(
            "INSERT INTO append_batches(
                batch_id, layer_name, source_label, content_sha256, row_count, appended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                batch_id,
                template.name,
                options.source_label,
                content_sha256,
                i64::try_from(projected.len()).context("append batch is too large")?,
                now_rfc3339()?,
            ],
        )
        .context("failed to record append batch")?;
        {
            let mut stmt = tx
                .prepare(&insert_sql)
                .with_context(|| format!("failed to prepare insert into {}", template.name))?;
            for (shape, values) in &projected {
                let mut row = Vec::with_capacity(columns.len());
                if template.kind.is_spatial() {
                    row.push(shape.clone().map_or(SqlValue::Null, SqlValue::Text));
                }
                row.push(SqlValue::Text(batch_id.clone()));
                row.extend(values.iter().map(value_to_sql));
                stmt.execute(params_from_iter(row.iter()))
                    .with_context(|| format!("failed to insert row into {}", template.name))?;
            }
        }
        tx.commit().context("failed to commit append transaction")?;

        tracing::info!(
            layer = %template.name,
            source = %options.source_label,
            rows = projected.len(),
            batch_id = %batch_id,
            "appended batch"
        );
        Ok(AppendSummary {
            layer: template.name,
            batch_id: Some(batch_id),
            rows_appended: projected.len(),
            skipped_duplicate: false,
            content_sha256,
        })
    }

    /// Remove the named fields from a layer. Names not in the layer are ignored.
    /// Returns the names actually dropped.
    ///
    /// # Errors
    /// Returns an error when the layer is missing or the schema change fails.
    pub fn drop_fields(&mut self, layer: &str, fields: &[&str]) -> Result<Vec<String>> {
        let template = self.require_layer(layer)?;
        let dropped = template
            .fields
            .iter()
            .filter(|field| fields.iter().any(|name| name.eq_ignore_ascii_case(&field.name)))
            .map(|field| field.name.clone())
            .collect::<Vec<_>>();
        if dropped.is_empty() {
            return Ok(dropped);
        }
        let dropped_refs = dropped.iter().map(String::as_str).collect::<Vec<_>>();
        let remaining = template.without_fields(&dropped_refs);

        let tx = self.conn.transaction().context("failed to start drop-fields transaction")?;
        for field in &dropped {
            tx.execute_batch(&format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote(&template.name),
                quote(field)
            ))
            .with_context(|| format!("failed to drop field {field} from {}", template.name))?;
        }
        tx.execute("DELETE FROM layer_fields WHERE layer_name = ?1", params![template.name])
            .with_context(|| format!("failed to clear field metadata for {}", template.name))?;
        insert_field_metadata(&tx, &template.name, &remaining.fields)?;
        tx.commit().context("failed to commit drop-fields transaction")?;

        tracing::info!(layer = %template.name, dropped = ?dropped, "dropped fields");
        Ok(dropped)
    }

    /// Copy a layer from another store under a new name, leaving out `drop_fields`.
    ///
    /// # Errors
    /// Returns an error when the source layer is missing or the create/append fails.
    pub fn copy_layer_from(
        &mut self,
        source: &SqliteStore,
        from: &str,
        to: &str,
        policy: OverwritePolicy,
        drop_fields: &[&str],
    ) -> Result<AppendSummary> {
        let template = source.require_layer(from)?.without_fields(drop_fields).renamed(to);
        let dataset = source.read_layer(from)?;
        self.create_layer(&template, policy)?;
        let mapping = MappingSet::identity(&template);
        self.append(to, &dataset, &mapping, &AppendOptions::labelled(&format!("copy:{from}")))
    }

    /// Export every layer as NDJSON plus a digest manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let mut files = Vec::new();
        for info in self.list_layers()? {
            let dataset = self.read_layer(&info.name)?;
            let rows = dataset
                .features()
                .iter()
                .map(|feature| {
                    let mut row = serde_json::Map::new();
                    for field in dataset.fields() {
                        row.insert(field.clone(), feature.get(field).to_json());
                    }
                    if dataset.kind().is_spatial() {
                        let geometry = match &feature.geometry {
                            Some(geometry) => serde_json::to_value(geojson::Geometry::new(
                                geojson::Value::from(geometry),
                            ))
                            .context("failed to serialize geometry")?,
                            None => serde_json::Value::Null,
                        };
                        row.insert("geometry".to_string(), geometry);
                    }
                    Ok(serde_json::Value::Object(row))
                })
                .collect::<Result<Vec<_>>>()?;

            let file_name = format!("{}.ndjson", info.name);
            let (sha256, records) = write_ndjson_file(&out_dir.join(&file_name), &rows)?;
            files.push(ExportFileDigest { path: file_name, sha256, records });
        }

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files,
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, schema status, provenance and ledger checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        let (source_table_present, orphan_source_codes, batch_row_mismatches) =
            if table_exists(&self.conn, "layers")? {
                let (present, orphans) = self.orphan_source_codes()?;
                (present, orphans, self.batch_row_mismatches()?)
            } else {
                (false, Vec::new(), Vec::new())
            };

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
            source_table_present,
            orphan_source_codes,
            batch_row_mismatches,
        })
    }

    fn orphan_source_codes(&self) -> Result<(bool, Vec<OrphanSourceCode>)> {
        let Some(source_table) = self.resolve_layer_name(SOURCE_TABLE)? else {
            return Ok((false, Vec::new()));
        };
        let mut known = BTreeSet::new();
        {
            let mut stmt = self
                .conn
                .prepare(&format!(
                    "SELECT DISTINCT SOURCE_CODE FROM {} WHERE SOURCE_CODE IS NOT NULL",
                    quote(&source_table)
                ))
                .context("failed to read known source codes")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                known.insert(row?);
            }
        }

        let mut orphans = Vec::new();
        for info in self.list_layers()? {
            if info.name == source_table
                || !table_has_column(&self.conn, &info.name, "SOURCE_CODE")?
            {
                continue;
            }
            let mut stmt = self
                .conn
                .prepare(&format!(
                    "SELECT SOURCE_CODE, COUNT(*) FROM {} WHERE SOURCE_CODE IS NOT NULL
                     GROUP BY SOURCE_CODE ORDER BY SOURCE_CODE",
                    quote(&info.name)
                ))
                .with_context(|| format!("failed to group source codes in {}", info.name))?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (source_code, rows) = row?;
                if !known.contains(&source_code) {
                    orphans.push(OrphanSourceCode { layer: info.name.clone(), source_code, rows });
                }
            }
        }
        Ok((true, orphans))
    }

    fn batch_row_mismatches(&self) -> Result<Vec<BatchRowMismatch>> {
        let mut mismatches = Vec::new();
        for info in self.list_layers()? {
            let ledger_rows: i64 = self
                .conn
                .query_row(
                    "SELECT COALESCE(SUM(row_count), 0) FROM append_batches WHERE layer_name = ?1",
                    params![info.name],
                    |row| row.get(0),
                )
                .with_context(|| format!("failed to sum append ledger for {}", info.name))?;
            if ledger_rows != info.row_count {
                mismatches.push(BatchRowMismatch {
                    layer: info.name,
                    ledger_rows,
                    table_rows: info.row_count,
                });
            }
        }
        Ok(mismatches)
    }

    fn resolve_layer_name(&self, name: &str) -> Result<Option<String>> {
        if !table_exists(&self.conn, "layers")? {
            return Ok(None);
        }
        self.conn
            .query_row("SELECT name FROM layers WHERE name = ?1", params![name], |row| row.get(0))
            .optional()
            .with_context(|| format!("failed to look up layer {name}"))
    }

    fn require_layer_name(&self, name: &str) -> Result<String> {
        self.resolve_layer_name(name)?.ok_or_else(|| anyhow!("layer {name} does not exist"))
    }

    fn require_layer(&self, name: &str) -> Result<LayerTemplate> {
        if !table_exists(&self.conn, "layers")? {
            return Err(anyhow!("layer {name} does not exist"));
        }
        self.layer_template(name)?.ok_or_else(|| anyhow!("layer {name} does not exist"))
    }
}

fn create_table_sql(template: &LayerTemplate) -> String {
    let mut columns = vec!["OBJECTID INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    if template.kind.is_spatial() {
        columns.push("SHAPE TEXT".to_string());
    }
    columns.push("BATCH_ID TEXT NOT NULL".to_string());
    columns.extend(
        template
            .fields
            .iter()
            .map(|field| format!("{} {}", quote(&field.name), field.field_type.sql_type())),
    );
    format!("CREATE TABLE {} (\n  {}\n)", quote(&template.name), columns.join(",\n  "))
}

fn insert_field_metadata(
    tx: &rusqlite::Transaction<'_>,
    layer: &str,
    fields: &[FieldSpec],
) -> Result<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO layer_fields(layer_name, position, name, field_type, alias, length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .context("failed to prepare field metadata insert")?;
    for (position, field) in fields.iter().enumerate() {
        stmt.execute(params![
            layer,
            i64::try_from(position).context("too many fields")?,
            field.name,
            field.field_type.as_str(),
            field.alias,
            field.length,
        ])
        .with_context(|| format!("failed to insert field metadata for {layer}.{}", field.name))?;
    }
    Ok(())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::Integer(number) => SqlValue::Integer(*number),
        Value::Double(number) => SqlValue::Real(*number),
        Value::Date(_) => value.render().map_or(SqlValue::Null, SqlValue::Text),
    }
}

fn value_from_sql(raw: ValueRef<'_>, field: &FieldSpec) -> Result<Value> {
    let value = match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::Integer(number),
        ValueRef::Real(number) => Value::Double(number),
        ValueRef::Text(bytes) => Value::text(
            std::str::from_utf8(bytes)
                .with_context(|| format!("field {} holds invalid UTF-8", field.name))?,
        ),
        ValueRef::Blob(_) => return Err(anyhow!("field {} holds a blob", field.name)),
    };
    value
        .coerce(field)
        .with_context(|| format!("stored value of {} does not match its type", field.name))
}

fn encode_geometry(geometry: &Geometry<f64>) -> Result<String> {
    serde_json::to_string(&geojson::Geometry::new(geojson::Value::from(geometry)))
        .context("failed to serialize geometry as GeoJSON")
}

fn decode_geometry(text: &str) -> Result<Geometry<f64>> {
    let parsed: geojson::Geometry =
        serde_json::from_str(text).context("failed to parse stored GeoJSON geometry")?;
    Geometry::<f64>::try_from(parsed).context("failed to convert stored geometry")
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master
             WHERE type = 'table' AND name = ?1 COLLATE NOCASE)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote(table)))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((hex::encode(hasher.finalize()), values.len()))
}
