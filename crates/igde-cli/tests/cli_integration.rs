use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", ulid::Ulid::new()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_igde<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_igde"))
        .args(args)
        .env("IGDE_LOG", "warn")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute igde binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_igde(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "igde command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn array_len(value: &Value, key: &str) -> usize {
    value.get(key).and_then(Value::as_array).map(Vec::len).unwrap_or_default()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn write(path: &Path, body: &str) {
    fs::write(path, body).unwrap_or_else(|err| panic!("failed to write {}: {err}", path.display()));
}

fn square(x: f64, y: f64, size: f64) -> Value {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": [[[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]]
    })
}

fn feature_collection(features: &[(Value, Value)]) -> String {
    let features: Vec<Value> = features
        .iter()
        .map(|(geometry, properties)| {
            serde_json::json!({ "type": "Feature", "geometry": geometry, "properties": properties })
        })
        .collect();
    serde_json::json!({ "type": "FeatureCollection", "features": features }).to_string()
}

/// Config naming a state boundary, one lake, one playa, a reservoir and two hexagons.
fn write_lakes_workspace(dir: &Path) -> PathBuf {
    write(
        &dir.join("state.geojson"),
        &feature_collection(&[(
            square(0.0, 0.0, 10_000.0),
            serde_json::json!({ "NAME": "Nevada" }),
        )]),
    );
    write(
        &dir.join("waterbodies.geojson"),
        &feature_collection(&[
            (
                square(0.0, 0.0, 100.0),
                serde_json::json!({
                    "Permanent_Identifier": "w1",
                    "FCode": 36100,
                    "GNIS_Name": "Ruby Lake"
                }),
            ),
            (
                square(300.0, 0.0, 100.0),
                serde_json::json!({
                    "Permanent_Identifier": "w2",
                    "FCode": 39004,
                    "GNIS_Name": "Alkali Flat"
                }),
            ),
            (
                square(600.0, 0.0, 100.0),
                serde_json::json!({
                    "Permanent_Identifier": "w3",
                    "FCode": 43600,
                    "GNIS_Name": "Reservoir"
                }),
            ),
        ]),
    );
    write(
        &dir.join("lookup.csv"),
        "FCode,Type,Description\n\
         36100,Lake/Pond,Lake/Pond: Hydrographic Category = Perennial\n\
         39004,Playa,Playa\n",
    );
    write(
        &dir.join("hexagons.geojson"),
        &feature_collection(&[
            (square(0.0, 0.0, 200.0), serde_json::json!({ "Hex_ID": 1 })),
            (square(5_000.0, 5_000.0, 200.0), serde_json::json!({ "Hex_ID": 2 })),
        ]),
    );
    let config = dir.join("igde.yaml");
    write(
        &config,
        "state_boundary: state.geojson\n\
         lakes_playas:\n  waterbodies: waterbodies.geojson\n  lookup: lookup.csv\n\
         summary:\n  hexagons: hexagons.geojson\n",
    );
    config
}

// Test IDs: TCLI-001
#[test]
fn db_commands_cover_schema_migrate_integrity_backup_export() {
    let sandbox = unique_temp_dir("igde-cli-db");
    let config = sandbox.join("missing.yaml");
    let db = sandbox.join("NV_iGDE.sqlite3");
    let base = ["--config", path_str(&config), "--db", path_str(&db)];

    let before = run_json(base.iter().copied().chain(["db", "schema-version"]));
    assert_eq!(as_i64(&before, "current_version"), 0);
    assert_eq!(as_str(&before, "contract_version"), "cli.v1");

    let dry_run = run_json(base.iter().copied().chain(["db", "migrate", "--dry-run"]));
    assert_eq!(array_len(&dry_run, "would_apply_versions"), 1);
    assert!(dry_run.get("after_version").is_some_and(Value::is_null));
    let still_empty = run_json(base.iter().copied().chain(["db", "schema-version"]));
    assert_eq!(as_i64(&still_empty, "current_version"), 0);

    let migrate = run_json(base.iter().copied().chain(["db", "migrate"]));
    assert_eq!(as_i64(&migrate, "after_version"), 1);
    assert_eq!(migrate.get("up_to_date"), Some(&Value::Bool(true)));

    let integrity = run_json(base.iter().copied().chain(["db", "integrity-check"]));
    assert_eq!(integrity.get("healthy"), Some(&Value::Bool(true)));

    let backup_file = sandbox.join("backup.sqlite3");
    let backup_args = ["db", "backup", "--out", path_str(&backup_file)];
    let backup = run_json(base.iter().copied().chain(backup_args));
    assert_eq!(as_str(&backup, "status"), "ok");
    assert!(backup_file.exists());

    let export_dir = sandbox.join("export");
    let export_args = ["db", "export", "--out", path_str(&export_dir)];
    let export = run_json(base.iter().copied().chain(export_args));
    assert_eq!(as_i64(&export, "schema_version"), 1);
    assert!(export_dir.join("manifest.json").exists());

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-002
#[test]
fn template_and_layer_commands_describe_the_catalog() {
    let sandbox = unique_temp_dir("igde-cli-template");
    let config = sandbox.join("missing.yaml");
    let db = sandbox.join("NV_iGDE.sqlite3");
    let base = ["--config", path_str(&config), "--db", path_str(&db)];

    let created = run_json(base.iter().copied().chain(["template", "create"]));
    assert_eq!(array_len(&created, "layers"), 8);

    let again = run_igde(base.iter().copied().chain(["template", "create"]));
    assert!(!again.status.success());
    let overwritten = run_json(base.iter().copied().chain(["template", "create", "--overwrite"]));
    assert_eq!(overwritten.get("overwrite"), Some(&Value::Bool(true)));

    let listed = run_json(base.iter().copied().chain(["layer", "list"]));
    assert_eq!(array_len(&listed, "layers"), 8);

    let springs = run_json(base.iter().copied().chain(["layer", "show", "--name", "Springs"]));
    assert_eq!(as_str(&springs, "name"), "Springs");
    assert!(array_len(&springs, "fields") > 10);

    let unknown = run_igde(base.iter().copied().chain(["layer", "show", "--name", "Aquifers"]));
    assert!(!unknown.status.success());
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("layer Aquifers does not exist"));

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-003
#[test]
fn load_summarize_and_publish_run_from_a_config_file() {
    let sandbox = unique_temp_dir("igde-cli-pipeline");
    let config = write_lakes_workspace(&sandbox);
    let base = ["--config", path_str(&config)];

    run_json(base.iter().copied().chain(["template", "create"]));
    let first = run_json(base.iter().copied().chain(["load", "lakes-playas"]));
    assert_eq!(as_str(&first, "pass"), "lakes_playas");
    assert_eq!(as_i64(&first, "rows_appended"), 2);

    let rerun = run_json(base.iter().copied().chain(["load", "lakes-playas"]));
    assert_eq!(as_i64(&rerun, "rows_appended"), 0);
    let skipped = rerun
        .get("appends")
        .and_then(Value::as_array)
        .and_then(|appends| appends.first())
        .and_then(|append| append.get("skipped_duplicate"))
        .and_then(Value::as_bool);
    assert_eq!(skipped, Some(true));

    let summary = run_json(base.iter().copied().chain(["summarize", "--unit", "hexagon"]));
    assert_eq!(as_str(&summary, "layer"), "hexagon_units");
    assert_eq!(as_i64(&summary, "units"), 2);
    assert_eq!(as_i64(&summary, "units_with_evidence"), 1);

    let published = run_json(base.iter().copied().chain(["story-map", "publish"]));
    assert_eq!(array_len(&published, "layers"), 1);
    assert_eq!(array_len(&published, "missing_units"), 1);
    assert!(sandbox.join("NV_iGDE_StoryMap.sqlite3").exists());

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-004
#[test]
fn unconfigured_inputs_fail_without_touching_stdout() {
    let sandbox = unique_temp_dir("igde-cli-missing");
    let config = sandbox.join("igde.yaml");
    write(&config, "{}\n");

    let output = run_igde(["--config", path_str(&config), "load", "rivers"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("rivers.flowlines is not configured"));

    let bad_unit = run_igde(["--config", path_str(&config), "summarize", "--unit", "county"]);
    assert!(!bad_unit.status.success());

    let _ = fs::remove_dir_all(&sandbox);
}
