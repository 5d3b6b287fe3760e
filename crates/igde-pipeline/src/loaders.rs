//! Source readers and writers: GeoJSON feature collections, CSV tables,
//! ESRI ASCII grids with their value attribute tables.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use geo_types::Geometry;
use geojson::{FeatureCollection, GeoJson};
use igde_core::{Attributes, Dataset, Feature, LayerKind, Raster, RasterClass, Value};

/// Read a GeoJSON feature collection. The layer kind follows the first geometry;
/// collections without geometry load as tables.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed, or mixes geometry kinds.
pub fn read_geojson(path: &Path) -> Result<Dataset> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to open input {}", path.display()))?;
    let geojson: GeoJson = text
        .parse()
        .with_context(|| format!("failed to parse GeoJSON {}", path.display()))?;
    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature::from(geometry)],
    };

    let mut kind: Option<LayerKind> = None;
    let mut fields: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(features.len());
    for (index, feature) in features.into_iter().enumerate() {
        let geometry = match feature.geometry {
            Some(geometry) => {
                let geometry = Geometry::<f64>::try_from(geometry).with_context(|| {
                    format!("failed to convert geometry of feature {index} in {}", path.display())
                })?;
                let feature_kind = kind_of(&geometry).ok_or_else(|| {
                    anyhow!("unsupported geometry in feature {index} of {}", path.display())
                })?;
                match kind {
                    None => kind = Some(feature_kind),
                    Some(current) if current == feature_kind => {}
                    Some(current) => bail!(
                        "{} mixes {} and {} geometries",
                        path.display(),
                        current.as_str(),
                        feature_kind.as_str()
                    ),
                }
                Some(geometry)
            }
            None => None,
        };

        let mut attributes = Attributes::new();
        for (name, value) in feature.properties.unwrap_or_default() {
            if !fields.contains(&name) {
                fields.push(name.clone());
            }
            attributes.insert(name, Value::from_json(&value));
        }
        rows.push(Feature { geometry, attributes });
    }

    let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    let mut dataset =
        Dataset::new(&stem(path), kind.unwrap_or(LayerKind::Table)).with_fields(&field_refs);
    for row in rows {
        dataset.push(row);
    }
    tracing::debug!(
        path = %path.display(),
        rows = dataset.len(),
        kind = dataset.kind().as_str(),
        "loaded GeoJSON"
    );
    Ok(dataset)
}

fn kind_of(geometry: &Geometry<f64>) -> Option<LayerKind> {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => Some(LayerKind::Point),
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            Some(LayerKind::Polyline)
        }
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => Some(LayerKind::Polygon),
        Geometry::GeometryCollection(_) => None,
    }
}

fn stem(path: &Path) -> String {
    path.file_stem().map_or_else(|| "input".to_string(), |stem| stem.to_string_lossy().into_owned())
}

/// Write a dataset as a GeoJSON feature collection with properties in field order.
///
/// # Errors
/// Returns an error when the file cannot be written.
pub fn write_geojson(path: &Path, dataset: &Dataset) -> Result<()> {
    let features = dataset
        .features()
        .iter()
        .map(|feature| {
            let mut properties = serde_json::Map::new();
            for field in dataset.fields() {
                properties.insert(field.clone(), feature.get(field).to_json());
            }
            geojson::Feature {
                bbox: None,
                geometry: feature
                    .geometry
                    .as_ref()
                    .map(|geometry| geojson::Geometry::new(geojson::Value::from(geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    let collection = FeatureCollection { bbox: None, features, foreign_members: None };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    let text = serde_json::to_string(&collection).context("failed to encode GeoJSON")?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = dataset.len(), "wrote GeoJSON");
    Ok(())
}

/// Read a delimited table. Cells are typed individually: blank → null, then integer,
/// then double, otherwise text.
///
/// # Errors
/// Returns an error when the file cannot be opened or a record is malformed.
pub fn read_csv_table(path: &Path) -> Result<Dataset> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open input {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();

    let mut dataset = Dataset::new(&stem(path), LayerKind::Table).with_fields(&header_refs);
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| {
            format!("failed to read record {} of {}", index + 1, path.display())
        })?;
        let mut feature = Feature::new(None);
        for (header, cell) in headers.iter().zip(record.iter()) {
            feature.set(header, parse_cell(cell));
        }
        dataset.push(feature);
    }
    tracing::debug!(path = %path.display(), rows = dataset.len(), "loaded CSV table");
    Ok(dataset)
}

fn parse_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Value::Integer(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Value::Double(value),
        _ => Value::Text(cell.to_string()),
    }
}

/// Integer column of a table as a code list; nulls and non-integers are skipped.
///
/// # Errors
/// Returns an error when the column is missing.
pub fn code_column(table: &Dataset, field: &str) -> Result<Vec<i64>> {
    table.require_fields(&[field])?;
    Ok(table.features().iter().filter_map(|row| row.get(field).as_i64()).collect())
}

/// Text column of a table; nulls are skipped.
///
/// # Errors
/// Returns an error when the column is missing.
pub fn text_column(table: &Dataset, field: &str) -> Result<Vec<String>> {
    table.require_fields(&[field])?;
    Ok(table.features().iter().filter_map(|row| row.get(field).render()).collect())
}

/// Read an ESRI ASCII grid, optionally with a value attribute table CSV keyed by
/// its `Value` column.
///
/// # Errors
/// Returns an error when the header or cell values are malformed.
pub fn read_raster(name: &str, grid: &Path, value_table: Option<&Path>) -> Result<Raster> {
    let text = std::fs::read_to_string(grid)
        .with_context(|| format!("failed to open input {}", grid.display()))?;
    let raster = parse_ascii_grid(name, &text)
        .with_context(|| format!("failed to parse grid {}", grid.display()))?;
    match value_table {
        Some(path) => Ok(raster.with_classes(read_value_table(path)?)),
        None => Ok(raster),
    }
}

/// Parse ESRI ASCII grid text. Both corner and center origins are accepted.
///
/// # Errors
/// Returns an error when a required header key is missing or a cell is not numeric.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_ascii_grid(name: &str, text: &str) -> Result<Raster> {
    let mut header: BTreeMap<String, f64> = BTreeMap::new();
    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.peek() {
        if token.parse::<f64>().is_ok() {
            break;
        }
        let key = token.to_ascii_lowercase();
        tokens.next();
        let value = tokens
            .next()
            .ok_or_else(|| anyhow!("header key {key} has no value"))?
            .parse::<f64>()
            .with_context(|| format!("header key {key} is not numeric"))?;
        header.insert(key, value);
    }

    let dimension = |key: &str| -> Result<usize> {
        let value = header.get(key).copied().ok_or_else(|| anyhow!("missing header key {key}"))?;
        if value < 0.0 || value.fract() != 0.0 {
            bail!("header key {key} must be a whole number, got {value}");
        }
        usize::try_from(value as i64).with_context(|| format!("header key {key} is out of range"))
    };
    let ncols = dimension("ncols")?;
    let nrows = dimension("nrows")?;
    let cell_size =
        header.get("cellsize").copied().ok_or_else(|| anyhow!("missing header key cellsize"))?;
    let origin = |corner: &str, center: &str| -> Result<f64> {
        match (header.get(corner), header.get(center)) {
            (Some(value), _) => Ok(*value),
            (None, Some(value)) => Ok(value - cell_size / 2.0),
            (None, None) => bail!("missing header key {corner}"),
        }
    };
    let x_origin = origin("xllcorner", "xllcenter")?;
    let y_origin = origin("yllcorner", "yllcenter")?;
    let nodata = header.get("nodata_value").copied();

    let mut cells = Vec::with_capacity(ncols * nrows);
    for token in tokens {
        let value: f64 =
            token.parse().with_context(|| format!("cell value {token:?} is not numeric"))?;
        if nodata.is_some_and(|nodata| (nodata - value).abs() < f64::EPSILON) {
            cells.push(None);
        } else if value.fract() == 0.0 && value.abs() < 9.0e15 {
            cells.push(Some(value as i64));
        } else {
            bail!("cell value {value} is not an integer class");
        }
    }
    Ok(Raster::new(name, (ncols, nrows), (x_origin, y_origin), cell_size, cells)?)
}

/// Value attribute table rows; the `Value` column (any case) keys each class.
///
/// # Errors
/// Returns an error when the table lacks a `Value` column or a key is not an integer.
pub fn read_value_table(path: &Path) -> Result<Vec<RasterClass>> {
    let table = read_csv_table(path)?;
    let key = table
        .fields()
        .iter()
        .find(|field| field.eq_ignore_ascii_case("value"))
        .cloned()
        .ok_or_else(|| anyhow!("value table {} has no Value column", path.display()))?;

    let mut classes = Vec::with_capacity(table.len());
    for (index, row) in table.features().iter().enumerate() {
        let value = row.get(&key).as_i64().ok_or_else(|| {
            anyhow!("row {} of {} has no integer Value", index + 1, path.display())
        })?;
        let attributes: Attributes = row
            .attributes
            .iter()
            .filter(|(name, _)| **name != key)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        classes.push(RasterClass { value, attributes });
    }
    Ok(classes)
}
