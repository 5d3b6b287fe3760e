use std::collections::BTreeMap;

use geo::{
    unary_union, Area, BooleanOps, BoundingRect, Buffer, Euclidean, Geometry, Intersects, Length,
    LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Rect,
};
use igde_core::{
    AreaUnit, Dataset, Feature, GeometryEngine, IgdeError, LayerKind, LengthUnit, Raster, Value,
};

/// Planar [`GeometryEngine`] backed by the `geo` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoEngine;

impl GeoEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl GeometryEngine for GeoEngine {
    fn dissolve(&self, dataset: &Dataset, by: &[&str]) -> Result<Dataset, IgdeError> {
        if !dataset.kind().is_spatial() {
            return Err(IgdeError::Geometry(format!("cannot dissolve table {}", dataset.name())));
        }
        dataset.require_fields(by)?;

        let mut order: Vec<Vec<Option<String>>> = Vec::new();
        let mut groups: BTreeMap<Vec<Option<String>>, (Feature, Vec<Geometry<f64>>)> =
            BTreeMap::new();
        for feature in dataset.features() {
            let Some(geometry) = feature.geometry.as_ref() else {
                continue;
            };
            let key: Vec<Option<String>> =
                by.iter().map(|field| feature.get(field).render()).collect();
            let entry = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                let mut head = Feature::new(None);
                for field in by {
                    head.set(field, feature.get(field).clone());
                }
                (head, Vec::new())
            });
            entry.1.push(geometry.clone());
        }

        let mut output = Dataset::new(dataset.name(), dataset.kind()).with_fields(by);
        for key in order {
            let Some((mut head, geometries)) = groups.remove(&key) else {
                continue;
            };
            head.geometry = merge_geometries(dataset.kind(), &geometries);
            if head.geometry.is_some() {
                output.push(head);
            }
        }
        tracing::debug!(
            layer = dataset.name(),
            input = dataset.len(),
            output = output.len(),
            "dissolved"
        );
        Ok(output)
    }

    fn intersect(&self, left: &Dataset, right: &Dataset) -> Result<Dataset, IgdeError> {
        require_polygons(right, "intersect")?;

        let mut fields: Vec<String> = left.fields().to_vec();
        let mut renames = Vec::with_capacity(right.fields().len());
        for field in right.fields() {
            let mut target = field.clone();
            let mut suffix = 1;
            while fields.contains(&target) {
                target = format!("{field}_{suffix}");
                suffix += 1;
            }
            fields.push(target.clone());
            renames.push((field.clone(), target));
        }
        let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();

        let right_shapes: Vec<(&Feature, MultiPolygon<f64>, Option<Rect<f64>>)> = right
            .features()
            .iter()
            .filter_map(|feature| {
                let shape = feature.geometry.as_ref().and_then(as_multi_polygon)?;
                let bounds = shape.bounding_rect();
                Some((feature, shape, bounds))
            })
            .collect();

        let mut output = Dataset::new(left.name(), left.kind()).with_fields(&field_refs);
        for feature in left.features() {
            let Some(geometry) = feature.geometry.as_ref() else {
                continue;
            };
            let bounds = geometry.bounding_rect();
            for (other, shape, other_bounds) in &right_shapes {
                if !rects_overlap(bounds, *other_bounds) {
                    continue;
                }
                let Some(piece) = overlay_inside(left.kind(), geometry, shape) else {
                    continue;
                };
                let mut joined = feature.clone();
                joined.geometry = Some(piece);
                for (source, target) in &renames {
                    joined.set(target, other.get(source).clone());
                }
                output.push(joined);
            }
        }
        Ok(output)
    }

    fn clip(&self, dataset: &Dataset, boundary: &Dataset) -> Result<Dataset, IgdeError> {
        require_polygons(boundary, "clip")?;
        let mask = union_polygons(boundary);
        let mask_bounds = mask.bounding_rect();
        let mut output = empty_like(dataset);
        for feature in dataset.features() {
            let Some(geometry) = feature.geometry.as_ref() else {
                continue;
            };
            if !rects_overlap(geometry.bounding_rect(), mask_bounds) {
                continue;
            }
            if let Some(piece) = overlay_inside(dataset.kind(), geometry, &mask) {
                let mut clipped = feature.clone();
                clipped.geometry = Some(piece);
                output.push(clipped);
            }
        }
        tracing::debug!(
            layer = dataset.name(),
            input = dataset.len(),
            output = output.len(),
            "clipped"
        );
        Ok(output)
    }

    fn erase(&self, dataset: &Dataset, mask: &Dataset) -> Result<Dataset, IgdeError> {
        require_polygons(mask, "erase")?;
        let mask = union_polygons(mask);
        let mask_bounds = mask.bounding_rect();
        let mut output = empty_like(dataset);
        for feature in dataset.features() {
            let Some(geometry) = feature.geometry.as_ref() else {
                continue;
            };
            let remaining = if rects_overlap(geometry.bounding_rect(), mask_bounds) {
                overlay_outside(dataset.kind(), geometry, &mask)
            } else {
                Some(geometry.clone())
            };
            if let Some(piece) = remaining {
                let mut erased = feature.clone();
                erased.geometry = Some(piece);
                output.push(erased);
            }
        }
        Ok(output)
    }

    fn buffer(&self, dataset: &Dataset, distance: f64) -> Result<Dataset, IgdeError> {
        if !(distance.is_finite() && distance > 0.0) {
            return Err(IgdeError::Geometry(format!("invalid buffer distance {distance}")));
        }
        if !dataset.kind().is_spatial() {
            return Err(IgdeError::Geometry(format!("cannot buffer table {}", dataset.name())));
        }
        let field_refs: Vec<&str> = dataset.fields().iter().map(String::as_str).collect();
        let mut output = Dataset::new(dataset.name(), LayerKind::Polygon).with_fields(&field_refs);
        for feature in dataset.features() {
            let Some(geometry) = feature.geometry.as_ref() else {
                continue;
            };
            let mut buffered = feature.clone();
            buffered.geometry = Some(Geometry::MultiPolygon(geometry.buffer(distance)));
            output.push(buffered);
        }
        Ok(output)
    }

    fn area(&self, geometry: &Geometry<f64>, unit: AreaUnit) -> f64 {
        unit.from_square_meters(geometry.unsigned_area())
    }

    fn length(&self, geometry: &Geometry<f64>, unit: LengthUnit) -> f64 {
        unit.from_meters(planar_length(geometry))
    }

    fn intersects(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
        a.intersects(b)
    }

    fn raster_to_polygon(&self, raster: &Raster, value_field: &str) -> Result<Dataset, IgdeError> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, (Value, Vec<Polygon<f64>>)> = BTreeMap::new();

        for row in 0..raster.nrows {
            let mut col = 0;
            while col < raster.ncols {
                let value =
                    raster.cell(row, col).and_then(|cell| raster.class_value(cell, value_field));
                let Some(value) = value else {
                    col += 1;
                    continue;
                };
                let Some(key) = value.render() else {
                    col += 1;
                    continue;
                };
                let start = col;
                col += 1;
                while col < raster.ncols
                    && raster.cell(row, col).and_then(|cell| raster.class_value(cell, value_field))
                        == Some(value.clone())
                {
                    col += 1;
                }
                let run = raster.run_bounds(row, start, col - start)?.to_polygon();
                groups
                    .entry(key.clone())
                    .or_insert_with(|| {
                        order.push(key);
                        (value, Vec::new())
                    })
                    .1
                    .push(run);
            }
        }

        let mut output = Dataset::new(&raster.name, LayerKind::Polygon).with_fields(&["gridcode"]);
        for key in order {
            let Some((value, runs)) = groups.remove(&key) else {
                continue;
            };
            let merged = unary_union(runs.iter());
            if merged.0.is_empty() {
                return Err(IgdeError::Geometry(format!(
                    "raster {} class {key} produced an empty polygon",
                    raster.name
                )));
            }
            output.push(
                Feature::new(Some(Geometry::MultiPolygon(merged))).with("gridcode", value),
            );
        }
        tracing::debug!(raster = %raster.name, classes = output.len(), "polygonized raster");
        Ok(output)
    }
}

fn require_polygons(dataset: &Dataset, operation: &str) -> Result<(), IgdeError> {
    if dataset.kind() == LayerKind::Polygon {
        Ok(())
    } else {
        Err(IgdeError::Geometry(format!(
            "{operation} requires a polygon layer but {} is {}",
            dataset.name(),
            dataset.kind().as_str()
        )))
    }
}

fn empty_like(dataset: &Dataset) -> Dataset {
    let fields: Vec<&str> = dataset.fields().iter().map(String::as_str).collect();
    Dataset::new(dataset.name(), dataset.kind()).with_fields(&fields)
}

/// Bounding boxes overlap or touch. Empty geometries overlap nothing.
fn rects_overlap(a: Option<Rect<f64>>, b: Option<Rect<f64>>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a.intersects(&b))
}

fn as_multi_polygon(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon.clone()])),
        Geometry::MultiPolygon(multi) => Some(multi.clone()),
        Geometry::Rect(rect) => Some(MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::Triangle(triangle) => Some(MultiPolygon::new(vec![triangle.to_polygon()])),
        Geometry::GeometryCollection(collection) => {
            let polygons: Vec<Polygon<f64>> = collection
                .iter()
                .filter_map(as_multi_polygon)
                .flat_map(|multi| multi.0)
                .collect();
            (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
        }
        _ => None,
    }
}

fn as_multi_line(geometry: &Geometry<f64>) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::Line(line) => {
            Some(MultiLineString::new(vec![LineString::from(vec![line.start, line.end])]))
        }
        Geometry::LineString(line) => Some(MultiLineString::new(vec![line.clone()])),
        Geometry::MultiLineString(multi) => Some(multi.clone()),
        Geometry::GeometryCollection(collection) => {
            let lines: Vec<LineString<f64>> = collection
                .iter()
                .filter_map(as_multi_line)
                .flat_map(|multi| multi.0)
                .collect();
            (!lines.is_empty()).then(|| MultiLineString::new(lines))
        }
        _ => None,
    }
}

fn as_points(geometry: &Geometry<f64>) -> Vec<Point<f64>> {
    match geometry {
        Geometry::Point(point) => vec![*point],
        Geometry::MultiPoint(multi) => multi.0.clone(),
        Geometry::GeometryCollection(collection) => collection.iter().flat_map(as_points).collect(),
        _ => Vec::new(),
    }
}

fn union_polygons(dataset: &Dataset) -> MultiPolygon<f64> {
    let shapes: Vec<MultiPolygon<f64>> = dataset
        .features()
        .iter()
        .filter_map(|feature| feature.geometry.as_ref().and_then(as_multi_polygon))
        .collect();
    unary_union(shapes.iter())
}

fn merge_geometries(kind: LayerKind, geometries: &[Geometry<f64>]) -> Option<Geometry<f64>> {
    match kind {
        LayerKind::Polygon => {
            let shapes: Vec<MultiPolygon<f64>> =
                geometries.iter().filter_map(as_multi_polygon).collect();
            let merged = unary_union(shapes.iter());
            (!merged.0.is_empty()).then_some(Geometry::MultiPolygon(merged))
        }
        LayerKind::Polyline => {
            let lines: Vec<LineString<f64>> =
                geometries.iter().filter_map(as_multi_line).flat_map(|multi| multi.0).collect();
            (!lines.is_empty()).then(|| Geometry::MultiLineString(MultiLineString::new(lines)))
        }
        LayerKind::Point => {
            let points: Vec<Point<f64>> = geometries.iter().flat_map(as_points).collect();
            (!points.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(points)))
        }
        LayerKind::Table => None,
    }
}

/// Part of `geometry` inside `mask`, or `None` when nothing remains.
fn overlay_inside(
    kind: LayerKind,
    geometry: &Geometry<f64>,
    mask: &MultiPolygon<f64>,
) -> Option<Geometry<f64>> {
    match kind {
        LayerKind::Polygon => {
            let shape = as_multi_polygon(geometry)?;
            let piece = shape.intersection(mask);
            (piece.unsigned_area() > 0.0).then_some(Geometry::MultiPolygon(piece))
        }
        LayerKind::Polyline => {
            let lines = as_multi_line(geometry)?;
            let piece = mask.clip(&lines, false);
            let piece = Geometry::MultiLineString(piece);
            (planar_length(&piece) > 0.0).then_some(piece)
        }
        LayerKind::Point => {
            let points: Vec<Point<f64>> =
                as_points(geometry).into_iter().filter(|point| mask.intersects(point)).collect();
            (!points.is_empty()).then(|| collapse_points(points))
        }
        LayerKind::Table => None,
    }
}

/// Part of `geometry` outside `mask`, or `None` when nothing remains.
fn overlay_outside(
    kind: LayerKind,
    geometry: &Geometry<f64>,
    mask: &MultiPolygon<f64>,
) -> Option<Geometry<f64>> {
    match kind {
        LayerKind::Polygon => {
            let shape = as_multi_polygon(geometry)?;
            let piece = shape.difference(mask);
            (piece.unsigned_area() > 0.0).then_some(Geometry::MultiPolygon(piece))
        }
        LayerKind::Polyline => {
            let lines = as_multi_line(geometry)?;
            let piece = Geometry::MultiLineString(mask.clip(&lines, true));
            (planar_length(&piece) > 0.0).then_some(piece)
        }
        LayerKind::Point => {
            let points: Vec<Point<f64>> =
                as_points(geometry).into_iter().filter(|point| !mask.intersects(point)).collect();
            (!points.is_empty()).then(|| collapse_points(points))
        }
        LayerKind::Table => None,
    }
}

fn collapse_points(mut points: Vec<Point<f64>>) -> Geometry<f64> {
    if points.len() == 1 {
        Geometry::Point(points.remove(0))
    } else {
        Geometry::MultiPoint(MultiPoint::new(points))
    }
}

/// Euclidean length of the linear parts; areal and point geometries have none.
fn planar_length(geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Line(line) => Euclidean.length(line),
        Geometry::LineString(line) => Euclidean.length(line),
        Geometry::MultiLineString(multi) => Euclidean.length(multi),
        Geometry::GeometryCollection(collection) => collection.iter().map(planar_length).sum(),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use geo::{line_string, point, polygon};

    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ])
    }

    fn layer(name: &str, kind: LayerKind, features: Vec<Feature>) -> Dataset {
        Dataset::from_features(name, kind, features)
    }

    fn approx(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-6, "expected {expected}, got {actual}");
    }

    #[test]
    fn dissolve_merges_by_attribute() -> Result<(), IgdeError> {
        let engine = GeoEngine::new();
        let dataset = layer(
            "phr",
            LayerKind::Polygon,
            vec![
                Feature::new(Some(square(0.0, 0.0, 10.0))).with("gridcode", 1_i64),
                Feature::new(Some(square(10.0, 0.0, 10.0))).with("gridcode", 1_i64),
                Feature::new(Some(square(50.0, 0.0, 10.0))).with("gridcode", 2_i64),
            ],
        );
        let dissolved = engine.dissolve(&dataset, &["gridcode"])?;
        assert_eq!(dissolved.len(), 2);
        let first = dissolved.features()[0].geometry.as_ref().map(|g| g.unsigned_area());
        assert_eq!(first.map(|area| area.round()), Some(200.0));

        let all = engine.dissolve(&dataset, &[])?;
        assert_eq!(all.len(), 1);
        assert!(all.fields().is_empty());
        Ok(())
    }

    #[test]
    fn intersect_keeps_both_attribute_sets() -> Result<(), IgdeError> {
        let engine = GeoEngine::new();
        let theme = layer(
            "wetlands",
            LayerKind::Polygon,
            vec![Feature::new(Some(square(5.0, 5.0, 10.0))).with("ID", 7_i64)],
        );
        let units = layer(
            "hexagons",
            LayerKind::Polygon,
            vec![
                Feature::new(Some(square(0.0, 0.0, 10.0))).with("Hex_ID", 1_i64).with("ID", 99_i64),
                Feature::new(Some(square(100.0, 100.0, 10.0))).with("Hex_ID", 2_i64),
            ],
        );
        let pieces = engine.intersect(&theme, &units)?;
        assert_eq!(pieces.len(), 1);
        let piece = &pieces.features()[0];
        assert_eq!(piece.get("Hex_ID"), &Value::Integer(1));
        assert_eq!(piece.get("ID"), &Value::Integer(7));
        assert_eq!(piece.get("ID_1"), &Value::Integer(99));
        approx(piece.geometry.as_ref().map_or(0.0, |g| g.unsigned_area()), 25.0);
        Ok(())
    }

    #[test]
    fn clip_and_erase_split_lines_at_the_boundary() -> Result<(), IgdeError> {
        let engine = GeoEngine::new();
        let boundary =
            layer("nv", LayerKind::Polygon, vec![Feature::new(Some(square(0.0, 0.0, 100.0)))]);
        let rivers = layer(
            "rivers",
            LayerKind::Polyline,
            vec![Feature::new(Some(Geometry::LineString(line_string![
                (x: -50.0, y: 50.0),
                (x: 50.0, y: 50.0),
            ])))
            .with("Permanent_Identifier", "a")],
        );
        let inside = engine.clip(&rivers, &boundary)?;
        let outside = engine.erase(&rivers, &boundary)?;
        assert_eq!(inside.len(), 1);
        assert_eq!(outside.len(), 1);
        let meters = |dataset: &Dataset| {
            let shape = dataset.features()[0].geometry.as_ref();
            shape.map_or(0.0, |g| engine.length(g, LengthUnit::Meters))
        };
        let inside_length = meters(&inside);
        let outside_length = meters(&outside);
        approx(inside_length, 50.0);
        approx(outside_length, 50.0);
        assert_eq!(inside.features()[0].get("Permanent_Identifier"), &Value::text("a"));
        Ok(())
    }

    #[test]
    fn erase_removes_polygon_overlap() -> Result<(), IgdeError> {
        let engine = GeoEngine::new();
        let lf = layer("lf", LayerKind::Polygon, vec![Feature::new(Some(square(0.0, 0.0, 10.0)))]);
        let tnc =
            layer("tnc", LayerKind::Polygon, vec![Feature::new(Some(square(5.0, 0.0, 10.0)))]);
        let remaining = engine.erase(&lf, &tnc)?;
        approx(
            remaining.features()[0].geometry.as_ref().map_or(0.0, |g| g.unsigned_area()),
            50.0,
        );

        let covered = engine.erase(&lf, &lf)?;
        assert!(covered.is_empty());
        Ok(())
    }

    #[test]
    fn clip_keeps_points_inside_only() -> Result<(), IgdeError> {
        let engine = GeoEngine::new();
        let boundary =
            layer("nv", LayerKind::Polygon, vec![Feature::new(Some(square(0.0, 0.0, 10.0)))]);
        let springs = layer(
            "springs",
            LayerKind::Point,
            vec![
                Feature::new(Some(Geometry::Point(point!(x: 5.0, y: 5.0)))),
                Feature::new(Some(Geometry::Point(point!(x: 50.0, y: 5.0)))),
            ],
        );
        assert_eq!(engine.clip(&springs, &boundary)?.len(), 1);
        assert!(engine.clip(&boundary, &springs).is_err());
        Ok(())
    }

    #[test]
    fn buffer_turns_points_into_polygons() -> Result<(), IgdeError> {
        let engine = GeoEngine::new();
        let points = layer(
            "nnhp_points",
            LayerKind::Point,
            vec![Feature::new(Some(Geometry::Point(point!(x: 0.0, y: 0.0)))).with("SNAME", "x y")],
        );
        let buffered = engine.buffer(&points, 5.0)?;
        assert_eq!(buffered.kind(), LayerKind::Polygon);
        let area = buffered.features()[0].geometry.as_ref().map_or(0.0, |g| g.unsigned_area());
        assert!(area > 70.0 && area < 80.0, "circle of radius 5 has area ~78.5, got {area}");
        assert!(engine.buffer(&points, 0.0).is_err());
        Ok(())
    }

    #[test]
    fn area_and_length_convert_units() {
        let engine = GeoEngine::new();
        let acre_square = square(0.0, 0.0, acre_side());
        approx(engine.area(&acre_square, AreaUnit::Acres), 1.0);
        let mile =
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1_609.347_218_694_4, y: 0.0)]);
        approx(engine.length(&mile, LengthUnit::Miles), 1.0);
        approx(engine.length(&acre_square, LengthUnit::Meters), 0.0);
    }

    #[test]
    fn lengths_sum_every_part_of_a_multiline() {
        let engine = GeoEngine::new();
        let parts = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 3.0, y: 4.0)],
            line_string![(x: 10.0, y: 0.0), (x: 10.0, y: 2.0), (x: 12.0, y: 2.0)],
        ]));
        approx(engine.length(&parts, LengthUnit::Meters), 9.0);
        approx(engine.length(&Geometry::Point(point!(x: 1.0, y: 1.0)), LengthUnit::Meters), 0.0);
    }

    #[test]
    fn boxes_sharing_an_edge_overlap() {
        let left = square(0.0, 0.0, 10.0).bounding_rect();
        let touching = square(10.0, 0.0, 10.0).bounding_rect();
        let apart = square(10.5, 0.0, 10.0).bounding_rect();
        assert!(rects_overlap(left, touching));
        assert!(!rects_overlap(left, apart));
        assert!(!rects_overlap(left, None));
    }

    fn acre_side() -> f64 {
        4_046.856_422_4_f64.sqrt()
    }

    #[test]
    fn raster_cells_merge_into_one_polygon_per_class() -> Result<(), IgdeError> {
        let engine = GeoEngine::new();
        let raster = Raster::new(
            "tnc_spring_mtns",
            (3, 2),
            (0.0, 0.0),
            10.0,
            vec![Some(11551), Some(11551), None, Some(11551), Some(10542), Some(10542)],
        )?;
        let polygons = engine.raster_to_polygon(&raster, "Value")?;
        assert_eq!(polygons.len(), 2);
        let areas: Vec<(Option<i64>, f64)> = polygons
            .features()
            .iter()
            .map(|f| {
                (f.get("gridcode").as_i64(), f.geometry.as_ref().map_or(0.0, |g| g.unsigned_area()))
            })
            .collect();
        assert_eq!(areas[0].0, Some(11551));
        approx(areas[0].1, 300.0);
        assert_eq!(areas[1].0, Some(10542));
        approx(areas[1].1, 200.0);
        Ok(())
    }
}
