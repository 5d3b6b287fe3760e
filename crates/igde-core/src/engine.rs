use geo_types::{coord, Geometry, Rect};
use serde::{Deserialize, Serialize};

use crate::{Attributes, Dataset, FilterOutcome, IgdeError, Value};

pub const SQUARE_METERS_PER_ACRE: f64 = 4_046.856_422_4;
pub const METERS_PER_US_SURVEY_MILE: f64 = 1_609.347_218_694_4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    SquareMeters,
    Acres,
}

impl AreaUnit {
    #[must_use]
    pub fn from_square_meters(self, square_meters: f64) -> f64 {
        match self {
            Self::SquareMeters => square_meters,
            Self::Acres => square_meters / SQUARE_METERS_PER_ACRE,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    Meters,
    Miles,
}

impl LengthUnit {
    #[must_use]
    pub fn from_meters(self, meters: f64) -> f64 {
        match self {
            Self::Meters => meters,
            Self::Miles => meters / METERS_PER_US_SURVEY_MILE,
        }
    }
}

/// One row of a raster value attribute table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RasterClass {
    pub value: i64,
    pub attributes: Attributes,
}

/// Integer-classified grid. Row 0 is the northern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub name: String,
    pub ncols: usize,
    pub nrows: usize,
    pub x_origin: f64,
    pub y_origin: f64,
    pub cell_size: f64,
    cells: Vec<Option<i64>>,
    classes: Option<Vec<RasterClass>>,
}

impl Raster {
    /// `x_origin`/`y_origin` are the lower-left corner of the grid.
    ///
    /// # Errors
    /// Returns [`IgdeError::Input`] when the dimensions overflow, the cell count does
    /// not match them, or the cell size is not positive.
    pub fn new(
        name: &str,
        (ncols, nrows): (usize, usize),
        (x_origin, y_origin): (f64, f64),
        cell_size: f64,
        cells: Vec<Option<i64>>,
    ) -> Result<Self, IgdeError> {
        let expected = ncols.checked_mul(nrows).ok_or_else(|| {
            IgdeError::Input(format!("raster {name} dimensions {ncols}x{nrows} overflow"))
        })?;
        if cells.len() != expected {
            return Err(IgdeError::Input(format!(
                "raster {name} declares {ncols}x{nrows} cells but holds {}",
                cells.len()
            )));
        }
        if cell_size <= 0.0 || !cell_size.is_finite() {
            return Err(IgdeError::Input(format!(
                "raster {name} has invalid cell size {cell_size}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            ncols,
            nrows,
            x_origin,
            y_origin,
            cell_size,
            cells,
            classes: None,
        })
    }

    #[must_use]
    pub fn with_classes(mut self, classes: Vec<RasterClass>) -> Self {
        self.classes = Some(classes);
        self
    }

    #[must_use]
    pub fn classes(&self) -> Option<&[RasterClass]> {
        self.classes.as_deref()
    }

    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> Option<i64> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        self.cells.get(row * self.ncols + col).copied().flatten()
    }

    /// Ground footprint of `cols` consecutive cells starting at (`row`, `col`).
    ///
    /// # Errors
    /// Returns [`IgdeError::Input`] when the run does not lie inside the grid.
    #[allow(clippy::cast_precision_loss)]
    pub fn run_bounds(&self, row: usize, col: usize, cols: usize) -> Result<Rect<f64>, IgdeError> {
        let rows_above = self.nrows.checked_sub(row).filter(|rows| *rows > 0);
        let end = col.checked_add(cols).filter(|end| *end <= self.ncols);
        let (Some(rows_above), Some(_)) = (rows_above, end) else {
            return Err(IgdeError::Input(format!(
                "raster {} has no run of {cols} cells at row {row}, column {col}",
                self.name
            )));
        };
        let top = self.y_origin + rows_above as f64 * self.cell_size;
        let left = self.x_origin + col as f64 * self.cell_size;
        Ok(Rect::new(
            coord! { x: left, y: top - self.cell_size },
            coord! { x: left + cols as f64 * self.cell_size, y: top },
        ))
    }

    /// Keep only attribute-table rows accepted by `keep`. Cells of dropped classes
    /// no longer produce polygons. Without an attribute table this is a no-op.
    pub fn retain_classes<F>(&mut self, mut keep: F) -> FilterOutcome
    where
        F: FnMut(&RasterClass) -> bool,
    {
        let Some(classes) = self.classes.as_mut() else {
            return FilterOutcome { kept: 0, removed: 0 };
        };
        let before = classes.len();
        classes.retain(|class| keep(class));
        FilterOutcome { kept: classes.len(), removed: before - classes.len() }
    }

    /// Output value for a cell: the raw value for `"Value"`, otherwise the named
    /// attribute of the matching class. `None` excludes the cell.
    #[must_use]
    pub fn class_value(&self, cell: i64, value_field: &str) -> Option<Value> {
        match &self.classes {
            Some(classes) => {
                let class = classes.iter().find(|class| class.value == cell)?;
                if value_field == "Value" {
                    return Some(Value::Integer(cell));
                }
                class.attributes.get(value_field).filter(|value| !value.is_null()).cloned()
            }
            None if value_field == "Value" => Some(Value::Integer(cell)),
            None => None,
        }
    }
}

/// Geometry capability the pipeline depends on. Implementations must be planar in the
/// dataset's projected reference.
pub trait GeometryEngine {
    /// Merge features sharing the `by` values into one feature per group. With no
    /// fields every feature merges into one. Output carries only the `by` fields.
    ///
    /// # Errors
    /// Returns [`IgdeError::Geometry`] when the dataset geometry cannot be merged.
    fn dissolve(&self, dataset: &Dataset, by: &[&str]) -> Result<Dataset, IgdeError>;

    /// Pairwise overlay keeping attributes from both sides (right-hand name
    /// collisions receive a `_1` suffix). Output kind follows `left`.
    ///
    /// # Errors
    /// Returns [`IgdeError::Geometry`] when `right` is not a polygon layer.
    fn intersect(&self, left: &Dataset, right: &Dataset) -> Result<Dataset, IgdeError>;

    /// Keep the parts of each feature inside the boundary; attributes are unchanged.
    ///
    /// # Errors
    /// Returns [`IgdeError::Geometry`] when `boundary` is not a polygon layer.
    fn clip(&self, dataset: &Dataset, boundary: &Dataset) -> Result<Dataset, IgdeError>;

    /// Remove the parts of each feature covered by `mask`.
    ///
    /// # Errors
    /// Returns [`IgdeError::Geometry`] when `mask` is not a polygon layer.
    fn erase(&self, dataset: &Dataset, mask: &Dataset) -> Result<Dataset, IgdeError>;

    /// Polygon buffer of every feature by `distance` meters.
    ///
    /// # Errors
    /// Returns [`IgdeError::Geometry`] when the distance is not positive.
    fn buffer(&self, dataset: &Dataset, distance: f64) -> Result<Dataset, IgdeError>;

    fn area(&self, geometry: &Geometry<f64>, unit: AreaUnit) -> f64;

    fn length(&self, geometry: &Geometry<f64>, unit: LengthUnit) -> f64;

    fn intersects(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> bool;

    /// One polygon feature per distinct output value with the value in `gridcode`.
    ///
    /// # Errors
    /// Returns [`IgdeError::Geometry`] when the cell footprints cannot be merged.
    fn raster_to_polygon(&self, raster: &Raster, value_field: &str) -> Result<Dataset, IgdeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Result<Raster, IgdeError> {
        Raster::new("tnc", (2, 2), (100.0, 200.0), 30.0, vec![Some(1), None, Some(2), Some(2)])
    }

    #[test]
    fn unit_conversions_use_fixed_factors() {
        assert!((AreaUnit::Acres.from_square_meters(SQUARE_METERS_PER_ACRE) - 1.0).abs() < 1e-12);
        assert!((LengthUnit::Miles.from_meters(METERS_PER_US_SURVEY_MILE) - 1.0).abs() < 1e-12);
        assert!((AreaUnit::SquareMeters.from_square_meters(5.0) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn raster_rejects_inconsistent_dimensions() {
        assert!(Raster::new("bad", (3, 2), (0.0, 0.0), 30.0, vec![None; 5]).is_err());
        assert!(Raster::new("bad", (1, 1), (0.0, 0.0), 0.0, vec![None]).is_err());
    }

    #[test]
    fn oversized_headers_and_runs_outside_the_grid_are_errors() -> Result<(), IgdeError> {
        assert!(Raster::new("huge", (usize::MAX, 2), (0.0, 0.0), 30.0, Vec::new()).is_err());
        let raster = grid()?;
        assert!(raster.run_bounds(2, 0, 1).is_err());
        assert!(raster.run_bounds(5, 0, 1).is_err());
        assert!(raster.run_bounds(0, 1, 2).is_err());
        assert!(raster.run_bounds(0, usize::MAX, 2).is_err());
        Ok(())
    }

    #[test]
    fn row_zero_is_the_northern_edge() -> Result<(), IgdeError> {
        let raster = grid()?;
        let top = raster.run_bounds(0, 0, 1)?;
        assert!((top.max().y - 260.0).abs() < f64::EPSILON);
        assert!((top.min().y - 230.0).abs() < f64::EPSILON);
        let bottom_row = raster.run_bounds(1, 0, 2)?;
        assert!((bottom_row.width() - 60.0).abs() < f64::EPSILON);
        assert_eq!(raster.cell(0, 1), None);
        assert_eq!(raster.cell(1, 1), Some(2));
        Ok(())
    }

    #[test]
    fn class_table_controls_output_values() -> Result<(), IgdeError> {
        let mut raster = grid()?.with_classes(vec![
            RasterClass {
                value: 1,
                attributes: Attributes::from([("BPS_CODE".to_string(), Value::Integer(10800))]),
            },
            RasterClass {
                value: 2,
                attributes: Attributes::from([("BPS_CODE".to_string(), Value::Integer(11530))]),
            },
        ]);
        assert_eq!(raster.class_value(1, "BPS_CODE"), Some(Value::Integer(10800)));
        let outcome = raster.retain_classes(|class| class.value != 1);
        assert_eq!(outcome.removed, 1);
        assert_eq!(raster.class_value(1, "BPS_CODE"), None);
        assert_eq!(raster.class_value(2, "Value"), Some(Value::Integer(2)));
        Ok(())
    }
}
