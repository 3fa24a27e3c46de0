//! The data-access contract the embedding application implements: a
//! synchronous, single-threaded `CellAddress`-based trait an evaluator runs
//! against to read cells and ranges.

use chrono::{Local, NaiveDateTime};

use crate::reference::CellAddress;
use crate::value::Value;

/// Implemented by the embedding application to answer cell and range reads.
///
/// `now`/`random` have default implementations backed by the real wall
/// clock and a real entropy source; test doubles override them for
/// determinism.
pub trait DataSource {
    /// Must return [`Value::Null`] for an unpopulated cell.
    fn get_cell_value(&self, address: &CellAddress) -> Value;

    /// Rectangular, row-major. `start`/`end` are already normalized
    /// (min/max) by the evaluator before this is called.
    fn get_range_values(&self, start: &CellAddress, end: &CellAddress) -> Vec<Vec<Value>>;

    /// Backs `NOW`/`TODAY`.
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    /// Backs `RAND`/`RANDBETWEEN`/`RANDARRAY`.
    fn random(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// The context an `evaluate` call runs against: the caller's
/// [`DataSource`] plus the current cell and default sheet id.
pub struct EvalContext<'a> {
    pub data: &'a dyn DataSource,
    /// Enables the zero-arg forms of `ROW`/`COLUMN`.
    pub current_cell: Option<CellAddress>,
    /// Default sheet for dependencies whose address omits a sheet name.
    pub sheet_id: String,
}

impl<'a> EvalContext<'a> {
    pub fn new(data: &'a dyn DataSource, sheet_id: impl Into<String>) -> Self {
        Self { data, current_cell: None, sheet_id: sheet_id.into() }
    }

    pub fn with_current_cell(mut self, address: CellAddress) -> Self {
        self.current_cell = Some(address);
        self
    }

    /// The sheet name to record in a dependency when `address` doesn't
    /// specify its own.
    pub fn sheet_for(&self, address: &CellAddress) -> String {
        address.sheet_name.clone().unwrap_or_else(|| self.sheet_id.clone())
    }
}

/// An in-memory grid, primarily useful for tests and simple embeddings.
/// Keys are zero-based `(sheet, row, column)` triples.
#[derive(Debug, Default, Clone)]
pub struct MemoryGrid {
    cells: std::collections::HashMap<(String, u32, u32), Value>,
    default_sheet: String,
}

impl MemoryGrid {
    pub fn new(default_sheet: impl Into<String>) -> Self {
        Self { cells: Default::default(), default_sheet: default_sheet.into() }
    }

    pub fn set(&mut self, address: CellAddress, value: Value) {
        let sheet = address.sheet_name.clone().unwrap_or_else(|| self.default_sheet.clone());
        self.cells.insert((sheet, address.row, address.column), value);
    }

    fn sheet_of<'s>(&'s self, address: &'s CellAddress) -> &'s str {
        address.sheet_name.as_deref().unwrap_or(&self.default_sheet)
    }
}

impl DataSource for MemoryGrid {
    fn get_cell_value(&self, address: &CellAddress) -> Value {
        let key = (self.sheet_of(address).to_string(), address.row, address.column);
        self.cells.get(&key).cloned().unwrap_or(Value::Null)
    }

    fn get_range_values(&self, start: &CellAddress, end: &CellAddress) -> Vec<Vec<Value>> {
        let (r0, r1) = (start.row.min(end.row), start.row.max(end.row));
        let (c0, c1) = (start.column.min(end.column), start.column.max(end.column));
        let sheet = self.sheet_of(start).to_string();
        (r0..=r1)
            .map(|row| {
                (c0..=c1)
                    .map(|col| self.cells.get(&(sheet.clone(), row, col)).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }
}
