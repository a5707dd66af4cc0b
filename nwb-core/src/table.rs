//! Row-indexed tables over polars frames
//!
//! A `Table` is a polars `DataFrame` plus what a frame does not carry: a row
//! index (named, like `id` or `timestamps`, or a default range) and the set of
//! columns whose strings name other containers in the document (links).
//! Tables are values: every transformation returns a new table and leaves the
//! receiver untouched.
//!
//! Persisted tables are Arrow IPC frames with the index stored as the first
//! column, so dtypes, nulls and nested lists survive a write / read cycle.

use std::collections::{BTreeSet, HashSet};
use std::io::Cursor;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{NwbError, Result};

/// Column name the index is stored under in a persisted frame.
const STORED_INDEX: &str = "__index__";

#[derive(Debug, Clone)]
pub struct Table {
    index_name: Option<String>,
    index: Series,
    frame: DataFrame,
    links: BTreeSet<String>,
}

fn range_index(len: usize) -> Series {
    Series::new("".into(), (0..len as i64).collect::<Vec<i64>>())
}

impl Table {
    /// Table with a default range index.
    pub fn new(columns: Vec<Series>) -> Result<Self> {
        let len = columns.first().map(|c| c.len()).unwrap_or(0);
        Self::build(None, range_index(len), columns)
    }

    /// Table indexed by `index`, which takes the name `name`.
    pub fn with_index(name: &str, index: Series, columns: Vec<Series>) -> Result<Self> {
        Self::build(Some(name.to_string()), index.with_name(name.into()), columns)
    }

    fn build(index_name: Option<String>, index: Series, columns: Vec<Series>) -> Result<Self> {
        for column in &columns {
            if column.len() != index.len() {
                return Err(NwbError::schema(format!(
                    "column '{}' has {} rows, index has {}",
                    column.name(),
                    column.len(),
                    index.len()
                )));
            }
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name() == column.name()) {
                return Err(NwbError::schema(format!("duplicate column '{}'", column.name())));
            }
        }
        let frame = DataFrame::new(columns.into_iter().map(Column::from).collect())?;
        Ok(Self {
            index_name,
            index,
            frame,
            links: BTreeSet::new(),
        })
    }

    pub fn empty() -> Self {
        Self {
            index_name: None,
            index: range_index(0),
            frame: DataFrame::empty(),
            links: BTreeSet::new(),
        }
    }

    /// `None` for a default range index.
    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn index(&self) -> &Series {
        &self.index
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Series> + '_ {
        self.frame
            .get_columns()
            .iter()
            .map(Column::as_materialized_series)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.frame
            .get_columns()
            .iter()
            .map(|c| c.name().as_str())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&Series> {
        self.columns().find(|s| s.name().as_str() == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Series> {
        self.column(name)
            .ok_or_else(|| NwbError::schema(format!("missing required column '{}'", name)))
    }

    pub fn is_link(&self, name: &str) -> bool {
        self.links.contains(name)
    }

    /// The same row index with no columns.
    pub fn index_only(&self) -> Table {
        Table {
            index_name: self.index_name.clone(),
            index: self.index.clone(),
            frame: DataFrame::empty(),
            links: BTreeSet::new(),
        }
    }

    /// Replace the column of the same name in place, or append it.
    pub fn with_column(mut self, column: Series) -> Result<Self> {
        if column.len() != self.num_rows() {
            return Err(NwbError::schema(format!(
                "column '{}' has {} rows, table has {}",
                column.name(),
                column.len(),
                self.num_rows()
            )));
        }
        self.links.remove(column.name().as_str());
        self.frame.with_column(column)?;
        Ok(self)
    }

    /// `with_column` for a string column naming other containers.
    pub fn with_link_column(self, column: Series) -> Result<Self> {
        if column.dtype() != &DataType::String {
            return Err(NwbError::schema(format!(
                "link column '{}' must hold strings, not {}",
                column.name(),
                column.dtype()
            )));
        }
        let name = column.name().to_string();
        let mut table = self.with_column(column)?;
        table.links.insert(name);
        Ok(table)
    }

    pub fn without_column(mut self, name: &str) -> Self {
        if self.frame.drop_in_place(name).is_ok() {
            self.links.remove(name);
        }
        self
    }

    /// Promote an integer key column to the index, mapping each key through `map_id`.
    ///
    /// The key column is removed from the value columns. Missing, null,
    /// non-integer or duplicate keys (after mapping) are schema errors.
    pub fn set_index_with<F>(&self, key: &str, map_id: F) -> Result<Table>
    where
        F: Fn(i64, usize) -> i64,
    {
        let keys = to_i64_options(self.require_column(key)?)?;
        let mut ids = Vec::with_capacity(keys.len());
        let mut seen = HashSet::with_capacity(keys.len());
        for (row, value) in keys.into_iter().enumerate() {
            let raw = value.ok_or_else(|| {
                NwbError::schema(format!("key column '{}' row {} is null", key, row))
            })?;
            let id = map_id(raw, row);
            if !seen.insert(id) {
                return Err(NwbError::schema(format!(
                    "key column '{}' has duplicate id {}",
                    key, id
                )));
            }
            ids.push(id);
        }

        let mut table = self.clone().without_column(key);
        table.index_name = Some(key.to_string());
        table.index = Series::new(key.into(), ids);
        Ok(table)
    }

    pub fn set_index(&self, key: &str) -> Result<Table> {
        self.set_index_with(key, |id, _| id)
    }

    /// Describe the first difference between two tables, or `None` when equivalent.
    ///
    /// Column order, index name, index values and link columns always count;
    /// dtype only when `options.check_dtype` is set.
    pub fn diff(&self, other: &Table, options: &CompareOptions) -> Option<String> {
        if self.column_names() != other.column_names() {
            return Some(format!(
                "columns differ: {:?} vs {:?}",
                self.column_names(),
                other.column_names()
            ));
        }
        if self.index_name != other.index_name {
            return Some(format!(
                "index names differ: {:?} vs {:?}",
                self.index_name, other.index_name
            ));
        }
        if self.num_rows() != other.num_rows() {
            return Some(format!(
                "row counts differ: {} vs {}",
                self.num_rows(),
                other.num_rows()
            ));
        }
        if self.links != other.links {
            return Some(format!(
                "link columns differ: {:?} vs {:?}",
                self.links, other.links
            ));
        }
        if let Some(diff) = series_diff(&self.index, &other.index, options) {
            return Some(format!("index {}", diff));
        }
        self.columns()
            .zip(other.columns())
            .find_map(|(left, right)| {
                series_diff(left, right, options)
                    .map(|diff| format!("column '{}' {}", left.name(), diff))
            })
    }

    fn to_stored(&self) -> Result<StoredTable> {
        let mut columns = Vec::with_capacity(self.frame.width() + 1);
        columns.push(Column::from(self.index.clone().with_name(STORED_INDEX.into())));
        columns.extend(self.frame.get_columns().iter().cloned());
        Ok(StoredTable {
            index_name: self.index_name.clone(),
            links: self.links.clone(),
            frame: write_ipc(DataFrame::new(columns)?)?,
        })
    }

    fn from_stored(stored: StoredTable) -> Result<Self> {
        let mut frame = read_ipc(&stored.frame)?;
        let index = frame
            .drop_in_place(STORED_INDEX)?
            .as_materialized_series()
            .clone();
        let name = stored.index_name.clone().unwrap_or_default();
        Ok(Self {
            index: index.with_name(name.as_str().into()),
            index_name: stored.index_name,
            frame,
            links: stored.links,
        })
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.diff(other, &CompareOptions::exact()).is_none()
    }
}

/// Options for `Table::diff`.
#[derive(Debug, Clone, Copy)]
pub struct CompareOptions {
    pub check_dtype: bool,
    /// Relative tolerance for floats, floored at absolute for magnitudes below one.
    pub tolerance: f64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            check_dtype: true,
            tolerance: 1e-6,
        }
    }
}

impl CompareOptions {
    pub fn ignore_dtype() -> Self {
        Self {
            check_dtype: false,
            ..Self::default()
        }
    }

    pub fn exact() -> Self {
        Self {
            check_dtype: true,
            tolerance: 0.0,
        }
    }
}

fn is_numeric(dtype: &DataType) -> bool {
    dtype.is_integer() || dtype.is_float() || dtype == &DataType::Boolean
}

fn float_values(series: &Series) -> Result<Vec<Option<f64>>> {
    Ok(series.cast(&DataType::Float64)?.f64()?.into_iter().collect())
}

fn floats_close(a: f64, b: f64, tolerance: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a == b {
        return true;
    }
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

/// First difference between two series, or `None` when equivalent.
///
/// Numeric series compare as floats within `options.tolerance`; lists compare
/// element by element.
pub fn series_diff(left: &Series, right: &Series, options: &CompareOptions) -> Option<String> {
    if left.len() != right.len() {
        return Some(format!("has {} vs {} rows", left.len(), right.len()));
    }
    if options.check_dtype && left.dtype() != right.dtype() {
        return Some(format!("dtype differs: {} vs {}", left.dtype(), right.dtype()));
    }

    if is_numeric(left.dtype()) && is_numeric(right.dtype()) {
        let (a, b) = match (float_values(left), float_values(right)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return Some(e.to_string()),
        };
        return a
            .iter()
            .zip(&b)
            .enumerate()
            .find(|(_, (x, y))| match (x, y) {
                (None, None) => false,
                (Some(x), Some(y)) => !floats_close(*x, *y, options.tolerance),
                _ => true,
            })
            .map(|(row, (x, y))| format!("row {} differs: {:?} vs {:?}", row, x, y));
    }

    if left.dtype() != right.dtype() {
        return Some(format!("dtype differs: {} vs {}", left.dtype(), right.dtype()));
    }

    if let (Ok(a), Ok(b)) = (left.list(), right.list()) {
        for (row, (x, y)) in a.into_iter().zip(b.into_iter()).enumerate() {
            match (x, y) {
                (None, None) => {}
                (Some(x), Some(y)) => {
                    if let Some(diff) = series_diff(&x, &y, options) {
                        return Some(format!("row {} {}", row, diff));
                    }
                }
                (x, y) => return Some(format!("row {} differs: {:?} vs {:?}", row, x, y)),
            }
        }
        return None;
    }

    (0..left.len()).find_map(|row| {
        let (x, y) = (left.get(row).ok()?, right.get(row).ok()?);
        (x != y).then(|| format!("row {} differs: {} vs {}", row, x, y))
    })
}

/// Microsecond UTC datetime series.
pub fn datetime_series(name: &str, values: Vec<Option<DateTime<Utc>>>) -> Result<Series> {
    let micros: Vec<Option<i64>> = values
        .into_iter()
        .map(|t| t.map(|t| t.timestamp_micros()))
        .collect();
    Ok(Series::new(name.into(), micros).cast(&DataType::Datetime(TimeUnit::Microseconds, None))?)
}

/// Numeric contents as `f64`; nulls and non-numeric series are a schema error.
pub fn to_f64_vec(series: &Series) -> Result<Vec<f64>> {
    if !is_numeric(series.dtype()) {
        return Err(NwbError::schema(format!(
            "column '{}' is {}, not numeric",
            series.name(),
            series.dtype()
        )));
    }
    float_values(series)?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                NwbError::schema(format!("column '{}' row {} is null", series.name(), row))
            })
        })
        .collect()
}

/// Integer contents widened to `i64`; non-integer series are a schema error.
pub fn to_i64_options(series: &Series) -> Result<Vec<Option<i64>>> {
    if !series.dtype().is_integer() {
        return Err(NwbError::schema(format!(
            "column '{}' is {}, not an integer column",
            series.name(),
            series.dtype()
        )));
    }
    Ok(series.cast(&DataType::Int64)?.i64()?.into_iter().collect())
}

/// String contents; non-string series are a schema error.
pub fn to_string_options(series: &Series) -> Result<Vec<Option<String>>> {
    if series.dtype() != &DataType::String {
        return Err(NwbError::schema(format!(
            "column '{}' is {}, not a string column",
            series.name(),
            series.dtype()
        )));
    }
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Serialize, Deserialize)]
struct StoredTable {
    index_name: Option<String>,
    links: BTreeSet<String>,
    /// Arrow IPC file: the index under `STORED_INDEX`, then the columns.
    frame: Vec<u8>,
}

fn write_ipc(mut frame: DataFrame) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    IpcWriter::new(&mut bytes).finish(&mut frame)?;
    Ok(bytes)
}

fn read_ipc(bytes: &[u8]) -> Result<DataFrame> {
    Ok(IpcReader::new(Cursor::new(bytes.to_vec())).finish()?)
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_stored()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Table {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredTable::deserialize(deserializer)?;
        Table::from_stored(stored).map_err(de::Error::custom)
    }
}

/// Serde adapter storing a single `Series` as a one-column Arrow IPC frame.
pub mod series_serde {
    use super::*;

    pub fn serialize<S: Serializer>(series: &Series, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let frame = DataFrame::new(vec![Column::from(series.clone())]).map_err(ser::Error::custom)?;
        write_ipc(frame)
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Series, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let frame = read_ipc(&bytes).map_err(de::Error::custom)?;
        frame
            .get_columns()
            .first()
            .map(|c| c.as_materialized_series().clone())
            .ok_or_else(|| de::Error::custom("stored series has no column"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Table {
        Table::new(vec![
            Series::new("id".into(), &[1i64, 2, 3]),
            Series::new("probe_id".into(), &[10i64, 10, 20]),
        ])
        .unwrap()
    }

    // ========================================================================
    // TEST 1: set_index moves the key out of the value columns
    // ========================================================================
    #[test]
    fn test_set_index_removes_key_column() {
        let table = channels();
        let indexed = table.set_index("id").unwrap();

        assert_eq!(indexed.column_names(), vec!["probe_id"]);
        assert_eq!(indexed.index_name(), Some("id"));
        assert_eq!(to_i64_options(indexed.index()).unwrap(), vec![Some(1), Some(2), Some(3)]);
        // receiver untouched
        assert_eq!(table.column_names(), vec!["id", "probe_id"]);
    }

    // ========================================================================
    // TEST 2: duplicate, missing, null or non-integer keys are schema errors
    // ========================================================================
    #[test]
    fn test_set_index_rejects_bad_keys() {
        let dupes = Table::new(vec![Series::new("id".into(), &[1i64, 1])]).unwrap();
        assert!(matches!(dupes.set_index("id"), Err(NwbError::Schema(_))));

        assert!(matches!(channels().set_index("nope"), Err(NwbError::Schema(_))));

        let nulls = Table::new(vec![Series::new("id".into(), &[Some(1i64), None])]).unwrap();
        assert!(matches!(nulls.set_index("id"), Err(NwbError::Schema(_))));

        let floats = Table::new(vec![Series::new("id".into(), &[1.0f64, 2.0])]).unwrap();
        assert!(matches!(floats.set_index("id"), Err(NwbError::Schema(_))));
    }

    // ========================================================================
    // TEST 3: with_column replaces in place and keeps position
    // ========================================================================
    #[test]
    fn test_with_column_replaces_in_place() {
        let table = Table::new(vec![
            Series::new("x".into(), &[5.0f64, 6.0]),
            Series::new("probe_id".into(), &[1i64, 2]),
        ])
        .unwrap();

        let table = table
            .with_column(Series::new("x".into(), &[-1.0f64, -1.0]))
            .unwrap()
            .with_column(Series::new("location".into(), &["null", "null"]))
            .unwrap();

        assert_eq!(table.column_names(), vec!["x", "probe_id", "location"]);
        assert_eq!(to_f64_vec(table.column("x").unwrap()).unwrap(), vec![-1.0, -1.0]);
    }

    // ========================================================================
    // TEST 4: mismatched column lengths are rejected
    // ========================================================================
    #[test]
    fn test_length_mismatch_is_schema_error() {
        let result = Table::new(vec![
            Series::new("a".into(), &[1i64, 2]),
            Series::new("b".into(), &[1i64]),
        ]);
        assert!(matches!(result, Err(NwbError::Schema(_))));

        let short = Series::new("c".into(), &[1i64]);
        assert!(matches!(channels().with_column(short), Err(NwbError::Schema(_))));
    }

    // ========================================================================
    // TEST 5: diff honours dtype only when asked
    // ========================================================================
    #[test]
    fn test_diff_dtype_sensitivity() {
        let ints = Table::new(vec![Series::new("volume".into(), &[1i64, 2])]).unwrap();
        let floats = Table::new(vec![Series::new("volume".into(), &[1.0f64, 2.0])]).unwrap();

        assert!(ints.diff(&floats, &CompareOptions::default()).is_some());
        assert!(ints.diff(&floats, &CompareOptions::ignore_dtype()).is_none());
    }

    // ========================================================================
    // TEST 6: diff tolerates float noise and NaN, not reordering
    // ========================================================================
    #[test]
    fn test_diff_tolerance_and_order() {
        let a = Table::new(vec![
            Series::new("t".into(), &[0.1f64, f64::NAN]),
            Series::new("n".into(), &[1i64, 2]),
        ])
        .unwrap();
        let b = Table::new(vec![
            Series::new("t".into(), &[0.1f64 + 1e-12, f64::NAN]),
            Series::new("n".into(), &[1i64, 2]),
        ])
        .unwrap();
        assert!(a.diff(&b, &CompareOptions::default()).is_none());

        let reordered = Table::new(vec![
            Series::new("n".into(), &[1i64, 2]),
            Series::new("t".into(), &[0.1f64, f64::NAN]),
        ])
        .unwrap();
        assert!(a.diff(&reordered, &CompareOptions::default()).is_some());
    }

    // ========================================================================
    // TEST 7: persisted tables keep index dtype, links and index-only rows
    // ========================================================================
    #[test]
    fn test_persisted_table_keeps_index_and_links() {
        let table = channels()
            .set_index("id")
            .unwrap()
            .with_link_column(Series::new("group".into(), &["10", "10", "20"]))
            .unwrap();
        let bytes = rmp_serde::to_vec_named(&table).unwrap();
        let restored: Table = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, table);
        assert!(restored.is_link("group"));
        assert_eq!(restored.index().dtype(), &DataType::Int64);

        let rows_only = table.index_only();
        let bytes = rmp_serde::to_vec_named(&rows_only).unwrap();
        let restored: Table = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored.num_rows(), 3);
        assert!(restored.column_names().is_empty());
    }

    // ========================================================================
    // TEST 8: link columns must hold strings
    // ========================================================================
    #[test]
    fn test_link_column_dtype() {
        let result = channels().with_link_column(Series::new("group".into(), &[1i64, 2, 3]));
        assert!(matches!(result, Err(NwbError::Schema(_))));
    }
}
