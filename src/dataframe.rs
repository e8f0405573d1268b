//! The universal tabular currency passed between stores, meta tables, and
//! user transforms (spec §9: "DataFrame as universal currency").
//!
//! [`DataFrame`] is a column-oriented, dynamically typed in-memory frame.
//! [`IndexFrame`] is the lighter-weight analog used for primary-key /
//! transform-key tuples — the "index" passed to `read_rows`, `delete_rows`,
//! batches, and change-list entries.

use std::collections::{HashMap, HashSet};

use crate::value::{Pk, PkValue, Value};

/// A column-oriented, dynamically typed table of rows.
#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    columns: Vec<String>,
    data: HashMap<String, Vec<Value>>,
    len: usize,
}

impl DataFrame {
    pub fn empty(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let data = columns.iter().map(|c| (c.clone(), Vec::new())).collect();
        DataFrame {
            columns,
            data,
            len: 0,
        }
    }

    /// Build a frame from row-major data. All rows must have a value for
    /// every declared column, in `columns` order.
    pub fn from_rows(
        columns: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut data: HashMap<String, Vec<Value>> =
            columns.iter().map(|c| (c.clone(), Vec::new())).collect();

        for row in &rows {
            assert_eq!(
                row.len(),
                columns.len(),
                "row arity does not match declared columns"
            );
        }

        for row in rows.into_iter() {
            for (col, val) in columns.iter().zip(row.into_iter()) {
                data.get_mut(col).unwrap().push(val);
            }
        }

        let len = data.values().next().map(|v| v.len()).unwrap_or(0);

        DataFrame { columns, data, len }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.data.get(name).map(|v| v.as_slice())
    }

    pub fn get(&self, row: usize, col: &str) -> Option<&Value> {
        self.data.get(col).and_then(|v| v.get(row))
    }

    /// Row `i` as a name-ordered vector of values, in `self.columns()` order.
    pub fn row(&self, i: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| self.data[c][i].clone())
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.len).map(move |i| self.row(i))
    }

    /// Extract a key tuple for row `i` over `key_columns`.
    ///
    /// Returns `None` if any key column is missing or holds a non-key value
    /// (spec §6.1: keys are restricted to int/text).
    pub fn pk_at(&self, i: usize, key_columns: &[String]) -> Option<Pk> {
        key_columns
            .iter()
            .map(|c| self.get(i, c)?.as_pk_value())
            .collect()
    }

    /// Project this frame's rows onto `key_columns`, producing an
    /// [`IndexFrame`] (used to turn a data chunk into the index passed to
    /// `store_chunk`/transform-meta).
    pub fn project_index(&self, key_columns: &[String]) -> IndexFrame {
        let mut rows = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(pk) = self.pk_at(i, key_columns) {
                rows.push(pk);
            }
        }
        IndexFrame::new(key_columns.to_vec(), rows)
    }

    /// Rows whose key tuple (over `key_columns`) is present in `idx`.
    pub fn filter_by_index(&self, key_columns: &[String], idx: &IndexFrame) -> DataFrame {
        let wanted: HashSet<&Pk> = idx.rows.iter().collect();
        let mut rows = Vec::new();
        for i in 0..self.len {
            if let Some(pk) = self.pk_at(i, key_columns)
                && wanted.contains(&pk)
            {
                rows.push(self.row(i));
            }
        }
        DataFrame::from_rows(self.columns.clone(), rows)
    }

    /// Append a constant-valued column (used for run-config filters echoed
    /// into emitted batches, spec §4.4/§6.6).
    pub fn with_constant_column(mut self, name: &str, value: Value) -> Self {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_string());
        }
        self.data
            .insert(name.to_string(), std::iter::repeat(value).take(self.len).collect());
        self
    }

    pub fn concat(frames: Vec<DataFrame>) -> DataFrame {
        let columns = frames
            .first()
            .map(|f| f.columns.clone())
            .unwrap_or_default();
        let mut rows = Vec::new();
        for frame in frames {
            rows.extend(frame.rows());
        }
        DataFrame::from_rows(columns, rows)
    }
}

/// A set of key tuples over a fixed, named set of columns — the "IndexDF" of
/// the spec. Used for batches, change-list entries, and `delete_rows`/
/// `read_rows` selectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Pk>,
}

impl IndexFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Pk>) -> Self {
        IndexFrame { columns, rows }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        IndexFrame {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn single(columns: Vec<String>, pk: Pk) -> Self {
        IndexFrame {
            columns,
            rows: vec![pk],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, pk: &Pk) -> bool {
        self.rows.iter().any(|r| r == pk)
    }

    /// Set union, deduplicating by the full key tuple. Used by `ChangeList`
    /// append/extend and batch accumulation (spec §5: change-list merge must
    /// be commutative and associative).
    pub fn union(&self, other: &IndexFrame) -> IndexFrame {
        if self.rows.is_empty() {
            return other.clone();
        }
        if other.rows.is_empty() {
            return self.clone();
        }
        assert_eq!(
            self.columns, other.columns,
            "union of IndexFrames with mismatched columns"
        );
        let mut seen: HashSet<Pk> = self.rows.iter().cloned().collect();
        let mut rows = self.rows.clone();
        for r in &other.rows {
            if seen.insert(r.clone()) {
                rows.push(r.clone());
            }
        }
        IndexFrame {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Set difference: rows in `self` not present in `other`.
    pub fn difference(&self, other: &IndexFrame) -> IndexFrame {
        let present: HashSet<&Pk> = other.rows.iter().collect();
        let rows = self
            .rows
            .iter()
            .filter(|r| !present.contains(r))
            .cloned()
            .collect();
        IndexFrame {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Project onto a subset of `self.columns` (e.g. a step's transform
    /// keys). Columns not present in `self.columns` are silently dropped —
    /// callers are expected to have validated key compatibility up front.
    pub fn project(&self, key_columns: &[String]) -> IndexFrame {
        if key_columns == self.columns.as_slice() {
            return self.clone();
        }
        let positions: Vec<Option<usize>> = key_columns
            .iter()
            .map(|k| self.columns.iter().position(|c| c == k))
            .collect();

        let rows = self
            .rows
            .iter()
            .filter_map(|row| {
                positions
                    .iter()
                    .map(|p| p.map(|i| row[i].clone()))
                    .collect::<Option<Vec<_>>>()
            })
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        let mut deduped = Vec::new();
        for r in rows {
            if seen.insert(r.clone()) {
                deduped.push(r);
            }
        }

        IndexFrame {
            columns: key_columns.to_vec(),
            rows: deduped,
        }
    }

    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = IndexFrame> + '_ {
        self.rows.chunks(chunk_size.max(1)).map(|c| IndexFrame {
            columns: self.columns.clone(),
            rows: c.to_vec(),
        })
    }
}
