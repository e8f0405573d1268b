//! The Table Store capability (spec §4.1) — uniform row-level read/write/
//! delete over a physical store keyed by a primary-key tuple.
//!
//! Concrete backends (relational, object store, flat files, vector DB) are
//! out of scope for this crate (spec §1); [`MemoryTableStore`] is the
//! in-memory reference implementation used by tests, benches, and doctests,
//! playing the same role the teacher's enumerated backend variants play
//! behind its thin trait-object indirection (spec §9).

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::dataframe::{DataFrame, IndexFrame};
use crate::error::EngineError;
use crate::value::{Column, Pk, Value};

/// Any backend implements this uniform capability. Implementations must be
/// safe to share across a concurrent `Executor` (spec §5), hence `Send +
/// Sync` and interior mutability rather than `&mut self` receivers.
pub trait TableStore: Send + Sync {
    /// Declared PK columns, in order.
    fn primary_schema(&self) -> &[Column];

    /// Non-PK column names, in declared order — used by the row-meta hash.
    fn data_columns(&self) -> &[String];

    /// Whether this backend refuses writes (e.g. a globbed file pattern).
    fn is_read_only(&self) -> bool {
        false
    }

    /// Read exactly the rows in `idx` (any order), or all rows if `idx` is
    /// `None`. An empty `idx` yields an empty frame.
    fn read_rows(&self, idx: Option<&IndexFrame>) -> Result<DataFrame, EngineError>;

    /// Upsert rows by PK. Must be idempotent and atomic per call within a
    /// reasonable batch size.
    fn insert_rows(&self, df: &DataFrame) -> Result<(), EngineError>;

    /// Upsert rows by PK (same contract as `insert_rows`; backends that
    /// cannot distinguish insert from update may alias the two).
    fn update_rows(&self, df: &DataFrame) -> Result<(), EngineError>;

    /// Remove rows; missing PKs are silent no-ops.
    fn delete_rows(&self, idx: &IndexFrame) -> Result<(), EngineError>;

    /// For **external** (authoritative) stores: yield chunks of PK + a
    /// fingerprint surrogate (file modification key, hash, or whole row).
    /// The in-memory reference implementation treats its own rows as the
    /// surrogate (it is its own source of truth).
    fn read_rows_meta_pseudo_df(
        &self,
        chunk_size: usize,
    ) -> Result<Vec<DataFrame>, EngineError> {
        let all = self.read_rows(None)?;
        if all.is_empty() {
            return Ok(Vec::new());
        }
        let idx = all.project_index(
            &self
                .primary_schema()
                .iter()
                .map(|c| c.name.clone())
                .collect::<Vec<_>>(),
        );
        Ok(idx
            .chunks(chunk_size)
            .map(|chunk| all.filter_by_index(&idx.columns, &chunk))
            .collect())
    }
}

fn check_writable(store_name: &str, read_only: bool) -> Result<(), EngineError> {
    if read_only {
        Err(EngineError::ReadOnlyStore {
            table: store_name.to_string(),
        })
    } else {
        Ok(())
    }
}

/// A simple in-memory backend keyed by PK tuple. Reference implementation
/// for the trait and the backend used throughout this crate's own tests.
pub struct MemoryTableStore {
    name: String,
    schema: Vec<Column>,
    data_columns: Vec<String>,
    read_only: bool,
    rows: Mutex<BTreeMap<Pk, Vec<Value>>>,
}

impl MemoryTableStore {
    pub fn new(name: impl Into<String>, schema: Vec<Column>, data_columns: Vec<String>) -> Self {
        MemoryTableStore {
            name: name.into(),
            schema,
            data_columns,
            read_only: false,
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn pk_columns(&self) -> Vec<String> {
        self.schema.iter().map(|c| c.name.clone()).collect()
    }

    fn all_columns(&self) -> Vec<String> {
        self.pk_columns()
            .into_iter()
            .chain(self.data_columns.iter().cloned())
            .collect()
    }

    fn row_to_values(&self, pk: &Pk, data: &[Value]) -> Vec<Value> {
        pk.iter()
            .cloned()
            .map(Value::from)
            .chain(data.iter().cloned())
            .collect()
    }

    /// Seed rows directly (test/bench helper — bypasses the read-only check
    /// since it represents data arriving from outside the pipeline).
    pub fn seed(&self, df: &DataFrame) {
        let pk_cols = self.pk_columns();
        let mut rows = self.rows.lock().unwrap();
        for i in 0..df.len() {
            let Some(pk) = df.pk_at(i, &pk_cols) else {
                continue;
            };
            let data: Vec<Value> = self
                .data_columns
                .iter()
                .map(|c| df.get(i, c).cloned().unwrap_or(Value::Null))
                .collect();
            rows.insert(pk, data);
        }
    }
}

impl TableStore for MemoryTableStore {
    fn primary_schema(&self) -> &[Column] {
        &self.schema
    }

    fn data_columns(&self) -> &[String] {
        &self.data_columns
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read_rows(&self, idx: Option<&IndexFrame>) -> Result<DataFrame, EngineError> {
        let rows = self.rows.lock().unwrap();
        let columns = self.all_columns();

        let selected: Vec<Vec<Value>> = match idx {
            None => rows
                .iter()
                .map(|(pk, data)| self.row_to_values(pk, data))
                .collect(),
            Some(idx) if idx.is_empty() => Vec::new(),
            Some(idx) => idx
                .rows
                .iter()
                .filter_map(|pk| rows.get(pk).map(|data| self.row_to_values(pk, data)))
                .collect(),
        };

        Ok(DataFrame::from_rows(columns, selected))
    }

    fn insert_rows(&self, df: &DataFrame) -> Result<(), EngineError> {
        self.update_rows(df)
    }

    fn update_rows(&self, df: &DataFrame) -> Result<(), EngineError> {
        check_writable(&self.name, self.read_only)?;
        if df.is_empty() {
            return Ok(());
        }
        let pk_cols = self.pk_columns();
        let mut rows = self.rows.lock().unwrap();
        for i in 0..df.len() {
            let pk = df.pk_at(i, &pk_cols).ok_or_else(|| EngineError::OutputWriteError {
                table: self.name.clone(),
                source: "row missing primary-key column(s)".to_string(),
            })?;
            let data: Vec<Value> = self
                .data_columns
                .iter()
                .map(|c| df.get(i, c).cloned().unwrap_or(Value::Null))
                .collect();
            rows.insert(pk, data);
        }
        Ok(())
    }

    fn delete_rows(&self, idx: &IndexFrame) -> Result<(), EngineError> {
        check_writable(&self.name, self.read_only)?;
        let mut rows = self.rows.lock().unwrap();
        for pk in &idx.rows {
            rows.remove(pk);
        }
        Ok(())
    }
}
