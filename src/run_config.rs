//! Per-run configuration: column-value filters and labels (spec §6.6,
//! adapted from `datapipe.run_config.RunConfig` in the original source).

use std::collections::BTreeMap;

use crate::value::Value;

pub type Labels = Vec<(String, String)>;

/// A per-run dictionary of `{column_name: value}` filters plus a set of
/// `(key, value)` labels.
///
/// Filters whose column is a transform key are pushed into the planner as
/// equality predicates (spec §4.4/§6.6); other filters are echoed as
/// constant columns on every emitted batch. Labels tag tracing spans and
/// drive step selection (`Driver::run_filtered`) — they never affect
/// incrementality.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub filters: BTreeMap<String, Value>,
    pub labels: Labels,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Return a copy of `run_config` (or a fresh one) with `labels` merged
    /// in, mirroring `RunConfig.add_labels` in the original source — used to
    /// tag every step's tracing spans with the step name.
    pub fn add_labels(run_config: Option<&RunConfig>, labels: &[(&str, &str)]) -> RunConfig {
        let mut rc = run_config.cloned().unwrap_or_default();
        for (k, v) in labels {
            rc.labels.push((k.to_string(), v.to_string()));
        }
        rc
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.iter().any(|(k, v)| k == key && v == value)
    }
}
