//! The Pipeline Driver (spec §4.6) — runs a list of steps in declaration
//! order, either as a full refresh or by repeatedly draining a change list
//! to a fixed point.
//!
//! Grounded on `datapipe.compute.run_steps`/`run_steps_changelist`
//! (`examples/original_source/datapipe/compute.py`): steps run in the order
//! given, not topologically reordered — the caller is responsible for
//! declaring them in an order consistent with their dependencies.

use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::change_list::ChangeList;
use crate::error::EngineError;
use crate::executor::Executor;
use crate::run_config::RunConfig;
use crate::step::Step;

/// Safety cap on change-list propagation rounds (spec §4.6): a step graph
/// with a feedback loop would otherwise drain forever.
const MAX_CHANGELIST_ITERATIONS: usize = 100;

pub struct Driver;

impl Driver {
    /// Run every step in `steps`, in order, as a full refresh (spec §4.6
    /// `run_steps`). No dependency reordering — declare steps
    /// topologically.
    pub fn run(
        catalog: &Catalog,
        steps: &[Box<dyn Step>],
        executor: &dyn Executor,
        run_config: Option<&RunConfig>,
        now: i64,
    ) -> Result<ChangeList, EngineError> {
        info!(steps = steps.len(), "running pipeline (full)");
        let mut changes = ChangeList::new();
        for step in steps {
            let rc = RunConfig::add_labels(run_config, &[("step_name", step.name())]);
            let c = step.run_full(catalog, Some(&rc), executor, now)?;
            changes.extend(c);
        }
        Ok(changes)
    }

    /// Seed a change list and drain it to a fixed point: every step runs
    /// against the current change list, the union of everything each step
    /// reports becomes the next change list, repeat until a round produces
    /// nothing new or the iteration cap is hit (spec §4.6
    /// `run_steps_changelist`).
    #[instrument(skip_all, fields(steps = steps.len()))]
    pub fn run_changelist(
        catalog: &Catalog,
        steps: &[Box<dyn Step>],
        executor: &dyn Executor,
        seed: ChangeList,
        run_config: Option<&RunConfig>,
        now: i64,
    ) -> Result<ChangeList, EngineError> {
        let mut current = seed;
        let mut total = ChangeList::new();

        for iteration in 0..MAX_CHANGELIST_ITERATIONS {
            if current.is_empty() {
                break;
            }
            let mut next = ChangeList::new();
            for step in steps {
                let rc = RunConfig::add_labels(run_config, &[("step_name", step.name())]);
                let c = step.run_changelist(catalog, &current, Some(&rc), executor, now)?;
                next.extend(c);
            }
            total.extend(next.clone());
            if next.is_empty() {
                break;
            }
            if iteration == MAX_CHANGELIST_ITERATIONS - 1 {
                warn!("changelist propagation hit the iteration cap without settling");
            }
            current = next;
        }

        Ok(total)
    }

    /// Run only the steps matching `name_prefix` (if given) and carrying
    /// every one of `labels` (spec §4 addition: selective reprocessing by
    /// name or label, e.g. "just the steps for this tenant").
    pub fn run_filtered(
        catalog: &Catalog,
        steps: &[Box<dyn Step>],
        executor: &dyn Executor,
        name_prefix: Option<&str>,
        labels: &[(&str, &str)],
        run_config: Option<&RunConfig>,
        now: i64,
    ) -> Result<ChangeList, EngineError> {
        let mut changes = ChangeList::new();
        for step in steps {
            if let Some(prefix) = name_prefix {
                if !step.name().starts_with(prefix) {
                    continue;
                }
            }
            if !labels
                .iter()
                .all(|(k, v)| step.labels().iter().any(|(sk, sv)| sk == k && sv == v))
            {
                continue;
            }
            let rc = RunConfig::add_labels(run_config, &[("step_name", step.name())]);
            let c = step.run_full(catalog, Some(&rc), executor, now)?;
            changes.extend(c);
        }
        Ok(changes)
    }
}
