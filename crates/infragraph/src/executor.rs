//! Execution engine - applies a plan with bounded parallelism
//!
//! A coordinator on the calling thread hands ready changes to a rayon pool
//! and collects their outcomes over a channel. A change becomes ready once
//! every change it depends on has succeeded. When a change fails, everything
//! downstream of it is skipped while independent branches keep going.

use crate::context::{EngineContext, NoProgress, ProgressCallback};
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::planner::{self, Change, Plan};
use crate::provider::ApplyRequest;
use crate::retry::{RetryPolicy, with_retry};
use crate::state::{StateRecord, StateStore};
use crate::types::{
    ChangeKind, ExecuteOptions, ExecuteSummary, Outcome, Phase, Properties, RunStatus, SkipReason,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, mpsc};

/// Outcome of one change in a run
#[derive(Debug, Clone, Serialize)]
pub struct ChangeResult {
    pub index: usize,
    pub resource_id: String,
    pub kind: ChangeKind,
    pub phase: Phase,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Outputs of the instance after the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Properties>,
}

/// Everything a run produced, in plan order
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub changes: Vec<ChangeResult>,
}

impl RunResult {
    /// Outcome per resource, in plan order
    ///
    /// A replacement succeeds only if both halves do. A failure on either
    /// half wins over a skip. Cleanup of deposed instances is left out.
    pub fn resource_outcomes(&self) -> IndexMap<String, Outcome> {
        fn rank(outcome: &Outcome) -> u8 {
            match outcome {
                Outcome::NoOp => 0,
                Outcome::Succeeded => 1,
                Outcome::Skipped { .. } => 2,
                Outcome::Failed { .. } => 3,
            }
        }

        let mut outcomes: IndexMap<String, Outcome> = IndexMap::new();
        for change in self.changes.iter().filter(|c| c.phase != Phase::DestroyDeposed) {
            match outcomes.get_mut(&change.resource_id) {
                Some(existing) if rank(&change.outcome) > rank(existing) => {
                    *existing = change.outcome.clone();
                }
                Some(_) => {}
                None => {
                    outcomes.insert(change.resource_id.clone(), change.outcome.clone());
                }
            }
        }
        outcomes
    }

    /// Latest known outputs of a resource
    pub fn outputs_for(&self, resource_id: &str) -> Option<&Properties> {
        self.changes
            .iter()
            .rev()
            .filter(|c| c.resource_id == resource_id)
            .find_map(|c| c.outputs.as_ref())
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for change in &self.changes {
            summary.add_result(change.kind, change.phase, &change.outcome);
        }
        summary
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChangeResult> {
        self.changes
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Outputs of every resource, as visible to reference resolution
struct OutputTable {
    outputs: Mutex<HashMap<String, Properties>>,
}

impl OutputTable {
    /// Seed with the recorded outputs of instances that stay alive
    fn seeded(changes: &[Change]) -> Self {
        let outputs = changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Delete)
            .filter_map(|c| {
                c.previous
                    .as_ref()
                    .map(|r| (c.resource_id.clone(), r.outputs.clone()))
            })
            .collect();
        Self {
            outputs: Mutex::new(outputs),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Properties>> {
        match self.outputs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert(&self, resource_id: &str, outputs: Properties) {
        self.lock().insert(resource_id.to_string(), outputs);
    }

    /// Substitute every reference in `properties` with the current output value
    fn resolve(&self, properties: &Properties) -> anyhow::Result<Properties> {
        let table = self.lock();
        let lookup = |r: &crate::types::Reference| {
            table
                .get(&r.resource)
                .and_then(|outputs| outputs.get(&r.attribute))
                .cloned()
        };
        properties
            .iter()
            .map(|(name, value)| {
                value
                    .resolve(&lookup)
                    .map(|v| (name.clone(), v))
                    .map_err(|r| anyhow::anyhow!("property '{name}': unresolved reference {r}"))
            })
            .collect()
    }
}

/// Serializes read-modify-write of state records
///
/// Several changes of one resource can finish concurrently: the create half
/// of a replacement and the destroy of an instance deposed by an earlier run.
struct RecordBook<'a> {
    store: &'a dyn StateStore,
    lock: Mutex<()>,
}

impl<'a> RecordBook<'a> {
    fn new(store: &'a dyn StateStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a new or updated instance, keeping instances still to destroy
    ///
    /// With `depose_current`, the instance recorded so far becomes deposed.
    fn save_applied(&self, id: &str, mut record: StateRecord, depose_current: bool) -> Result<()> {
        let _guard = self.lock();
        if let Some(current) = self.store.get(id)? {
            record.deposed = current.deposed.clone();
            if depose_current {
                record.deposed.push(current.instance());
            }
        }
        self.store.save(id, &record)
    }

    /// Drop a destroyed instance from the record of `id`
    fn forget(&self, id: &str, instance: &StateRecord) -> Result<()> {
        let _guard = self.lock();
        let Some(mut current) = self.store.get(id)? else {
            return Ok(());
        };
        if current.same_instance(instance) {
            return self.store.remove(id);
        }

        let before = current.deposed.len();
        current.deposed.retain(|d| !d.same_instance(instance));
        if current.deposed.len() == before {
            log::debug!("{id}: destroyed instance was not recorded");
            return Ok(());
        }
        self.store.save(id, &current)
    }
}

/// Bookkeeping for the coordinator loop
struct Schedule {
    remaining: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: BTreeSet<usize>,
    outcomes: Vec<Option<Outcome>>,
    outputs: Vec<Option<Properties>>,
}

impl Schedule {
    fn new(changes: &[Change]) -> Self {
        let n = changes.len();
        let mut dependents = vec![Vec::new(); n];
        for change in changes {
            for &upstream in &change.depends_on {
                dependents[upstream].push(change.index);
            }
        }
        let remaining: Vec<usize> = changes.iter().map(|c| c.depends_on.len()).collect();
        let ready = (0..n).filter(|&i| remaining[i] == 0).collect();
        Self {
            remaining,
            dependents,
            ready,
            outcomes: vec![None; n],
            outputs: vec![None; n],
        }
    }

    /// Record a terminal outcome and release or skip everything downstream
    fn complete<P: ProgressCallback>(
        &mut self,
        changes: &[Change],
        index: usize,
        outcome: Outcome,
        outputs: Option<Properties>,
        progress: &mut P,
    ) {
        let mut pending = vec![(index, outcome, outputs)];
        while let Some((index, outcome, outputs)) = pending.pop() {
            progress.on_change_complete(&changes[index], &outcome);

            if outcome.is_success() {
                for &next in &self.dependents[index] {
                    self.remaining[next] -= 1;
                    if self.remaining[next] == 0 && self.outcomes[next].is_none() {
                        self.ready.insert(next);
                    }
                }
            } else {
                let reason = match &outcome {
                    Outcome::Skipped { reason } => reason.clone(),
                    _ => SkipReason::DependencyFailed {
                        resource: changes[index].resource_id.clone(),
                    },
                };
                for &next in &self.dependents[index] {
                    let queued = pending.iter().any(|(i, ..)| *i == next);
                    if self.outcomes[next].is_none() && !queued {
                        let skipped = Outcome::Skipped {
                            reason: reason.clone(),
                        };
                        pending.push((next, skipped, None));
                    }
                }
            }

            self.outcomes[index] = Some(outcome);
            self.outputs[index] = outputs;
        }
    }

    fn into_result(self, changes: &[Change]) -> RunResult {
        let results: Vec<ChangeResult> = changes
            .iter()
            .zip(self.outcomes.into_iter().zip(self.outputs))
            .map(|(change, (outcome, outputs))| ChangeResult {
                index: change.index,
                resource_id: change.resource_id.clone(),
                kind: change.kind,
                phase: change.phase,
                // Every change is completed before the loop exits
                outcome: outcome.unwrap_or(Outcome::Skipped {
                    reason: SkipReason::Cancelled,
                }),
                outputs,
            })
            .collect();

        let status = if results
            .iter()
            .any(|r| matches!(r.outcome, Outcome::Failed { .. }))
        {
            RunStatus::Failed
        } else if results.iter().any(|r| {
            r.outcome
                == Outcome::Skipped {
                    reason: SkipReason::Cancelled,
                }
        }) {
            RunStatus::Cancelled
        } else {
            RunStatus::Success
        };

        RunResult {
            status,
            changes: results,
        }
    }
}

/// Apply a plan
///
/// Provider failures do not make this return an error; they are reported as
/// [`Outcome::Failed`] in the result. Only a failure to start the worker
/// pool is an error.
pub fn execute<P: ProgressCallback>(
    ctx: &EngineContext<'_>,
    plan: &Plan,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<RunResult> {
    let changes = plan.changes();
    let concurrency = opts.concurrency.max(1);
    progress.on_run_start(changes.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .thread_name(|i| format!("infragraph-worker-{i}"))
        .build()?;

    let table = OutputTable::seeded(changes);
    let records = RecordBook::new(ctx.store);
    let mut schedule = Schedule::new(changes);
    let (tx, rx) = mpsc::channel::<(usize, Outcome, Option<Properties>)>();

    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;
        loop {
            while in_flight < concurrency {
                let Some(index) = schedule.ready.pop_first() else {
                    break;
                };
                let change = &changes[index];

                if ctx.cancellation.is_cancelled() {
                    let skipped = Outcome::Skipped {
                        reason: SkipReason::Cancelled,
                    };
                    schedule.complete(changes, index, skipped, None, progress);
                    continue;
                }

                if change.kind == ChangeKind::NoOp {
                    let outputs = change.previous.as_ref().map(|r| r.outputs.clone());
                    schedule.complete(changes, index, Outcome::NoOp, outputs, progress);
                    continue;
                }

                progress.on_change_start(change);
                in_flight += 1;
                let tx = tx.clone();
                let table = &table;
                let records = &records;
                let retry = &opts.retry;
                scope.spawn(move |_| {
                    let (outcome, outputs) = run_change(ctx, change, table, records, retry);
                    // The receiver outlives the scope
                    let _ = tx.send((index, outcome, outputs));
                });
            }

            if in_flight == 0 {
                break;
            }
            let Ok((index, outcome, outputs)) = rx.recv() else {
                break;
            };
            in_flight -= 1;
            schedule.complete(changes, index, outcome, outputs, progress);
        }
    });

    let result = schedule.into_result(changes);
    log::debug!("Run finished with status {:?}", result.status);
    progress.on_run_complete(&result);
    Ok(result)
}

/// Apply a plan without progress reporting
pub fn execute_simple(
    ctx: &EngineContext<'_>,
    plan: &Plan,
    opts: &ExecuteOptions,
) -> Result<RunResult> {
    execute(ctx, plan, opts, &mut NoProgress)
}

/// Plan and apply a graph, then fold the outcomes back into it
pub fn converge<P: ProgressCallback>(
    ctx: &EngineContext<'_>,
    graph: &mut ResourceGraph,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<(Plan, RunResult)> {
    let plan = planner::plan(ctx, graph)?;
    let result = execute(ctx, &plan, opts, progress)?;
    graph.record_outcomes(&plan, &result)?;
    Ok((plan, result))
}

/// Perform one change on a worker thread
fn run_change(
    ctx: &EngineContext<'_>,
    change: &Change,
    table: &OutputTable,
    records: &RecordBook<'_>,
    retry: &RetryPolicy,
) -> (Outcome, Option<Properties>) {
    let result = if change.is_destroy() {
        destroy_change(ctx, change, records, retry).map(|()| None)
    } else {
        apply_change(ctx, change, table, records, retry).map(Some)
    };

    match result {
        Ok(outputs) => {
            log::info!("{} {}: done", change.kind.symbol(), change.resource_id);
            (Outcome::Succeeded, outputs)
        }
        Err(e) => {
            log::warn!("{} {} failed: {e:#}", change.kind, change.resource_id);
            let error = format!("{e:#}");
            (Outcome::Failed { error }, None)
        }
    }
}

fn apply_change(
    ctx: &EngineContext<'_>,
    change: &Change,
    table: &OutputTable,
    records: &RecordBook<'_>,
    retry: &RetryPolicy,
) -> anyhow::Result<Properties> {
    let provider = ctx.registry.resolve(&change.provider_kind)?;
    let declared = change.after.clone().unwrap_or_default();
    let properties = table.resolve(&declared)?;
    if declared.values().any(|v| !v.references().is_empty()) {
        provider.validate(&properties)?;
    }
    let request = ApplyRequest {
        resource_id: &change.resource_id,
        kind: change.kind,
        properties: &properties,
        previous: change.previous.as_ref(),
    };

    let label = format!("{} {}", change.kind, change.resource_id);
    let applied = with_retry(retry, &label, || provider.apply(&request))?;

    let record = StateRecord {
        kind: change.provider_kind.clone(),
        handle: applied.handle,
        dependencies: change.dependencies.clone(),
        applied_at: Utc::now(),
        properties: declared,
        outputs: applied.outputs.clone(),
        deposed: Vec::new(),
    };
    let depose_current = change.phase == Phase::CreateReplacement && change.create_before_destroy;
    records
        .save_applied(&change.resource_id, record, depose_current)
        .map_err(|e| anyhow::anyhow!("applied but state was not recorded: {e}"))?;

    table.insert(&change.resource_id, applied.outputs.clone());
    Ok(applied.outputs)
}

fn destroy_change(
    ctx: &EngineContext<'_>,
    change: &Change,
    records: &RecordBook<'_>,
    retry: &RetryPolicy,
) -> anyhow::Result<()> {
    let provider = ctx.registry.resolve(&change.provider_kind)?;
    let Some(record) = change.previous.as_ref() else {
        anyhow::bail!("no recorded instance to destroy");
    };

    let label = format!("destroy {}", change.resource_id);
    with_retry(retry, &label, || provider.destroy(record))?;

    records
        .forget(&change.resource_id, record)
        .map_err(|e| anyhow::anyhow!("destroyed but state was not updated: {e}"))?;
    Ok(())
}
