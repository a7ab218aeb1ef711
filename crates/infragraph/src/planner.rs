//! Execution planner - diffs desired against recorded state
//!
//! Planning reads the state store but never writes it and never calls a
//! provider's `apply` or `destroy`.

use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::state::StateRecord;
use crate::types::{ChangeKind, Phase, Properties};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// One planned action on one resource
///
/// Immutable once planned. A replacement is represented by two changes for
/// the same resource, one per [`Phase`].
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    /// Position in the plan
    pub index: usize,
    pub resource_id: String,
    /// Kind whose provider performs this change
    pub provider_kind: String,
    pub kind: ChangeKind,
    pub phase: Phase,
    /// Record of the current instance, if any
    pub previous: Option<StateRecord>,
    /// Desired properties, absent for destroys
    pub after: Option<Properties>,
    /// Changes that must succeed before this one starts
    pub depends_on: Vec<usize>,
    /// Resource-level dependencies, recorded into state on success
    pub dependencies: Vec<String>,
    /// Provider allows creating the replacement first
    pub create_before_destroy: bool,
}

impl Change {
    /// Property snapshot before the change
    pub fn before(&self) -> Option<&Properties> {
        self.previous.as_ref().map(|r| &r.properties)
    }

    /// Provider handle of the previous instance, or when it was applied
    pub fn instance_label(&self) -> String {
        match &self.previous {
            Some(StateRecord {
                handle: Some(handle),
                ..
            }) => handle.clone(),
            Some(record) => record.applied_at.to_rfc3339(),
            None => "new".to_string(),
        }
    }

    /// Whether this change calls the provider's `destroy`
    pub fn is_destroy(&self) -> bool {
        self.kind == ChangeKind::Delete || self.phase == Phase::DestroyReplaced
    }

    /// Whether this change destroys the instance the record currently names
    fn destroys_current(&self) -> bool {
        match self.phase {
            Phase::Single => self.kind == ChangeKind::Delete,
            Phase::DestroyReplaced => !self.create_before_destroy,
            Phase::CreateReplacement | Phase::DestroyDeposed => false,
        }
    }

    /// Whether `resource_id` is a dependency before or after this change
    fn references(&self, resource_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == resource_id)
            || self
                .previous
                .as_ref()
                .is_some_and(|r| r.dependencies.iter().any(|d| d == resource_id))
    }

    /// Names of properties whose value differs between before and after
    pub fn changed_properties(&self) -> Vec<&str> {
        let (Some(before), Some(after)) = (self.before(), self.after.as_ref()) else {
            return Vec::new();
        };
        after
            .keys()
            .chain(before.keys().filter(|k| !after.contains_key(*k)))
            .filter(|k| before.get(*k) != after.get(*k))
            .map(String::as_str)
            .collect()
    }
}

/// Counts of planned actions, per resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

/// Ordered change-set
///
/// Declared resources appear in dependency order, followed by deferred
/// destroys and orphan deletes. Execution order comes from `depends_on`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    changes: Vec<Change>,
}

impl Plan {
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Changes for one resource, in plan order
    pub fn changes_for<'a>(&'a self, resource_id: &'a str) -> impl Iterator<Item = &'a Change> {
        self.changes
            .iter()
            .filter(move |c| c.resource_id == resource_id)
    }

    /// Planned action for one resource, leaving out cleanup of deposed instances
    pub fn kind_for(&self, resource_id: &str) -> Option<ChangeKind> {
        self.changes_for(resource_id)
            .find(|c| c.phase != Phase::DestroyDeposed)
            .map(|c| c.kind)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match (change.kind, change.phase) {
                (ChangeKind::Create, _) => summary.create += 1,
                (ChangeKind::Update, _) => summary.update += 1,
                (ChangeKind::Replace, Phase::CreateReplacement) => summary.replace += 1,
                (ChangeKind::Replace, _) => {}
                (ChangeKind::Delete, _) => summary.delete += 1,
                (ChangeKind::NoOp, _) => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Whether applying the plan would call any provider
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.kind != ChangeKind::NoOp)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn push(&mut self, mut change: Change) -> usize {
        let index = self.changes.len();
        change.index = index;
        self.changes.push(change);
        index
    }

    fn indices_for(&self, resource_id: &str) -> Vec<usize> {
        self.changes_for(resource_id).map(|c| c.index).collect()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changes {
            if change.phase == Phase::DestroyReplaced {
                continue;
            }
            write!(
                f,
                "  {:>3} {} ({})",
                change.kind.symbol(),
                change.resource_id,
                change.provider_kind
            )?;
            if change.phase == Phase::DestroyDeposed {
                writeln!(f, " [deposed {}]", change.instance_label())?;
                continue;
            }
            if change.kind == ChangeKind::Replace {
                let order = if change.create_before_destroy {
                    "create before destroy"
                } else {
                    "destroy then create"
                };
                write!(f, " [{order}]")?;
            }
            writeln!(f)?;

            if matches!(change.kind, ChangeKind::Update | ChangeKind::Replace) {
                let (Some(before), Some(after)) = (change.before(), change.after.as_ref()) else {
                    continue;
                };
                for name in change.changed_properties() {
                    let old = before.get(name).map_or("(unset)".to_string(), ToString::to_string);
                    let new = after.get(name).map_or("(unset)".to_string(), ToString::to_string);
                    writeln!(f, "        {name}: {old} -> {new}")?;
                }
            }
        }

        let s = self.summary();
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged.",
            s.create, s.update, s.replace, s.delete, s.unchanged
        )
    }
}

/// Compute the change-set that converges recorded state to `graph`
///
/// Marks the graph's pending resources as planned. Fails before any change
/// is produced if the graph has a cycle, a kind has no provider, a resource
/// fails validation, or a provider cannot diff.
pub fn plan(ctx: &EngineContext<'_>, graph: &mut ResourceGraph) -> Result<Plan> {
    let order = graph.topological_order()?;
    ctx.registry.validate_graph(graph)?;
    let previous = ctx.store.load()?;

    let mut plan = Plan::default();
    let mut decided: HashMap<&str, ChangeKind> = HashMap::new();
    let mut deferred = Vec::new();

    for id in &order {
        let resource = graph
            .get(id)
            .ok_or_else(|| Error::UnknownResource { id: id.clone() })?;
        let provider = ctx.registry.resolve(resource.kind())?;
        let record = previous.get(id);

        let mut kind = match record {
            Some(r) if r.kind != resource.kind() => ChangeKind::Replace,
            _ => {
                let kind = provider
                    .diff(Some(resource.properties()), record.map(|r| &r.properties))
                    .map_err(|source| Error::Planning {
                        resource_id: id.clone(),
                        source,
                    })?;
                check_diff(id, kind, record.is_some())?;
                kind
            }
        };

        if kind == ChangeKind::NoOp
            && resource
                .dependencies()
                .any(|d| decided.get(d) == Some(&ChangeKind::Replace))
        {
            log::debug!("{id}: upstream replacement forces update");
            kind = ChangeKind::Update;
        }
        decided.insert(id.as_str(), kind);

        let upstream: Vec<usize> = resource
            .dependencies()
            .flat_map(|d| plan.indices_for(d))
            .collect();
        let change = Change {
            index: 0,
            resource_id: id.clone(),
            provider_kind: resource.kind().to_string(),
            kind,
            phase: Phase::Single,
            previous: record.cloned(),
            after: Some(resource.properties().clone()),
            depends_on: upstream,
            dependencies: resource.dependencies().map(String::from).collect(),
            create_before_destroy: provider.create_before_destroy(),
        };

        match (kind, record) {
            (ChangeKind::Replace, Some(record)) => {
                deferred.extend(push_replacement(&mut plan, change, record));
            }
            _ => {
                plan.push(change);
            }
        }
    }

    // Old instances replaced create-before-destroy go once everything is on the new one
    for destroy in deferred {
        plan.push(destroy);
    }

    let orphans: Vec<&str> = previous
        .keys()
        .map(String::as_str)
        .filter(|id| !graph.contains(id))
        .collect();
    plan_deletes(ctx, &mut plan, &previous, &orphans)?;
    plan_deposed(ctx, &mut plan, &previous)?;
    order_destroys(&mut plan);

    graph.mark_planned();
    log::debug!("Planned {} changes for {} resources", plan.len(), graph.len());
    Ok(plan)
}

/// Plan the deletion of every recorded resource
pub fn plan_destroy(ctx: &EngineContext<'_>) -> Result<Plan> {
    let previous = ctx.store.load()?;
    let ids: Vec<&str> = previous.keys().map(String::as_str).collect();
    let mut plan = Plan::default();
    plan_deletes(ctx, &mut plan, &previous, &ids)?;
    plan_deposed(ctx, &mut plan, &previous)?;
    order_destroys(&mut plan);
    Ok(plan)
}

fn check_diff(id: &str, kind: ChangeKind, has_record: bool) -> Result<()> {
    let consistent = match kind {
        ChangeKind::Create => !has_record,
        ChangeKind::Update | ChangeKind::Replace | ChangeKind::NoOp => has_record,
        ChangeKind::Delete => false,
    };
    if consistent {
        return Ok(());
    }
    Err(Error::Planning {
        resource_id: id.to_string(),
        source: anyhow::anyhow!(
            "provider planned {kind} for a declared resource {} previous state",
            if has_record { "with" } else { "without" }
        ),
    })
}

/// Push both halves of a replacement in the order the provider allows
///
/// With create-before-destroy only the create half is pushed; the destroy
/// half is returned so it can follow the changes that move onto the new
/// instance.
fn push_replacement(plan: &mut Plan, create: Change, record: &StateRecord) -> Option<Change> {
    let mut create = Change {
        phase: Phase::CreateReplacement,
        ..create
    };
    let mut destroy = Change {
        phase: Phase::DestroyReplaced,
        provider_kind: record.kind.clone(),
        previous: Some(record.instance()),
        after: None,
        ..create.clone()
    };

    if create.create_before_destroy {
        let first = plan.push(create);
        destroy.depends_on = vec![first];
        Some(destroy)
    } else {
        let first = plan.push(destroy);
        create.depends_on.push(first);
        plan.push(create);
        None
    }
}

/// Append destroys for instances earlier replacements left behind
///
/// Destroying a resource's current instance waits for its deposed ones, so
/// the record is never dropped while it still names live instances.
fn plan_deposed(
    ctx: &EngineContext<'_>,
    plan: &mut Plan,
    previous: &BTreeMap<String, StateRecord>,
) -> Result<()> {
    for (id, record) in previous {
        for instance in &record.deposed {
            let provider = ctx.registry.resolve(&instance.kind)?;
            let index = plan.push(Change {
                index: 0,
                resource_id: id.clone(),
                provider_kind: instance.kind.clone(),
                kind: ChangeKind::Delete,
                phase: Phase::DestroyDeposed,
                previous: Some(instance.clone()),
                after: None,
                depends_on: Vec::new(),
                dependencies: instance.dependencies.clone(),
                create_before_destroy: provider.create_before_destroy(),
            });
            for change in plan.changes.iter_mut() {
                if change.resource_id == *id && change.destroys_current() {
                    change.depends_on.push(index);
                }
            }
        }
    }
    Ok(())
}

/// Make every destroy wait for the other changes that reference its resource
///
/// An edge that would close a cycle is left out: the dependents of a
/// destroy-then-create replacement follow it instead.
fn order_destroys(plan: &mut Plan) {
    for index in 0..plan.changes.len() {
        if !plan.changes[index].is_destroy() {
            continue;
        }
        let id = plan.changes[index].resource_id.clone();
        let blockers: Vec<usize> = plan
            .changes
            .iter()
            .filter(|c| c.resource_id != id && c.kind != ChangeKind::NoOp && c.references(&id))
            .map(|c| c.index)
            .collect();

        for blocker in blockers {
            if plan.changes[index].depends_on.contains(&blocker)
                || depends_transitively(&plan.changes, blocker, index)
            {
                continue;
            }
            log::debug!("{id}: destroy waits for {}", plan.changes[blocker].resource_id);
            plan.changes[index].depends_on.push(blocker);
        }
        plan.changes[index].depends_on.sort_unstable();
    }
}

/// Whether change `from` waits, directly or not, on change `target`
fn depends_transitively(changes: &[Change], from: usize, target: usize) -> bool {
    let mut seen = vec![false; changes.len()];
    let mut stack = vec![from];
    while let Some(index) = stack.pop() {
        if index == target {
            return true;
        }
        if std::mem::replace(&mut seen[index], true) {
            continue;
        }
        stack.extend(&changes[index].depends_on);
    }
    false
}

/// Append deletes for `ids`, dependents before the resources they depend on
fn plan_deletes(
    ctx: &EngineContext<'_>,
    plan: &mut Plan,
    previous: &BTreeMap<String, StateRecord>,
    ids: &[&str],
) -> Result<()> {
    for id in delete_order(previous, ids) {
        let record = &previous[id];
        let provider = ctx.registry.resolve(&record.kind)?;
        let kind = provider
            .diff(None, Some(&record.properties))
            .map_err(|source| Error::Planning {
                resource_id: id.to_string(),
                source,
            })?;
        if kind != ChangeKind::Delete {
            return Err(Error::Planning {
                resource_id: id.to_string(),
                source: anyhow::anyhow!("provider planned {kind} for an undeclared resource"),
            });
        }

        // Anything that depended on this resource last time must change first
        let depends_on: Vec<usize> = plan
            .changes
            .iter()
            .filter(|c| {
                c.previous
                    .as_ref()
                    .is_some_and(|r| r.dependencies.iter().any(|d| d == id))
            })
            .map(|c| c.index)
            .collect();

        plan.push(Change {
            index: 0,
            resource_id: id.to_string(),
            provider_kind: record.kind.clone(),
            kind,
            phase: Phase::Single,
            previous: Some(record.instance()),
            after: None,
            depends_on,
            dependencies: record.dependencies.clone(),
            create_before_destroy: provider.create_before_destroy(),
        });
    }
    Ok(())
}

/// Order `ids` so every resource comes after the resources that depend on it
fn delete_order<'a>(previous: &BTreeMap<String, StateRecord>, ids: &[&'a str]) -> Vec<&'a str> {
    let members: BTreeSet<&str> = ids.iter().copied().collect();
    let mut blockers: BTreeMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    for id in ids {
        for dep in &previous[*id].dependencies {
            if let Some(count) = blockers.get_mut(dep.as_str()) {
                *count += 1;
            }
        }
    }

    let mut order = Vec::with_capacity(ids.len());
    let mut ready: BTreeSet<&'a str> = ids
        .iter()
        .copied()
        .filter(|id| blockers[id] == 0)
        .collect();
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for dep in &previous[id].dependencies {
            if !members.contains(dep.as_str()) {
                continue;
            }
            if let Some(count) = blockers.get_mut(dep.as_str()) {
                *count -= 1;
                if *count == 0
                    && let Some(&member) = ids.iter().find(|m| **m == dep.as_str())
                {
                    ready.insert(member);
                }
            }
        }
    }

    // Recorded dependencies should never cycle; keep going rather than drop records
    for id in ids {
        if !order.contains(id) {
            log::warn!("Recorded dependencies of {id} form a cycle; deleting in id order");
            order.push(id);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceSpec;
    use crate::state::{MemoryStateStore, StateStore};
    use crate::test_support::{TestProvider, registry_with};
    use crate::types::{ResourceStatus, Value};

    fn chain() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph.add(ResourceSpec::new("a", "test").with("size", 1i64)).unwrap();
        graph
            .add(ResourceSpec::new("b", "test").with_ref("up", "a", "id"))
            .unwrap();
        graph
    }

    fn record_for(graph: &ResourceGraph, id: &str) -> StateRecord {
        let resource = graph.get(id).unwrap();
        StateRecord::new(resource.kind(), resource.properties().clone())
            .with_dependencies(resource.dependencies().map(String::from).collect())
    }

    #[test]
    fn test_no_previous_state_plans_creates() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let ctx = EngineContext::new(&registry, &store);

        let mut graph = chain();
        let plan = plan(&ctx, &mut graph).unwrap();
        assert!(plan.changes().iter().all(|c| c.kind == ChangeKind::Create));
        assert_eq!(plan.changes()[1].depends_on, vec![0]);
        assert!(graph.iter().all(|r| r.status() == ResourceStatus::Planned));
    }

    #[test]
    fn test_identical_state_plans_noops() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let mut graph = chain();
        for id in ["a", "b"] {
            store.save(id, &record_for(&graph, id)).unwrap();
        }

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.changes().iter().all(|c| c.kind == ChangeKind::NoOp));
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_planning_never_writes_state() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let ctx = EngineContext::new(&registry, &store);
        plan(&ctx, &mut chain()).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_replace_destroy_then_create() {
        let provider = TestProvider::new().immutable("size");
        let registry = registry_with(provider);
        let store = MemoryStateStore::new();
        let mut graph = chain();
        store.save("a", &record_for(&graph, "a")).unwrap();
        store.save("b", &record_for(&graph, "b")).unwrap();

        let mut changed = ResourceGraph::new();
        changed.add(ResourceSpec::new("a", "test").with("size", 2i64)).unwrap();
        changed
            .add(ResourceSpec::new("b", "test").with_ref("up", "a", "id"))
            .unwrap();
        graph = changed;

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        let phases: Vec<_> = plan.changes_for("a").map(|c| c.phase).collect();
        assert_eq!(phases, vec![Phase::DestroyReplaced, Phase::CreateReplacement]);
        assert_eq!(plan.changes()[1].depends_on, vec![0]);

        // b references a, which gets a new instance
        assert_eq!(plan.kind_for("b"), Some(ChangeKind::Update));
        assert_eq!(plan.changes()[2].depends_on, vec![0, 1]);
        assert_eq!(plan.summary().replace, 1);
    }

    #[test]
    fn test_replace_create_before_destroy() {
        let provider = TestProvider::new().immutable("size").create_before_destroy();
        let registry = registry_with(provider);
        let mut graph = ResourceGraph::new();
        graph.add(ResourceSpec::new("a", "test").with("size", 2i64)).unwrap();

        let mut old = Properties::new();
        old.insert("size".into(), Value::from(1i64));
        let store = MemoryStateStore::new();
        store.save("a", &StateRecord::new("test", old)).unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        let phases: Vec<_> = plan.changes().iter().map(|c| c.phase).collect();
        assert_eq!(phases, vec![Phase::CreateReplacement, Phase::DestroyReplaced]);
        assert_eq!(plan.changes()[1].depends_on, vec![0]);
        assert!(plan.changes()[1].after.is_none());
    }

    #[test]
    fn test_create_before_destroy_waits_for_dependents() {
        let provider = TestProvider::new().immutable("size").create_before_destroy();
        let registry = registry_with(provider);
        let store = MemoryStateStore::new();
        let mut graph = chain();
        store.save("a", &record_for(&graph, "a")).unwrap();
        store.save("b", &record_for(&graph, "b")).unwrap();

        let mut changed = ResourceGraph::new();
        changed.add(ResourceSpec::new("a", "test").with("size", 2i64)).unwrap();
        changed
            .add(ResourceSpec::new("b", "test").with_ref("up", "a", "id"))
            .unwrap();
        graph = changed;

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        let steps: Vec<_> = plan
            .changes()
            .iter()
            .map(|c| (c.resource_id.as_str(), c.phase))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("a", Phase::CreateReplacement),
                ("b", Phase::Single),
                ("a", Phase::DestroyReplaced),
            ]
        );
        assert_eq!(plan.changes()[1].depends_on, vec![0]);
        assert_eq!(plan.changes()[2].depends_on, vec![0, 1]);
    }

    #[test]
    fn test_replaced_destroy_waits_for_orphans_that_used_it() {
        let registry = registry_with(TestProvider::new().immutable("size"));
        let store = MemoryStateStore::new();
        let mut old = Properties::new();
        old.insert("size".into(), Value::from(1i64));
        store.save("x", &StateRecord::new("test", old)).unwrap();
        store
            .save(
                "o",
                &StateRecord::new("test", Properties::new()).with_dependencies(vec!["x".into()]),
            )
            .unwrap();

        let mut graph = ResourceGraph::new();
        graph.add(ResourceSpec::new("x", "test").with("size", 2i64)).unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        let steps: Vec<_> = plan
            .changes()
            .iter()
            .map(|c| (c.resource_id.as_str(), c.phase, c.depends_on.clone()))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("x", Phase::DestroyReplaced, vec![2]),
                ("x", Phase::CreateReplacement, vec![0]),
                ("o", Phase::Single, vec![]),
            ]
        );
    }

    #[test]
    fn test_deposed_instances_are_destroyed() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let mut graph = ResourceGraph::new();
        graph.add(ResourceSpec::new("a", "test")).unwrap();

        let old = StateRecord::new("test", Properties::new()).with_handle("old-a");
        let current = StateRecord::new("test", Properties::new())
            .with_handle("a")
            .with_deposed(vec![old]);
        store.save("a", &current).unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        let phases: Vec<_> = plan.changes().iter().map(|c| c.phase).collect();
        assert_eq!(phases, vec![Phase::Single, Phase::DestroyDeposed]);
        assert_eq!(plan.kind_for("a"), Some(ChangeKind::NoOp));
        assert!(plan.has_changes());

        let deposed = &plan.changes()[1];
        assert_eq!(deposed.kind, ChangeKind::Delete);
        assert_eq!(deposed.instance_label(), "old-a");
        assert!(plan.to_string().contains("- a (test) [deposed old-a]"));
    }

    #[test]
    fn test_destroying_a_resource_waits_for_its_deposed_instances() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let old = StateRecord::new("test", Properties::new()).with_handle("old-a");
        store
            .save(
                "a",
                &StateRecord::new("test", Properties::new())
                    .with_handle("a")
                    .with_deposed(vec![old]),
            )
            .unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan_destroy(&ctx).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.changes()[0].phase, Phase::Single);
        assert_eq!(plan.changes()[0].depends_on, vec![1]);
        assert_eq!(plan.changes()[1].phase, Phase::DestroyDeposed);
        assert!(plan.changes()[0].previous.as_ref().unwrap().deposed.is_empty());
    }

    #[test]
    fn test_kind_change_replaces_with_old_provider() {
        let mut registry = registry_with(TestProvider::new());
        registry.register("legacy", TestProvider::new());
        let store = MemoryStateStore::new();
        let mut graph = ResourceGraph::new();
        graph.add(ResourceSpec::new("a", "test")).unwrap();
        store
            .save("a", &StateRecord::new("legacy", Properties::new()))
            .unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        let destroy = plan
            .changes()
            .iter()
            .find(|c| c.phase == Phase::DestroyReplaced)
            .unwrap();
        assert_eq!(destroy.provider_kind, "legacy");
    }

    #[test]
    fn test_orphans_are_deleted_dependents_first() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        store
            .save("net", &StateRecord::new("test", Properties::new()))
            .unwrap();
        store
            .save(
                "app",
                &StateRecord::new("test", Properties::new()).with_dependencies(vec!["net".into()]),
            )
            .unwrap();
        store
            .save(
                "zeta",
                &StateRecord::new("test", Properties::new()).with_dependencies(vec!["app".into()]),
            )
            .unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut ResourceGraph::new()).unwrap();
        let ids: Vec<&str> = plan.changes().iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "app", "net"]);
        assert!(plan.changes().iter().all(|c| c.kind == ChangeKind::Delete));
        assert_eq!(plan.changes()[1].depends_on, vec![0]);
        assert_eq!(plan.changes()[2].depends_on, vec![1]);
    }

    #[test]
    fn test_orphan_delete_waits_for_former_dependents() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        store
            .save("old_sg", &StateRecord::new("test", Properties::new()))
            .unwrap();
        store
            .save(
                "service",
                &StateRecord::new("test", Properties::new())
                    .with_dependencies(vec!["old_sg".into()]),
            )
            .unwrap();

        let mut graph = ResourceGraph::new();
        graph
            .add(ResourceSpec::new("service", "test").with("count", 3i64))
            .unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan(&ctx, &mut graph).unwrap();
        assert_eq!(plan.kind_for("service"), Some(ChangeKind::Update));
        assert_eq!(plan.kind_for("old_sg"), Some(ChangeKind::Delete));
        assert_eq!(plan.changes()[1].depends_on, vec![0]);
    }

    #[test]
    fn test_plan_destroy_covers_all_records() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let graph = chain();
        store.save("a", &record_for(&graph, "a")).unwrap();
        store.save("b", &record_for(&graph, "b")).unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let plan = plan_destroy(&ctx).unwrap();
        let ids: Vec<&str> = plan.changes().iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(plan.summary().delete, 2);
    }

    #[test]
    fn test_diff_failure_aborts_planning() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let mut graph = chain();
        graph
            .add(ResourceSpec::new("c", "test").with("break_diff", true))
            .unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let err = plan(&ctx, &mut graph).unwrap_err();
        assert!(matches!(err, Error::Planning { resource_id, .. } if resource_id == "c"));
    }

    #[test]
    fn test_unknown_provider_kind() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let mut graph = ResourceGraph::new();
        graph.add(ResourceSpec::new("q", "queue")).unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let err = plan(&ctx, &mut graph).unwrap_err();
        assert!(matches!(err, Error::UnknownProviderKind { kind } if kind == "queue"));
        assert_eq!(graph.get("q").unwrap().status(), ResourceStatus::Pending);
    }

    #[test]
    fn test_plan_display() {
        let registry = registry_with(TestProvider::new());
        let store = MemoryStateStore::new();
        let mut graph = chain();
        let mut old = graph.get("a").unwrap().properties().clone();
        old.insert("size".into(), Value::from(0i64));
        store.save("a", &StateRecord::new("test", old)).unwrap();

        let ctx = EngineContext::new(&registry, &store);
        let rendered = plan(&ctx, &mut graph).unwrap().to_string();
        assert!(rendered.contains("~ a (test)"));
        assert!(rendered.contains("size: 0 -> 1"));
        assert!(rendered.contains("+ b (test)"));
        assert!(rendered.ends_with(
            "Plan: 1 to create, 1 to update, 0 to replace, 0 to delete, 0 unchanged."
        ));
    }
}
