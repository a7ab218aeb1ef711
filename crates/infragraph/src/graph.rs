//! Resource graph - declared resources and the dependencies between them
//!
//! Edges are derived from references in resource properties and may also be
//! added explicitly. Cycles are rejected when an edge is added, so a graph
//! built through this API is always acyclic.

use crate::error::{Error, Result};
use crate::executor::RunResult;
use crate::planner::Plan;
use crate::types::{ChangeKind, Outcome, Phase, Properties, Reference, ResourceStatus, Value};
use indexmap::{IndexMap, IndexSet};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// A declared infrastructure resource
#[derive(Debug, Clone)]
pub struct Resource {
    id: String,
    kind: String,
    properties: Properties,
    observed: Option<Properties>,
    status: ResourceStatus,
    dependencies: IndexSet<String>,
}

impl Resource {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Kind tag selecting the provider
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Desired properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Provider outputs observed after the last apply
    pub fn observed(&self) -> Option<&Properties> {
        self.observed.as_ref()
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    /// Ids of the resources that must be applied before this one
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(String::as_str)
    }
}

/// Declaration of a resource, built up before it is added to a graph
///
/// ```
/// use infragraph::{ResourceGraph, ResourceSpec};
///
/// let mut graph = ResourceGraph::new();
/// graph.add(ResourceSpec::new("vpc", "vpc").with("cidr", "10.0.0.0/18")).unwrap();
/// graph
///     .add(ResourceSpec::new("cluster", "ecs_cluster").with_ref("vpc", "vpc", "vpc_id"))
///     .unwrap();
/// assert_eq!(graph.topological_order().unwrap(), vec!["vpc", "cluster"]);
/// ```
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub id: String,
    pub kind: String,
    pub properties: Properties,
    pub depends_on: Vec<String>,
}

impl ResourceSpec {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            properties: Properties::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set a property
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set a property to another resource's output attribute
    pub fn with_ref(
        self,
        name: impl Into<String>,
        resource: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        self.with(name, Reference::new(resource, attribute))
    }

    /// Declare an ordering dependency that no property expresses
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// The desired-state graph
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: IndexMap<String, Resource>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, deriving an edge from every reference in its properties
    ///
    /// Referenced resources must already be declared. On error the graph is
    /// left unchanged.
    pub fn add_resource(
        &mut self,
        id: impl Into<String>,
        kind: impl Into<String>,
        properties: Properties,
    ) -> Result<()> {
        let id = id.into();
        validate_id(&id)?;
        if self.resources.contains_key(&id) {
            return Err(Error::DuplicateId { id });
        }

        let mut dependencies = IndexSet::new();
        for reference in properties.values().flat_map(Value::references) {
            if reference.resource == id {
                return Err(Error::CycleDetected {
                    from: id.clone(),
                    to: id,
                });
            }
            if !self.resources.contains_key(&reference.resource) {
                return Err(Error::UnknownResource {
                    id: reference.resource.clone(),
                });
            }
            dependencies.insert(reference.resource.clone());
        }

        log::debug!("Declared {id} with {} dependencies", dependencies.len());
        self.resources.insert(
            id.clone(),
            Resource {
                id,
                kind: kind.into(),
                properties,
                observed: None,
                status: ResourceStatus::Pending,
                dependencies,
            },
        );
        Ok(())
    }

    /// Add a resource from a spec, including its explicit dependencies
    ///
    /// All-or-nothing: a failing explicit dependency removes the resource again.
    pub fn add(&mut self, spec: ResourceSpec) -> Result<()> {
        let ResourceSpec {
            id,
            kind,
            properties,
            depends_on,
        } = spec;
        self.add_resource(id.clone(), kind, properties)?;

        for upstream in &depends_on {
            if let Err(e) = self.add_dependency(upstream, &id) {
                self.resources.shift_remove(&id);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Declare that `from` must be applied before `to`
    ///
    /// Fails with `CycleDetected` if `from` already depends on `to`,
    /// directly or transitively. The graph is unchanged on error.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        for id in [from, to] {
            if !self.resources.contains_key(id) {
                return Err(Error::UnknownResource { id: id.to_string() });
            }
        }
        if from == to || self.depends_on(from, to) {
            return Err(Error::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if let Some(resource) = self.resources.get_mut(to) {
            resource.dependencies.insert(from.to_string());
        }
        Ok(())
    }

    /// Whether `id` transitively depends on `upstream`
    pub fn depends_on(&self, id: &str, upstream: &str) -> bool {
        let mut stack = vec![id];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(resource) = self.resources.get(current) else {
                continue;
            };
            for dep in &resource.dependencies {
                if dep == upstream {
                    return true;
                }
                stack.push(dep);
            }
        }
        false
    }

    /// Resources in dependency order, ties broken by insertion order
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let index: HashMap<&str, usize> = self
            .resources
            .keys()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.resources.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.resources.len()];
        for (i, resource) in self.resources.values().enumerate() {
            for dep in &resource.dependencies {
                let &d = index
                    .get(dep.as_str())
                    .ok_or_else(|| Error::UnknownResource { id: dep.clone() })?;
                dependents[d].push(i);
                indegree[i] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.push(Reverse(d));
                }
            }
        }

        if order.len() != self.resources.len() {
            // Any resource left over sits on or behind a cycle
            let resource = self
                .resources
                .values()
                .enumerate()
                .find(|(i, _)| indegree[*i] > 0)
                .map(|(_, r)| r)
                .ok_or_else(|| Error::UnknownResource { id: String::new() })?;
            let from = resource
                .dependencies
                .iter()
                .find(|dep| index.get(dep.as_str()).is_some_and(|&d| indegree[d] > 0))
                .cloned()
                .unwrap_or_else(|| resource.id.clone());
            return Err(Error::CycleDetected {
                from,
                to: resource.id.clone(),
            });
        }

        Ok(order
            .into_iter()
            .map(|i| self.resources[i].id.clone())
            .collect())
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Resources in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Direct dependents of `id`, in insertion order
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.resources
            .values()
            .filter(|r| r.dependencies.contains(id))
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Every resource that depends on `id`, directly or transitively
    pub fn transitive_dependents(&self, id: &str) -> Vec<&str> {
        self.resources
            .values()
            .filter(|r| self.depends_on(&r.id, id))
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Move a resource to a new lifecycle status
    pub fn transition(&mut self, id: &str, next: ResourceStatus) -> Result<()> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| Error::UnknownResource { id: id.to_string() })?;
        if !resource.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: resource.status,
                to: next,
            });
        }
        resource.status = next;
        Ok(())
    }

    /// Mark every pending resource as planned
    pub(crate) fn mark_planned(&mut self) {
        for resource in self.resources.values_mut() {
            if resource.status == ResourceStatus::Pending {
                resource.status = ResourceStatus::Planned;
            }
        }
    }

    /// Fold the outcome of a run back into resource statuses and observed outputs
    pub fn record_outcomes(&mut self, plan: &Plan, result: &RunResult) -> Result<()> {
        for (id, outcome) in result.resource_outcomes() {
            let Some(status) = self.resources.get(&id).map(Resource::status) else {
                continue;
            };
            let deleted = plan
                .changes_for(&id)
                .any(|c| c.kind == ChangeKind::Delete && c.phase == Phase::Single);

            match outcome {
                Outcome::Succeeded | Outcome::NoOp if deleted => {
                    if status == ResourceStatus::Applied {
                        self.transition(&id, ResourceStatus::Destroyed)?;
                    }
                    self.set_observed(&id, None);
                }
                Outcome::Succeeded | Outcome::NoOp => {
                    if status == ResourceStatus::Planned {
                        self.transition(&id, ResourceStatus::Applying)?;
                        self.transition(&id, ResourceStatus::Applied)?;
                    }
                    self.set_observed(&id, result.outputs_for(&id).cloned());
                }
                Outcome::Failed { .. } => {
                    if status == ResourceStatus::Planned {
                        self.transition(&id, ResourceStatus::Applying)?;
                        self.transition(&id, ResourceStatus::Failed)?;
                    }
                }
                Outcome::Skipped { .. } => {}
            }
        }
        Ok(())
    }

    fn set_observed(&mut self, id: &str, observed: Option<Properties>) {
        if let Some(resource) = self.resources.get_mut(id) {
            resource.observed = observed;
        }
    }

    #[cfg(test)]
    pub(crate) fn force_dependency(&mut self, from: &str, to: &str) {
        if let Some(resource) = self.resources.get_mut(to) {
            resource.dependencies.insert(from.to_string());
        }
    }
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidId { id: id.to_string() })
    }
}
