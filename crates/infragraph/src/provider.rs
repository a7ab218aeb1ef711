//! Providers and the registry that maps resource kinds to them
//!
//! A provider translates one resource kind into real (or simulated)
//! infrastructure operations. The core only ever talks to infrastructure
//! through this trait.

use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::state::StateRecord;
use crate::types::{ChangeKind, Properties, Value};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Type of a schema property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Bool,
    Integer,
    Float,
    String,
    List,
    Any,
}

impl PropertyType {
    /// Whether `value` is acceptable for this type
    ///
    /// References are accepted for every type; they are checked once resolved.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Ref(_)) | (Self::Any, _) => true,
            (Self::Bool, Value::Bool(_))
            | (Self::Integer, Value::Integer(_))
            | (Self::Float, Value::Float(_) | Value::Integer(_))
            | (Self::String, Value::String(_))
            | (Self::List, Value::List(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

/// Declaration of one property in a provider schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub ty: PropertyType,
    pub required: bool,
    /// Changing this property forces replacement
    pub immutable: bool,
}

impl PropertySpec {
    pub fn required(ty: PropertyType) -> Self {
        Self {
            ty,
            required: true,
            immutable: false,
        }
    }

    pub fn optional(ty: PropertyType) -> Self {
        Self {
            ty,
            required: false,
            immutable: false,
        }
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

/// Property schema of one resource kind
#[derive(Debug, Clone, Default)]
pub struct Schema {
    properties: IndexMap<String, PropertySpec>,
    allow_unknown: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    /// Accept properties the schema does not declare
    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertySpec)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_immutable(&self, name: &str) -> bool {
        self.properties.get(name).is_some_and(|p| p.immutable)
    }

    /// Check properties against the schema
    pub fn validate(&self, properties: &Properties) -> anyhow::Result<()> {
        for (name, spec) in &self.properties {
            match properties.get(name) {
                None if spec.required => anyhow::bail!("missing required property '{name}'"),
                None => {}
                Some(value) if !spec.ty.accepts(value) => anyhow::bail!(
                    "property '{name}' expects {}, got {}",
                    spec.ty,
                    value.type_name()
                ),
                Some(_) => {}
            }
        }
        if !self.allow_unknown
            && let Some(name) = properties.keys().find(|k| !self.properties.contains_key(*k))
        {
            anyhow::bail!("unknown property '{name}'");
        }
        Ok(())
    }
}

/// Everything a provider needs to create or update one resource
#[derive(Debug)]
pub struct ApplyRequest<'a> {
    pub resource_id: &'a str,
    /// `Create`, `Update`, or `Replace` (the create half)
    pub kind: ChangeKind,
    /// Desired properties with every reference resolved
    pub properties: &'a Properties,
    /// Record of the instance being updated or replaced
    pub previous: Option<&'a StateRecord>,
}

/// What a provider reports after a successful apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// External identifier assigned by the backend
    pub handle: Option<String>,
    /// Attributes other resources may reference
    pub outputs: Properties,
}

impl Applied {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: Some(handle.into()),
            outputs: Properties::new(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}

/// Capability set for one resource kind
///
/// Implementations must be safe to call from several worker threads at once.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Property schema, if the provider declares one
    fn schema(&self) -> Option<&Schema> {
        None
    }

    /// Reject desired properties before anything is planned
    fn validate(&self, properties: &Properties) -> anyhow::Result<()> {
        match self.schema() {
            Some(schema) => schema.validate(properties),
            None => Ok(()),
        }
    }

    /// Whether changing `property` forces replacement
    fn is_immutable(&self, property: &str) -> bool {
        self.schema().is_some_and(|s| s.is_immutable(property))
    }

    /// Whether a replacement may create the new instance before destroying the old one
    fn create_before_destroy(&self) -> bool {
        false
    }

    /// Decide what to do to move from `observed` to `desired`
    fn diff(
        &self,
        desired: Option<&Properties>,
        observed: Option<&Properties>,
    ) -> anyhow::Result<ChangeKind> {
        Ok(diff_properties(desired, observed, |name| {
            self.is_immutable(name)
        }))
    }

    /// Create or update the resource, returning its handle and outputs
    fn apply(&self, request: &ApplyRequest<'_>) -> anyhow::Result<Applied>;

    /// Destroy the instance described by `record`
    fn destroy(&self, record: &StateRecord) -> anyhow::Result<()>;
}

/// Default diff rules shared by providers
///
/// identical ⇒ `NoOp`, desired absent ⇒ `Delete`, observed absent ⇒ `Create`,
/// an immutable property changed ⇒ `Replace`, anything else ⇒ `Update`.
pub fn diff_properties<F>(
    desired: Option<&Properties>,
    observed: Option<&Properties>,
    is_immutable: F,
) -> ChangeKind
where
    F: Fn(&str) -> bool,
{
    match (desired, observed) {
        (None, None) => ChangeKind::NoOp,
        (None, Some(_)) => ChangeKind::Delete,
        (Some(_), None) => ChangeKind::Create,
        (Some(desired), Some(observed)) if desired == observed => ChangeKind::NoOp,
        (Some(desired), Some(observed)) => {
            let replaced = desired
                .keys()
                .chain(observed.keys())
                .filter(|name| desired.get(*name) != observed.get(*name))
                .any(|name| is_immutable(name));
            if replaced {
                ChangeKind::Replace
            } else {
                ChangeKind::Update
            }
        }
    }
}

/// Maps resource kinds to providers
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `kind` with a provider, replacing any previous one
    pub fn register<P: Provider + 'static>(&mut self, kind: impl Into<String>, provider: P) -> &mut Self {
        self.register_shared(kind, Arc::new(provider))
    }

    /// Register a provider that is shared with other kinds or callers
    pub fn register_shared(&mut self, kind: impl Into<String>, provider: Arc<dyn Provider>) -> &mut Self {
        let kind = kind.into();
        if self.providers.insert(kind.clone(), provider).is_some() {
            log::warn!("Provider for kind '{kind}' replaced");
        }
        self
    }

    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownProviderKind {
                kind: kind.to_string(),
            })
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Resolve and validate every resource in a graph
    pub fn validate_graph(&self, graph: &ResourceGraph) -> Result<()> {
        for resource in graph.iter() {
            self.resolve(resource.kind())?
                .validate(resource.properties())
                .map_err(|source| Error::InvalidProperties {
                    resource_id: resource.id().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}
