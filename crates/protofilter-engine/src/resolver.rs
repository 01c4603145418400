//! Inclusion resolution
//!
//! Walks a schema depth-first, asks the rule forests about every path and
//! propagates inclusion down from elements included with their children. Field
//! and method references pull their target types in, wherever those are
//! declared. The result is an [`InclusionMap`] from path to [`InclusionState`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use protofilter_core::path;
use protofilter_core::{ElementId, ElementKind, InclusionVerdict, RuleForest, SchemaSet};

use crate::error::FilterError;

/// Settled state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionState {
    /// Visited, but nothing decided it
    #[default]
    Unknown,

    /// Kept, but children are decided individually
    IncludedImplicit,

    /// Kept along with everything below it
    IncludedExplicit,

    /// Rejected by an exclude rule
    ExcludedExplicit,
}

impl InclusionState {
    pub fn is_included(self) -> bool {
        matches!(self, Self::IncludedImplicit | Self::IncludedExplicit)
    }
}

impl std::fmt::Display for InclusionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::IncludedImplicit => "included implicitly",
            Self::IncludedExplicit => "included explicitly",
            Self::ExcludedExplicit => "excluded explicitly",
        };
        write!(f, "{}", s)
    }
}

/// Inclusion state of every visited path, ordered by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionMap {
    states: BTreeMap<String, InclusionState>,
}

impl InclusionMap {
    /// State of a path (`Unknown` when it was never visited)
    pub fn get(&self, path: &str) -> InclusionState {
        self.states.get(path).copied().unwrap_or_default()
    }

    pub fn is_included(&self, path: &str) -> bool {
        self.get(path).is_included()
    }

    /// Whether the resolver visited the path at all
    pub fn contains(&self, path: &str) -> bool {
        self.states.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, InclusionState)> {
        self.states.iter().map(|(path, state)| (path.as_str(), *state))
    }

    /// Visited paths with included states collapsed to `true`
    pub fn visibility(&self) -> BTreeMap<String, bool> {
        self.states
            .iter()
            .map(|(path, state)| (path.clone(), state.is_included()))
            .collect()
    }

    /// Every element path of `schema`, visited or not
    ///
    /// Synthetic map entries and their fields are left out.
    pub fn complete_visibility(&self, schema: &SchemaSet) -> BTreeMap<String, bool> {
        schema
            .ids()
            .filter(|&id| {
                let element = schema.element(id);
                let in_entry = element
                    .parent
                    .map(|parent| schema.element(parent).is_map_entry())
                    .unwrap_or(false);
                !element.is_map_entry() && !in_entry
            })
            .map(|id| {
                let path = schema.path_of(id);
                let included = self.is_included(&path);
                (path, included)
            })
            .collect()
    }

    /// Paths in an included state
    pub fn included_paths(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, state)| state.is_included())
            .map(|(path, _)| path.as_str())
            .collect()
    }

    pub(crate) fn set(&mut self, path: String, state: InclusionState) {
        self.states.insert(path, state);
    }
}

/// Per-run resolution state
pub struct InclusionResolver<'a> {
    schema: &'a SchemaSet,
    rules: &'a RuleForest,
    verdicts: HashMap<String, InclusionVerdict>,
    map: InclusionMap,

    /// Ancestors of referenced types, which must end up kept
    containers: BTreeSet<String>,
}

impl<'a> InclusionResolver<'a> {
    fn new(schema: &'a SchemaSet, rules: &'a RuleForest) -> Self {
        Self {
            schema,
            rules,
            verdicts: HashMap::new(),
            map: InclusionMap::default(),
            containers: BTreeSet::new(),
        }
    }

    /// Resolve the inclusion state of every reachable element
    pub fn resolve(schema: &'a SchemaSet, rules: &'a RuleForest) -> Result<InclusionMap, FilterError> {
        let mut resolver = Self::new(schema, rules);

        for &file in schema.files() {
            resolver.walk_file(file)?;
        }
        resolver.close_containers()?;

        let map = resolver.map;
        tracing::debug!(
            visited = map.len(),
            included = map.included_paths().len(),
            rule_lookups = resolver.verdicts.len(),
            "Resolved inclusions"
        );
        Ok(map)
    }

    fn verdict(&mut self, path: &str, segments: &[&str]) -> InclusionVerdict {
        if let Some(verdict) = self.verdicts.get(path) {
            return *verdict;
        }
        let verdict = self.rules.lookup(segments);
        self.verdicts.insert(path.to_string(), verdict);
        verdict
    }

    /// Settle one element; returns whether to descend and what children inherit
    fn resolve_element(
        &mut self,
        id: ElementId,
        included_by_parent: bool,
    ) -> Result<(bool, bool), FilterError> {
        let schema = self.schema;
        let segments = schema.path_segments(id);
        let path = path::build_path(&segments);

        let verdict = self.verdict(&path, &segments);
        let existing = self.map.get(&path);
        let child_include = included_by_parent || verdict == InclusionVerdict::IncludedWithChildren;

        let (state, explore) = if verdict == InclusionVerdict::Excluded {
            if existing.is_included() {
                return Err(conflict(path, existing, InclusionState::ExcludedExplicit));
            }
            (InclusionState::ExcludedExplicit, false)
        } else if child_include {
            if existing == InclusionState::ExcludedExplicit {
                return Err(conflict(path, existing, InclusionState::IncludedExplicit));
            }
            // already-kept elements are not walked again
            (InclusionState::IncludedExplicit, !existing.is_included())
        } else if verdict == InclusionVerdict::IncludedWithoutChildren {
            if existing == InclusionState::ExcludedExplicit {
                return Err(conflict(path, existing, InclusionState::IncludedImplicit));
            }
            let state = if existing == InclusionState::IncludedExplicit {
                InclusionState::IncludedExplicit
            } else {
                InclusionState::IncludedImplicit
            };
            (state, !existing.is_included())
        } else {
            (existing, false)
        };

        tracing::trace!(
            path = %path,
            verdict = %verdict,
            existing = %existing,
            state = %state,
            explore,
            child_include,
            "Resolved path"
        );
        self.map.set(path, state);

        Ok((explore, child_include))
    }

    fn walk_file(&mut self, id: ElementId) -> Result<(), FilterError> {
        let (explore, child_include) = self.resolve_element(id, false)?;
        if !explore {
            return Ok(());
        }
        let schema = self.schema;
        let Some(body) = schema.element(id).as_file() else {
            return Ok(());
        };

        for &message in &body.messages {
            self.walk_message(message, child_include)?;
        }
        for &enum_id in &body.enums {
            self.walk_enum(enum_id, child_include)?;
        }
        for &service in &body.services {
            self.walk_service(service, child_include)?;
        }
        Ok(())
    }

    fn walk_message(&mut self, id: ElementId, included_by_parent: bool) -> Result<(), FilterError> {
        let schema = self.schema;
        let element = schema.element(id);
        // map entries are covered by their field
        if element.is_map_entry() {
            return Ok(());
        }

        let (explore, child_include) = self.resolve_element(id, included_by_parent)?;
        if !explore {
            return Ok(());
        }
        let Some(body) = element.as_message() else {
            return Ok(());
        };

        for &nested in &body.messages {
            self.walk_message(nested, child_include)?;
        }
        for &enum_id in &body.enums {
            self.walk_enum(enum_id, child_include)?;
        }
        for &field in &body.fields {
            self.walk_field(field, child_include)?;
        }
        Ok(())
    }

    fn walk_enum(&mut self, id: ElementId, included_by_parent: bool) -> Result<(), FilterError> {
        let (explore, child_include) = self.resolve_element(id, included_by_parent)?;
        if !explore {
            return Ok(());
        }
        let schema = self.schema;
        let Some(body) = schema.element(id).as_enum() else {
            return Ok(());
        };

        for &value in &body.values {
            self.resolve_element(value, child_include)?;
        }
        Ok(())
    }

    fn walk_service(&mut self, id: ElementId, included_by_parent: bool) -> Result<(), FilterError> {
        let (explore, child_include) = self.resolve_element(id, included_by_parent)?;
        if !explore {
            return Ok(());
        }
        let schema = self.schema;
        let Some(body) = schema.element(id).as_service() else {
            return Ok(());
        };

        for &method in &body.methods {
            self.walk_method(method, child_include)?;
        }
        Ok(())
    }

    fn walk_field(&mut self, id: ElementId, included_by_parent: bool) -> Result<(), FilterError> {
        let (explore, child_include) = self.resolve_element(id, included_by_parent)?;
        if !explore {
            return Ok(());
        }
        let schema = self.schema;
        let Some(body) = schema.element(id).as_field() else {
            return Ok(());
        };

        let targets: Vec<ElementId> = match schema.map_entry_types(id) {
            Some((key, value)) => key.target().into_iter().chain(value.target()).collect(),
            None => body.field_type.target().into_iter().collect(),
        };
        for target in targets {
            self.follow_reference(id, target, child_include)?;
        }
        Ok(())
    }

    fn walk_method(&mut self, id: ElementId, included_by_parent: bool) -> Result<(), FilterError> {
        let (explore, child_include) = self.resolve_element(id, included_by_parent)?;
        if !explore {
            return Ok(());
        }
        let schema = self.schema;
        let Some(body) = schema.element(id).as_method() else {
            return Ok(());
        };

        self.follow_reference(id, body.input, child_include)?;
        self.follow_reference(id, body.output, child_include)?;
        Ok(())
    }

    /// Resolve a referenced type through its own path and require it to be kept
    fn follow_reference(
        &mut self,
        from: ElementId,
        target: ElementId,
        included_by_parent: bool,
    ) -> Result<(), FilterError> {
        let schema = self.schema;
        for ancestor in schema.ancestors(target) {
            self.containers.insert(schema.path_of(ancestor));
        }

        match schema.element(target).kind() {
            ElementKind::Message => self.walk_message(target, included_by_parent)?,
            ElementKind::Enum => self.walk_enum(target, included_by_parent)?,
            _ => {}
        }

        let target_path = schema.path_of(target);
        let state = self.map.get(&target_path);
        if !state.is_included() {
            let path = schema.path_of(from);
            tracing::warn!(path = %path, target = %target_path, state = %state, "Kept element references a dropped type");
            return Err(FilterError::ExcludedReference {
                path,
                target: target_path,
                state,
            });
        }
        Ok(())
    }

    /// Keep every file and outer message that declares a referenced type
    fn close_containers(&mut self) -> Result<(), FilterError> {
        for path in std::mem::take(&mut self.containers) {
            match self.map.get(&path) {
                InclusionState::Unknown => {
                    tracing::trace!(path = %path, "Kept as container of a referenced type");
                    self.map.set(path, InclusionState::IncludedImplicit);
                }
                InclusionState::ExcludedExplicit => {
                    return Err(conflict(
                        path,
                        InclusionState::ExcludedExplicit,
                        InclusionState::IncludedImplicit,
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn conflict(path: String, existing: InclusionState, attempted: InclusionState) -> FilterError {
    tracing::warn!(path = %path, existing = %existing, attempted = %attempted, "Inclusion conflict");
    FilterError::Conflict {
        path,
        existing,
        attempted,
    }
}
