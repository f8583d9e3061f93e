//! Node registry: naming and parent/child bookkeeping for the apparatus tree.
//!
//! The registry is an arena owned by one hub. Children are owned through the
//! arena; the parent link is a plain [`NodeId`] back-reference, so dropping a
//! subtree never has to untangle reference cycles.
//!
//! Tree shape is fixed: the hub is the root, things hang off the hub and
//! inputs hang off things. Sibling names are unique; a colliding request is
//! renamed deterministically (`X`, `X_1`, `X_2`, …) instead of replacing the
//! existing node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NotFoundError, RegistryError};
use crate::id::NodeId;
use crate::input::Access;
use crate::path::{NodePath, validate_name};

/// Node-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NodeKind {
    Hub,
    Thing,
    Input { access: Access },
}

impl NodeKind {
    fn accepts_child(self, child: Self) -> bool {
        matches!(
            (self, child),
            (Self::Hub, Self::Thing) | (Self::Thing, Self::Input { .. })
        )
    }
}

/// One registered node.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
}

impl NodeEntry {
    /// Child ids keyed by name.
    #[must_use]
    pub fn children(&self) -> &BTreeMap<String, NodeId> {
        &self.children
    }
}

/// Arena of nodes rooted at a single hub.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, NodeEntry>,
    root: NodeId,
    next: u32,
}

impl NodeRegistry {
    /// Create a registry containing only the hub node.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Validation`] if `hub_name` is not a valid name.
    pub fn new(hub_name: impl Into<String>) -> Result<Self, RegistryError> {
        let name = hub_name.into();
        validate_name(&name)?;
        let root = NodeId::from_raw(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root,
            NodeEntry {
                name,
                kind: NodeKind::Hub,
                parent: None,
                children: BTreeMap::new(),
            },
        );
        Ok(Self {
            nodes,
            root,
            next: 1,
        })
    }

    /// The hub node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of registered nodes, hub included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the hub is always registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&id)
    }

    /// All registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Child of `parent` called `name`.
    #[must_use]
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes.get(&parent)?.children.get(name).copied()
    }

    /// Register a new node under `parent`.
    ///
    /// Returns the new id and the name actually assigned, which differs from
    /// `requested` when a sibling already uses it.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnattachedParent`] if `parent` is not in this registry
    /// - [`RegistryError::Misplaced`] if `kind` cannot live under `parent`
    /// - [`RegistryError::Validation`] if `requested` is not a valid name
    pub fn register(
        &mut self,
        parent: NodeId,
        requested: &str,
        kind: NodeKind,
    ) -> Result<(NodeId, String), RegistryError> {
        validate_name(requested)?;
        let parent_entry = self
            .nodes
            .get(&parent)
            .ok_or(RegistryError::UnattachedParent(parent))?;
        if !parent_entry.kind.accepts_child(kind) {
            return Err(RegistryError::Misplaced {
                parent: parent_entry.kind,
                child: kind,
            });
        }
        let name = Self::unique_name(&parent_entry.children, requested);

        let id = NodeId::from_raw(self.next);
        self.next += 1;
        self.nodes.insert(
            id,
            NodeEntry {
                name: name.clone(),
                kind,
                parent: Some(parent),
                children: BTreeMap::new(),
            },
        );
        if let Some(parent_entry) = self.nodes.get_mut(&parent) {
            parent_entry.children.insert(name.clone(), id);
        }
        Ok((id, name))
    }

    fn unique_name(siblings: &BTreeMap<String, NodeId>, requested: &str) -> String {
        if !siblings.contains_key(requested) {
            return requested.to_string();
        }
        (1..)
            .map(|n| format!("{requested}_{n}"))
            .find(|candidate| !siblings.contains_key(candidate))
            .unwrap_or_else(|| requested.to_string())
    }

    /// Remove `id` and its whole subtree, returning the removed ids.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RootRemoval`] for the hub and
    /// [`RegistryError::UnknownNode`] for an id that is not registered.
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<NodeId>, RegistryError> {
        if id == self.root {
            return Err(RegistryError::RootRemoval);
        }
        let entry = self.nodes.get(&id).ok_or(RegistryError::UnknownNode(id))?;
        let (name, parent) = (entry.name.clone(), entry.parent);
        if let Some(parent_entry) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent_entry.children.remove(&name);
        }

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(entry) = self.nodes.remove(&next) {
                pending.extend(entry.children.into_values());
                removed.push(next);
            }
        }
        Ok(removed)
    }

    /// Walk parent links up to the node that has no parent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownNode`] if `id` (or one of its
    /// ancestors) is not registered.
    pub fn root_of(&self, id: NodeId) -> Result<NodeId, RegistryError> {
        let mut current = id;
        // A well-formed tree is never deeper than the number of nodes.
        for _ in 0..self.nodes.len() {
            let entry = self
                .nodes
                .get(&current)
                .ok_or(RegistryError::UnknownNode(current))?;
            match entry.parent {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
        Err(RegistryError::UnknownNode(id))
    }

    /// Resolve a dotted path from the hub.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if any segment does not exist.
    pub fn resolve(&self, path: &NodePath) -> Result<NodeId, NotFoundError> {
        let not_found = |kind| NotFoundError {
            kind,
            path: path.to_string(),
        };
        let thing = self
            .child(self.root, path.thing_name())
            .ok_or_else(|| not_found("thing"))?;
        match path.input_name() {
            None => Ok(thing),
            Some(input) => self.child(thing, input).ok_or_else(|| not_found("input")),
        }
    }

    /// Find the single input named `name` anywhere in the tree.
    ///
    /// Returns `None` when no input or more than one input has that name.
    #[must_use]
    pub fn find_unique_input(&self, name: &str) -> Option<NodeId> {
        let mut matches = self.nodes.iter().filter(|(_, entry)| {
            entry.name == name && matches!(entry.kind, NodeKind::Input { .. })
        });
        let (id, _) = matches.next()?;
        matches.next().is_none().then_some(*id)
    }

    /// Render the path of a thing or input node.
    ///
    /// Returns `None` for the hub and for unknown ids.
    #[must_use]
    pub fn path_of(&self, id: NodeId) -> Option<NodePath> {
        let entry = self.nodes.get(&id)?;
        match entry.kind {
            NodeKind::Hub => None,
            NodeKind::Thing => Some(NodePath::thing(entry.name.clone())),
            NodeKind::Input { .. } => {
                let thing = self.nodes.get(&entry.parent?)?;
                Some(NodePath::input(thing.name.clone(), entry.name.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    fn registry_with_stage() -> (NodeRegistry, NodeId) {
        let mut registry = NodeRegistry::new("autoAlign").unwrap();
        let (thing, _) = registry
            .register(registry.root(), "X", NodeKind::Thing)
            .unwrap();
        registry
            .register(
                thing,
                "position",
                NodeKind::Input {
                    access: Access::ReadWrite,
                },
            )
            .unwrap();
        (registry, thing)
    }

    #[test]
    fn should_walk_to_hub_from_every_node() {
        let (registry, _) = registry_with_stage();
        let root = registry.root();
        for id in registry.ids() {
            assert_eq!(registry.root_of(id).unwrap(), root);
        }
    }

    #[test]
    fn should_rename_colliding_sibling_deterministically() {
        let (mut registry, first) = registry_with_stage();
        let (second, name) = registry
            .register(registry.root(), "X", NodeKind::Thing)
            .unwrap();
        let (third, third_name) = registry
            .register(registry.root(), "X", NodeKind::Thing)
            .unwrap();

        assert_eq!(name, "X_1");
        assert_eq!(third_name, "X_2");
        assert_ne!(first, second);
        assert_eq!(registry.resolve(&NodePath::thing("X")).unwrap(), first);
        assert_eq!(registry.resolve(&NodePath::thing("X_1")).unwrap(), second);
        assert_eq!(registry.resolve(&NodePath::thing("X_2")).unwrap(), third);
    }

    #[test]
    fn should_allow_same_input_name_under_different_things() {
        let (mut registry, _) = registry_with_stage();
        let (other, _) = registry
            .register(registry.root(), "Y", NodeKind::Thing)
            .unwrap();
        let (_, name) = registry
            .register(
                other,
                "position",
                NodeKind::Input {
                    access: Access::ReadWrite,
                },
            )
            .unwrap();
        assert_eq!(name, "position");
    }

    #[test]
    fn should_fail_when_parent_is_unattached() {
        let (mut registry, _) = registry_with_stage();
        let stranger = NodeId::from_raw(999);
        let result = registry.register(stranger, "Z", NodeKind::Thing);
        assert_eq!(result, Err(RegistryError::UnattachedParent(stranger)));
    }

    #[test]
    fn should_fail_when_parent_was_removed() {
        let (mut registry, thing) = registry_with_stage();
        registry.remove(thing).unwrap();
        let result = registry.register(
            thing,
            "late",
            NodeKind::Input {
                access: Access::ReadOnly,
            },
        );
        assert_eq!(result, Err(RegistryError::UnattachedParent(thing)));
    }

    #[test]
    fn should_reject_input_directly_under_hub() {
        let mut registry = NodeRegistry::new("hub").unwrap();
        let result = registry.register(
            registry.root(),
            "loose",
            NodeKind::Input {
                access: Access::ReadWrite,
            },
        );
        assert!(matches!(result, Err(RegistryError::Misplaced { .. })));
    }

    #[test]
    fn should_reject_invalid_names() {
        let mut registry = NodeRegistry::new("hub").unwrap();
        let result = registry.register(registry.root(), "a.b", NodeKind::Thing);
        assert!(matches!(
            result,
            Err(RegistryError::Validation(
                ValidationError::SeparatorInName { .. }
            ))
        ));
        assert!(NodeRegistry::new("").is_err());
    }

    #[test]
    fn should_remove_whole_subtree() {
        let (mut registry, thing) = registry_with_stage();
        let removed = registry.remove(thing).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(&NodePath::thing("X")).is_err());
    }

    #[test]
    fn should_refuse_to_remove_root() {
        let (mut registry, _) = registry_with_stage();
        let root = registry.root();
        assert_eq!(registry.remove(root), Err(RegistryError::RootRemoval));
    }

    #[test]
    fn should_resolve_input_path_and_render_it_back() {
        let (registry, _) = registry_with_stage();
        let path = NodePath::input("X", "position");
        let id = registry.resolve(&path).unwrap();
        assert_eq!(registry.path_of(id), Some(path));
        assert_eq!(registry.path_of(registry.root()), None);
    }

    #[test]
    fn should_report_missing_input_segment() {
        let (registry, _) = registry_with_stage();
        let err = registry
            .resolve(&NodePath::input("X", "missing"))
            .unwrap_err();
        assert_eq!(err.kind, "input");
        assert_eq!(err.path, "X.missing");
    }

    #[test]
    fn should_find_unique_input_by_bare_name() {
        let (mut registry, _) = registry_with_stage();
        assert!(registry.find_unique_input("position").is_some());

        let (other, _) = registry
            .register(registry.root(), "Y", NodeKind::Thing)
            .unwrap();
        registry
            .register(
                other,
                "position",
                NodeKind::Input {
                    access: Access::ReadWrite,
                },
            )
            .unwrap();
        assert!(registry.find_unique_input("position").is_none());
        assert!(registry.find_unique_input("nope").is_none());
    }
}
