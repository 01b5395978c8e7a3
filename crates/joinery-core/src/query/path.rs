//! Relation path resolution.
//!
//! Path strings such as `"teachers__category"` are split into hops and each
//! hop is resolved against the entity reached by the previous one. Paths that
//! share a prefix are merged into one [`RelationTree`], so `"a__b"` and
//! `"a__c"` hang off the same `a` node.

use crate::catalog::{EntityDef, Registry, RelationDef};
use crate::error::Error;
use joinery_proto::{join_path, split_path};
use tracing::trace;

/// One resolved hop.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationNode {
    /// Canonical path from the root (`"teachers__category"`).
    pub path: String,
    /// The relation traversed to reach this node.
    pub relation: RelationDef,
    /// Whether the caller asked for this node, as opposed to a required
    /// relation added automatically.
    pub requested: bool,
    /// Nested hops.
    pub children: Vec<RelationNode>,
}

impl RelationNode {
    fn new(path: String, relation: RelationDef, requested: bool) -> Self {
        Self {
            path,
            relation,
            requested,
            children: Vec::new(),
        }
    }

    /// Relation name of this hop.
    pub fn name(&self) -> &str {
        &self.relation.name
    }

    /// Entity reached by this hop.
    pub fn entity(&self) -> &str {
        &self.relation.target
    }

    /// Number of hops from the root to this node.
    pub fn depth(&self) -> usize {
        split_path(&self.path).len()
    }
}

/// Union of resolved relation paths below a root entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationTree {
    /// Root entity name.
    pub root: String,
    /// First-level hops.
    pub children: Vec<RelationNode>,
}

impl RelationTree {
    /// An empty tree.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            children: Vec::new(),
        }
    }

    /// Check if no relation is loaded.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Find a node by canonical path.
    pub fn find(&self, path: &str) -> Option<&RelationNode> {
        self.nodes().into_iter().find(|n| n.path == path)
    }

    /// Check whether a canonical path is part of the tree.
    pub fn contains(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// All nodes, depth first, parents before children.
    pub fn nodes(&self) -> Vec<&RelationNode> {
        fn walk<'a>(nodes: &'a [RelationNode], out: &mut Vec<&'a RelationNode>) {
            for node in nodes {
                out.push(node);
                walk(&node.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.children, &mut out);
        out
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    /// Depth of the deepest node (0 for an empty tree).
    pub fn depth(&self) -> usize {
        self.nodes().iter().map(|n| n.depth()).max().unwrap_or(0)
    }
}

/// Resolves relation paths against an entity registry.
#[derive(Debug, Clone)]
pub struct PathResolver<'a> {
    registry: &'a Registry,
    max_depth: usize,
}

impl<'a> PathResolver<'a> {
    /// Create a resolver without a depth limit.
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            max_depth: usize::MAX,
        }
    }

    /// Reject requested paths deeper than `max_depth`, and required relations
    /// that would have to be loaded below that depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve path strings into a merged tree.
    pub fn resolve<S: AsRef<str>>(&self, root: &str, paths: &[S]) -> Result<RelationTree, Error> {
        let root_def = self.registry.get_entity(root)?;
        let mut tree = RelationTree::new(root);

        for raw in paths {
            let raw = raw.as_ref();
            let hops = split_path(raw);
            if hops.is_empty() || hops.iter().any(|hop| hop.is_empty()) {
                return Err(Error::QueryDefinition(format!(
                    "invalid relation path '{}'",
                    raw
                )));
            }
            if hops.len() > self.max_depth {
                return Err(Error::QueryDefinition(format!(
                    "relation path '{}' has {} hops, more than the allowed {}",
                    raw,
                    hops.len(),
                    self.max_depth
                )));
            }

            let mut entity = root_def;
            let mut level = &mut tree.children;
            let mut path = String::new();
            for hop in hops {
                let relation = self.resolve_hop(entity, hop)?;
                path = join_path(&path, &relation.name);
                trace!(path = %path, target = %relation.target, "resolved hop");

                let index = match level.iter().position(|n| n.relation.name == relation.name) {
                    Some(index) => {
                        level[index].requested = true;
                        index
                    }
                    None => {
                        level.push(RelationNode::new(path.clone(), relation.clone(), true));
                        level.len() - 1
                    }
                };
                entity = self.registry.get_entity(&relation.target)?;
                level = &mut level[index].children;
            }
        }

        Ok(tree)
    }

    /// Add every required relation reachable from the root or an existing
    /// node, recursively.
    ///
    /// A required relation leading back to an entity already on the current
    /// branch is not followed, so required self references terminate.
    pub fn expand_required(&self, tree: &mut RelationTree) -> Result<(), Error> {
        let root = self.registry.get_entity(&tree.root)?;
        let mut ancestors = vec![tree.root.clone()];
        self.expand_level(root, "", &mut tree.children, &mut ancestors)
    }

    fn expand_level(
        &self,
        entity: &EntityDef,
        path: &str,
        level: &mut Vec<RelationNode>,
        ancestors: &mut Vec<String>,
    ) -> Result<(), Error> {
        let depth = split_path(path).len();
        for relation in entity.required_relations() {
            if level.iter().any(|n| n.relation.name == relation.name)
                || ancestors.contains(&relation.target)
            {
                continue;
            }
            let child_path = join_path(path, &relation.name);
            if depth >= self.max_depth {
                return Err(Error::QueryDefinition(format!(
                    "required relation '{}' is deeper than the allowed {} hops",
                    child_path, self.max_depth
                )));
            }
            trace!(path = %child_path, "adding required relation");
            level.push(RelationNode::new(child_path, relation.clone(), false));
        }

        for node in level.iter_mut() {
            let target = self.registry.get_entity(&node.relation.target)?;
            ancestors.push(target.name.clone());
            self.expand_level(target, &node.path, &mut node.children, ancestors)?;
            ancestors.pop();
        }
        Ok(())
    }

    /// Resolve one hop: a relation name, or the name of a target entity
    /// reached by exactly one relation.
    fn resolve_hop(&self, entity: &'a EntityDef, hop: &str) -> Result<&'a RelationDef, Error> {
        if let Some(relation) = entity.get_relation(hop) {
            return Ok(relation);
        }

        let candidates: Vec<&RelationDef> = entity
            .relations
            .iter()
            .filter(|r| r.target.eq_ignore_ascii_case(hop))
            .collect();
        match candidates.as_slice() {
            [relation] => Ok(relation),
            [] => Err(Error::UnknownRelation {
                entity: entity.name.clone(),
                relation: hop.to_string(),
            }),
            _ => Err(Error::AmbiguousRelation {
                entity: entity.name.clone(),
                target: candidates[0].target.clone(),
                candidates: candidates.iter().map(|r| r.name.clone()).collect(),
            }),
        }
    }
}

/// Resolve path strings with an unlimited resolver.
pub fn resolve<S: AsRef<str>>(
    registry: &Registry,
    root: &str,
    paths: &[S],
) -> Result<RelationTree, Error> {
    PathResolver::new(registry).resolve(root, paths)
}
