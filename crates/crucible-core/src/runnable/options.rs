//! Suite option resolution: pure, cached filtering of a definition tree.
//!
//! A conditionally attached node is included iff every key/value pair of
//! its `when` predicate matches the selection. Excluded subtrees never
//! execute, never contribute requirement coverage, and never accept
//! inputs. Resolution is deterministic, so effective trees are cached by
//! `(suite_id, effective selection)` and shared read-only across runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::CrucibleError;
use crate::result::Result;
use crate::runnable::{BoundTest, RunnableIndex, RunnableNode};

/// A concrete assignment of suite option values. Ordered so it can key
/// the resolution cache.
pub type SelectedOptions = BTreeMap<String, String>;

/// The option-filtered view of a suite for one selection.
#[derive(Debug, Clone)]
pub struct EffectiveTree {
    pub suite_id: String,
    /// The selection after defaults were applied
    pub selection: SelectedOptions,
    pub root: RunnableNode,
}

impl EffectiveTree {
    /// Locate an included node by id
    pub fn find(&self, id: &str) -> Option<&RunnableNode> {
        self.root.find(id)
    }

    /// Flattened declaration-order Test list under the given node, with
    /// the input definitions each test inherits from enclosing nodes
    pub fn tests_under(&self, id: &str) -> Option<Vec<BoundTest<'_>>> {
        self.find(id).map(RunnableNode::bound_tests)
    }
}

/// Resolves and caches effective trees for (suite, selection) pairs.
pub struct TreeResolver {
    index: Arc<RunnableIndex>,
    cache: DashMap<(String, SelectedOptions), Arc<EffectiveTree>>,
}

impl TreeResolver {
    pub fn new(index: Arc<RunnableIndex>) -> Self {
        Self {
            index,
            cache: DashMap::new(),
        }
    }

    /// Resolve the effective tree for a suite under a selection.
    ///
    /// Every declared suite option must be assigned (or carry a default)
    /// and the value must be one of the enumerated values; unknown option
    /// keys are rejected. All violations are [`CrucibleError::InvalidOption`].
    pub fn resolve(
        &self,
        suite_id: &str,
        selected: &SelectedOptions,
    ) -> Result<Arc<EffectiveTree>> {
        let suite = self
            .index
            .get(suite_id)
            .ok_or_else(|| CrucibleError::suite_not_found(suite_id))?;

        let selection = effective_selection(&suite, selected)?;

        let key = (suite_id.to_string(), selection.clone());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let root = filter_node(&suite, &selection)
            .unwrap_or_else(|| strip_children(&suite));
        let tree = Arc::new(EffectiveTree {
            suite_id: suite_id.to_string(),
            selection,
            root,
        });
        self.cache.insert(key, Arc::clone(&tree));
        Ok(tree)
    }
}

fn effective_selection(
    suite: &RunnableNode,
    selected: &SelectedOptions,
) -> Result<SelectedOptions> {
    let mut selection = SelectedOptions::new();

    for option in &suite.suite_options {
        let value = match selected.get(&option.id) {
            Some(value) => value.clone(),
            None => option.default.clone().ok_or_else(|| {
                CrucibleError::invalid_option(&option.id, "option is not assigned and has no default")
            })?,
        };
        if !option.values.contains(&value) {
            return Err(CrucibleError::invalid_option(
                &option.id,
                format!(
                    "'{value}' is not one of the allowed values [{}]",
                    option.values.join(", ")
                ),
            ));
        }
        selection.insert(option.id.clone(), value);
    }

    for key in selected.keys() {
        if !suite.suite_options.iter().any(|o| &o.id == key) {
            return Err(CrucibleError::invalid_option(
                key,
                "suite does not declare this option",
            ));
        }
    }

    Ok(selection)
}

fn predicate_matches(node: &RunnableNode, selection: &SelectedOptions) -> bool {
    match &node.when {
        None => true,
        Some(when) => when
            .iter()
            .all(|(key, value)| selection.get(key) == Some(value)),
    }
}

// Returns None when the node itself is excluded by its predicate.
fn filter_node(node: &RunnableNode, selection: &SelectedOptions) -> Option<RunnableNode> {
    if !predicate_matches(node, selection) {
        return None;
    }
    let mut filtered = strip_children(node);
    filtered.children = node
        .children
        .iter()
        .filter_map(|child| filter_node(child, selection))
        .collect();
    Some(filtered)
}

fn strip_children(node: &RunnableNode) -> RunnableNode {
    let mut clone = node.clone();
    clone.children = Vec::new();
    clone
}
