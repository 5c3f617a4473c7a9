//! The runnable definition tree: Suite → Group → Test.
//!
//! Definitions are built once when test content loads and are read-only
//! thereafter; everything mutable during execution lives on the run, the
//! session, or the shared registries. Suites register with a
//! [`RunnableIndex`], which rejects duplicate ids and hands out `Arc`
//! references shared by every concurrent run.

mod options;

pub use options::{EffectiveTree, SelectedOptions, TreeResolver};

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CrucibleError;
use crate::procedure::TestProcedure;
use crate::result::Result;

/// Kind of a node in the definition tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnableKind {
    Suite,
    Group,
    Test,
}

/// A named input a runnable declares it consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDefinition {
    pub name: String,
    pub title: Option<String>,
    /// Free-form hint for the boundary layer (e.g. "text", "oauth_credentials")
    pub type_hint: Option<String>,
    pub optional: bool,
    pub default: Option<Value>,
}

impl InputDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            type_hint: None,
            optional: false,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A named output a runnable declares it produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDefinition {
    pub name: String,
}

impl OutputDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A named, enumerated choice declared by a suite.
///
/// Selecting a value conditionally includes/excludes subtrees via their
/// `when` predicates and thereby changes requirement coverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteOption {
    pub id: String,
    pub title: Option<String>,
    pub values: Vec<String>,
    pub default: Option<String>,
}

impl SuiteOption {
    pub fn new(id: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            values,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Conditional-inclusion predicate: every key/value pair must match the
/// selected options for the node (and its subtree) to be included.
pub type WhenPredicate = BTreeMap<String, String>;

/// Immutable definition node: a Suite, Group, or Test.
#[derive(Clone)]
pub struct RunnableNode {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub kind: RunnableKind,
    pub children: Vec<RunnableNode>,
    pub inputs: Vec<InputDefinition>,
    pub outputs: Vec<OutputDefinition>,
    /// Conformance-requirement identifiers this node claims to verify
    pub requirements: Vec<String>,
    pub optional: bool,
    pub user_runnable: bool,
    pub when: Option<WhenPredicate>,
    /// Suite-level declared options (empty for Groups and Tests)
    pub suite_options: Vec<SuiteOption>,
    /// The opaque check a Test performs (Tests only)
    pub procedure: Option<Arc<dyn TestProcedure>>,
}

impl fmt::Debug for RunnableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("children", &self.children)
            .field("optional", &self.optional)
            .field("when", &self.when)
            .finish_non_exhaustive()
    }
}

impl RunnableNode {
    fn new(id: impl Into<String>, title: impl Into<String>, kind: RunnableKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            kind,
            children: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            requirements: Vec::new(),
            optional: false,
            user_runnable: true,
            when: None,
            suite_options: Vec::new(),
            procedure: None,
        }
    }

    /// Create a suite node
    pub fn suite(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, title, RunnableKind::Suite)
    }

    /// Create a group node
    pub fn group(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, title, RunnableKind::Group)
    }

    /// Create a test node bound to its procedure
    pub fn test(
        id: impl Into<String>,
        title: impl Into<String>,
        procedure: Arc<dyn TestProcedure>,
    ) -> Self {
        let mut node = Self::new(id, title, RunnableKind::Test);
        node.procedure = Some(procedure);
        node
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_child(mut self, child: RunnableNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_input(mut self, input: InputDefinition) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: OutputDefinition) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn not_user_runnable(mut self) -> Self {
        self.user_runnable = false;
        self
    }

    /// Gate this node (and its subtree) on a suite option value
    pub fn when(mut self, option: impl Into<String>, value: impl Into<String>) -> Self {
        self.when
            .get_or_insert_with(BTreeMap::new)
            .insert(option.into(), value.into());
        self
    }

    /// Declare a suite option (suites only)
    pub fn with_option(mut self, option: SuiteOption) -> Self {
        self.suite_options.push(option);
        self
    }

    /// Locate a node by id within this subtree
    pub fn find(&self, id: &str) -> Option<&RunnableNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Flattened declaration-order list of Test nodes in this subtree
    pub fn tests(&self) -> Vec<&RunnableNode> {
        let mut out = Vec::new();
        self.collect_tests(&mut out);
        out
    }

    fn collect_tests<'a>(&'a self, out: &mut Vec<&'a RunnableNode>) {
        match self.kind {
            RunnableKind::Test => out.push(self),
            _ => {
                for child in &self.children {
                    child.collect_tests(out);
                }
            }
        }
    }

    /// Flattened declaration-order Test list, each test paired with the
    /// input definitions it inherits from this node and enclosing groups.
    /// An inner declaration overrides an outer one of the same name.
    pub fn bound_tests(&self) -> Vec<BoundTest<'_>> {
        let mut out = Vec::new();
        self.collect_bound(&[], &mut out);
        out
    }

    fn collect_bound<'a>(
        &'a self,
        inherited: &[&'a InputDefinition],
        out: &mut Vec<BoundTest<'a>>,
    ) {
        let mut scope: Vec<&InputDefinition> = inherited
            .iter()
            .copied()
            .filter(|def| !self.inputs.iter().any(|own| own.name == def.name))
            .collect();
        scope.extend(self.inputs.iter());

        match self.kind {
            RunnableKind::Test => out.push(BoundTest {
                test: self,
                inputs: scope,
            }),
            _ => {
                for child in &self.children {
                    child.collect_bound(&scope, out);
                }
            }
        }
    }
}

/// A Test together with every input definition that applies to it,
/// including those declared on enclosing Groups and the Suite.
#[derive(Debug)]
pub struct BoundTest<'a> {
    pub test: &'a RunnableNode,
    pub inputs: Vec<&'a InputDefinition>,
}

/// Thread-safe registry of suite definition trees.
///
/// Registration walks the tree and rejects duplicate ids, which keeps
/// run targeting and wait resumption unambiguous.
#[derive(Default)]
pub struct RunnableIndex {
    suites: DashMap<String, Arc<RunnableNode>>,
}

impl RunnableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a suite, validating id uniqueness across its subtree
    pub fn register_suite(&self, suite: RunnableNode) -> Result<Arc<RunnableNode>> {
        if suite.kind != RunnableKind::Suite {
            return Err(CrucibleError::definition_error(format!(
                "'{}' is not a suite",
                suite.id
            )));
        }
        let mut seen = HashSet::new();
        check_unique_ids(&suite, &suite.id, &mut seen)?;

        let suite = Arc::new(suite);
        self.suites.insert(suite.id.clone(), Arc::clone(&suite));
        tracing::debug!(suite_id = %suite.id, "registered suite");
        Ok(suite)
    }

    pub fn get(&self, suite_id: &str) -> Option<Arc<RunnableNode>> {
        self.suites.get(suite_id).map(|r| Arc::clone(&r))
    }

    pub fn suite_ids(&self) -> Vec<String> {
        self.suites.iter().map(|r| r.key().clone()).collect()
    }
}

fn check_unique_ids(node: &RunnableNode, suite_id: &str, seen: &mut HashSet<String>) -> Result<()> {
    if !seen.insert(node.id.clone()) {
        return Err(CrucibleError::DuplicateRunnableId {
            suite_id: suite_id.to_string(),
            runnable_id: node.id.clone(),
        });
    }
    for child in &node.children {
        check_unique_ids(child, suite_id, seen)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{FnProcedure, Outcome};

    fn pass_test(id: &str) -> RunnableNode {
        RunnableNode::test(id, id, Arc::new(FnProcedure::new(|_| Outcome::Pass)))
    }

    #[test]
    fn test_register_and_lookup() {
        let index = RunnableIndex::new();
        let suite = RunnableNode::suite("smart", "SMART Launch")
            .with_child(RunnableNode::group("auth", "Authorization").with_child(pass_test("t1")));

        index.register_suite(suite).unwrap();
        let suite = index.get("smart").unwrap();
        assert_eq!(suite.find("t1").unwrap().kind, RunnableKind::Test);
        assert!(suite.find("missing").is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let index = RunnableIndex::new();
        let suite = RunnableNode::suite("s", "Suite")
            .with_child(pass_test("t1"))
            .with_child(pass_test("t1"));

        let err = index.register_suite(suite).unwrap_err();
        assert!(matches!(err, CrucibleError::DuplicateRunnableId { .. }));
    }

    #[test]
    fn test_non_suite_root_rejected() {
        let index = RunnableIndex::new();
        let err = index.register_suite(RunnableNode::group("g", "Group")).unwrap_err();
        assert!(matches!(err, CrucibleError::DefinitionError { .. }));
    }

    #[test]
    fn test_tests_are_declaration_ordered() {
        let suite = RunnableNode::suite("s", "Suite")
            .with_child(RunnableNode::group("g1", "G1").with_child(pass_test("a")))
            .with_child(pass_test("b"))
            .with_child(RunnableNode::group("g2", "G2").with_child(pass_test("c")));

        let ids: Vec<_> = suite.tests().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_bound_tests_inherit_ancestor_inputs() {
        let suite = RunnableNode::suite("s", "Suite")
            .with_input(InputDefinition::new("url"))
            .with_child(
                RunnableNode::group("g", "G")
                    .with_input(InputDefinition::new("token"))
                    .with_child(pass_test("a"))
                    .with_child(pass_test("b").with_input(InputDefinition::new("token").optional())),
            )
            .with_child(pass_test("c"));

        let bound = suite.bound_tests();
        let names = |index: usize| -> Vec<&str> {
            bound[index].inputs.iter().map(|def| def.name.as_str()).collect()
        };

        assert_eq!(names(0), vec!["url", "token"]);
        // An inner declaration of the same name shadows the group's
        assert_eq!(names(1), vec!["url", "token"]);
        assert!(bound[1].inputs[1].optional);
        assert_eq!(names(2), vec!["url"]);
    }
}
