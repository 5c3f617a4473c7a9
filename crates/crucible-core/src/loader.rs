//! Suite definition loading: the seam through which test-kit content
//! reaches the engine.
//!
//! A definition file declares the Suite → Group → Test hierarchy, suite
//! options, `when` predicates, inputs/outputs, and requirement
//! identifiers; each test names a procedure registered in a
//! [`ProcedureRegistry`] by the test kit at startup. The engine never
//! interprets what a procedure does.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CrucibleError;
use crate::procedure::TestProcedure;
use crate::result::Result;
use crate::runnable::{InputDefinition, OutputDefinition, RunnableNode, SuiteOption};

/// Named procedures supplied by the test kit
#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: DashMap<String, Arc<dyn TestProcedure>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, procedure: Arc<dyn TestProcedure>) {
        self.procedures.insert(name.into(), procedure);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TestProcedure>> {
        self.procedures.get(name).map(|r| Arc::clone(&r))
    }
}

/// Serialized form of a suite option
#[derive(Debug, Clone, Deserialize)]
pub struct OptionDefinition {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub values: Vec<String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// Serialized form of a declared input
#[derive(Debug, Clone, Deserialize)]
pub struct InputField {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Serialized form of a Group or Test node
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default = "default_true")]
    pub user_runnable: bool,
    #[serde(default)]
    pub when: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub inputs: Vec<InputField>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Registered procedure name; present iff this node is a Test
    #[serde(default)]
    pub procedure: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeDefinition>,
}

fn default_true() -> bool {
    true
}

/// Serialized form of a whole suite
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionDefinition>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub children: Vec<NodeDefinition>,
}

/// Parse a JSON suite definition and bind its procedures.
pub fn load_suite(json: &str, registry: &ProcedureRegistry) -> Result<RunnableNode> {
    let definition: SuiteDefinition = serde_json::from_str(json)
        .map_err(|err| CrucibleError::definition_error(err.to_string()))?;
    build_suite(definition, registry)
}

/// Build the runnable tree from an already-parsed definition.
pub fn build_suite(
    definition: SuiteDefinition,
    registry: &ProcedureRegistry,
) -> Result<RunnableNode> {
    let mut suite = RunnableNode::suite(definition.id, definition.title);
    suite.description = definition.description;
    suite.requirements = definition.requirements;
    for option in definition.options {
        let mut suite_option = SuiteOption::new(option.id, option.values);
        suite_option.title = option.title;
        suite_option.default = option.default;
        suite = suite.with_option(suite_option);
    }
    for child in definition.children {
        suite = suite.with_child(build_node(child, registry)?);
    }
    Ok(suite)
}

fn build_node(definition: NodeDefinition, registry: &ProcedureRegistry) -> Result<RunnableNode> {
    let mut node = match (&definition.procedure, definition.children.is_empty()) {
        (Some(name), true) => {
            let procedure = registry
                .get(name)
                .ok_or_else(|| CrucibleError::unknown_procedure(name))?;
            RunnableNode::test(&definition.id, &definition.title, procedure)
        }
        (Some(_), false) => {
            return Err(CrucibleError::definition_error(format!(
                "node '{}' declares both a procedure and children",
                definition.id
            )));
        }
        (None, false) => RunnableNode::group(&definition.id, &definition.title),
        (None, true) => {
            return Err(CrucibleError::definition_error(format!(
                "node '{}' has neither a procedure nor children",
                definition.id
            )));
        }
    };

    node.description = definition.description;
    node.optional = definition.optional;
    node.user_runnable = definition.user_runnable;
    node.when = definition.when;
    node.requirements = definition.requirements;
    for input in definition.inputs {
        node.inputs.push(InputDefinition {
            name: input.name,
            title: input.title,
            type_hint: input.type_hint,
            optional: input.optional,
            default: input.default,
        });
    }
    for output in definition.outputs {
        node.outputs.push(OutputDefinition::new(output));
    }
    for child in definition.children {
        let child = build_node(child, registry)?;
        node.children.push(child);
    }
    Ok(node)
}
