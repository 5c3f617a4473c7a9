//! Requirement coverage: which conformance requirements the currently
//! included tests verify.
//!
//! Coverage is derived on demand from the effective tree, so subtrees
//! excluded by suite options never contribute.

use std::collections::{BTreeMap, BTreeSet};

use crate::runnable::{EffectiveTree, RunnableKind, RunnableNode};

/// Union of requirement identifiers declared by every included node.
pub fn coverage(tree: &EffectiveTree) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(&tree.root, &mut out);
    out
}

fn collect(node: &RunnableNode, out: &mut BTreeSet<String>) {
    out.extend(node.requirements.iter().cloned());
    for child in &node.children {
        collect(child, out);
    }
}

/// Map of requirement identifier → ids of the included Tests verifying it.
/// Requirements declared on a Group are attributed to every Test beneath it.
pub fn verified_by(tree: &EffectiveTree) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    attribute(&tree.root, &[], &mut out);
    out
}

fn attribute(
    node: &RunnableNode,
    inherited: &[String],
    out: &mut BTreeMap<String, Vec<String>>,
) {
    let mut scope: Vec<String> = inherited.to_vec();
    scope.extend(node.requirements.iter().cloned());

    if node.kind == RunnableKind::Test {
        for requirement in &scope {
            let tests: &mut Vec<String> = out.entry(requirement.clone()).or_default();
            if !tests.contains(&node.id) {
                tests.push(node.id.clone());
            }
        }
        return;
    }
    for child in &node.children {
        attribute(child, &scope, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{FnProcedure, Outcome};
    use crate::runnable::{RunnableIndex, SelectedOptions, SuiteOption, TreeResolver};
    use std::sync::Arc;

    fn pass_test(id: &str) -> RunnableNode {
        RunnableNode::test(id, id, Arc::new(FnProcedure::new(|_| Outcome::Pass)))
    }

    fn resolver() -> TreeResolver {
        let suite = RunnableNode::suite("s", "Suite")
            .with_option(SuiteOption::new(
                "ig_version",
                vec!["1".to_string(), "2".to_string()],
            ))
            .with_child(
                RunnableNode::group("ga", "A")
                    .when("ig_version", "1")
                    .with_requirement("req-a")
                    .with_child(pass_test("a1").with_requirement("req-a1")),
            )
            .with_child(
                RunnableNode::group("gb", "B")
                    .when("ig_version", "2")
                    .with_requirement("req-b")
                    .with_child(pass_test("b1")),
            );
        let index = Arc::new(RunnableIndex::new());
        index.register_suite(suite).unwrap();
        TreeResolver::new(index)
    }

    fn select(version: &str) -> SelectedOptions {
        [("ig_version".to_string(), version.to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_coverage_excludes_filtered_subtrees() {
        let resolver = resolver();

        let v1 = coverage(&resolver.resolve("s", &select("1")).unwrap());
        assert!(v1.contains("req-a"));
        assert!(v1.contains("req-a1"));
        assert!(!v1.contains("req-b"));

        let v2 = coverage(&resolver.resolve("s", &select("2")).unwrap());
        assert!(v2.contains("req-b"));
        assert!(!v2.contains("req-a"));
    }

    #[test]
    fn test_group_requirements_attributed_to_tests() {
        let resolver = resolver();
        let map = verified_by(&resolver.resolve("s", &select("1")).unwrap());

        assert_eq!(map.get("req-a"), Some(&vec!["a1".to_string()]));
        assert_eq!(map.get("req-a1"), Some(&vec!["a1".to_string()]));
        assert!(!map.contains_key("req-b"));
    }
}
