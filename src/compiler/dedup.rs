//! Task Deduplication
//!
//! Sibling workflows inheriting the same unmodified ancestor task resolve
//! to structurally identical tasks under different ids. Those are grouped
//! by a content fingerprint and collapsed onto one canonical
//! representative, chosen by:
//!
//! 1. a workflow name that is a strict prefix of the other's sorts first
//! 2. otherwise the shorter workflow name sorts first
//! 3. then the shallower inheritance depth, then plain name order
//!
//! When two *different* fingerprints would claim the same id (a space
//! reconfigured a shared task), the later one gets a `@space` suffix.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde_json::Value;

use super::resolver::ResolvedTask;

/// Structural identity of a resolved task.
///
/// List fields are order-sensitive; the static parameter map is ordered
/// by key, which makes it insensitive to declaration order.
pub fn fingerprint(task: &ResolvedTask) -> String {
    let key: (
        &str,
        &str,
        &Vec<String>,
        &BTreeMap<String, Value>,
        &Vec<String>,
        &Vec<String>,
    ) = (
        &task.name,
        &task.implementation,
        &task.dynamic_parameters,
        &task.static_parameters,
        &task.inputs,
        &task.outputs,
    );
    // tuples of strings, vectors and ordered maps always serialize
    serde_json::to_string(&key).unwrap_or_default()
}

/// Representative order between two candidates of one fingerprint group.
pub fn representative_order(a: &ResolvedTask, b: &ResolvedTask) -> Ordering {
    let (wa, wb) = (a.workflow.as_str(), b.workflow.as_str());

    if wa != wb {
        if wb.starts_with(wa) {
            return Ordering::Less;
        }
        if wa.starts_with(wb) {
            return Ordering::Greater;
        }
    }

    wa.len()
        .cmp(&wb.len())
        .then(a.depth.cmp(&b.depth))
        .then(wa.cmp(wb))
}

/// Result of collapsing duplicate tasks.
#[derive(Debug, Default)]
pub struct Deduplication {
    /// Representatives grouped by their own workflow, in discovery order
    pub groups: Vec<Vec<ResolvedTask>>,
    /// (space, resolved id) -> canonical task id
    pub canonical: HashMap<(String, String), String>,
}

impl Deduplication {
    /// Canonical id for a task as resolved in a given space.
    pub fn canonical_id(&self, space: &str, id: &str) -> Option<&str> {
        self.canonical
            .get(&(space.to_string(), id.to_string()))
            .map(String::as_str)
    }

    pub fn task_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

/// Collapses structurally identical tasks.
///
/// `tasks` must be in discovery order (space order, then execution order).
pub fn deduplicate(tasks: &[ResolvedTask]) -> Deduplication {
    // fingerprint -> indices of members, in discovery order
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<usize>> = HashMap::new();

    for (index, task) in tasks.iter().enumerate() {
        let key = fingerprint(task);
        members
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(index);
    }

    let mut result = Deduplication::default();
    let mut workflow_groups: Vec<(String, Vec<ResolvedTask>)> = Vec::new();
    let mut claimed_ids: HashMap<String, String> = HashMap::new();

    for key in &order {
        let indices = &members[key];
        let mut representative = indices
            .iter()
            .map(|&i| &tasks[i])
            .min_by(|a, b| representative_order(a, b))
            .cloned()
            .unwrap_or_else(|| tasks[indices[0]].clone());

        match claimed_ids.get(&representative.id) {
            Some(other) if other != key => {
                let first_space = tasks[indices[0]].space.clone();
                representative.id = format!("{}@{}", representative.id, first_space);
                debug!(
                    "Task id collision for different definitions, renamed to '{}'",
                    representative.id
                );
            }
            _ => {}
        }
        claimed_ids.insert(representative.id.clone(), key.clone());

        if indices.len() > 1 {
            debug!(
                "Collapsed {} duplicate definitions onto '{}'",
                indices.len(),
                representative.id
            );
        }

        for &i in indices {
            result.canonical.insert(
                (tasks[i].space.clone(), tasks[i].id.clone()),
                representative.id.clone(),
            );
        }

        match workflow_groups
            .iter_mut()
            .find(|(workflow, _)| *workflow == representative.workflow)
        {
            Some((_, group)) => group.push(representative),
            None => workflow_groups.push((representative.workflow.clone(), vec![representative])),
        }
    }

    result.groups = workflow_groups.into_iter().map(|(_, group)| group).collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(space: &str, workflow: &str, name: &str, depth: usize) -> ResolvedTask {
        ResolvedTask {
            id: format!("{}:{}", workflow, name),
            name: name.to_string(),
            workflow: workflow.to_string(),
            declared_in: workflow.to_string(),
            depth,
            space: space.to_string(),
            implementation: format!("./{}.sh", name),
            dynamic_parameters: vec!["rate".to_string()],
            static_parameters: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: vec!["out".to_string()],
        }
    }

    #[test]
    fn test_siblings_collapse_to_single_definition() {
        let tasks = vec![task("S1", "A1", "t", 1), task("S2", "A2", "t", 1)];
        let dedup = deduplicate(&tasks);

        assert_eq!(dedup.task_count(), 1);
        assert_eq!(dedup.groups[0][0].id, "A1:t");
        assert_eq!(dedup.canonical_id("S2", "A2:t"), Some("A1:t"));
        assert_eq!(dedup.canonical_id("S1", "A1:t"), Some("A1:t"));
    }

    #[test]
    fn test_ancestor_prefix_wins() {
        let tasks = vec![task("S1", "A1", "t", 1), task("S2", "A", "t", 0)];
        let dedup = deduplicate(&tasks);

        assert_eq!(dedup.groups.len(), 1);
        assert_eq!(dedup.groups[0][0].id, "A:t");
        assert_eq!(dedup.canonical_id("S1", "A1:t"), Some("A:t"));
    }

    #[test]
    fn test_shorter_name_wins_without_prefix() {
        let tasks = vec![task("S1", "Longer", "t", 0), task("S2", "Zed", "t", 0)];
        let dedup = deduplicate(&tasks);
        assert_eq!(dedup.groups[0][0].id, "Zed:t");
    }

    #[test]
    fn test_different_content_not_collapsed() {
        let mut other = task("S2", "A2", "t", 1);
        other.implementation = "./other.sh".to_string();
        let tasks = vec![task("S1", "A1", "t", 1), other];

        let dedup = deduplicate(&tasks);
        assert_eq!(dedup.task_count(), 2);
        assert_eq!(dedup.groups.len(), 2);
    }

    #[test]
    fn test_static_parameter_order_irrelevant() {
        let mut a = task("S1", "A1", "t", 1);
        a.static_parameters.insert("x".into(), json!(1));
        a.static_parameters.insert("y".into(), json!(2));
        let mut b = task("S2", "A2", "t", 1);
        b.static_parameters.insert("y".into(), json!(2));
        b.static_parameters.insert("x".into(), json!(1));

        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_input_order_matters() {
        let mut a = task("S1", "A1", "t", 1);
        a.inputs = vec!["p".into(), "q".into()];
        let mut b = task("S2", "A2", "t", 1);
        b.inputs = vec!["q".into(), "p".into()];

        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_same_id_different_content_renamed() {
        let first = task("S1", "W", "t", 0);
        let mut second = task("S2", "W", "t", 0);
        second.static_parameters.insert("k".into(), json!(5));

        let dedup = deduplicate(&[first, second]);

        assert_eq!(dedup.canonical_id("S1", "W:t"), Some("W:t"));
        assert_eq!(dedup.canonical_id("S2", "W:t"), Some("W:t@S2"));
        assert_eq!(dedup.groups.len(), 1);
        assert_eq!(dedup.groups[0].len(), 2);
    }

    #[test]
    fn test_groups_follow_discovery_order() {
        let tasks = vec![
            task("S1", "B", "t1", 0),
            task("S1", "B", "t2", 0),
            task("S2", "A", "t3", 0),
        ];
        let dedup = deduplicate(&tasks);

        assert_eq!(dedup.groups.len(), 2);
        assert_eq!(dedup.groups[0][0].workflow, "B");
        assert_eq!(dedup.groups[0].len(), 2);
        assert_eq!(dedup.groups[1][0].workflow, "A");
    }
}
