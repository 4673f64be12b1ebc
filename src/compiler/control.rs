//! Control-Flow Builder
//!
//! Builds the space transition graph from the experiment's explicit
//! control block, or synthesizes a linear chain across the declared
//! spaces. Conditions are parsed here so syntax errors surface at
//! compile time, and reachability of `END` and of every space is checked.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::CompileError;
use crate::execution::condition::Condition;
use crate::workflow::experiment::{ExperimentModel, TransitionModel};
use crate::workflow::model::{END, START};

/// One edge of the space transition graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

impl From<&TransitionModel> for Transition {
    fn from(model: &TransitionModel) -> Self {
        Self {
            from: model.from.trim().to_string(),
            to: model.to.trim().to_string(),
            condition: model
                .condition
                .as_ref()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        }
    }
}

/// The entry space plus every non-start transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlGraph {
    pub start: String,
    pub transitions: Vec<Transition>,
}

impl ControlGraph {
    /// Outgoing transitions of a space, in declaration order.
    pub fn outgoing(&self, space: &str) -> Vec<&Transition> {
        self.transitions.iter().filter(|t| t.from == space).collect()
    }

    /// Every node reachable from the start space, `END` included.
    pub fn reachable(&self) -> BTreeSet<String> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for transition in &self.transitions {
            adjacency
                .entry(transition.from.as_str())
                .or_default()
                .push(transition.to.as_str());
        }

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.start.as_str()]);
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.to_string()) {
                continue;
            }
            if let Some(next) = adjacency.get(node) {
                queue.extend(next.iter().copied());
            }
        }
        seen
    }
}

/// Builds and validates the control graph for an experiment.
pub fn build_control(experiment: &ExperimentModel) -> Result<ControlGraph, CompileError> {
    let spaces: Vec<&str> = experiment.spaces.iter().map(|s| s.name.as_str()).collect();
    if spaces.is_empty() {
        return Err(CompileError::EmptyExperiment);
    }

    let graph = match &experiment.control {
        Some(transitions) if !transitions.is_empty() => explicit_control(transitions, &spaces)?,
        _ => default_control(&spaces),
    };

    let reachable = graph.reachable();
    let mut errors = Vec::new();
    if !reachable.contains(END) {
        errors.push(CompileError::UnreachableEnd {
            start: graph.start.clone(),
        });
    }
    for space in &spaces {
        if !reachable.contains(*space) {
            errors.push(CompileError::UnreachableSpace {
                space: space.to_string(),
                start: graph.start.clone(),
            });
        }
    }
    CompileError::aggregate(errors)?;

    debug!(
        "Control graph: start '{}', {} transition(s)",
        graph.start,
        graph.transitions.len()
    );
    Ok(graph)
}

/// A single space runs to `END`; several run in declaration order.
pub fn default_control(spaces: &[&str]) -> ControlGraph {
    let mut transitions: Vec<Transition> = spaces
        .windows(2)
        .map(|pair| Transition::new(pair[0], pair[1]))
        .collect();
    if let Some(last) = spaces.last() {
        transitions.push(Transition::new(*last, END));
    }

    ControlGraph {
        start: spaces.first().map(|s| s.to_string()).unwrap_or_default(),
        transitions,
    }
}

fn explicit_control(
    models: &[TransitionModel],
    spaces: &[&str],
) -> Result<ControlGraph, CompileError> {
    let mut errors = Vec::new();
    let mut starts: Vec<String> = Vec::new();
    let mut transitions: Vec<Transition> = Vec::new();

    for model in models {
        let transition = Transition::from(model);

        if transition.from == START {
            if !starts.contains(&transition.to) {
                starts.push(transition.to.clone());
            }
            if !spaces.contains(&transition.to.as_str()) {
                errors.push(CompileError::UndefinedSpace {
                    from: transition.from.clone(),
                    to: transition.to.clone(),
                    space: transition.to.clone(),
                });
            }
            continue;
        }

        if !spaces.contains(&transition.from.as_str()) {
            errors.push(CompileError::UndefinedSpace {
                from: transition.from.clone(),
                to: transition.to.clone(),
                space: transition.from.clone(),
            });
        }
        if transition.to != END && !spaces.contains(&transition.to.as_str()) {
            errors.push(CompileError::UndefinedSpace {
                from: transition.from.clone(),
                to: transition.to.clone(),
                space: transition.to.clone(),
            });
        }
        if let Some(text) = &transition.condition {
            if let Err(source) = Condition::parse(text) {
                errors.push(CompileError::InvalidCondition {
                    from: transition.from.clone(),
                    to: transition.to.clone(),
                    source,
                });
            }
        }

        if !transitions.contains(&transition) {
            transitions.push(transition);
        }
    }

    match starts.len() {
        0 => errors.insert(0, CompileError::MissingStart),
        1 => {}
        _ => errors.insert(0, CompileError::AmbiguousStart { targets: starts.clone() }),
    }
    CompileError::aggregate(errors)?;

    Ok(ControlGraph {
        start: starts.remove(0),
        transitions,
    })
}
