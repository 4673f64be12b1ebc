//! Experiment Source Model
//!
//! An experiment composes parameterized spaces over workflows, binds
//! experiment-level data and optionally declares the control-flow graph
//! between spaces.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: Sweep
//! data:
//!   - name: raw
//!     value: /data/raw.csv
//! spaces:
//!   - name: Coarse
//!     workflow: Base
//!     strategy: gridsearch
//!     parameters:
//!       - name: rate
//!         enum: [0.1, 0.01]
//!       - name: depth
//!         range: { min: 2, max: 6, step: 2 }
//!   - name: Fine
//!     workflow: Fast
//!     parameters:
//!       - name: rate
//!         expression: "best_rate / 2"
//! control:
//!   - { from: START, to: Coarse }
//!   - { from: Coarse, to: Fine, condition: "answer == 'yes'" }
//!   - { from: Coarse, to: END }
//!   - { from: Fine, to: END }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{DataModel, TaskConfiguration};

/// Default exploration strategy label; opaque to the compiler.
pub const DEFAULT_STRATEGY: &str = "gridsearch";

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

fn default_step() -> f64 {
    1.0
}

/// Numeric range `min, min+step, ... <= max`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RangeSpec {
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_step")]
    pub step: f64,
}

/// The value domain of a single space parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterDomain {
    /// Literal list of values
    Enum(Vec<Value>),
    /// Arithmetic sequence
    Range(RangeSpec),
    /// Single unevaluated expression text
    Expression(String),
}

/// One parameter declaration of a space.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(flatten)]
    pub domain: ParameterDomain,
}

impl ParameterDefinition {
    pub fn enumeration(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            domain: ParameterDomain::Enum(values),
        }
    }

    pub fn range(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            domain: ParameterDomain::Range(RangeSpec { min, max, step }),
        }
    }

    pub fn expression(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: ParameterDomain::Expression(text.into()),
        }
    }
}

/// One parameterized instantiation of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpaceModel {
    pub name: String,
    pub workflow: String,

    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_configurations: Vec<TaskConfiguration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataModel>,
}

impl SpaceModel {
    pub fn new(name: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            workflow: workflow.into().trim().to_string(),
            strategy: default_strategy(),
            parameters: Vec::new(),
            task_configurations: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_configuration(mut self, config: TaskConfiguration) -> Self {
        self.task_configurations.push(config);
        self
    }

    pub fn with_data(mut self, data: DataModel) -> Self {
        self.data.push(data);
        self
    }
}

/// A declared edge of the control-flow graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionModel {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl TransitionModel {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// An experiment as written in its source file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExperimentModel {
    pub name: String,

    #[serde(default)]
    pub spaces: Vec<SpaceModel>,

    #[serde(default)]
    pub data: Vec<DataModel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<Vec<TransitionModel>>,
}

impl ExperimentModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            spaces: Vec::new(),
            data: Vec::new(),
            control: None,
        }
    }

    pub fn with_space(mut self, space: SpaceModel) -> Self {
        self.spaces.push(space);
        self
    }

    pub fn with_data(mut self, data: DataModel) -> Self {
        self.data.push(data);
        self
    }

    pub fn with_transition(mut self, transition: TransitionModel) -> Self {
        self.control.get_or_insert_with(Vec::new).push(transition);
        self
    }

    pub fn get_space(&self, name: &str) -> Option<&SpaceModel> {
        self.spaces.iter().find(|s| s.name == name)
    }

    /// Workflow names referenced by the spaces, in declaration order.
    pub fn referenced_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for space in &self.spaces {
            if !names.contains(&space.workflow) {
                names.push(space.workflow.clone());
            }
        }
        names
    }
}
