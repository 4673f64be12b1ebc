//! Workflow Source Model
//!
//! In-memory syntax tree for a workflow file: tasks, data slots, the task
//! chain and per-task configuration overrides.
//!
//! # Example YAML Format
//!
//! ```yaml
//! workflows:
//!   - name: Base
//!     tasks:
//!       - name: prepare
//!         implementation: ./tasks/prepare.sh
//!         parameters:
//!           - name: seed
//!             value: 42
//!           - rate
//!         inputs: [raw]
//!         outputs: [cleaned]
//!       - name: train
//!         inputs: [cleaned]
//!         outputs: [model]
//!     data: [raw, cleaned, model]
//!     chain: [START, prepare, train, END]
//!
//!   - name: Fast
//!     parent: Base
//!     taskConfigurations:
//!       - task: train
//!         implementation: ./tasks/train_fast.sh
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel opening every task chain.
pub const START: &str = "START";

/// Sentinel closing every task chain; also the terminal control-flow state.
pub const END: &str = "END";

/// A named parameter of a task, optionally bound to a concrete value.
///
/// Bound parameters become static in the compiled artifact; unbound ones
/// are dynamic and take their value from the space's parameter sets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "ParameterRepr")]
pub struct TaskParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Accepts either a bare parameter name or a `{name, value}` entry.
#[derive(Deserialize)]
#[serde(untagged)]
enum ParameterRepr {
    Name(String),
    Entry {
        name: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

impl From<ParameterRepr> for TaskParameter {
    fn from(repr: ParameterRepr) -> Self {
        match repr {
            ParameterRepr::Name(name) => Self { name, value: None },
            ParameterRepr::Entry { name, value } => Self { name, value },
        }
    }
}

impl TaskParameter {
    /// An unbound (dynamic) parameter.
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// A parameter bound to a concrete value.
    pub fn bound(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.value.is_some()
    }
}

/// A named data slot, optionally carrying a concrete value (usually a path).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "DataRepr")]
pub struct DataModel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataRepr {
    Name(String),
    Entry {
        name: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

impl From<DataRepr> for DataModel {
    fn from(repr: DataRepr) -> Self {
        match repr {
            DataRepr::Name(name) => Self { name, value: None },
            DataRepr::Entry { name, value } => Self {
                name,
                value: value.map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                }),
            },
        }
    }
}

impl DataModel {
    /// A declared data slot without a value.
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// A data slot with a concrete value.
    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// A task declaration inside a workflow.
///
/// A task without an implementation is abstract; a descendant workflow or
/// a space must configure one before the task can be compiled.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskModel {
    pub name: String,

    /// Name of the workflow declaring this task (filled in by the loader)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow: String,

    /// Path of the executable implementing this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,

    #[serde(default)]
    pub parameters: Vec<TaskParameter>,

    #[serde(deserialize_with = "single_or_vec", default)]
    pub inputs: Vec<String>,

    #[serde(deserialize_with = "single_or_vec", default)]
    pub outputs: Vec<String>,
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

/// Same as [`single_or_vec`] but keeps "absent" distinct from "empty".
fn optional_single_or_vec<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    single_or_vec(deserializer).map(Some)
}

impl TaskModel {
    /// Creates an abstract task with no parameters or data.
    ///
    /// # Example
    ///
    /// ```
    /// use expflow::workflow::TaskModel;
    ///
    /// let task = TaskModel::new("train")
    ///     .with_implementation("./train.sh")
    ///     .with_inputs(vec!["dataset".to_string()])
    ///     .with_outputs(vec!["model".to_string()]);
    /// assert!(!task.is_abstract());
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            workflow: String::new(),
            implementation: None,
            parameters: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_implementation(mut self, path: impl Into<String>) -> Self {
        self.implementation = Some(path.into());
        self
    }

    pub fn with_parameter(mut self, parameter: TaskParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Returns true when no implementation has been attached yet.
    pub fn is_abstract(&self) -> bool {
        self.implementation
            .as_deref()
            .map(|p| p.trim().is_empty())
            .unwrap_or(true)
    }

    /// Identity of the task, `workflow:name`.
    pub fn id(&self) -> String {
        task_id(&self.workflow, &self.name)
    }

    /// Applies a configuration override on top of this task.
    ///
    /// The implementation is replaced when given. Parameters are merged
    /// by name: a bound override rebinds, an unbound override only adds
    /// the parameter if it was not already present. Inputs and outputs
    /// are replaced wholesale when the override lists them.
    pub fn apply(&mut self, config: &TaskConfiguration) {
        if let Some(implementation) = &config.implementation {
            self.implementation = Some(implementation.clone());
        }

        for parameter in &config.parameters {
            match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
                Some(existing) => {
                    if parameter.value.is_some() {
                        existing.value = parameter.value.clone();
                    }
                }
                None => self.parameters.push(parameter.clone()),
            }
        }

        if let Some(inputs) = &config.inputs {
            self.inputs = inputs.clone();
        }
        if let Some(outputs) = &config.outputs {
            self.outputs = outputs.clone();
        }
    }
}

/// Builds the canonical `workflow:name` task identity.
pub fn task_id(workflow: &str, name: &str) -> String {
    format!("{}:{}", workflow, name)
}

/// A configuration override attached to a task by name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TaskConfiguration {
    pub task: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<TaskParameter>,

    #[serde(
        default,
        deserialize_with = "optional_single_or_vec",
        skip_serializing_if = "Option::is_none"
    )]
    pub inputs: Option<Vec<String>>,

    #[serde(
        default,
        deserialize_with = "optional_single_or_vec",
        skip_serializing_if = "Option::is_none"
    )]
    pub outputs: Option<Vec<String>>,
}

impl TaskConfiguration {
    pub fn for_task(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_implementation(mut self, path: impl Into<String>) -> Self {
        self.implementation = Some(path.into());
        self
    }

    pub fn with_parameter(mut self, parameter: TaskParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = Some(outputs);
        self
    }
}

/// Declared execution order of a workflow's tasks, bounded by sentinels.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct TaskChain {
    pub elements: Vec<String>,
}

impl TaskChain {
    /// Builds `START, tasks..., END`.
    pub fn from_tasks<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut elements = vec![START.to_string()];
        elements.extend(tasks.into_iter().map(Into::into));
        elements.push(END.to_string());
        Self { elements }
    }

    /// Task names in execution order, sentinels stripped.
    pub fn execution_order(&self) -> Vec<String> {
        self.elements
            .iter()
            .filter(|e| e.as_str() != START && e.as_str() != END)
            .cloned()
            .collect()
    }

    /// Checks the `START ... END` framing.
    pub fn is_well_formed(&self) -> bool {
        self.elements.len() >= 2
            && self.elements.first().map(String::as_str) == Some(START)
            && self.elements.last().map(String::as_str) == Some(END)
            && self.elements[1..self.elements.len() - 1]
                .iter()
                .all(|e| e != START && e != END)
    }
}

/// A workflow as written in its source file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default)]
    pub tasks: Vec<TaskModel>,

    #[serde(default)]
    pub data: Vec<DataModel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<TaskChain>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_configurations: Vec<TaskConfiguration>,
}

impl WorkflowModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            parent: None,
            tasks: Vec::new(),
            data: Vec::new(),
            chain: None,
            task_configurations: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Adds a task, stamping this workflow as its owner.
    pub fn with_task(mut self, mut task: TaskModel) -> Self {
        task.workflow = self.name.clone();
        self.tasks.push(task);
        self
    }

    pub fn with_data(mut self, data: DataModel) -> Self {
        self.data.push(data);
        self
    }

    pub fn with_chain(mut self, chain: TaskChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_configuration(mut self, config: TaskConfiguration) -> Self {
        self.task_configurations.push(config);
        self
    }

    /// Stamps every declared task with this workflow's name.
    pub fn assign_ownership(&mut self) {
        for task in &mut self.tasks {
            task.workflow = self.name.clone();
        }
    }

    pub fn get_task(&self, name: &str) -> Option<&TaskModel> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
