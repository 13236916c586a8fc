use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::TERMINAL;

/// Step kind assumed when a step does not name one.
pub const DEFAULT_KIND: &str = "llm";

/// A process as written by its author.
///
/// ```yaml
/// process:
///   name: review-loop
///   start: writer
///   done_condition: "quality.review_status == 'approved'"
/// steps:
///   writer: { kind: llm, prompt_template: "Write about {context.topic}" }
///   reviewer: { kind: judge, min_length: 120 }
/// edges:
///   - { from: writer, to: reviewer }
///   - { from: reviewer, to: __end__, condition: "quality.attempts >= 3" }
///   - { from: reviewer, to: writer }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessDescription {
    #[serde(default)]
    pub process: ProcessHeader,
    /// Steps in declaration order.
    #[serde(default, alias = "agents")]
    pub steps: IndexMap<String, StepSpec>,
    /// Edges in declaration order. Order decides which guard is tried first.
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub start: String,
    /// Checked after every step; when it holds the run ends.
    #[serde(
        default,
        alias = "doneCondition",
        skip_serializing_if = "Option::is_none"
    )]
    pub done_condition: Option<String>,
    /// Overrides the engine's step budget for this process.
    #[serde(
        default,
        alias = "maxSteps",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_steps: Option<usize>,
}

/// A step declaration: its kind plus kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

impl StepSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// A string parameter, if present and a string.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

impl Default for StepSpec {
    fn default() -> Self {
        Self::new(DEFAULT_KIND)
    }
}

/// A routing edge between two steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    /// A step name or the terminal marker `__end__`.
    pub to: String,
    /// Guard expression. Absent means this is a fallback edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl EdgeSpec {
    /// Create an unconditional (fallback) edge.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    /// Create a guarded edge.
    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(condition.into()),
        }
    }

    /// Create a fallback edge to the terminal marker.
    pub fn to_end(from: impl Into<String>) -> Self {
        Self::always(from, TERMINAL)
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// On-disk formats a process description can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Toml,
    Json,
}

impl Format {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

impl ProcessDescription {
    /// Start an in-code description with the given start step.
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            process: ProcessHeader {
                start: start.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.process.name = Some(name.into());
        self
    }

    pub fn with_step(mut self, name: impl Into<String>, spec: StepSpec) -> Self {
        self.steps.insert(name.into(), spec);
        self
    }

    pub fn with_edge(mut self, edge: EdgeSpec) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_done_condition(mut self, condition: impl Into<String>) -> Self {
        self.process.done_condition = Some(condition.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.process.max_steps = Some(max_steps);
        self
    }

    /// Display name: the declared name, or the start step.
    pub fn display_name(&self) -> &str {
        self.process.name.as_deref().unwrap_or(&self.process.start)
    }

    /// Load a description from a YAML, TOML or JSON file, chosen by extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let format = Format::from_path(path).ok_or_else(|| WaypointError::Parse {
            path: display.clone(),
            message: "unsupported file extension (expected .yaml, .yml, .toml or .json)".into(),
        })?;

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WaypointError::ProcessNotFound(display.clone())
            } else {
                WaypointError::Io(e)
            }
        })?;

        Self::parse_str(&content, format).map_err(|message| WaypointError::Parse {
            path: display,
            message,
        })
    }

    /// Parse a description from text in the given format.
    pub fn from_str_as(content: &str, format: Format) -> Result<Self> {
        Self::parse_str(content, format).map_err(|message| WaypointError::Parse {
            path: "<inline>".into(),
            message,
        })
    }

    /// Build a description from an in-memory JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| WaypointError::Parse {
            path: "<value>".into(),
            message: e.to_string(),
        })
    }

    fn parse_str(content: &str, format: Format) -> std::result::Result<Self, String> {
        match format {
            Format::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const REVIEW_YAML: &str = r#"
process:
  name: review-loop
  start: writer
  doneCondition: "quality.review_status == 'approved'"
agents:
  writer:
    prompt_template: "Write about {context.topic}"
  reviewer:
    kind: judge
    min_length: 120
edges:
  - from: writer
    to: reviewer
  - from: reviewer
    to: __end__
    condition: "quality.attempts >= 3"
  - from: reviewer
    to: writer
"#;

    #[test]
    fn test_parse_yaml_with_aliases() {
        let desc = ProcessDescription::from_str_as(REVIEW_YAML, Format::Yaml).unwrap();
        assert_eq!(desc.display_name(), "review-loop");
        assert_eq!(desc.process.start, "writer");
        assert_eq!(
            desc.process.done_condition.as_deref(),
            Some("quality.review_status == 'approved'")
        );

        let names: Vec<&str> = desc.steps.keys().map(String::as_str).collect();
        assert_eq!(names, ["writer", "reviewer"]);
        assert_eq!(desc.steps["writer"].kind, DEFAULT_KIND);
        assert_eq!(desc.steps["reviewer"].kind, "judge");
        assert_eq!(desc.steps["reviewer"].param("min_length"), Some(&json!(120)));

        assert_eq!(desc.edges.len(), 3);
        assert!(desc.edges[1].is_conditional());
        assert_eq!(desc.edges[2], EdgeSpec::always("reviewer", "writer"));
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
[process]
start = "a"
done_condition = "quality.done"
max_steps = 20

[steps.a]
kind = "assign"
quality = { done = true }

[[edges]]
from = "a"
to = "__end__"
"#;
        let desc = ProcessDescription::from_str_as(text, Format::Toml).unwrap();
        assert_eq!(desc.process.max_steps, Some(20));
        assert_eq!(desc.steps["a"].param("quality"), Some(&json!({"done": true})));
        assert_eq!(desc.edges[0], EdgeSpec::to_end("a"));
    }

    #[test]
    fn test_from_value() {
        let desc = ProcessDescription::from_value(json!({
            "process": {"start": "s1"},
            "steps": {"s1": {"kind": "deterministic", "function": "noop"}},
            "edges": [{"from": "s1", "to": "__end__"}]
        }))
        .unwrap();
        assert_eq!(desc.steps["s1"].str_param("function"), Some("noop"));
    }

    #[test]
    fn test_non_string_condition_is_parse_error() {
        let err = ProcessDescription::from_value(json!({
            "process": {"start": "a"},
            "steps": {"a": {}},
            "edges": [{"from": "a", "to": "__end__", "condition": 42}]
        }))
        .unwrap_err();
        assert!(matches!(err, WaypointError::Parse { .. }));
    }

    #[test]
    fn test_from_path_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(REVIEW_YAML.as_bytes()).unwrap();
        let desc = ProcessDescription::from_path(file.path()).unwrap();
        assert_eq!(desc.steps.len(), 2);

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"process": {{"start": "a"}}, "steps": {{"a": {{}}}}, "edges": []}}"#
        )
        .unwrap();
        let desc = ProcessDescription::from_path(file.path()).unwrap();
        assert_eq!(desc.process.start, "a");
    }

    #[test]
    fn test_from_path_errors() {
        let err = ProcessDescription::from_path(Path::new("/nonexistent/flow.yaml")).unwrap_err();
        assert!(matches!(err, WaypointError::ProcessNotFound(_)));

        let err = ProcessDescription::from_path(Path::new("flow.txt")).unwrap_err();
        assert!(matches!(err, WaypointError::Parse { .. }));

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"process: [unclosed").unwrap();
        let err = ProcessDescription::from_path(file.path()).unwrap_err();
        assert!(matches!(err, WaypointError::Parse { .. }));
    }

    #[test]
    fn test_builder() {
        let desc = ProcessDescription::new("a")
            .with_name("demo")
            .with_step("a", StepSpec::new("assign").with_param("quality", json!({"ok": true})))
            .with_edge(EdgeSpec::conditional("a", "__end__", "quality.ok"))
            .with_max_steps(5);
        assert_eq!(desc.display_name(), "demo");
        assert_eq!(desc.process.max_steps, Some(5));
        assert_eq!(desc.edges[0].condition.as_deref(), Some("quality.ok"));
    }
}
