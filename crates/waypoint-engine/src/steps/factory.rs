use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::{CompletionClient, Step};
use waypoint_dsl::{CompiledGraph, StepSpec};

use super::assign::{type_name, AssignStep};
use super::deterministic::DeterministicStep;
use super::functions::FunctionRegistry;
use super::judge::JudgeStep;
use super::llm::LlmStep;
use crate::registry::StepRegistry;

/// Builds a [`StepRegistry`] from the step declarations of a compiled graph.
///
/// Each declaration is turned into a built-in step according to its `kind`.
/// Steps registered with [`StepFactory::with_override`] replace the built-in
/// for that name, whatever its declared kind.
pub struct StepFactory {
    functions: FunctionRegistry,
    completion: Option<Arc<dyn CompletionClient>>,
    overrides: HashMap<String, Arc<dyn Step>>,
}

impl StepFactory {
    pub fn new() -> Self {
        Self {
            functions: FunctionRegistry::with_builtins(),
            completion: None,
            overrides: HashMap::new(),
        }
    }

    /// Replace the function registry (builtins included only if `functions` has them).
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Completion backend for `llm` steps.
    pub fn with_completion(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    /// Use `step` for the step named `name` instead of building one.
    pub fn with_override(mut self, name: impl Into<String>, step: impl Step) -> Self {
        self.overrides.insert(name.into(), Arc::new(step));
        self
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// Build one step from its declaration.
    pub fn build_step(&self, name: &str, spec: &StepSpec) -> Result<Arc<dyn Step>> {
        if let Some(step) = self.overrides.get(name) {
            return Ok(step.clone());
        }

        let step: Arc<dyn Step> = match spec.kind.as_str() {
            "deterministic" => {
                let function_name = required_str(name, spec, "function")?;
                let function = self.function(name, "function", function_name)?;
                Arc::new(DeterministicStep::new(name, function))
            }
            "judge" => Arc::new(self.build_judge(name, spec)?),
            "assign" => Arc::new(AssignStep::from_params(name, &spec.params)?),
            "llm" => {
                let client = self.completion.clone().ok_or_else(|| {
                    WaypointError::validation(
                        format!("steps.{}.kind", name),
                        "llm steps need a completion client, and none is configured",
                    )
                })?;
                Arc::new(LlmStep::from_params(name, &spec.params, client)?)
            }
            other => {
                return Err(WaypointError::validation(
                    format!("steps.{}.kind", name),
                    format!(
                        "unknown step kind '{}' (expected llm, deterministic, judge or assign)",
                        other
                    ),
                ))
            }
        };
        Ok(step)
    }

    /// Build a registry holding every step the graph declares.
    pub fn build(&self, graph: &CompiledGraph) -> Result<StepRegistry> {
        let mut registry = StepRegistry::new();
        for (name, spec) in graph.steps() {
            let step = self.build_step(name, spec)?;
            debug!(step = %name, kind = %step.kind(), "Built step");
            registry.register_arc(name.clone(), step);
        }
        Ok(registry)
    }

    fn build_judge(&self, name: &str, spec: &StepSpec) -> Result<JudgeStep> {
        let mut judge = JudgeStep::new(name);
        if let Some(artifact) = optional_str(name, spec, "artifact")? {
            judge = judge.with_artifact(artifact);
        }
        if let Some(value) = spec.param("min_length") {
            let min_length = value.as_u64().ok_or_else(|| {
                WaypointError::validation(
                    format!("steps.{}.min_length", name),
                    format!("expected a non-negative integer, found {}", type_name(value)),
                )
            })?;
            judge = judge.with_min_length(min_length as usize);
        }
        if let Some(purpose) = optional_str(name, spec, "purpose")? {
            judge = judge.with_purpose(purpose);
        }
        if let Some(rule) = optional_str(name, spec, "rule")? {
            judge = judge.with_rule(self.function(name, "rule", rule)?);
        }
        Ok(judge)
    }

    fn function(&self, step: &str, key: &str, function_name: &str) -> Result<super::StepFn> {
        self.functions.get(function_name).ok_or_else(|| {
            WaypointError::validation(
                format!("steps.{}.{}", step, key),
                format!(
                    "unknown function '{}' (registered: {})",
                    function_name,
                    self.functions.list().join(", ")
                ),
            )
        })
    }
}

impl Default for StepFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn optional_str<'s>(step: &str, spec: &'s StepSpec, key: &str) -> Result<Option<&'s str>> {
    match spec.param(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(WaypointError::validation(
            format!("steps.{}.{}", step, key),
            format!("expected a string, found {}", type_name(other)),
        )),
    }
}

fn required_str<'s>(step: &str, spec: &'s StepSpec, key: &str) -> Result<&'s str> {
    optional_str(step, spec, key)?.ok_or_else(|| {
        WaypointError::validation(
            format!("steps.{}.{}", step, key),
            format!("'{}' steps need a '{}' parameter", spec.kind, key),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::SimulatedCompletion;
    use futures::future::BoxFuture;
    use serde_json::json;
    use waypoint_core::types::{Delta, SharedState};
    use waypoint_dsl::{compile, CompileOptions, EdgeSpec, ProcessDescription};

    struct Custom;

    impl Step for Custom {
        fn execute<'a>(&'a self, _state: &'a SharedState) -> BoxFuture<'a, waypoint_core::Result<Delta>> {
            Box::pin(async { Ok(Delta::new().with_artifact("custom", json!(true))) })
        }
    }

    fn element_of(result: Result<Arc<dyn Step>>) -> String {
        match result {
            Err(WaypointError::Validation { element, .. }) => element,
            Err(other) => panic!("expected validation error, got {}", other),
            Ok(step) => panic!("expected validation error, built a {} step", step.kind()),
        }
    }

    #[test]
    fn test_builds_each_kind() {
        let factory = StepFactory::new().with_completion(Arc::new(SimulatedCompletion));
        let cases = [
            (StepSpec::new("deterministic").with_param("function", json!("noop")), "deterministic"),
            (StepSpec::new("judge").with_param("min_length", json!(10)), "judge"),
            (StepSpec::new("assign"), "assign"),
            (StepSpec::default().with_param("prompt_template", json!("hi")), "llm"),
        ];
        for (spec, kind) in cases {
            let step = factory.build_step("s", &spec).unwrap();
            assert_eq!(step.kind(), kind);
        }
    }

    #[test]
    fn test_build_errors_name_the_parameter() {
        let factory = StepFactory::new();

        assert_eq!(element_of(factory.build_step("s", &StepSpec::new("teleport"))), "steps.s.kind");
        assert_eq!(
            element_of(factory.build_step("s", &StepSpec::new("deterministic"))),
            "steps.s.function"
        );
        assert_eq!(
            element_of(factory.build_step(
                "s",
                &StepSpec::new("deterministic").with_param("function", json!("missing"))
            )),
            "steps.s.function"
        );
        assert_eq!(
            element_of(factory.build_step(
                "s",
                &StepSpec::new("judge").with_param("min_length", json!("long"))
            )),
            "steps.s.min_length"
        );
        // llm is the default kind and needs a client
        assert_eq!(
            element_of(factory.build_step("s", &StepSpec::default().with_param("prompt_template", json!("x")))),
            "steps.s.kind"
        );
    }

    #[tokio::test]
    async fn test_build_registry_with_override() {
        let desc = ProcessDescription::new("a")
            .with_step("a", StepSpec::new("teleport"))
            .with_step("b", StepSpec::new("judge").with_param("rule", json!("noop")))
            .with_edge(EdgeSpec::always("a", "b"))
            .with_edge(EdgeSpec::to_end("b"));
        let graph = compile(&desc, CompileOptions::default()).unwrap();

        let factory = StepFactory::new().with_override("a", Custom);
        let registry = factory.build(&graph).unwrap();
        assert_eq!(registry.list(), ["a", "b"]);

        let delta = registry.execute("a", &SharedState::default()).await.unwrap();
        assert_eq!(delta.artifacts["custom"], json!(true));

        let delta = registry.execute("b", &SharedState::default()).await.unwrap();
        assert_eq!(delta.log[0]["kind"], json!("judge"));
    }

    #[test]
    fn test_registered_functions_are_available() {
        let mut factory = StepFactory::new();
        factory
            .functions_mut()
            .register("score", |_: &SharedState| Ok(Delta::new().with_quality("score", json!(1))));
        let spec = StepSpec::new("deterministic").with_param("function", json!("score"));
        assert!(factory.build_step("s", &spec).is_ok());
    }
}
