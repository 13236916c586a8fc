use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::{CompletionClient, Step};
use waypoint_core::types::{Delta, Root, SharedState};

/// Prompt placeholders: `{context}`, `{artifacts.draft}`, `{quality.scores.tone}`.
const PLACEHOLDER: &str = r"\{(context|artifacts|quality)((?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}";

/// Longest prompt excerpt echoed back by [`SimulatedCompletion`].
const SIMULATED_BODY_CHARS: usize = 3000;

/// Calls a completion backend with a prompt rendered from the state.
///
/// Backend failures do not fail the run: the step records the error in
/// `quality.error` and a log record with `status: "error"`, and routing
/// decides what happens next.
pub struct LlmStep {
    name: String,
    model: String,
    purpose: String,
    template: String,
    output_key: String,
    json_output: bool,
    retries: u32,
    retry_backoff: Duration,
    placeholder: Regex,
    client: Arc<dyn CompletionClient>,
}

impl LlmStep {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        let name = name.into();
        let placeholder =
            Regex::new(PLACEHOLDER).map_err(|e| WaypointError::Config(e.to_string()))?;
        Ok(Self {
            output_key: name.clone(),
            name,
            model: "simulated".to_string(),
            purpose: String::new(),
            template: template.into(),
            json_output: false,
            retries: 0,
            retry_backoff: Duration::from_millis(500),
            placeholder,
            client,
        })
    }

    /// Build from step parameters: `prompt_template` (required), `model`,
    /// `purpose`, `output_key`, `json_output`, `retries`, `retry_backoff_ms`.
    pub fn from_params(
        step: &str,
        params: &Map<String, Value>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        let template = str_param(step, params, "prompt_template")?.ok_or_else(|| {
            WaypointError::validation(
                format!("steps.{}.prompt_template", step),
                "llm steps need a prompt_template",
            )
        })?;
        let mut llm = Self::new(step, template, client)?;

        if let Some(model) = str_param(step, params, "model")? {
            llm = llm.with_model(model);
        }
        if let Some(purpose) = str_param(step, params, "purpose")? {
            llm.purpose = purpose.to_string();
        }
        if let Some(key) = str_param(step, params, "output_key")? {
            llm = llm.with_output_key(key);
        }
        if let Some(value) = params.get("json_output") {
            llm.json_output = value.as_bool().ok_or_else(|| {
                WaypointError::validation(format!("steps.{}.json_output", step), "expected a boolean")
            })?;
        }
        if let Some(value) = params.get("retries") {
            llm.retries = uint_param(step, "retries", value)? as u32;
        }
        if let Some(value) = params.get("retry_backoff_ms") {
            llm.retry_backoff = Duration::from_millis(uint_param(step, "retry_backoff_ms", value)?);
        }
        Ok(llm)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Substitute placeholders with values from the state. Placeholders that
    /// do not resolve are left in place.
    pub fn render_prompt(&self, state: &SharedState) -> String {
        self.placeholder
            .replace_all(&self.template, |caps: &Captures| {
                let root = Root::parse(&caps[1]);
                let path = caps.get(2).map_or("", |m| m.as_str());
                match root.and_then(|root| lookup(state, root, path)) {
                    Some(Value::String(text)) => text.clone(),
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    async fn complete_with_retries(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.client.complete(&self.model, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        step = %self.name,
                        model = %self.model,
                        attempt = attempt + 1,
                        error = %e,
                        "Completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record(&self, status: &str) -> Value {
        json!({
            "agent": self.name,
            "kind": "llm",
            "model": self.model,
            "purpose": self.purpose,
            "status": status,
        })
    }

    fn degraded(&self, detail: String) -> Delta {
        let mut record = self.record("error");
        record["detail"] = Value::String(detail.clone());
        Delta::new()
            .with_error(format!(
                "Completion with model '{}' failed: {}",
                self.model, detail
            ))
            .with_log(record)
    }
}

impl Step for LlmStep {
    fn kind(&self) -> &str {
        "llm"
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<Delta>> {
        Box::pin(async move {
            let prompt = self.render_prompt(state);
            debug!(step = %self.name, model = %self.model, prompt_len = prompt.len(), "Requesting completion");

            let text = match self.complete_with_retries(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(step = %self.name, model = %self.model, error = %e, "Completion failed");
                    return Ok(self.degraded(e.to_string()));
                }
            };

            let output = if self.json_output {
                match serde_json::from_str::<Value>(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(step = %self.name, error = %e, "Completion was not valid JSON");
                        return Ok(self.degraded(format!("expected JSON output: {}", e)));
                    }
                }
            } else {
                Value::String(text)
            };

            Ok(Delta::new()
                .with_artifact(self.output_key.clone(), output)
                .with_log(self.record("success")))
        })
    }
}

/// Walk `.a.b` below a namespace. An empty path yields the whole namespace.
fn lookup(state: &SharedState, root: Root, path: &str) -> Option<Value> {
    let namespace = state.namespace(root);
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let Some(first) = segments.next() else {
        return Some(Value::Object(namespace.clone()));
    };
    let mut current = namespace.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

fn str_param<'p>(step: &str, params: &'p Map<String, Value>, key: &str) -> Result<Option<&'p str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(WaypointError::validation(
            format!("steps.{}.{}", step, key),
            "expected a string",
        )),
    }
}

fn uint_param(step: &str, key: &str, value: &Value) -> Result<u64> {
    value.as_u64().ok_or_else(|| {
        WaypointError::validation(
            format!("steps.{}.{}", step, key),
            "expected a non-negative integer",
        )
    })
}

/// Offline completion backend that echoes the prompt under a header.
///
/// Output is reproducible, which makes runs auditable and testable without
/// network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedCompletion;

impl CompletionClient for SimulatedCompletion {
    fn complete<'a>(&'a self, model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let body: String = prompt.chars().take(SIMULATED_BODY_CHARS).collect();
            Ok(format!(
                "[LLM:{}]\n{}\n\n[SIMULATED_OUTPUT] Generated from the prompt above.",
                model, body
            ))
        })
    }
}
