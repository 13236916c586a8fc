//! Process descriptions used across the test suites.

use serde_json::json;

use waypoint_dsl::{EdgeSpec, ProcessDescription, StepSpec};

/// `s1 -> s2 -> __end__`, done when `quality.status == 'done'`.
pub fn two_step() -> ProcessDescription {
    ProcessDescription::new("s1")
        .with_name("two-step")
        .with_done_condition("quality.status == 'done'")
        .with_step("s1", StepSpec::new("assign").with_param("artifacts", json!({"x": "first"})))
        .with_step("s2", StepSpec::new("assign").with_param("quality", json!({"status": "done"})))
        .with_edge(EdgeSpec::always("s1", "s2"))
        .with_edge(EdgeSpec::to_end("s2"))
}

/// `a -> b` when `quality.ok == True`, otherwise `a -> c`; both end.
pub fn routing() -> ProcessDescription {
    ProcessDescription::new("a")
        .with_name("routing")
        .with_step("a", StepSpec::new("assign"))
        .with_step("b", StepSpec::new("assign"))
        .with_step("c", StepSpec::new("assign"))
        .with_edge(EdgeSpec::conditional("a", "b", "quality.ok == True"))
        .with_edge(EdgeSpec::always("a", "c"))
        .with_edge(EdgeSpec::to_end("b"))
        .with_edge(EdgeSpec::to_end("c"))
}

/// `ping <-> pong` forever.
pub fn cycle() -> ProcessDescription {
    ProcessDescription::new("ping")
        .with_name("cycle")
        .with_step("ping", StepSpec::new("assign"))
        .with_step("pong", StepSpec::new("assign"))
        .with_edge(EdgeSpec::always("ping", "pong"))
        .with_edge(EdgeSpec::always("pong", "ping"))
}

/// Writer/reviewer loop bounded by three review attempts.
pub fn review_loop() -> ProcessDescription {
    ProcessDescription::new("writer")
        .with_name("review-loop")
        .with_done_condition("quality.review_status == 'approved'")
        .with_step(
            "writer",
            StepSpec::new("llm")
                .with_param("prompt_template", json!("Write a short piece about {context.topic}."))
                .with_param("purpose", json!("draft"))
                .with_param("output_key", json!("draft")),
        )
        .with_step(
            "reviewer",
            StepSpec::new("judge")
                .with_param("artifact", json!("draft"))
                .with_param("min_length", json!(40)),
        )
        .with_edge(EdgeSpec::always("writer", "reviewer"))
        .with_edge(EdgeSpec::conditional("reviewer", "__end__", "quality.attempts >= 3"))
        .with_edge(EdgeSpec::always("reviewer", "writer"))
}

/// The review loop as a YAML document.
pub const REVIEW_LOOP_YAML: &str = r#"
process:
  name: review-loop
  start: writer
  done_condition: "quality.review_status == 'approved'"
steps:
  writer:
    kind: llm
    prompt_template: "Write a short piece about {context.topic}."
    purpose: draft
    output_key: draft
  reviewer:
    kind: judge
    artifact: draft
    min_length: 40
edges:
  - from: writer
    to: reviewer
  - from: reviewer
    to: __end__
    condition: "quality.attempts >= 3"
  - from: reviewer
    to: writer
"#;
