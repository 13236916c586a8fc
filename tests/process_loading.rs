use std::io::Write;

use waypoint_core::WaypointError;
use waypoint_dsl::{compile, validate, CompileOptions, ProcessDescription};
use waypoint_test_utils::fixtures::REVIEW_LOOP_YAML;

fn write_process(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write process");
    tmp
}

const REVIEW_LOOP_TOML: &str = r#"
[process]
name = "review-loop"
start = "writer"
done_condition = "quality.review_status == 'approved'"

[steps.writer]
kind = "llm"
prompt_template = "Write a short piece about {context.topic}."
output_key = "draft"

[steps.reviewer]
kind = "judge"
artifact = "draft"
min_length = 40

[[edges]]
from = "writer"
to = "reviewer"

[[edges]]
from = "reviewer"
to = "__end__"
condition = "quality.attempts >= 3"

[[edges]]
from = "reviewer"
to = "writer"
"#;

#[test]
fn test_yaml_and_toml_compile_to_the_same_routes() {
    let yaml = write_process(".yaml", REVIEW_LOOP_YAML);
    let toml = write_process(".toml", REVIEW_LOOP_TOML);

    let from_yaml = compile(
        &ProcessDescription::from_path(yaml.path()).unwrap(),
        CompileOptions::default(),
    )
    .unwrap();
    let from_toml = compile(
        &ProcessDescription::from_path(toml.path()).unwrap(),
        CompileOptions::default(),
    )
    .unwrap();

    assert_eq!(from_yaml.start(), "writer");
    assert!(from_yaml.step_names().eq(from_toml.step_names()));
    assert_eq!(from_yaml.to_string(), from_toml.to_string());
    assert!(from_yaml.diagnostics().is_empty());
}

#[test]
fn test_declaration_order_is_preserved() {
    let yaml = write_process(".yml", REVIEW_LOOP_YAML);
    let desc = ProcessDescription::from_path(yaml.path()).unwrap();
    let names: Vec<&str> = desc.steps.keys().map(String::as_str).collect();
    assert_eq!(names, ["writer", "reviewer"]);
}

#[test]
fn test_unknown_edge_target_is_a_load_error() {
    let broken = REVIEW_LOOP_YAML.replace("to: writer", "to: editor");
    let file = write_process(".yaml", &broken);
    let desc = ProcessDescription::from_path(file.path()).unwrap();

    match compile(&desc, CompileOptions::default()) {
        Err(WaypointError::Validation { element, .. }) => assert!(element.ends_with(".to")),
        other => panic!("expected validation error, got {:?}", other.map(|g| g.to_string())),
    }
}

#[test]
fn test_bad_condition_is_rejected_before_running() {
    let broken = REVIEW_LOOP_YAML.replace("quality.attempts >= 3", "__import__('os')");
    let file = write_process(".yaml", &broken);
    let desc = ProcessDescription::from_path(file.path()).unwrap();

    let err = validate(&desc, CompileOptions::default()).unwrap_err();
    assert!(err.is_load_time());
    assert!(matches!(err, WaypointError::InvalidCondition { .. }));
}

#[test]
fn test_unsupported_extension_and_missing_file() {
    let file = write_process(".ini", "[process]");
    assert!(matches!(
        ProcessDescription::from_path(file.path()),
        Err(WaypointError::Parse { .. })
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        ProcessDescription::from_path(&dir.path().join("missing.yaml")),
        Err(WaypointError::ProcessNotFound(_))
    ));
}
