//! Declarative process descriptions and their compiled routing graphs.
//!
//! A [`ProcessDescription`] is the document an author writes: a start step, a
//! map of steps and an ordered list of edges with optional guard conditions.
//! [`compile`] validates it and produces an immutable [`CompiledGraph`] that
//! the engine walks.

pub mod description;
pub mod graph;
mod validate;

pub use description::{EdgeSpec, Format, ProcessDescription, ProcessHeader, StepSpec, DEFAULT_KIND};
pub use graph::{compile, validate, CompileOptions, CompiledGraph, Decision, Diagnostic, Guard, Route, Target};
