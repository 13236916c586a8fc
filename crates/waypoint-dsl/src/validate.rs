use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::TERMINAL;

use crate::description::ProcessDescription;

/// Structural and referential checks, in the order an author would fix them.
/// Guard expressions are checked by the compiler.
pub(crate) fn check_structure(desc: &ProcessDescription) -> Result<()> {
    let start = desc.process.start.trim();
    if start.is_empty() {
        return Err(WaypointError::validation(
            "process.start",
            "a start step is required",
        ));
    }
    if desc.steps.is_empty() {
        return Err(WaypointError::validation(
            "steps",
            "at least one step is required",
        ));
    }
    if desc.edges.is_empty() {
        return Err(WaypointError::validation(
            "edges",
            "at least one edge is required",
        ));
    }

    for name in desc.steps.keys() {
        if name.trim().is_empty() {
            return Err(WaypointError::validation("steps", "step names must not be empty"));
        }
        if name == TERMINAL {
            return Err(WaypointError::validation(
                format!("steps.{}", name),
                format!("'{}' is reserved for the terminal marker", TERMINAL),
            ));
        }
    }

    if !desc.steps.contains_key(start) {
        return Err(WaypointError::validation(
            "process.start",
            format!("unknown step '{}'", start),
        ));
    }

    if desc.process.max_steps == Some(0) {
        return Err(WaypointError::validation(
            "process.max_steps",
            "must be at least 1",
        ));
    }

    for (i, edge) in desc.edges.iter().enumerate() {
        if edge.from == TERMINAL {
            return Err(WaypointError::validation(
                format!("edges[{}].from", i),
                format!("edges cannot leave the terminal marker '{}'", TERMINAL),
            ));
        }
        if !desc.steps.contains_key(&edge.from) {
            return Err(WaypointError::validation(
                format!("edges[{}].from", i),
                format!("unknown step '{}'", edge.from),
            ));
        }
        if edge.to != TERMINAL && !desc.steps.contains_key(&edge.to) {
            return Err(WaypointError::validation(
                format!("edges[{}].to", i),
                format!("unknown step '{}'", edge.to),
            ));
        }
    }

    Ok(())
}
