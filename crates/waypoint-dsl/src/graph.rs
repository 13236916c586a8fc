use std::collections::{HashSet, VecDeque};
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::expr::Expression;
use waypoint_core::types::{RouteReason, SharedState, Termination, TERMINAL};

use crate::description::{ProcessDescription, StepSpec};
use crate::validate::check_structure;

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Step(String),
    Terminal,
}

impl Target {
    fn parse(name: &str) -> Self {
        if name == TERMINAL {
            Target::Terminal
        } else {
            Target::Step(name.to_string())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Target::Step(name) => name,
            Target::Terminal => TERMINAL,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Target::Terminal)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A compiled conditional edge.
#[derive(Debug, Clone)]
pub struct Guard {
    pub condition: Expression,
    pub target: Target,
    /// Position of the edge in the description.
    pub edge_index: usize,
}

/// Outgoing routing for one step: guards in declared order, then the fallback.
#[derive(Debug, Clone, Default)]
pub struct Route {
    pub guards: Vec<Guard>,
    pub fallback: Option<Target>,
}

/// A non-fatal finding about the description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub element: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element, self.message)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Turn every diagnostic into a validation error.
    pub strict: bool,
}

/// The router's choice after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub target: Target,
    pub reason: RouteReason,
}

impl Decision {
    /// Why the run ends here, if it does.
    pub fn termination(&self) -> Option<Termination> {
        match (&self.reason, &self.target) {
            (RouteReason::DoneCondition, _) => Some(Termination::DoneCondition),
            (RouteReason::NoSuccessor, _) => Some(Termination::NoSuccessor),
            (_, Target::Terminal) => Some(Termination::TerminalEdge),
            (_, Target::Step(_)) => None,
        }
    }
}

/// Immutable routing table built from a validated description.
///
/// Shared read-only across runs; nothing here changes after [`compile`].
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    name: Option<String>,
    start: String,
    done: Expression,
    max_steps: Option<usize>,
    steps: IndexMap<String, StepSpec>,
    routes: IndexMap<String, Route>,
    diagnostics: Vec<Diagnostic>,
}

impl CompiledGraph {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn done_condition(&self) -> &Expression {
        &self.done
    }

    /// Step budget declared by the process, if any.
    pub fn max_steps(&self) -> Option<usize> {
        self.max_steps
    }

    /// Step declarations in description order.
    pub fn steps(&self) -> &IndexMap<String, StepSpec> {
        &self.steps
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    pub fn route(&self, step: &str) -> Option<&Route> {
        self.routes.get(step)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Pick the successor of `step` given the state after it ran.
    ///
    /// The done condition wins over every edge; then guards in declared
    /// order; then the fallback; otherwise the run ends.
    pub fn next(&self, step: &str, state: &SharedState) -> Decision {
        if self.done.evaluate(state) {
            return Decision {
                target: Target::Terminal,
                reason: RouteReason::DoneCondition,
            };
        }

        let Some(route) = self.routes.get(step) else {
            return Decision {
                target: Target::Terminal,
                reason: RouteReason::NoSuccessor,
            };
        };

        for (index, guard) in route.guards.iter().enumerate() {
            if guard.condition.evaluate(state) {
                return Decision {
                    target: guard.target.clone(),
                    reason: RouteReason::Guard {
                        index,
                        condition: guard.condition.source().to_string(),
                    },
                };
            }
        }

        match &route.fallback {
            Some(target) => Decision {
                target: target.clone(),
                reason: RouteReason::Fallback,
            },
            None => Decision {
                target: Target::Terminal,
                reason: RouteReason::NoSuccessor,
            },
        }
    }
}

impl fmt::Display for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "process {} (start: {})",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.start
        )?;
        if !self.done.is_empty() {
            writeln!(f, "done when: {}", self.done)?;
        }
        for (name, spec) in &self.steps {
            writeln!(f, "{} [{}]", name, spec.kind)?;
            let route = self.routes.get(name);
            for guard in route.map(|r| r.guards.as_slice()).unwrap_or_default() {
                writeln!(f, "  if {} -> {}", guard.condition, guard.target)?;
            }
            match route.and_then(|r| r.fallback.as_ref()) {
                Some(target) => writeln!(f, "  else -> {}", target)?,
                None => writeln!(f, "  else -> {} (no successor)", TERMINAL)?,
            }
        }
        Ok(())
    }
}

/// Validate a description and build its routing table.
pub fn compile(desc: &ProcessDescription, options: CompileOptions) -> Result<CompiledGraph> {
    check_structure(desc)?;
    let start = desc.process.start.trim();

    let done = match desc.process.done_condition.as_deref() {
        Some(text) => Expression::compile(text).map_err(|source| WaypointError::InvalidCondition {
            element: "process.done_condition".into(),
            source,
        })?,
        None => Expression::never(),
    };

    let mut routes: IndexMap<String, Route> = desc
        .steps
        .keys()
        .map(|name| (name.clone(), Route::default()))
        .collect();
    let mut fallback_index: IndexMap<&str, usize> = IndexMap::new();
    let mut diagnostics = Vec::new();

    for (i, edge) in desc.edges.iter().enumerate() {
        let target = Target::parse(&edge.to);
        let Some(route) = routes.get_mut(&edge.from) else {
            continue;
        };

        match edge.condition.as_deref() {
            Some(text) => {
                let condition =
                    Expression::compile(text).map_err(|source| WaypointError::InvalidCondition {
                        element: format!("edges[{}].condition", i),
                        source,
                    })?;
                if condition.is_empty() {
                    diagnostics.push(Diagnostic {
                        element: format!("edges[{}].condition", i),
                        message: "empty condition never holds; edge is unreachable".into(),
                    });
                    continue;
                }
                route.guards.push(Guard {
                    condition,
                    target,
                    edge_index: i,
                });
            }
            None => match fallback_index.get(edge.from.as_str()) {
                Some(first) => diagnostics.push(Diagnostic {
                    element: format!("edges[{}]", i),
                    message: format!(
                        "unreachable: '{}' already falls back via edges[{}]",
                        edge.from, first
                    ),
                }),
                None => {
                    fallback_index.insert(&edge.from, i);
                    route.fallback = Some(target);
                }
            },
        }
    }

    diagnostics.extend(unreachable_steps(start, &routes));

    if options.strict {
        if let Some(first) = diagnostics.first() {
            return Err(WaypointError::validation(
                first.element.clone(),
                first.message.clone(),
            ));
        }
    }
    for diagnostic in &diagnostics {
        warn!(element = %diagnostic.element, "{}", diagnostic.message);
    }

    debug!(
        start = %start,
        steps = desc.steps.len(),
        edges = desc.edges.len(),
        diagnostics = diagnostics.len(),
        "Compiled process graph"
    );

    Ok(CompiledGraph {
        name: desc.process.name.clone(),
        start: start.to_string(),
        done,
        max_steps: desc.process.max_steps,
        steps: desc.steps.clone(),
        routes,
        diagnostics,
    })
}

/// Validate a description without keeping the compiled graph.
pub fn validate(desc: &ProcessDescription, options: CompileOptions) -> Result<Vec<Diagnostic>> {
    compile(desc, options).map(|graph| graph.diagnostics)
}

/// Steps no edge path from `start` can reach.
fn unreachable_steps(start: &str, routes: &IndexMap<String, Route>) -> Vec<Diagnostic> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    while let Some(step) = queue.pop_front() {
        let Some(route) = routes.get(step) else {
            continue;
        };
        let targets = route
            .guards
            .iter()
            .map(|g| &g.target)
            .chain(route.fallback.as_ref());
        for target in targets {
            if let Target::Step(name) = target {
                if seen.insert(name.as_str()) {
                    queue.push_back(name.as_str());
                }
            }
        }
    }

    routes
        .keys()
        .filter(|name| !seen.contains(name.as_str()))
        .map(|name| Diagnostic {
            element: format!("steps.{}", name),
            message: format!("step is not reachable from '{}'", start),
        })
        .collect()
}
