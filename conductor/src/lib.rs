//! Multi-agent orchestration engine for a sandboxed project directory.
//!
//! A user request becomes a plan of agent steps (planner, implementer,
//! critics, enhancer, persona). The implementer's text is scanned for a small
//! command language that is executed inside the sandbox, critics grade the
//! result and failing work is retried. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (command grammar, plan parsing,
//!   grading, critic heuristics). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (sandboxed filesystem, processes,
//!   the model backend, prompt assembly).
//!
//! Orchestration modules ([`orchestrator`], [`agents`], [`interpreter`],
//! [`critique`]) combine the two and report progress through [`events`].

pub mod agents;
pub mod core;
pub mod critique;
pub mod events;
pub mod exit_codes;
pub mod interpreter;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
