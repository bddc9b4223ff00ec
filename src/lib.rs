//! redprobe
//!
//! Adaptive, sandboxed web security probing engine. Builds a testing plan
//! for a target, executes probe steps through isolated, resource-bounded
//! processes, interprets each result, and mutates its own remaining plan
//! in response, looping until a stop condition or the step budget.
//!
//! # Architecture
//!
//! ```text
//! ScanController ──► SecurityValidator (gate)
//!       │
//!       ├── ConcurrencyGovernor (per-principal slots)
//!       ├── ActivityMonitor (rate limits + anomaly)
//!       ├── ExecutionSupervisor (Isolated / Degraded)
//!       ├── DecisionPolicy (heuristics + analyst)
//!       └── ScanReport (terminal)
//! ```
//!
//! The scanning tools themselves (sqlmap, XSStrike, tplmap, ffuf) are
//! opaque external binaries invoked only through the supervisor's fixed
//! command templates.

pub mod config;
pub mod decision;
pub mod error;
pub mod governor;
pub mod llm;
pub mod monitor;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod sandbox;
pub mod validator;

pub use config::Config;
pub use decision::{AnalystBackend, Decision, DecisionPolicy, Finding, Severity};
pub use error::ScanError;
pub use governor::{AdmissionGuard, ConcurrencyGovernor};
pub use llm::{ClaudeBackend, PlannerBackend};
pub use monitor::ActivityMonitor;
pub use orchestrator::ScanController;
pub use plan::{Plan, PlanStep, Priority, ToolKind};
pub use report::ScanReport;
pub use sandbox::{ExecMode, ExecutionRecord, ExecutionSupervisor, StepOutcome, StepRunner};
