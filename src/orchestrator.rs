//! Scan controller: the adaptive probing loop
//!
//! One controller drives one run through a fixed state machine:
//!
//! ```text
//! Planning -> Executing -> Analyzing -> Executing (loop)
//!                                    \-> Reporting (terminal)
//! ```
//!
//! Per step: security gate -> admission (scoped, release guaranteed) ->
//! sandboxed execution -> record. After every record the decision policy
//! may inject new, non-duplicate steps or stop the run. Termination is
//! guaranteed: the cursor exhausts the (possibly grown) plan, a decision
//! sets `stop`, or the hard step ceiling is hit. Steps within a run are
//! strictly sequential; only the governor and monitor are shared across
//! concurrent runs.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::decision::{AnalystBackend, Decision, DecisionPolicy};
use crate::error::ScanError;
use crate::governor::ConcurrencyGovernor;
use crate::llm::PlannerBackend;
use crate::monitor::ActivityMonitor;
use crate::plan::{Plan, PlanStep, Priority};
use crate::report::ScanReport;
use crate::sandbox::{ExecutionRecord, StepRunner};
use crate::validator;

/// Budget for one planner call; expiry falls back to the built-in plan
const PLANNING_TIMEOUT: Duration = Duration::from_secs(90);
/// Budget for the final narrative assessment
const ASSESSMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// State machine phases; `Reporting` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Planning,
    Executing,
    Analyzing,
    Reporting,
}

/// Drives one scan run; not reusable across runs
pub struct ScanController {
    config: Config,
    governor: ConcurrencyGovernor,
    monitor: ActivityMonitor,
    runner: Arc<dyn StepRunner>,
    planner: Option<Arc<dyn PlannerBackend>>,
    policy: DecisionPolicy,
    analyst: Option<Arc<dyn AnalystBackend>>,
}

impl ScanController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        governor: ConcurrencyGovernor,
        monitor: ActivityMonitor,
        runner: Arc<dyn StepRunner>,
        planner: Option<Arc<dyn PlannerBackend>>,
        analyst: Option<Arc<dyn AnalystBackend>>,
    ) -> Self {
        Self {
            config,
            governor,
            monitor,
            runner,
            policy: DecisionPolicy::new(analyst.clone()),
            planner,
            analyst,
        }
    }

    /// Execute a full run. Always terminates and always yields a report;
    /// the only error path is an internal invariant violation.
    pub async fn run(self, target: &str, principal: &str) -> Result<ScanReport, ScanError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, target, principal, "scan run starting");

        let mut phase = Phase::Planning;
        // The fallback plan stands unless the collaborator produces a
        // usable one during the Planning phase.
        let mut plan = Plan::fallback(target);
        let mut records: Vec<ExecutionRecord> = Vec::new();
        let mut decisions: Vec<Decision> = Vec::new();
        let mut stopped_early = false;
        let mut stop_reasoning = None;
        let mut cursor = 0usize;
        let mut last_record: Option<ExecutionRecord> = None;

        loop {
            match phase {
                Phase::Planning => {
                    if let Some(p) = self.collaborator_plan(target).await {
                        plan = p;
                    }
                    phase = Phase::Executing;
                }
                Phase::Executing => {
                    if cursor >= plan.steps.len() {
                        phase = Phase::Reporting;
                        continue;
                    }
                    if records.len() >= self.config.max_total_steps {
                        warn!(%run_id, ceiling = self.config.max_total_steps, "step ceiling reached");
                        phase = Phase::Reporting;
                        continue;
                    }
                    let step = plan.steps[cursor].clone();
                    last_record = Some(self.execute_step(&step, target, principal).await);
                    phase = Phase::Analyzing;
                }
                Phase::Analyzing => {
                    let record = last_record.take().ok_or_else(|| {
                        ScanError::InvariantViolation("analyzing without a record".into())
                    })?;
                    let step = &plan.steps[cursor];
                    let decision = self.policy.analyze(&record, target, step).await;
                    records.push(record);

                    let stop = decision.stop;
                    if stop {
                        // A stop decision ends the run outright; any next
                        // actions it carries are moot and never planned.
                        info!(%run_id, "decision policy stopped the run");
                        stop_reasoning = Some(decision.stop_reasoning.clone());
                        stopped_early = true;
                    } else {
                        // Dynamic step injection, deduplicated on tool
                        // identity so the plan cannot grow without bound or
                        // re-run an already-planned tool.
                        for action in &decision.next_actions {
                            if plan.has_tool(action.tool) {
                                debug!(tool = action.tool.as_str(), "duplicate next action dropped");
                                continue;
                            }
                            if plan.steps.len() >= self.config.max_total_steps {
                                break;
                            }
                            info!(tool = action.tool.as_str(), "dynamic step injected");
                            let mut injected = PlanStep::new(action.tool, &action.reasoning);
                            injected.priority = Priority::High;
                            plan.steps.push(injected);
                        }
                    }
                    decisions.push(decision);

                    cursor += 1;
                    phase = if stop { Phase::Reporting } else { Phase::Executing };
                }
                Phase::Reporting => break,
            }
        }

        let narrative = self.narrative_assessment(&records, &decisions).await;
        let report = ScanReport::build(
            run_id,
            target,
            principal,
            started_at,
            plan.steps.len(),
            records,
            decisions,
            stopped_early,
            stop_reasoning,
            narrative,
        );
        info!(
            %run_id,
            completed = report.outcomes.completed,
            findings = report.findings.len(),
            "scan run finished"
        );
        Ok(report)
    }

    /// Planning phase: ask the collaborator. `None` on any failure means
    /// the built-in fallback plan stands.
    async fn collaborator_plan(&self, target: &str) -> Option<Plan> {
        let Some(planner) = &self.planner else {
            info!("no planner configured, using fallback plan");
            return None;
        };

        let call = planner.plan(target);
        match tokio::time::timeout(PLANNING_TIMEOUT, call).await {
            Ok(Ok(text)) => match Plan::from_model_text(&text, target) {
                Ok(plan) => {
                    info!(steps = plan.steps.len(), "plan obtained from collaborator");
                    Some(plan)
                }
                Err(e) => {
                    warn!(error = %e, "planner output rejected, using fallback plan");
                    None
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "planner call failed, using fallback plan");
                None
            }
            Err(_) => {
                warn!("planner call timed out, using fallback plan");
                None
            }
        }
    }

    /// One step: gate -> admit -> run. Gate and admission failures yield
    /// rejection records; the step never retries.
    async fn execute_step(
        &self,
        step: &PlanStep,
        target: &str,
        principal: &str,
    ) -> ExecutionRecord {
        let tool = step.tool;

        // Security gate: the target and every string parameter must pass.
        // The target URL is injected by the controller below, never taken
        // from the step's own parameter map.
        if !validator::validate_target(target) {
            return ExecutionRecord::rejected(tool, "target failed validation");
        }
        let mut params = validator::sanitize_parameters(&step.params);
        if !params_pass_gate(&params) {
            return ExecutionRecord::rejected(tool, "parameters failed validation");
        }
        params.insert("url".to_string(), Value::String(target.to_string()));

        // Governance: fan-out anomaly, hourly class ceiling, then the
        // concurrency slot. All are immediate rejections, never queues.
        if self.monitor.is_anomalous(principal) {
            return ExecutionRecord::rejected(tool, "anomalous activity pattern");
        }
        if !self.monitor.check_rate_limit(principal, tool.action_class()) {
            return ExecutionRecord::denied(tool, "rate limit exceeded");
        }
        let Some(_slot) = self.governor.try_admit(principal) else {
            return ExecutionRecord::denied(
                tool,
                &format!("concurrency ceiling {} reached", self.governor.limit()),
            );
        };

        self.monitor.log_activity(principal, tool.as_str(), target);

        // Per-step timeout: planner may request one, clamped to at least
        // one second and at most the configured ceiling.
        let timeout = Duration::from_secs(
            step.params
                .get("timeout_secs")
                .and_then(Value::as_u64)
                .unwrap_or_else(|| tool.default_timeout_secs())
                .clamp(1, self.config.max_step_timeout_secs.max(1)),
        );

        // The slot guard is held across the await and released on every
        // exit path when it drops.
        self.runner.run_step(tool, &params, timeout).await
    }

    /// Reporting phase: narrative assessment with counted fallback.
    async fn narrative_assessment(
        &self,
        records: &[ExecutionRecord],
        decisions: &[Decision],
    ) -> Option<String> {
        let analyst = self.analyst.as_ref()?;

        let summary = serde_json::json!({
            "records": records,
            "decisions": decisions,
        })
        .to_string();

        match tokio::time::timeout(ASSESSMENT_TIMEOUT, analyst.final_assessment(&summary)).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!(error = %e, "final assessment failed, report uses counted summary");
                None
            }
            Err(_) => {
                warn!("final assessment timed out, report uses counted summary");
                None
            }
        }
    }
}

/// Defense-in-depth gate over sanitized parameters: string values must
/// clear the payload denylist, and any explicit command text is refused
/// outright by the command denylist.
fn params_pass_gate(params: &serde_json::Map<String, Value>) -> bool {
    params.values().all(value_passes_gate)
}

fn value_passes_gate(value: &Value) -> bool {
    match value {
        Value::String(s) => validator::validate_payload(s) && validator::validate_command(s),
        Value::Array(items) => items.iter().all(value_passes_gate),
        _ => true,
    }
}
