//! Final report aggregation
//!
//! The Reporting state folds every execution record and decision from one
//! run into a single summary. "No findings" and "every step failed" are
//! distinct outcomes: the outcome counters keep them apart even when the
//! findings list is empty in both cases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{Decision, Finding, Severity};
use crate::sandbox::{ExecutionRecord, StepOutcome};

/// Counted fallback summary, used when the narrative assessment is
/// unavailable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicSummary {
    pub total_vulnerabilities: usize,
    pub critical_issues: usize,
    pub scan_completed: bool,
    pub recommendation: String,
}

/// Per-outcome step counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub rejected: usize,
    pub denied: usize,
}

impl OutcomeCounts {
    fn tally(records: &[ExecutionRecord]) -> Self {
        let mut counts = Self::default();
        for r in records {
            match r.outcome {
                StepOutcome::Completed => counts.completed += 1,
                StepOutcome::Failed => counts.failed += 1,
                StepOutcome::TimedOut => counts.timed_out += 1,
                StepOutcome::Rejected => counts.rejected += 1,
                StepOutcome::Denied => counts.denied += 1,
            }
        }
        counts
    }
}

/// Aggregated result of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub target: String,
    pub principal: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Total steps in the final (possibly grown) plan
    pub steps_planned: usize,
    pub outcomes: OutcomeCounts,
    /// All findings across decisions, in discovery order
    pub findings: Vec<Finding>,
    /// Whether a decision stopped the run before the plan was exhausted
    pub stopped_early: bool,
    pub stop_reasoning: Option<String>,
    /// True when no executed step completed
    pub all_steps_failed: bool,
    /// Narrative assessment from the analyst, when available
    pub narrative: Option<String>,
    pub basic_summary: BasicSummary,
    pub records: Vec<ExecutionRecord>,
    pub decisions: Vec<Decision>,
}

impl ScanReport {
    /// Aggregate one run's records and decisions.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        run_id: Uuid,
        target: &str,
        principal: &str,
        started_at: DateTime<Utc>,
        steps_planned: usize,
        records: Vec<ExecutionRecord>,
        decisions: Vec<Decision>,
        stopped_early: bool,
        stop_reasoning: Option<String>,
        narrative: Option<String>,
    ) -> Self {
        let outcomes = OutcomeCounts::tally(&records);
        let findings: Vec<Finding> = decisions
            .iter()
            .flat_map(|d| d.findings.iter().cloned())
            .collect();

        let executed = records
            .iter()
            .filter(|r| !matches!(r.outcome, StepOutcome::Rejected | StepOutcome::Denied))
            .count();
        let all_steps_failed = executed > 0 && outcomes.completed == 0;

        let critical_issues = findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count();

        let basic_summary = BasicSummary {
            total_vulnerabilities: findings.len(),
            critical_issues,
            scan_completed: true,
            recommendation: "Review findings and prioritize remediation".to_string(),
        };

        Self {
            run_id,
            target: target.to_string(),
            principal: principal.to_string(),
            started_at,
            finished_at: Utc::now(),
            steps_planned,
            outcomes,
            findings,
            stopped_early,
            stop_reasoning,
            all_steps_failed,
            narrative,
            basic_summary,
            records,
            decisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ToolKind;

    fn record(outcome: StepOutcome, success: bool) -> ExecutionRecord {
        ExecutionRecord {
            tool: ToolKind::XssScan,
            outcome,
            success,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: outcome == StepOutcome::TimedOut,
            duration_ms: 1,
            sandboxed: true,
        }
    }

    fn build(records: Vec<ExecutionRecord>, decisions: Vec<Decision>) -> ScanReport {
        ScanReport::build(
            Uuid::new_v4(),
            "https://example.com",
            "user1",
            Utc::now(),
            records.len(),
            records,
            decisions,
            false,
            None,
            None,
        )
    }

    #[test]
    fn test_no_findings_differs_from_all_failed() {
        // Clean run with no findings
        let clean = build(vec![record(StepOutcome::Completed, true)], vec![]);
        assert!(!clean.all_steps_failed);
        assert_eq!(clean.findings.len(), 0);

        // Every step crashed: also no findings, but distinguishable
        let crashed = build(
            vec![
                record(StepOutcome::Failed, false),
                record(StepOutcome::TimedOut, false),
            ],
            vec![],
        );
        assert!(crashed.all_steps_failed);
        assert_eq!(crashed.outcomes.failed, 1);
        assert_eq!(crashed.outcomes.timed_out, 1);
    }

    #[test]
    fn test_rejected_steps_do_not_count_as_executed() {
        let report = build(vec![record(StepOutcome::Rejected, false)], vec![]);
        assert!(!report.all_steps_failed);
        assert_eq!(report.outcomes.rejected, 1);
    }

    #[test]
    fn test_critical_count_in_basic_summary() {
        let decision = Decision {
            summary: "sqli".into(),
            findings: vec![
                Finding {
                    kind: "SQLi".into(),
                    severity: Severity::Critical,
                    confidence: Default::default(),
                    recommendation: String::new(),
                },
                Finding {
                    kind: "XSS".into(),
                    severity: Severity::Medium,
                    confidence: Default::default(),
                    recommendation: String::new(),
                },
            ],
            next_actions: vec![],
            stop: false,
            stop_reasoning: String::new(),
        };
        let report = build(vec![record(StepOutcome::Completed, true)], vec![decision]);
        assert_eq!(report.basic_summary.total_vulnerabilities, 2);
        assert_eq!(report.basic_summary.critical_issues, 1);
    }
}
