//! Decision model and result interpretation
//!
//! After every step the controller turns the raw execution record into a
//! structured [`Decision`]: severity-tagged findings, proposed next
//! actions, and a stop flag. Two inputs feed it:
//!
//! - keyword heuristics over tool output (see [`scan_output_findings`])
//! - the analyst collaborator's JSON, schema-validated at the boundary
//!
//! The policy is resilient by construction: any failure to obtain or parse
//! the collaborator's response yields a safe default (`stop=false`, no next
//! actions) so the loop degrades to following the original plan instead of
//! aborting or spinning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::plan::{extract_json_object, PlanStep, ToolKind};
use crate::sandbox::ExecutionRecord;

/// Budget for one analyst call; expiry falls back to the safe default
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

/// Vulnerability severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Analyst confidence in a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

/// One vulnerability finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Vulnerability class (SQLi, XSS, SSTI, ...)
    pub kind: String,
    pub severity: Severity,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub recommendation: String,
}

/// A proposed follow-up step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextAction {
    pub tool: ToolKind,
    #[serde(default)]
    pub reasoning: String,
}

/// Structured interpretation of one step's result; immutable once produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub next_actions: Vec<NextAction>,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub stop_reasoning: String,
}

impl Decision {
    /// Safe default: keep following the original plan.
    pub fn safe_default(reason: &str) -> Self {
        Self {
            summary: "analysis unavailable".to_string(),
            findings: Vec::new(),
            next_actions: Vec::new(),
            stop: false,
            stop_reasoning: format!("continuing with default behavior: {reason}"),
        }
    }

    /// Parse analyst output, validating the schema at the boundary. Next
    /// actions naming unknown tools are dropped rather than failing the
    /// whole decision.
    pub fn from_model_text(text: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct RawAction {
            tool: String,
            #[serde(default)]
            reasoning: String,
        }

        #[derive(Deserialize)]
        struct RawDecision {
            #[serde(default)]
            summary: String,
            #[serde(default)]
            vulnerabilities: Vec<Finding>,
            #[serde(default)]
            next_actions: Vec<RawAction>,
            #[serde(default)]
            stop_scanning: bool,
            #[serde(default)]
            reasoning: String,
        }

        let json = extract_json_object(text)?;
        let raw: RawDecision = serde_json::from_str(json).ok()?;

        Some(Self {
            summary: raw.summary,
            findings: raw.vulnerabilities,
            next_actions: raw
                .next_actions
                .into_iter()
                .filter_map(|a| {
                    Some(NextAction {
                        tool: ToolKind::parse(&a.tool)?,
                        reasoning: a.reasoning,
                    })
                })
                .collect(),
            stop: raw.stop_scanning,
            stop_reasoning: raw.reasoning,
        })
    }
}

/// Keyword heuristics over raw tool output.
///
/// Known limitation: these substring checks are crude and prone to both
/// false positives and false negatives (e.g. any "vulnerable" in a banner
/// flags XSS). They are kept as-is for behavioral parity with the tool
/// collaborators' expected output rather than silently improved.
pub fn scan_output_findings(record: &ExecutionRecord) -> Vec<Finding> {
    let out = &record.stdout;
    let out_lower = out.to_lowercase();
    let mut findings = Vec::new();

    if out.contains("might be injectable") || out.contains("Parameter:") {
        findings.push(Finding {
            kind: "SQLi".to_string(),
            severity: Severity::Critical,
            confidence: Confidence::Medium,
            recommendation: "Use parameterized queries".to_string(),
        });
    }

    if out.contains("XSS") || out_lower.contains("vulnerable") {
        findings.push(Finding {
            kind: "XSS".to_string(),
            severity: Severity::Medium,
            confidence: Confidence::Medium,
            recommendation: "Encode output and validate input".to_string(),
        });
    }

    if out.contains("SSTI") || out.contains("Template injection") {
        findings.push(Finding {
            kind: "SSTI".to_string(),
            severity: Severity::High,
            confidence: Confidence::Medium,
            recommendation: "Never feed user input to template engines".to_string(),
        });
    }

    findings
}

/// Analyst collaborator contract: serialized result + context in, text
/// expected to parse as the decision schema out.
#[async_trait]
pub trait AnalystBackend: Send + Sync {
    async fn analyze_step(&self, result_summary: &str, target: &str) -> anyhow::Result<String>;

    /// Narrative final assessment for the report
    async fn final_assessment(&self, report_summary: &str) -> anyhow::Result<String>;
}

/// Decision policy: pure interpretation of one step's outcome
pub struct DecisionPolicy {
    backend: Option<Arc<dyn AnalystBackend>>,
}

impl DecisionPolicy {
    pub fn new(backend: Option<Arc<dyn AnalystBackend>>) -> Self {
        Self { backend }
    }

    /// Interpret one execution record. Heuristic findings are always
    /// attached; the collaborator contributes summary, extra findings,
    /// next actions, and the stop flag when it is available and parsable.
    pub async fn analyze(
        &self,
        record: &ExecutionRecord,
        target: &str,
        step: &PlanStep,
    ) -> Decision {
        let heuristic = scan_output_findings(record);

        let mut decision = match &self.backend {
            Some(backend) => {
                let summary = serde_json::json!({
                    "tool": record.tool.as_str(),
                    "outcome": record.outcome,
                    "success": record.success,
                    "sandboxed": record.sandboxed,
                    "reasoning": step.reasoning,
                    "stdout": record.stdout,
                    "stderr": record.stderr,
                })
                .to_string();

                let call = backend.analyze_step(&summary, target);
                match tokio::time::timeout(ANALYSIS_TIMEOUT, call).await {
                    Ok(Ok(text)) => Decision::from_model_text(&text).unwrap_or_else(|| {
                        warn!("analyst returned non-schema text, using safe default");
                        Decision::safe_default("unparsable analysis")
                    }),
                    Ok(Err(e)) => {
                        warn!(error = %e, "analyst call failed, using safe default");
                        Decision::safe_default("analysis error")
                    }
                    Err(_) => {
                        warn!("analyst call timed out, using safe default");
                        Decision::safe_default("analysis timeout")
                    }
                }
            }
            None => Decision::safe_default("no analyst configured"),
        };

        decision.findings.extend(heuristic);
        debug!(
            tool = record.tool.as_str(),
            findings = decision.findings.len(),
            stop = decision.stop,
            "step analyzed"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::StepOutcome;

    fn record_with_stdout(stdout: &str) -> ExecutionRecord {
        ExecutionRecord {
            tool: ToolKind::SqlmapScan,
            outcome: StepOutcome::Completed,
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
            duration_ms: 10,
            sandboxed: true,
        }
    }

    #[test]
    fn test_sqli_keywords_are_critical() {
        let findings =
            scan_output_findings(&record_with_stdout("Parameter: id (GET) might be injectable"));
        assert!(findings
            .iter()
            .any(|f| f.kind == "SQLi" && f.severity == Severity::Critical));
    }

    #[test]
    fn test_xss_keywords_are_medium() {
        let findings = scan_output_findings(&record_with_stdout("reflected XSS in q param"));
        assert!(findings
            .iter()
            .any(|f| f.kind == "XSS" && f.severity == Severity::Medium));
        // case-insensitive "vulnerable" also trips the XSS rule
        let findings = scan_output_findings(&record_with_stdout("endpoint is Vulnerable"));
        assert!(findings.iter().any(|f| f.kind == "XSS"));
    }

    #[test]
    fn test_ssti_keywords_are_high() {
        let findings = scan_output_findings(&record_with_stdout("Template injection confirmed"));
        assert!(findings
            .iter()
            .any(|f| f.kind == "SSTI" && f.severity == Severity::High));
    }

    #[test]
    fn test_clean_output_yields_no_findings() {
        assert!(scan_output_findings(&record_with_stdout("no issues detected")).is_empty());
    }

    #[test]
    fn test_parse_decision() {
        let text = r#"{"summary": "sqli found",
            "vulnerabilities": [{"kind": "SQLi", "severity": "critical",
                                 "confidence": "high", "recommendation": "fix"}],
            "next_actions": [{"tool": "xss_scan", "reasoning": "forms present"},
                             {"tool": "not_a_tool", "reasoning": "ignored"}],
            "stop_scanning": false, "reasoning": "keep going"}"#;

        let d = Decision::from_model_text(text).unwrap();
        assert_eq!(d.findings.len(), 1);
        assert_eq!(d.next_actions.len(), 1);
        assert_eq!(d.next_actions[0].tool, ToolKind::XssScan);
        assert!(!d.stop);
    }

    #[test]
    fn test_unparsable_text_is_none() {
        assert!(Decision::from_model_text("I could not analyze this").is_none());
    }

    #[tokio::test]
    async fn test_policy_without_backend_is_safe_default_plus_heuristics() {
        let policy = DecisionPolicy::new(None);
        let record = record_with_stdout("might be injectable");
        let step = PlanStep::new(ToolKind::SqlmapScan, "test");

        let d = policy.analyze(&record, "https://example.com", &step).await;
        assert!(!d.stop);
        assert!(d.next_actions.is_empty());
        assert_eq!(d.findings.len(), 1);
        assert_eq!(d.findings[0].kind, "SQLi");
    }

    struct BrokenAnalyst;

    #[async_trait]
    impl AnalystBackend for BrokenAnalyst {
        async fn analyze_step(&self, _: &str, _: &str) -> anyhow::Result<String> {
            Ok("```json\nnot actually json\n```".to_string())
        }
        async fn final_assessment(&self, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("unavailable")
        }
    }

    #[tokio::test]
    async fn test_policy_survives_malformed_analyst_output() {
        let policy = DecisionPolicy::new(Some(Arc::new(BrokenAnalyst)));
        let record = record_with_stdout("clean");
        let step = PlanStep::new(ToolKind::XssScan, "test");

        let d = policy.analyze(&record, "https://example.com", &step).await;
        assert!(!d.stop);
        assert!(d.next_actions.is_empty());
    }
}
