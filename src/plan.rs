//! Plan and step data model
//!
//! A [`Plan`] is produced once by the planning collaborator (or the built-in
//! fallback) and then owned exclusively by the controller for one run. Steps
//! may be appended while the run executes, never reordered or removed, and
//! each step executes at most once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScanError;

/// The fixed set of tools a step may invoke
///
/// Anything outside this enum never reaches the supervisor: planner output
/// naming an unknown tool is dropped at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Complete reconnaissance including source analysis
    FullRecon,
    /// Combined SQLMap + XSStrike + TPLMap pass
    VulnerabilityScan,
    /// Focused SQL injection testing
    SqlmapScan,
    /// Cross-site scripting testing
    XssScan,
    /// Server-side template injection testing
    SstiScan,
    /// Single sandboxed HTTP fetch
    Curl,
    /// Directory enumeration (ffuf)
    Ffuf,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullRecon => "full_recon",
            Self::VulnerabilityScan => "vulnerability_scan",
            Self::SqlmapScan => "sqlmap_scan",
            Self::XssScan => "xss_scan",
            Self::SstiScan => "ssti_scan",
            Self::Curl => "curl",
            Self::Ffuf => "ffuf",
        }
    }

    /// Parse a tool name from planner output. Unknown names return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "full_recon" => Some(Self::FullRecon),
            "vulnerability_scan" => Some(Self::VulnerabilityScan),
            "sqlmap_scan" => Some(Self::SqlmapScan),
            "xss_scan" => Some(Self::XssScan),
            "ssti_scan" => Some(Self::SstiScan),
            "curl" => Some(Self::Curl),
            "ffuf" => Some(Self::Ffuf),
            _ => None,
        }
    }

    /// Action class used by the rate limiter
    pub fn action_class(&self) -> &'static str {
        match self {
            Self::FullRecon | Self::Curl => "recon",
            Self::VulnerabilityScan | Self::SqlmapScan | Self::XssScan | Self::SstiScan => "scan",
            Self::Ffuf => "recon",
        }
    }

    /// Per-tool default wall-clock timeout in seconds
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            Self::SqlmapScan | Self::VulnerabilityScan => 300,
            Self::XssScan | Self::SstiScan => 180,
            Self::Ffuf => 300,
            Self::FullRecon | Self::Curl => 30,
        }
    }
}

/// Step priority as assigned by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// One probe: a tool invocation with parameters against the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub tool: ToolKind,
    /// Parameter map; the target URL is injected by the controller, never
    /// taken from untrusted input directly
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Planner's rationale for this step
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub priority: Priority,
}

impl PlanStep {
    pub fn new(tool: ToolKind, reasoning: &str) -> Self {
        Self {
            tool,
            params: Map::new(),
            reasoning: reasoning.to_string(),
            priority: Priority::Medium,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// The ordered, append-only testing plan for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Validated target URL
    pub target: String,
    /// Initial target assessment from the planner
    #[serde(default)]
    pub analysis: String,
    /// Overall testing approach
    #[serde(default)]
    pub strategy: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub risk_areas: Vec<String>,
    #[serde(default)]
    pub expected_findings: Vec<String>,
}

impl Plan {
    /// Built-in plan used when the planning collaborator is unavailable:
    /// recon first, then a broad vulnerability pass.
    pub fn fallback(target: &str) -> Self {
        Self {
            target: target.to_string(),
            analysis: "Fallback plan - planner unavailable".to_string(),
            strategy: "Standard web application test sequence".to_string(),
            steps: vec![
                PlanStep::new(ToolKind::FullRecon, "Always start with reconnaissance")
                    .with_priority(Priority::High),
                PlanStep::new(
                    ToolKind::VulnerabilityScan,
                    "Test for common vulnerabilities",
                )
                .with_priority(Priority::High),
            ],
            risk_areas: vec!["SQLi".into(), "XSS".into(), "SSTI".into()],
            expected_findings: vec!["Standard web vulnerabilities".into()],
        }
    }

    /// Whether any step (executed or pending) already uses this tool.
    /// Dynamic injection dedups on this to bound plan growth.
    pub fn has_tool(&self, tool: ToolKind) -> bool {
        self.steps.iter().any(|s| s.tool == tool)
    }

    /// Parse planner output into a plan, validating the schema at the
    /// boundary. Steps naming unknown tools are dropped; a plan with no
    /// usable steps is a planning failure.
    pub fn from_model_text(text: &str, target: &str) -> Result<Self, ScanError> {
        #[derive(Deserialize)]
        struct RawStep {
            tool: String,
            #[serde(default)]
            reasoning: String,
            #[serde(default)]
            priority: Option<Priority>,
            #[serde(default)]
            params: Map<String, Value>,
        }

        #[derive(Deserialize)]
        struct RawPlan {
            #[serde(default)]
            analysis: String,
            #[serde(default)]
            strategy: String,
            steps: Vec<RawStep>,
            #[serde(default)]
            risk_areas: Vec<String>,
            #[serde(default)]
            expected_findings: Vec<String>,
        }

        let json = extract_json_object(text)
            .ok_or_else(|| ScanError::PlanningUnavailable("no JSON object in response".into()))?;

        let raw: RawPlan = serde_json::from_str(json)
            .map_err(|e| ScanError::PlanningUnavailable(format!("schema violation: {e}")))?;

        let steps: Vec<PlanStep> = raw
            .steps
            .into_iter()
            .filter_map(|s| {
                let tool = ToolKind::parse(&s.tool)?;
                Some(PlanStep {
                    tool,
                    params: s.params,
                    reasoning: s.reasoning,
                    priority: s.priority.unwrap_or_default(),
                })
            })
            .collect();

        if steps.is_empty() {
            return Err(ScanError::PlanningUnavailable(
                "plan contained no recognized tools".into(),
            ));
        }

        Ok(Self {
            target: target.to_string(),
            analysis: raw.analysis,
            strategy: raw.strategy,
            steps,
            risk_areas: raw.risk_areas,
            expected_findings: raw.expected_findings,
        })
    }
}

/// Extract the first balanced JSON object from free text
pub(crate) fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = start;

    for (i, c) in s[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if end > start {
        Some(&s[start..end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_round_trip() {
        for tool in [
            ToolKind::FullRecon,
            ToolKind::VulnerabilityScan,
            ToolKind::SqlmapScan,
            ToolKind::XssScan,
            ToolKind::SstiScan,
            ToolKind::Curl,
            ToolKind::Ffuf,
        ] {
            assert_eq!(ToolKind::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolKind::parse("rm -rf /"), None);
    }

    #[test]
    fn test_fallback_plan_shape() {
        let plan = Plan::fallback("https://example.com");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].tool, ToolKind::FullRecon);
        assert_eq!(plan.steps[1].tool, ToolKind::VulnerabilityScan);
    }

    #[test]
    fn test_parse_plan_from_model_text() {
        let text = r#"Here is the plan:
{"analysis": "PHP app", "strategy": "recon then sqli",
 "steps": [{"tool": "full_recon", "reasoning": "map the surface", "priority": "high"},
           {"tool": "sqlmap_scan", "reasoning": "id param looks injectable"}],
 "risk_areas": ["SQLi"], "expected_findings": ["error-based SQLi"]}"#;

        let plan = Plan::from_model_text(text, "https://example.com").unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].priority, Priority::High);
        assert_eq!(plan.steps[1].tool, ToolKind::SqlmapScan);
        assert!(plan.has_tool(ToolKind::FullRecon));
        assert!(!plan.has_tool(ToolKind::XssScan));
    }

    #[test]
    fn test_unknown_tools_are_dropped() {
        let text = r#"{"steps": [{"tool": "nuke_everything"}, {"tool": "xss_scan"}]}"#;
        let plan = Plan::from_model_text(text, "https://example.com").unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, ToolKind::XssScan);
    }

    #[test]
    fn test_plan_with_no_usable_steps_is_failure() {
        let text = r#"{"steps": [{"tool": "made_up"}]}"#;
        assert!(Plan::from_model_text(text, "https://example.com").is_err());
        assert!(Plan::from_model_text("not json at all", "https://example.com").is_err());
    }

    #[test]
    fn test_extract_json_object_balanced() {
        assert_eq!(extract_json_object(r#"x {"a": {"b": 1}} y"#), Some(r#"{"a": {"b": 1}}"#));
        assert_eq!(extract_json_object("no braces"), None);
        // Braces inside strings must not affect balance
        assert_eq!(
            extract_json_object(r#"{"a": "}{"}"#),
            Some(r#"{"a": "}{"}"#)
        );
    }
}
