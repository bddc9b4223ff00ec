//! Planning and analysis collaborator
//!
//! The control loop only depends on two contracts: a planner that returns
//! text expected to parse as the plan schema, and an analyst that returns
//! text expected to parse as the decision schema. This module holds those
//! traits plus the production implementation over the Anthropic messages
//! API and the prompt templates.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::decision::AnalystBackend;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOKENS: usize = 4000;

/// Planning collaborator contract: target in, plan-schema text out
#[async_trait]
pub trait PlannerBackend: Send + Sync {
    async fn plan(&self, target: &str) -> Result<String>;
}

/// Anthropic-backed planner/analyst
#[derive(Clone)]
pub struct ClaudeBackend {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

impl ClaudeBackend {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Build from config; `None` when no API key is set, in which case the
    /// controller uses the fallback plan and safe default decisions.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .anthropic_api_key
            .as_deref()
            .map(|key| Self::new(key, &config.default_model))
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: system.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error {status}: {body}");
        }

        let parsed: MessageResponse = response.json().await.context("malformed response")?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|b| b.text)
            .context("empty response")?;

        debug!(model = %self.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

#[async_trait]
impl PlannerBackend for ClaudeBackend {
    async fn plan(&self, target: &str) -> Result<String> {
        self.complete(PLANNER_SYSTEM_PROMPT, &plan_prompt(target)).await
    }
}

#[async_trait]
impl AnalystBackend for ClaudeBackend {
    async fn analyze_step(&self, result_summary: &str, target: &str) -> Result<String> {
        self.complete(ANALYST_SYSTEM_PROMPT, &analysis_prompt(result_summary, target))
            .await
    }

    async fn final_assessment(&self, report_summary: &str) -> Result<String> {
        self.complete(REPORT_SYSTEM_PROMPT, &assessment_prompt(report_summary))
            .await
    }
}

pub const PLANNER_SYSTEM_PROMPT: &str = "\
You are an expert cybersecurity AI specializing in web application penetration testing.

Your role is to analyze targets and create intelligent testing strategies.

Available tools:
- full_recon: Complete reconnaissance including source analysis
- vulnerability_scan: Run SQLMap, XSStrike, and TPLMap
- sqlmap_scan: Focused SQL injection testing
- xss_scan: Cross-site scripting testing
- ssti_scan: Server-side template injection testing
- ffuf: Directory enumeration
- curl: Single HTTP fetch

Response format (JSON):
{
  \"analysis\": \"Initial target assessment\",
  \"strategy\": \"Overall testing approach\",
  \"steps\": [
    {
      \"tool\": \"tool_name\",
      \"reasoning\": \"Why this tool at this step\",
      \"priority\": \"high/medium/low\",
      \"params\": {\"key\": \"value\"}
    }
  ],
  \"risk_areas\": [\"area1\", \"area2\"],
  \"expected_findings\": [\"vuln1\", \"vuln2\"]
}

Consider:
- Target technology stack
- Common vulnerability patterns
- Efficient testing sequence
- Risk-based prioritization";

pub const ANALYST_SYSTEM_PROMPT: &str = "\
You are a cybersecurity expert analyzing penetration test results.

Your tasks:
1. Interpret scan results
2. Assess vulnerability severity
3. Recommend next actions
4. Prioritize findings

Response format (JSON):
{
  \"summary\": \"Brief result summary\",
  \"vulnerabilities\": [
    {
      \"kind\": \"vuln_type\",
      \"severity\": \"critical/high/medium/low\",
      \"confidence\": \"high/medium/low\",
      \"recommendation\": \"How to fix\"
    }
  ],
  \"next_actions\": [
    {
      \"tool\": \"tool_to_use\",
      \"reasoning\": \"Why this action\"
    }
  ],
  \"stop_scanning\": true/false,
  \"reasoning\": \"Why to continue or stop\"
}";

pub const REPORT_SYSTEM_PROMPT: &str = "\
You are a cybersecurity consultant creating executive penetration test reports.

Create a comprehensive report including:
- Executive Summary
- Technical Findings
- Risk Assessment
- Recommendations
- Remediation Timeline

Use professional security terminology and provide actionable insights.";

pub fn plan_prompt(target: &str) -> String {
    format!(
        "Analyze this target for penetration testing: {target}\n\n\
         Consider:\n\
         - URL structure and technology indicators\n\
         - Likely frameworks and languages\n\
         - Common attack vectors for this type of application\n\
         - Optimal testing sequence\n\n\
         Create a comprehensive testing plan."
    )
}

pub fn analysis_prompt(results: &str, target: &str) -> String {
    format!(
        "Analyze these penetration test results for {target}:\n\n\
         Results: {results}\n\n\
         Provide:\n\
         - Vulnerability assessment\n\
         - Risk prioritization\n\
         - Next testing steps\n\
         - Whether to continue or conclude testing"
    )
}

pub fn assessment_prompt(report_summary: &str) -> String {
    format!(
        "Generate a comprehensive security assessment based on these \
         penetration test results:\n\n\
         Execution Results: {report_summary}\n\n\
         Provide:\n\
         1. Executive summary\n\
         2. Critical vulnerabilities found\n\
         3. Risk score (1-10)\n\
         4. Immediate actions required\n\
         5. Long-term security recommendations"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_key() {
        let config = Config::default();
        assert!(ClaudeBackend::from_config(&config).is_none());

        let config = Config {
            anthropic_api_key: Some("sk-test".into()),
            ..Config::default()
        };
        assert!(ClaudeBackend::from_config(&config).is_some());
    }

    #[test]
    fn test_prompts_name_the_tool_table() {
        assert!(PLANNER_SYSTEM_PROMPT.contains("sqlmap_scan"));
        assert!(PLANNER_SYSTEM_PROMPT.contains("full_recon"));
        assert!(plan_prompt("https://example.com").contains("https://example.com"));
    }
}
