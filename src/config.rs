//! Configuration management

use std::path::PathBuf;

/// Engine configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key (optional - without it the fallback plan is used)
    pub anthropic_api_key: Option<String>,

    /// Model used for planning and result analysis
    pub default_model: String,

    /// Path to the sqlmap entry point
    pub sqlmap_path: PathBuf,

    /// Path to the XSStrike entry point
    pub xsstrike_path: PathBuf,

    /// Path to the tplmap entry point
    pub tplmap_path: PathBuf,

    /// Directory holding fuzzing wordlists
    pub wordlist_dir: PathBuf,

    /// Maximum concurrent executions per principal
    pub max_processes_per_principal: usize,

    /// Hard ceiling on total steps in one run, including injected steps
    pub max_total_steps: usize,

    /// Ceiling on the per-step timeout in seconds; planner-requested
    /// timeouts are clamped to [1, this]
    pub max_step_timeout_secs: u64,

    /// Force degraded (unsandboxed) execution even if isolation is available
    pub force_degraded: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            default_model: "claude-sonnet-4-20250514".to_string(),
            sqlmap_path: PathBuf::from("/usr/bin/sqlmap"),
            xsstrike_path: PathBuf::from("/opt/XSStrike/xsstrike.py"),
            tplmap_path: PathBuf::from("/opt/tplmap/tplmap.py"),
            wordlist_dir: PathBuf::from("/usr/share/wordlists/dirb"),
            max_processes_per_principal: 5,
            max_total_steps: 12,
            max_step_timeout_secs: 300,
            force_degraded: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            default_model: std::env::var("REDPROBE_MODEL").unwrap_or(defaults.default_model),
            sqlmap_path: std::env::var("REDPROBE_SQLMAP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sqlmap_path),
            xsstrike_path: std::env::var("REDPROBE_XSSTRIKE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.xsstrike_path),
            tplmap_path: std::env::var("REDPROBE_TPLMAP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.tplmap_path),
            wordlist_dir: std::env::var("REDPROBE_WORDLIST_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.wordlist_dir),
            max_processes_per_principal: std::env::var("REDPROBE_MAX_PROCESSES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_processes_per_principal),
            max_total_steps: std::env::var("REDPROBE_MAX_STEPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_total_steps),
            max_step_timeout_secs: std::env::var("REDPROBE_MAX_STEP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_step_timeout_secs),
            force_degraded: std::env::var("REDPROBE_FORCE_DEGRADED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_processes_per_principal, 5);
        assert_eq!(config.max_total_steps, 12);
        assert!(!config.force_degraded);
    }
}
