//! Security validation gate
//!
//! Static checks applied before any execution request reaches admission:
//! - Target URLs must be absolute http/https and must not point at
//!   loopback, private, or link-local addresses or internal hostnames
//! - Commands and payloads are matched against denylists of destructive
//!   shell primitives, code-execution idioms, and injection signatures
//! - Parameter values are stripped of control and quote characters
//!
//! This is a blunt defense-in-depth layer, not a sandbox replacement: the
//! execution supervisor provides the actual isolation. All checks fail
//! closed - anything that does not parse is rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::net::IpAddr;
use url::Url;

/// Command substrings that are never allowed (case-insensitive)
const BLOCKED_COMMANDS: &[&str] = &[
    // Destructive shell primitives
    "rm -rf", "shutdown", "reboot", "format", "del /f", "rmdir /s",
    // Shell and interpreter escapes
    "powershell", "cmd.exe", "bash", "/bin/sh", "nc -e", "netcat",
    // Exfiltration / download-and-run
    "curl -x post", "wget -o",
    // Code execution idioms
    "python -c", "eval", "exec", "import os", "subprocess", "__import__", "open(",
];

/// Hostname substrings that mark administrative/internal targets
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost", "127.0.0.1", "0.0.0.0", "::1", "internal", "private", "admin", "root",
];

/// Payload patterns that are never allowed (case-insensitive)
static BLOCKED_PAYLOAD_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"<script[^>]*>.*?</script>",
        r"javascript:",
        r"data:text/html",
        r"vbscript:",
        r"file://",
        r"\\\\",
        r"\.\./|\.\.\\",
        r"union\s+select",
        r"drop\s+table",
        r"delete\s+from",
        r"insert\s+into",
        r"update\s+.*\s+set",
        r"exec\(",
        r"system\(",
        r"passthru\(",
        r"shell_exec\(",
        r"eval\(",
        r"base64_decode\(",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern"))
    .collect()
});

static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1f\x7f-\x9f]").expect("static pattern"));

/// Maximum length of a sanitized string parameter
const MAX_PARAM_LEN: usize = 1000;

/// Validate a scan target URL.
///
/// Requires an absolute http/https URL whose host is neither a blocked
/// hostname nor a literal IP in a loopback, private, or link-local range.
/// Any parse failure rejects.
pub fn validate_target(target: &str) -> bool {
    let parsed = match Url::parse(target) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let host = match parsed.host_str() {
        Some(h) => h,
        None => return false,
    };

    if is_blocked_hostname(host) {
        return false;
    }

    // Literal-IP hosts get range checks; names that do not parse as IPs
    // only pass the hostname denylist above.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_restricted_ip(&ip) {
            return false;
        }
    }

    true
}

/// Validate a command string against the destructive-primitive denylist.
pub fn validate_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    !BLOCKED_COMMANDS.iter().any(|b| lower.contains(b))
}

/// Validate a payload against injection/XSS/code-execution signatures.
pub fn validate_payload(payload: &str) -> bool {
    !BLOCKED_PAYLOAD_PATTERNS.iter().any(|p| p.is_match(payload))
}

/// Sanitize a parameter map: strip control and quote/angle-bracket
/// characters from string values and truncate them, recursing into arrays.
/// Non-string values pass through unchanged. Idempotent.
pub fn sanitize_parameters(params: &Map<String, Value>) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), sanitize_value(v)))
        .collect()
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

fn sanitize_string(value: &str) -> String {
    let stripped: String = value.chars().filter(|c| !matches!(c, '<' | '>' | '"' | '\'')).collect();
    let stripped = CONTROL_CHARS.replace_all(&stripped, "");
    stripped.chars().take(MAX_PARAM_LEN).collect()
}

fn is_blocked_hostname(host: &str) -> bool {
    let lower = host.to_lowercase();
    BLOCKED_HOSTNAMES.iter().any(|b| lower.contains(b))
}

fn is_restricted_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            // ::1, fc00::/7 unique-local, fe80::/10 link-local
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_target_accepts_public_urls() {
        assert!(validate_target("https://example.com/app"));
        assert!(validate_target("http://testsite.io:8080/login"));
    }

    #[test]
    fn test_validate_target_rejects_malformed() {
        assert!(!validate_target("not a url"));
        assert!(!validate_target("example.com")); // no scheme
        assert!(!validate_target("ftp://example.com"));
        assert!(!validate_target("file:///etc/passwd"));
    }

    #[test]
    fn test_validate_target_rejects_restricted_ranges() {
        for target in [
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://172.16.0.1/",
            "http://172.31.255.254/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[fc00::1]/",
            "http://[fe80::1]/",
        ] {
            assert!(!validate_target(target), "{target} should be rejected");
        }
        // Just outside 172.16/12
        assert!(validate_target("http://172.32.0.1/"));
    }

    #[test]
    fn test_validate_target_rejects_internal_hostnames() {
        assert!(!validate_target("https://localhost/"));
        assert!(!validate_target("https://admin.corp.example/"));
        assert!(!validate_target("https://internal-api.example.com/"));
    }

    #[test]
    fn test_validate_command() {
        assert!(validate_command("sqlmap -u https://example.com --batch"));
        assert!(!validate_command("sqlmap; rm -rf /"));
        assert!(!validate_command("python -c 'import os'"));
        assert!(!validate_command("RM -RF /tmp")); // case-insensitive
    }

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload("id=1"));
        assert!(!validate_payload("<script>alert(1)</script>"));
        assert!(!validate_payload("1 UNION SELECT password FROM users"));
        assert!(!validate_payload("../../etc/passwd"));
        assert!(!validate_payload("x'; DROP TABLE users; --"));
    }

    #[test]
    fn test_sanitize_parameters() {
        let mut params = Map::new();
        params.insert("q".into(), json!("<img src=x onerror='alert(1)'>"));
        params.insert("depth".into(), json!(3));
        params.insert("tags".into(), json!(["a\"b", "plain"]));

        let clean = sanitize_parameters(&params);
        assert_eq!(clean["q"], json!("img src=x onerror=alert(1)"));
        assert_eq!(clean["depth"], json!(3));
        assert_eq!(clean["tags"], json!(["ab", "plain"]));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let mut params = Map::new();
        params.insert("v".into(), json!("a<b>'c\"\u{0007}d"));
        params.insert("long".into(), json!("x".repeat(5000)));

        let once = sanitize_parameters(&params);
        let twice = sanitize_parameters(&once);
        assert_eq!(once, twice);
        assert_eq!(once["long"].as_str().unwrap().len(), 1000);
    }
}
