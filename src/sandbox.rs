//! Execution supervisor
//!
//! Runs one probe step to completion inside a constrained environment.
//! Two modes, selected once at process start and fixed for the process
//! lifetime:
//!
//! - **Isolated**: each command runs in a disposable container with a hard
//!   memory ceiling, a fractional CPU ceiling, a read-only root, a small
//!   noexec scratch tmpfs, dropped privileges, and all capabilities
//!   removed. Parameters are staged to a read-only bind-mounted JSON
//!   artifact, never interpolated into a shell string. The container is
//!   torn down unconditionally after the call.
//! - **Degraded**: direct child process in its own process group, used only
//!   when isolation is unavailable. No memory or network isolation; the
//!   record carries `sandboxed=false` so consumers can discount its trust.
//!
//! Both modes enforce a hard wall-clock timeout. On expiry the entire
//! process group (or container) is terminated, never just the leaf.
//! Commands come from a fixed per-tool template table; caller-supplied
//! command text is never passed through.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::plan::ToolKind;

/// Cap on captured stdout per record
const MAX_STDOUT_BYTES: usize = 1024 * 1024;
/// Cap on captured stderr per record
const MAX_STDERR_BYTES: usize = 256 * 1024;
/// Image containing the probe tool set
const SANDBOX_IMAGE: &str = "redprobe-tools:latest";
/// Dedicated egress network; the container never joins the host or
/// loopback namespace
const SANDBOX_NETWORK: &str = "redprobe-egress";

/// Execution mode, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecMode {
    /// Disposable container with resource and network constraints
    Isolated,
    /// Direct child process; reduced guarantees
    Degraded,
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Tool ran to completion (exit status may still be non-zero)
    Completed,
    /// Security validator refused the step; it never executed
    Rejected,
    /// Concurrency governor refused admission; it never executed
    Denied,
    /// Launch error or non-zero exit
    Failed,
    /// Hard wall-clock timeout; process group terminated
    TimedOut,
}

/// Result of one probe step, append-only within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub tool: ToolKind,
    pub outcome: StepOutcome,
    pub success: bool,
    /// Captured stdout, size-capped
    pub stdout: String,
    /// Captured stderr, size-capped
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Whether the isolated mode produced this record
    pub sandboxed: bool,
}

impl ExecutionRecord {
    /// Record for a step the validator refused; nothing was executed.
    pub fn rejected(tool: ToolKind, reason: &str) -> Self {
        Self {
            tool,
            outcome: StepOutcome::Rejected,
            success: false,
            stdout: String::new(),
            stderr: reason.to_string(),
            exit_code: None,
            timed_out: false,
            duration_ms: 0,
            sandboxed: false,
        }
    }

    /// Record for a step refused admission; nothing was executed.
    pub fn denied(tool: ToolKind, reason: &str) -> Self {
        Self {
            tool,
            outcome: StepOutcome::Denied,
            success: false,
            stdout: String::new(),
            stderr: reason.to_string(),
            exit_code: None,
            timed_out: false,
            duration_ms: 0,
            sandboxed: false,
        }
    }
}

/// Seam between the controller and the supervisor, so the loop can be
/// driven by scripted runners in tests
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(
        &self,
        tool: ToolKind,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> ExecutionRecord;

    fn mode(&self) -> ExecMode;
}

#[async_trait::async_trait]
impl StepRunner for ExecutionSupervisor {
    async fn run_step(
        &self,
        tool: ToolKind,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> ExecutionRecord {
        self.run(tool, params, timeout).await
    }

    fn mode(&self) -> ExecMode {
        self.mode
    }
}

/// One templated command; argv only, never a shell string
#[derive(Debug, Clone)]
struct CommandSpec {
    program: String,
    args: Vec<String>,
}

/// Supervises sandboxed probe execution
pub struct ExecutionSupervisor {
    mode: ExecMode,
    config: Config,
}

impl ExecutionSupervisor {
    /// Probe isolation availability once and fix the mode.
    pub async fn detect(config: Config) -> Self {
        if config.force_degraded {
            warn!("degraded execution forced by configuration");
            return Self::with_mode(config, ExecMode::Degraded);
        }

        let probe = Command::new("docker")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let mode = match tokio::time::timeout(Duration::from_secs(5), probe).await {
            Ok(Ok(status)) if status.success() => ExecMode::Isolated,
            _ => {
                warn!("container runtime unavailable, falling back to degraded execution");
                ExecMode::Degraded
            }
        };

        info!(?mode, "execution supervisor initialized");
        Self::with_mode(config, mode)
    }

    /// Construct with an explicit mode (tests, embedding)
    pub fn with_mode(config: Config, mode: ExecMode) -> Self {
        Self { mode, config }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Run one step to completion under the given wall-clock budget.
    ///
    /// Never returns an error: launch failures and timeouts are folded into
    /// the record so the control loop can keep going.
    pub async fn run(
        &self,
        tool: ToolKind,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> ExecutionRecord {
        let start = Instant::now();
        let deadline = start + timeout;
        let specs = self.command_plan(tool, params);

        let sandboxed = self.mode == ExecMode::Isolated;
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = None;
        let mut outcome = StepOutcome::Completed;
        let mut success = true;

        // vulnerability_scan expands to several commands; they share the
        // step's deadline and produce one combined record.
        for spec in specs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                outcome = StepOutcome::TimedOut;
                success = false;
                break;
            }

            let result = match self.mode {
                ExecMode::Isolated => self.run_isolated(&spec, params, remaining).await,
                ExecMode::Degraded => self.run_degraded(&spec, remaining).await,
            };

            match result {
                CommandResult::Finished {
                    stdout: out,
                    stderr: err,
                    exit_code: code,
                } => {
                    append_capped(&mut stdout, &out, MAX_STDOUT_BYTES);
                    append_capped(&mut stderr, &err, MAX_STDERR_BYTES);
                    exit_code = code;
                    if code != Some(0) {
                        success = false;
                        outcome = StepOutcome::Failed;
                    }
                }
                CommandResult::TimedOut => {
                    success = false;
                    outcome = StepOutcome::TimedOut;
                    break;
                }
                CommandResult::LaunchFailed(msg) => {
                    append_capped(&mut stderr, &msg, MAX_STDERR_BYTES);
                    success = false;
                    outcome = StepOutcome::Failed;
                    break;
                }
            }
        }

        let timed_out = outcome == StepOutcome::TimedOut;
        if timed_out {
            warn!(tool = tool.as_str(), timeout_secs = timeout.as_secs(), "step timed out");
        }

        ExecutionRecord {
            tool,
            outcome,
            success,
            stdout,
            stderr,
            exit_code,
            timed_out,
            duration_ms: start.elapsed().as_millis() as u64,
            sandboxed,
        }
    }

    /// Fixed tool-to-command table. Parameters feed only argv positions the
    /// template defines; everything else rides in the staged artifact.
    fn command_plan(&self, tool: ToolKind, params: &Map<String, Value>) -> Vec<CommandSpec> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match tool {
            ToolKind::SqlmapScan => vec![self.sqlmap_spec(&url, params)],
            ToolKind::XssScan => vec![self.xsstrike_spec(&url)],
            ToolKind::SstiScan => vec![self.tplmap_spec(&url)],
            ToolKind::VulnerabilityScan => vec![
                self.sqlmap_spec(&url, params),
                self.xsstrike_spec(&url),
                self.tplmap_spec(&url),
            ],
            ToolKind::FullRecon | ToolKind::Curl => vec![CommandSpec {
                program: "curl".into(),
                args: vec![
                    "-s".into(),
                    "-L".into(),
                    "--max-time".into(),
                    "10".into(),
                    "--max-redirs".into(),
                    "3".into(),
                    url,
                ],
            }],
            ToolKind::Ffuf => {
                let wordlist = self
                    .config
                    .wordlist_dir
                    .join("common.txt")
                    .to_string_lossy()
                    .into_owned();
                vec![CommandSpec {
                    program: "ffuf".into(),
                    args: vec![
                        "-u".into(),
                        format!("{url}/FUZZ"),
                        "-w".into(),
                        wordlist,
                        "-mc".into(),
                        "200,204,301,302,307,401,403".into(),
                        "-t".into(),
                        "10".into(),
                        "-timeout".into(),
                        "10".into(),
                    ],
                }]
            }
        }
    }

    fn sqlmap_spec(&self, url: &str, params: &Map<String, Value>) -> CommandSpec {
        let mut args = vec![
            self.config.sqlmap_path.to_string_lossy().into_owned(),
            "-u".into(),
            url.into(),
            "--batch".into(),
            "--level=3".into(),
            "--risk=2".into(),
            "--timeout=30".into(),
            "--retries=1".into(),
        ];
        if let Some(list) = params.get("parameters").and_then(Value::as_array) {
            let names: Vec<String> = list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            if !names.is_empty() {
                args.push("-p".into());
                args.push(names.join(","));
            }
        }
        CommandSpec {
            program: "python3".into(),
            args,
        }
    }

    fn xsstrike_spec(&self, url: &str) -> CommandSpec {
        CommandSpec {
            program: "python3".into(),
            args: vec![
                self.config.xsstrike_path.to_string_lossy().into_owned(),
                "-u".into(),
                url.into(),
                "--crawl".into(),
            ],
        }
    }

    fn tplmap_spec(&self, url: &str) -> CommandSpec {
        CommandSpec {
            program: "python3".into(),
            args: vec![
                self.config.tplmap_path.to_string_lossy().into_owned(),
                "-u".into(),
                url.into(),
                "--engine".into(),
                "all".into(),
                "--technique".into(),
                "R".into(),
            ],
        }
    }

    /// Container-backed execution with teardown guaranteed by `--rm` plus
    /// an explicit `docker kill` on timeout.
    async fn run_isolated(
        &self,
        spec: &CommandSpec,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> CommandResult {
        // Stage the full parameter map as a read-only artifact. The file is
        // removed when `staged` drops, timeout or not.
        let staged = match stage_input(params) {
            Ok(f) => f,
            Err(e) => return CommandResult::LaunchFailed(format!("input staging failed: {e}")),
        };
        let input_path = staged.path().to_string_lossy().into_owned();
        let container = format!("redprobe-{}", uuid::Uuid::new_v4());

        let mut cmd = Command::new("docker");
        cmd.arg("run")
            .arg("--rm")
            .args(["--name", &container])
            .args(["--network", SANDBOX_NETWORK])
            .args(["--memory", "256m"])
            .args(["--memory-swap", "256m"])
            .args(["--cpus", "0.25"])
            .arg("--read-only")
            .args(["--cap-drop", "ALL"])
            .args(["--security-opt", "no-new-privileges"])
            .args(["--user", "nobody"])
            .args(["--tmpfs", "/tmp:rw,noexec,nosuid,size=50m"])
            .args(["-v", &format!("{input_path}:/tmp/input.json:ro")])
            .arg(SANDBOX_IMAGE)
            .arg(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(container = %container, program = %spec.program, "starting isolated command");

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return CommandResult::LaunchFailed(format!("docker spawn failed: {e}")),
        };

        let result = wait_with_timeout(child, timeout).await;

        if matches!(result, CommandResult::TimedOut) {
            // --rm removes the container once it stops; make it stop.
            let _ = Command::new("docker")
                .args(["kill", &container])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }

        result
    }

    /// Direct child execution in its own process group.
    async fn run_degraded(&self, spec: &CommandSpec, timeout: Duration) -> CommandResult {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        debug!(program = %spec.program, "starting degraded command");

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return CommandResult::LaunchFailed(format!("spawn failed: {e}")),
        };

        wait_with_timeout(child, timeout).await
    }
}

enum CommandResult {
    Finished {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    TimedOut,
    LaunchFailed(String),
}

/// Wait for a child under a deadline, capturing capped output. On timeout
/// the whole process group is killed, not just the leaf.
async fn wait_with_timeout(mut child: Child, timeout: Duration) -> CommandResult {
    let pid = child.id();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let wait = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        // Drain both pipes concurrently. Reading them in sequence can
        // deadlock against a child blocked on the other, full pipe.
        tokio::join!(
            async {
                if let Some(mut out) = stdout_pipe {
                    read_capped(&mut out, &mut stdout_buf, MAX_STDOUT_BYTES).await;
                }
            },
            async {
                if let Some(mut err) = stderr_pipe {
                    read_capped(&mut err, &mut stderr_buf, MAX_STDERR_BYTES).await;
                }
            }
        );

        let status = child.wait().await;
        (stdout_buf, stderr_buf, status)
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok((stdout_buf, stderr_buf, Ok(status))) => CommandResult::Finished {
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code: status.code(),
        },
        Ok((_, _, Err(e))) => CommandResult::LaunchFailed(format!("wait failed: {e}")),
        Err(_) => {
            kill_process_group(pid);
            CommandResult::TimedOut
        }
    }
}

/// SIGKILL the child's process group. The child was spawned with
/// `process_group(0)`, so its pid is the pgid.
fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            warn!(pid, error = %e, "failed to kill process group");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

async fn read_capped<R: AsyncReadExt + Unpin>(reader: &mut R, buf: &mut Vec<u8>, max: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() + n <= max {
                    buf.extend_from_slice(&chunk[..n]);
                } else {
                    buf.extend_from_slice(&chunk[..max.saturating_sub(buf.len())]);
                    // Keep draining so the child is not blocked on a full pipe
                }
            }
            Err(_) => break,
        }
    }
}

fn append_capped(dest: &mut String, src: &str, max: usize) {
    if dest.len() >= max {
        return;
    }
    let room = max - dest.len();
    if src.len() <= room {
        dest.push_str(src);
    } else {
        let mut end = room;
        while !src.is_char_boundary(end) {
            end -= 1;
        }
        dest.push_str(&src[..end]);
    }
}

/// Write the parameter map to a temp JSON file handed to the container
/// read-only. Dropping the handle deletes the file.
fn stage_input(params: &Map<String, Value>) -> std::io::Result<tempfile::NamedTempFile> {
    use std::io::Write;
    let mut file = tempfile::Builder::new()
        .prefix("redprobe-input-")
        .suffix(".json")
        .tempfile()?;
    let body = serde_json::to_vec(&Value::Object(params.clone()))?;
    file.write_all(&body)?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn degraded() -> ExecutionSupervisor {
        ExecutionSupervisor::with_mode(Config::default(), ExecMode::Degraded)
    }

    #[test]
    fn test_command_plan_is_fixed_per_tool() {
        let sup = degraded();
        let mut params = Map::new();
        params.insert("url".into(), json!("https://example.com"));

        let specs = sup.command_plan(ToolKind::SqlmapScan, &params);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].program, "python3");
        assert!(specs[0].args.contains(&"--batch".to_string()));

        // vulnerability_scan expands to all three scanners
        let specs = sup.command_plan(ToolKind::VulnerabilityScan, &params);
        assert_eq!(specs.len(), 3);
    }

    #[test]
    fn test_sqlmap_parameter_list() {
        let sup = degraded();
        let mut params = Map::new();
        params.insert("url".into(), json!("https://example.com/item"));
        params.insert("parameters".into(), json!(["id", "page"]));

        let spec = &sup.command_plan(ToolKind::SqlmapScan, &params)[0];
        let joined = spec.args.join(" ");
        assert!(joined.contains("-p id,page"));
    }

    #[test]
    fn test_append_capped() {
        let mut s = String::from("abc");
        append_capped(&mut s, "defgh", 5);
        assert_eq!(s, "abcde");
        append_capped(&mut s, "xyz", 5);
        assert_eq!(s, "abcde");
    }

    #[test]
    fn test_rejection_records() {
        let r = ExecutionRecord::rejected(ToolKind::XssScan, "target failed validation");
        assert_eq!(r.outcome, StepOutcome::Rejected);
        assert!(!r.success);
        assert!(!r.sandboxed);

        let d = ExecutionRecord::denied(ToolKind::XssScan, "at ceiling");
        assert_eq!(d.outcome, StepOutcome::Denied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_degraded_runs_and_captures_output() {
        let sup = degraded();
        let spec = CommandSpec {
            program: "echo".into(),
            args: vec!["probe-ok".into()],
        };
        match sup.run_degraded(&spec, Duration::from_secs(5)).await {
            CommandResult::Finished {
                stdout, exit_code, ..
            } => {
                assert_eq!(stdout.trim(), "probe-ok");
                assert_eq!(exit_code, Some(0));
            }
            _ => panic!("expected finished"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_flood_does_not_stall_stdout_read() {
        // Well past the ~64 KiB pipe buffer on stderr while stdout stays
        // open; the run must still finish inside the budget with stdout
        // intact.
        let sup = degraded();
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "i=0; while [ $i -lt 4000 ]; do \
                 echo 0123456789012345678901234567890123456789 1>&2; \
                 i=$((i+1)); done; echo done"
                    .into(),
            ],
        };
        let start = Instant::now();
        match sup.run_degraded(&spec, Duration::from_secs(3)).await {
            CommandResult::Finished {
                stdout, exit_code, ..
            } => {
                assert_eq!(stdout.trim(), "done");
                assert_eq!(exit_code, Some(0));
            }
            _ => panic!("stderr-heavy command must finish, not time out"),
        }
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_degraded_timeout_kills_process_group() {
        let sup = degraded();
        let spec = CommandSpec {
            program: "sleep".into(),
            args: vec!["10".into()],
        };
        let start = Instant::now();
        let result = sup.run_degraded(&spec, Duration::from_secs(1)).await;
        assert!(matches!(result, CommandResult::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_folds_launch_failure_into_record() {
        let sup = ExecutionSupervisor::with_mode(
            Config {
                sqlmap_path: "/bin/nonexistent-sqlmap".into(),
                ..Config::default()
            },
            ExecMode::Degraded,
        );
        let mut params = Map::new();
        params.insert("url".into(), json!("https://example.invalid"));

        let record = sup
            .run(ToolKind::SqlmapScan, &params, Duration::from_secs(5))
            .await;
        // python3 exists but the script path does not: launch succeeds,
        // exit is non-zero, outcome is Failed, never a panic.
        assert!(!record.success);
        assert!(!record.timed_out);
        assert!(!record.sandboxed);
    }

    #[test]
    fn test_stage_input_roundtrip() {
        let mut params = Map::new();
        params.insert("url".into(), json!("https://example.com"));
        let staged = stage_input(&params).unwrap();
        let body = std::fs::read_to_string(staged.path()).unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["url"], json!("https://example.com"));
    }
}
