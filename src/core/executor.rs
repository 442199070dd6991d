//! Block execution module.
//!
//! Spawns the already-rendered script as a real OS process, captures its
//! output lines, enforces timeouts and aborts, and collects the output
//! side-channel and the introspection trailer.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::outputs::{read_outputs, OUTPUT_ENV_VAR};
use super::trailer::{parse_trailer, wrap_script, Trailer, TrailerError, TRAILER_ENV_VAR};
use super::{BlockKind, BlockStatus, ExecutionRecord, OutputRegistry};
use crate::error::SessionError;

/// Environment variable naming the per-run file capture directory.
pub const FILES_ENV_VAR: &str = "RUNBOOK_FILES";

/// Environment variable naming the generated-files directory.
pub const GENERATED_FILES_ENV_VAR: &str = "GENERATED_FILES";

/// Environment variable naming the working-tree root.
pub const REPO_FILES_ENV_VAR: &str = "REPO_FILES";

/// How often the wait loop polls the child.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep reading output after the child exits.
///
/// Background processes started by the script can hold the pipes open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Shared flag used to abort a running block from another thread.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a new, un-triggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the running block to be killed.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Check if an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Clear a previous abort so the handle can guard the next run.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }
}

/// A line of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// The line, without its trailing newline
    pub line: String,
    /// Whether this is stderr (true) or stdout (false)
    pub is_stderr: bool,
}

/// A request to run one block.
#[derive(Debug, Clone)]
pub struct BlockRequest {
    /// Block id the record is stored under
    pub block_id: String,
    /// Block kind, for exit-code interpretation
    pub kind: BlockKind,
    /// Fully rendered script
    pub script: String,
    /// Deadline override (defaults to the executor's timeout)
    pub timeout: Option<Duration>,
    /// Variables set for this run only
    pub env_overrides: HashMap<String, String>,
    /// Explicit interpreter, bypassing shebang detection
    pub interpreter: Option<String>,
    /// Abort flag checked while the block runs
    pub abort: Option<AbortHandle>,
}

impl BlockRequest {
    /// Create a request for a rendered script.
    pub fn new(block_id: impl Into<String>, kind: BlockKind, script: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            kind,
            script: script.into(),
            timeout: None,
            env_overrides: HashMap::new(),
            interpreter: None,
            abort: None,
        }
    }

    /// Set the deadline for this run.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a variable for this run only.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    /// Force an interpreter.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Attach an abort handle.
    #[must_use]
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }
}

/// What a run produced, before it is merged into the session.
#[derive(Debug)]
pub struct RunOutcome {
    /// Record for the run (`env_changes` is filled in by the session manager)
    pub record: ExecutionRecord,
    /// Trailer, when the script was wrapped and its run published outputs
    pub trailer: Option<Result<Trailer, TrailerError>>,
    /// Component-level failure (spawn failure or timeout)
    pub error: Option<SessionError>,
}

/// How the wait loop ended.
#[derive(Clone, Copy)]
enum Termination {
    Exited(ExitStatus),
    TimedOut(Duration),
    Aborted,
}

/// Block executor.
#[derive(Debug, Clone)]
pub struct BlockExecutor {
    /// Where records are published
    registry: Arc<OutputRegistry>,
    /// Shell used when the script has no shebang
    shell: String,
    /// Default deadline
    timeout: Duration,
    /// `$GENERATED_FILES`
    generated_files: Option<PathBuf>,
    /// `$REPO_FILES`
    repo_files: Option<PathBuf>,
}

impl BlockExecutor {
    /// Create an executor publishing into `registry`.
    pub fn new(registry: Arc<OutputRegistry>) -> Self {
        Self {
            registry,
            shell: "bash".to_string(),
            timeout: Duration::from_secs(300),
            generated_files: None,
            repo_files: None,
        }
    }

    /// Set the fallback shell.
    #[must_use]
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the default timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the generated-files directory.
    #[must_use]
    pub fn generated_files(mut self, dir: impl Into<PathBuf>) -> Self {
        self.generated_files = Some(dir.into());
        self
    }

    /// Set the working-tree root.
    #[must_use]
    pub fn repo_files(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repo_files = Some(dir.into());
        self
    }

    /// The registry records are published to.
    pub fn registry(&self) -> &Arc<OutputRegistry> {
        &self.registry
    }

    /// Publish a finished record, replacing any earlier one for the block.
    pub fn commit(&self, record: ExecutionRecord) {
        self.registry.put(record.block_id.clone(), record);
    }

    /// Run a block in the given working directory and environment.
    ///
    /// Nonzero exits are normal results. Only temp-file preparation errors are
    /// returned as `Err`; spawn failures and timeouts are reported through
    /// [`RunOutcome::error`] together with a record.
    pub fn run(
        &self,
        working_dir: &Path,
        env: &HashMap<String, String>,
        request: &BlockRequest,
        mut on_line: impl FnMut(&OutputLine),
    ) -> Result<RunOutcome, SessionError> {
        let workspace = tempfile::Builder::new().prefix("runbook-run-").tempdir()?;
        let script_path = workspace.path().join("script");
        let output_path = workspace.path().join("output.txt");
        let trailer_path = workspace.path().join("trailer.bin");
        let files_dir = workspace.path().join("files");
        std::fs::create_dir_all(&files_dir)?;

        let (interpreter, args) = match request.interpreter {
            Some(ref interpreter) => (interpreter.clone(), Vec::new()),
            None => detect_interpreter(&request.script, &self.shell),
        };
        let capture_env = is_shell_interpreter(&interpreter);

        let (program, script) = if capture_env {
            ("bash".to_string(), wrap_script(&request.script))
        } else {
            (interpreter, request.script.clone())
        };
        std::fs::write(&script_path, script)?;

        let mut cmd = ProcessCommand::new(&program);
        cmd.args(&args);
        cmd.arg(&script_path);
        cmd.current_dir(working_dir);

        cmd.env_clear();
        cmd.envs(env);
        if !env.contains_key("PATH") {
            if let Ok(path) = std::env::var("PATH") {
                cmd.env("PATH", path);
            }
        }
        cmd.envs(&request.env_overrides);
        cmd.env("PWD", working_dir);
        cmd.env(OUTPUT_ENV_VAR, &output_path);
        cmd.env(FILES_ENV_VAR, &files_dir);
        cmd.env(TRAILER_ENV_VAR, &trailer_path);
        if let Some(ref dir) = self.generated_files {
            cmd.env(GENERATED_FILES_ENV_VAR, dir);
        }
        if let Some(ref dir) = self.repo_files {
            cmd.env(REPO_FILES_ENV_VAR, dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // Own process group, so a kill reaches the script's children too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        tracing::info!(
            block = %request.block_id,
            kind = %request.kind,
            interpreter = %program,
            cwd = %working_dir.display(),
            "Executing block"
        );

        let started_at = Utc::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(block = %request.block_id, error = %source, "Failed to spawn block");
                let record = ExecutionRecord {
                    block_id: request.block_id.clone(),
                    kind: request.kind,
                    started_at,
                    finished_at: Utc::now(),
                    exit_code: None,
                    status: BlockStatus::Failure,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    outputs: HashMap::new(),
                    env_changes: Vec::new(),
                    captured_files: Vec::new(),
                    error: Some(source.to_string()),
                };
                return Ok(RunOutcome {
                    record,
                    trailer: None,
                    error: Some(SessionError::Spawn { block: request.block_id.clone(), source }),
                });
            }
        };

        let (tx, rx) = mpsc::channel();
        spawn_reader(child.stdout.take(), false, tx.clone());
        spawn_reader(child.stderr.take(), true, tx);

        let timeout = request.timeout.unwrap_or(self.timeout);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut sink = |line: OutputLine| {
            on_line(&line);
            if line.is_stderr {
                stderr.push(line.line);
            } else {
                stdout.push(line.line);
            }
        };

        let termination = wait_for_child(&mut child, &rx, timeout, request.abort.as_ref(), &mut sink)?;
        drain_output(&rx, &mut sink);
        let finished_at = Utc::now();

        let (status, exit_code, error) = match termination {
            Termination::Exited(exit) => {
                let code = exit.code();
                let status = code.map_or(BlockStatus::Failure, |c| {
                    BlockStatus::from_exit_code(request.kind, c)
                });
                let error = code.is_none().then(|| "Process terminated by a signal".to_string());
                (status, code, error)
            }
            Termination::TimedOut(limit) => (
                BlockStatus::Timeout,
                None,
                Some(format!("Timed out after {}s", limit.as_secs())),
            ),
            Termination::Aborted => {
                (BlockStatus::Cancelled, None, Some("Aborted by request".to_string()))
            }
        };

        let mut outputs = HashMap::new();
        let mut captured_files = Vec::new();
        let mut trailer = None;

        if status.publishes_outputs() {
            match read_outputs(&output_path) {
                Ok(parsed) => outputs = parsed,
                Err(e) => tracing::warn!(block = %request.block_id, error = %e, "Failed to read block outputs"),
            }

            if let Some(ref dir) = self.generated_files {
                match capture_files(&files_dir, dir) {
                    Ok(files) => captured_files = files,
                    Err(e) => tracing::warn!(block = %request.block_id, error = %e, "Failed to capture files"),
                }
            }

            if capture_env {
                trailer = Some(read_trailer(&trailer_path));
            }
        }

        tracing::info!(
            block = %request.block_id,
            status = %status,
            exit_code = ?exit_code,
            outputs = outputs.len(),
            "Block finished"
        );

        let record = ExecutionRecord {
            block_id: request.block_id.clone(),
            kind: request.kind,
            started_at,
            finished_at,
            exit_code,
            status,
            stdout,
            stderr,
            outputs,
            env_changes: Vec::new(),
            captured_files,
            error,
        };

        let error = match termination {
            Termination::TimedOut(timeout) => {
                Some(SessionError::Timeout { block: request.block_id.clone(), timeout })
            }
            _ => None,
        };

        Ok(RunOutcome { record, trailer, error })
    }
}

enum ReaderMessage {
    Line(OutputLine),
    Eof,
}

/// Read a pipe line by line on its own thread.
fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    is_stderr: bool,
    tx: Sender<ReaderMessage>,
) {
    thread::spawn(move || {
        if let Some(pipe) = pipe {
            let reader = BufReader::new(pipe);
            for line in reader.split(b'\n').map_while(Result::ok) {
                let mut line = String::from_utf8_lossy(&line).into_owned();
                if line.ends_with('\r') {
                    line.pop();
                }
                if tx.send(ReaderMessage::Line(OutputLine { line, is_stderr })).is_err() {
                    return;
                }
            }
        }
        let _ = tx.send(ReaderMessage::Eof);
    });
}

/// Wait for the child while forwarding output, enforcing deadline and abort.
fn wait_for_child(
    child: &mut Child,
    rx: &Receiver<ReaderMessage>,
    timeout: Duration,
    abort: Option<&AbortHandle>,
    sink: &mut impl FnMut(OutputLine),
) -> Result<Termination, SessionError> {
    let deadline = Instant::now() + timeout;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(ReaderMessage::Line(line)) => sink(line),
            Ok(ReaderMessage::Eof) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }

        if let Some(status) = child.try_wait()? {
            return Ok(Termination::Exited(status));
        }

        if abort.is_some_and(AbortHandle::is_aborted) {
            // The child may have exited since the last poll
            if let Some(status) = child.try_wait()? {
                return Ok(Termination::Exited(status));
            }
            tracing::warn!(pid = child.id(), "Aborting block");
            kill_tree(child);
            return Ok(Termination::Aborted);
        }

        if Instant::now() >= deadline {
            tracing::warn!(pid = child.id(), timeout_secs = timeout.as_secs(), "Block timed out");
            kill_tree(child);
            return Ok(Termination::TimedOut(timeout));
        }
    }
}

/// Collect the remaining output after the child is gone.
fn drain_output(rx: &Receiver<ReaderMessage>, sink: &mut impl FnMut(OutputLine)) {
    let mut open_streams = 2;
    while open_streams > 0 {
        match rx.recv_timeout(DRAIN_GRACE) {
            Ok(ReaderMessage::Line(line)) => sink(line),
            Ok(ReaderMessage::Eof) => open_streams -= 1,
            Err(_) => break,
        }
    }
}

/// Kill the child's whole process group, then reap the child.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = format!("-{}", child.id());
        let _ = ProcessCommand::new("kill")
            .args(["-KILL", "--", &pgid])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn read_trailer(path: &Path) -> Result<Trailer, TrailerError> {
    match std::fs::read(path) {
        Ok(data) => parse_trailer(&data),
        Err(_) => Err(TrailerError::Empty),
    }
}

/// Copy files a block left in `$RUNBOOK_FILES` into the generated-files directory.
///
/// Returns the copied paths relative to `dest`, with forward slashes.
pub fn capture_files(src: &Path, dest: &Path) -> std::io::Result<Vec<String>> {
    let mut captured = Vec::new();

    for entry in walkdir::WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            captured.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }

    Ok(captured)
}

/// Detect the interpreter from a shebang line, falling back to `default_shell`.
pub fn detect_interpreter(script: &str, default_shell: &str) -> (String, Vec<String>) {
    let Some(shebang) = script.lines().next().and_then(|l| l.strip_prefix("#!")) else {
        return (default_shell.to_string(), Vec::new());
    };

    let mut parts = shebang.split_whitespace();
    let Some(first) = parts.next() else {
        return (default_shell.to_string(), Vec::new());
    };

    // #!/usr/bin/env python3 -u
    if first.ends_with("/env") || first == "env" {
        let rest: Vec<&str> = parts.filter(|p| *p != "-S").collect();
        return match rest.split_first() {
            Some((interpreter, args)) => {
                ((*interpreter).to_string(), args.iter().map(|a| (*a).to_string()).collect())
            }
            None => (default_shell.to_string(), Vec::new()),
        };
    }

    // #!/bin/bash -e
    let interpreter = first.rsplit('/').next().unwrap_or(first);
    (interpreter.to_string(), parts.map(str::to_string).collect())
}

/// Check if an interpreter understands the bash trailer wrapper.
pub fn is_shell_interpreter(interpreter: &str) -> bool {
    matches!(
        interpreter,
        "bash" | "sh" | "/bin/bash" | "/bin/sh" | "/usr/bin/bash" | "/usr/bin/sh"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> BlockExecutor {
        BlockExecutor::new(Arc::new(OutputRegistry::new())).timeout(Duration::from_secs(30))
    }

    fn host_env() -> HashMap<String, String> {
        std::env::vars().collect()
    }

    fn run(script: &str, kind: BlockKind) -> RunOutcome {
        let dir = tempfile::tempdir().unwrap();
        executor()
            .run(dir.path(), &host_env(), &BlockRequest::new("test", kind, script), |_| {})
            .unwrap()
    }

    #[test]
    fn test_request_builder() {
        let abort = AbortHandle::new();
        let request = BlockRequest::new("b", BlockKind::Check, "true")
            .with_timeout(Duration::from_secs(5))
            .with_env("A", "1")
            .with_abort(abort.clone());

        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
        assert_eq!(request.env_overrides["A"], "1");
        assert!(!request.abort.as_ref().unwrap().is_aborted());
        abort.abort();
        assert!(request.abort.as_ref().unwrap().is_aborted());
    }

    #[test]
    fn test_detect_interpreter() {
        assert_eq!(detect_interpreter("echo hi", "bash"), ("bash".to_string(), vec![]));
        assert_eq!(
            detect_interpreter("#!/usr/bin/env python3 -u\nprint(1)", "bash"),
            ("python3".to_string(), vec!["-u".to_string()])
        );
        assert_eq!(
            detect_interpreter("#!/bin/sh -e\necho", "bash"),
            ("sh".to_string(), vec!["-e".to_string()])
        );
        assert!(is_shell_interpreter("bash"));
        assert!(!is_shell_interpreter("python3"));
    }

    #[test]
    fn test_captures_stdout_and_stderr() {
        let outcome = run("echo out1\necho err1 >&2\necho out2", BlockKind::Command);
        assert_eq!(outcome.record.status, BlockStatus::Success);
        assert_eq!(outcome.record.stdout, vec!["out1", "out2"]);
        assert_eq!(outcome.record.stderr, vec!["err1"]);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_check_warning_exit() {
        let outcome = run("exit 2", BlockKind::Check);
        assert_eq!(outcome.record.status, BlockStatus::Warning);
        assert_eq!(outcome.record.exit_code, Some(2));

        let outcome = run("exit 2", BlockKind::Command);
        assert_eq!(outcome.record.status, BlockStatus::Failure);
    }

    #[test]
    fn test_outputs_are_parsed() {
        let outcome = run(
            "echo \"project_id=p-42\" >> \"$RUNBOOK_OUTPUT\"\necho 'junk line' >> \"$RUNBOOK_OUTPUT\"",
            BlockKind::Command,
        );
        assert_eq!(outcome.record.output("project_id"), Some("p-42"));
        assert_eq!(outcome.record.outputs.len(), 1);
    }

    #[test]
    fn test_failed_run_publishes_nothing() {
        let outcome = run("echo \"x=1\" >> \"$RUNBOOK_OUTPUT\"\nexit 1", BlockKind::Command);
        assert_eq!(outcome.record.status, BlockStatus::Failure);
        assert!(outcome.record.outputs.is_empty());
        assert!(outcome.trailer.is_none());
    }

    #[test]
    fn test_trailer_is_collected() {
        let outcome = run("export NEW_VAR=hello\ncd /", BlockKind::Command);
        let trailer = outcome.trailer.unwrap().unwrap();
        assert_eq!(trailer.env["NEW_VAR"], "hello");
        assert_eq!(trailer.working_dir, PathBuf::from("/"));
    }

    #[test]
    fn test_user_exit_trap_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("cleaned");
        let script = format!(
            "trap 'touch {}' EXIT\nexport AFTER_TRAP=1\nexit 0",
            marker.display()
        );
        let outcome = executor()
            .run(dir.path(), &host_env(), &BlockRequest::new("t", BlockKind::Command, script), |_| {})
            .unwrap();

        assert!(marker.exists());
        let trailer = outcome.trailer.unwrap().unwrap();
        assert_eq!(trailer.env["AFTER_TRAP"], "1");
    }

    #[test]
    fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let request = BlockRequest::new("slow", BlockKind::Command, "sleep 30")
            .with_timeout(Duration::from_millis(200));

        let start = Instant::now();
        let outcome = executor().run(dir.path(), &host_env(), &request, |_| {}).unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.record.status, BlockStatus::Timeout);
        assert!(matches!(outcome.error, Some(SessionError::Timeout { .. })));
    }

    #[test]
    fn test_abort_cancels_process() {
        let dir = tempfile::tempdir().unwrap();
        let abort = AbortHandle::new();
        let request =
            BlockRequest::new("long", BlockKind::Command, "sleep 30").with_abort(abort.clone());

        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            abort.abort();
        });

        let outcome = executor().run(dir.path(), &host_env(), &request, |_| {}).unwrap();
        trigger.join().unwrap();

        assert_eq!(outcome.record.status, BlockStatus::Cancelled);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_reset_abort_handle_allows_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let abort = AbortHandle::new();
        abort.abort();

        let request =
            BlockRequest::new("cancelled", BlockKind::Command, "sleep 30").with_abort(abort.clone());
        let outcome = executor().run(dir.path(), &host_env(), &request, |_| {}).unwrap();
        assert_eq!(outcome.record.status, BlockStatus::Cancelled);

        abort.reset();
        assert!(!abort.is_aborted());
        let request = BlockRequest::new("next", BlockKind::Command, "echo \"x=1\" >> \"$RUNBOOK_OUTPUT\"")
            .with_abort(abort);
        let outcome = executor().run(dir.path(), &host_env(), &request, |_| {}).unwrap();
        assert_eq!(outcome.record.status, BlockStatus::Success);
        assert_eq!(outcome.record.output("x"), Some("1"));
    }

    #[test]
    fn test_streaming_callback() {
        let dir = tempfile::tempdir().unwrap();
        let mut seen = Vec::new();
        executor()
            .run(
                dir.path(),
                &host_env(),
                &BlockRequest::new("s", BlockKind::Command, "echo a\necho b"),
                |line| seen.push(line.line.clone()),
            )
            .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let request = BlockRequest::new("missing", BlockKind::Command, "print(1)")
            .with_interpreter("definitely-not-an-interpreter-xyz");
        let outcome = executor().run(dir.path(), &host_env(), &request, |_| {}).unwrap();

        assert_eq!(outcome.record.status, BlockStatus::Failure);
        assert!(matches!(outcome.error, Some(SessionError::Spawn { .. })));
    }

    #[test]
    fn test_file_capture() {
        let dir = tempfile::tempdir().unwrap();
        let generated = dir.path().join("generated");
        let executor = executor().generated_files(&generated);
        let request = BlockRequest::new(
            "gen",
            BlockKind::Command,
            "mkdir -p \"$RUNBOOK_FILES/sub\"\necho data > \"$RUNBOOK_FILES/sub/main.tf\"",
        );

        let outcome = executor.run(dir.path(), &host_env(), &request, |_| {}).unwrap();
        assert_eq!(outcome.record.captured_files, vec!["sub/main.tf"]);
        assert!(generated.join("sub/main.tf").exists());
    }
}
