//! Persistent execution session.
//!
//! A runbook's blocks share one session: the working directory and exported
//! environment left behind by a block are what the next block starts with.
//! Each block still runs as its own OS process; state is carried forward
//! through the introspection trailer.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use uuid::Uuid;

use super::executor::{BlockExecutor, BlockRequest, OutputLine};
use super::trailer::{diff_env, filter_env, EnvDiff, Trailer};
use super::{Config, ExecutionRecord, OutputRegistry};
use crate::error::{SessionError, SessionResult};

/// Working directory and environment shared across block runs.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    working_dir: PathBuf,
    env: HashMap<String, String>,
    initial_working_dir: PathBuf,
    initial_env: HashMap<String, String>,
    execution_count: u64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    degraded: Option<String>,
}

/// Public view of a session, without environment values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMetadata {
    pub id: String,
    pub working_dir: PathBuf,
    pub execution_count: u64,
    pub env_var_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl Session {
    /// Open a session rooted at a runbook directory, inheriting the host environment.
    pub fn open(dir: impl AsRef<Path>) -> SessionResult<Self> {
        let env = filter_env(utf8_env(std::env::vars_os()));
        Self::with_env(dir, env)
    }

    /// Open a session with an explicit starting environment.
    pub fn with_env(dir: impl AsRef<Path>, env: HashMap<String, String>) -> SessionResult<Self> {
        let dir = dir.as_ref();
        let unreadable =
            |source| SessionError::UnreadableDirectory { path: dir.to_path_buf(), source };

        let working_dir = dir.canonicalize().map_err(unreadable)?;
        std::fs::read_dir(&working_dir).map_err(unreadable)?;

        let now = Utc::now();
        let session = Self {
            id: Uuid::new_v4(),
            initial_working_dir: working_dir.clone(),
            initial_env: env.clone(),
            working_dir,
            env,
            execution_count: 0,
            created_at: now,
            last_activity: now,
            degraded: None,
        };

        tracing::debug!(session = %session.id, cwd = %session.working_dir.display(), "Opened session");
        Ok(session)
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Current environment.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Value of a single variable.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    /// Number of block runs so far.
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Reason the session was degraded, if it was.
    pub fn degraded(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    /// Check if the session state can no longer be trusted.
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// Public-safe view of the session.
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            id: self.id.to_string(),
            working_dir: self.working_dir.clone(),
            execution_count: self.execution_count,
            env_var_count: self.env.len(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            degraded: self.degraded.clone(),
        }
    }

    /// Restore the initial working directory and environment.
    pub fn reset(&mut self) {
        self.working_dir = self.initial_working_dir.clone();
        self.env = self.initial_env.clone();
        self.execution_count = 0;
        self.degraded = None;
        self.last_activity = Utc::now();
        tracing::info!(session = %self.id, "Session reset");
    }

    fn record_execution(&mut self) {
        self.execution_count += 1;
        self.last_activity = Utc::now();
    }

    fn mark_degraded(&mut self, reason: String) {
        tracing::error!(session = %self.id, reason = %reason, "Session degraded");
        self.degraded = Some(reason);
    }

    /// Merge a trailer into the session.
    ///
    /// Per-run overrides the script left untouched are not persisted: the
    /// variable goes back to its prior session value (or away).
    fn apply_trailer(&mut self, trailer: Trailer, overrides: &HashMap<String, String>) -> EnvDiff {
        let mut after = trailer.env;
        for (key, value) in overrides {
            if after.get(key) == Some(value) {
                match self.env.get(key) {
                    Some(prior) => after.insert(key.clone(), prior.clone()),
                    None => after.remove(key),
                };
            }
        }

        let diff = diff_env(&self.env, &after);
        for key in diff.added.iter().chain(&diff.changed) {
            if let Some(value) = after.remove(key) {
                self.env.insert(key.clone(), value);
            }
        }
        for key in &diff.removed {
            self.env.remove(key);
        }

        if trailer.working_dir.as_os_str().is_empty() {
            tracing::warn!(session = %self.id, "Trailer has no working directory");
        } else if trailer.working_dir != self.working_dir {
            tracing::debug!(
                session = %self.id,
                from = %self.working_dir.display(),
                to = %trailer.working_dir.display(),
                "Working directory changed"
            );
            self.working_dir = trailer.working_dir;
        }

        if !diff.is_empty() {
            tracing::debug!(
                session = %self.id,
                added = diff.added.len(),
                changed = diff.changed.len(),
                removed = diff.removed.len(),
                "Environment changed"
            );
        }

        diff
    }
}

/// Keep the variables whose name and value are valid UTF-8.
fn utf8_env(vars: impl IntoIterator<Item = (OsString, OsString)>) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let name = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
                tracing::warn!(var = %name, "Skipping environment variable that is not valid UTF-8");
                None
            }
        })
        .collect()
}

/// Runs blocks one at a time against a shared [`Session`].
#[derive(Debug)]
pub struct SessionManager {
    /// Held for a whole execution so runs never overlap
    exec_lock: Mutex<()>,
    /// Session state, readable while a block runs
    session: RwLock<Session>,
    executor: BlockExecutor,
}

impl SessionManager {
    /// Create a manager from an opened session and an executor.
    pub fn new(session: Session, executor: BlockExecutor) -> Self {
        Self { exec_lock: Mutex::new(()), session: RwLock::new(session), executor }
    }

    /// Open a session for a runbook directory using the given configuration.
    pub fn open(dir: &Path, config: &Config, registry: Arc<OutputRegistry>) -> SessionResult<Self> {
        let session = Session::open(dir)?;
        let root = session.working_dir().to_path_buf();

        let mut executor = BlockExecutor::new(registry)
            .shell(config.session.shell.clone())
            .timeout(config.timeout())
            .generated_files(config.paths.generated_files_dir(&root));
        if let Some(repo) = config.paths.repo_files_dir(&root) {
            executor = executor.repo_files(repo);
        }

        Ok(Self::new(session, executor))
    }

    /// The registry records are published to.
    pub fn registry(&self) -> &Arc<OutputRegistry> {
        self.executor.registry()
    }

    /// Run a block and merge its effects into the session.
    pub fn execute(&self, request: &BlockRequest) -> SessionResult<ExecutionRecord> {
        self.execute_streaming(request, |_| {})
    }

    /// Like [`execute`](Self::execute), forwarding each output line as it arrives.
    pub fn execute_streaming(
        &self,
        request: &BlockRequest,
        on_line: impl FnMut(&OutputLine),
    ) -> SessionResult<ExecutionRecord> {
        let _running = self.exec_lock.lock();

        let (working_dir, env) = {
            let session = self.session.read();
            if let Some(reason) = session.degraded() {
                return Err(SessionError::Degraded(reason.to_string()));
            }
            (session.working_dir.clone(), session.env.clone())
        };

        let mut outcome = self.executor.run(&working_dir, &env, request, on_line)?;

        let mut introspection_error = None;
        {
            let mut session = self.session.write();
            session.record_execution();

            match outcome.trailer.take() {
                Some(Ok(trailer)) => {
                    let diff = session.apply_trailer(trailer, &request.env_overrides);
                    outcome.record.env_changes = diff.names();
                }
                Some(Err(e)) => {
                    let reason = format!("block '{}': {e}", request.block_id);
                    session.mark_degraded(reason);
                    outcome.record.error = Some(format!("Session state capture failed: {e}"));
                    introspection_error = Some(SessionError::Introspection {
                        block: request.block_id.clone(),
                        reason: e.to_string(),
                    });
                }
                None => {}
            }
        }

        let record = outcome.record.clone();
        self.executor.commit(outcome.record);

        match outcome.error.or(introspection_error) {
            Some(err) => Err(err),
            None => Ok(record),
        }
    }

    /// Restore the session's initial state and clear the degraded flag.
    pub fn reset(&self) {
        let _running = self.exec_lock.lock();
        self.session.write().reset();
    }

    /// Public-safe view of the session.
    pub fn metadata(&self) -> SessionMetadata {
        self.session.read().metadata()
    }

    /// Current working directory.
    pub fn working_dir(&self) -> PathBuf {
        self.session.read().working_dir.clone()
    }

    /// Value of a session variable.
    pub fn env_var(&self, name: &str) -> Option<String> {
        self.session.read().env.get(name).cloned()
    }

    /// Check if the session is degraded.
    pub fn is_degraded(&self) -> bool {
        self.session.read().is_degraded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockKind, BlockStatus};

    fn manager(dir: &Path) -> SessionManager {
        let session = Session::open(dir).unwrap();
        let executor = BlockExecutor::new(Arc::new(OutputRegistry::new()));
        SessionManager::new(session, executor)
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_variables_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let vars = vec![
            (OsString::from("GOOD"), OsString::from("fine")),
            (OsString::from("BAD_VALUE"), OsStr::from_bytes(b"\xff\xfe").to_os_string()),
            (OsStr::from_bytes(b"BAD_\xffNAME").to_os_string(), OsString::from("x")),
        ];

        let env = utf8_env(vars);
        assert_eq!(env.len(), 1);
        assert_eq!(env["GOOD"], "fine");
    }

    fn trailer(dir: &str, env: &[(&str, &str)]) -> Trailer {
        Trailer {
            working_dir: PathBuf::from(dir),
            env: env.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        }
    }

    #[test]
    fn test_open_unreadable_directory() {
        let err = Session::open("/definitely/not/a/dir").unwrap_err();
        assert!(matches!(err, SessionError::UnreadableDirectory { .. }));
    }

    #[test]
    fn test_apply_trailer_merges_all_changes() {
        let dir = tempfile::tempdir().unwrap();
        let env = [("KEEP", "1"), ("CHANGE", "old"), ("DROP", "x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut session = Session::with_env(dir.path(), env).unwrap();

        let diff = session.apply_trailer(
            trailer("/", &[("KEEP", "1"), ("CHANGE", "new"), ("ADD", "a\nb")]),
            &HashMap::new(),
        );

        assert_eq!(diff.names(), vec!["ADD", "CHANGE", "DROP"]);
        assert_eq!(session.env_var("CHANGE"), Some("new"));
        assert_eq!(session.env_var("ADD"), Some("a\nb"));
        assert_eq!(session.env_var("DROP"), None);
        assert_eq!(session.working_dir(), Path::new("/"));
    }

    #[test]
    fn test_untouched_overrides_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let env = [("MODE".to_string(), "prod".to_string())].into_iter().collect();
        let mut session = Session::with_env(dir.path(), env).unwrap();

        let overrides: HashMap<String, String> = [("MODE", "dry-run"), ("TEMP", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let diff = session
            .apply_trailer(trailer("/", &[("MODE", "dry-run"), ("TEMP", "1")]), &overrides);

        assert!(diff.is_empty());
        assert_eq!(session.env_var("MODE"), Some("prod"));
        assert_eq!(session.env_var("TEMP"), None);
    }

    #[test]
    fn test_env_persists_between_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let first = manager
            .execute(&BlockRequest::new("a", BlockKind::Command, "export FOO=bar"))
            .unwrap();
        assert_eq!(first.env_changes, vec!["FOO"]);

        let second = manager
            .execute(&BlockRequest::new("b", BlockKind::Command, "echo \"$FOO\""))
            .unwrap();
        assert_eq!(second.stdout, vec!["bar"]);
        assert_eq!(manager.metadata().execution_count, 2);
    }

    #[test]
    fn test_working_dir_persists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let manager = manager(dir.path());

        manager.execute(&BlockRequest::new("cd", BlockKind::Command, "cd sub")).unwrap();
        let record = manager.execute(&BlockRequest::new("pwd", BlockKind::Command, "pwd")).unwrap();

        let expected = dir.path().canonicalize().unwrap().join("sub");
        assert_eq!(manager.working_dir(), expected);
        assert_eq!(record.stdout, vec![expected.display().to_string()]);
    }

    #[test]
    fn test_failed_block_does_not_change_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let record = manager
            .execute(&BlockRequest::new("bad", BlockKind::Command, "export LEAK=1\nexit 3"))
            .unwrap();
        assert_eq!(record.status, BlockStatus::Failure);
        assert_eq!(record.exit_code, Some(3));
        assert!(manager.env_var("LEAK").is_none());
        assert!(manager.registry().contains("bad"));
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let initial = manager.working_dir();

        manager
            .execute(&BlockRequest::new("a", BlockKind::Command, "export X=1\ncd /"))
            .unwrap();
        assert_eq!(manager.env_var("X").as_deref(), Some("1"));

        manager.reset();
        assert!(manager.env_var("X").is_none());
        assert_eq!(manager.working_dir(), initial);
        assert_eq!(manager.metadata().execution_count, 0);
    }

    #[test]
    fn test_degraded_session_rejects_execution() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        // A script that replaces the trailer writer leaves garbage behind
        let err = manager
            .execute(&BlockRequest::new(
                "clobber",
                BlockKind::Command,
                "__runbooks_write_trailer() { echo garbage > \"$__runbooks_trailer_path\"; }",
            ))
            .unwrap_err();
        assert!(matches!(err, SessionError::Introspection { .. }));
        assert!(manager.is_degraded());

        let err = manager.execute(&BlockRequest::new("next", BlockKind::Command, "true")).unwrap_err();
        assert!(matches!(err, SessionError::Degraded(_)));

        manager.reset();
        assert!(manager.execute(&BlockRequest::new("next", BlockKind::Command, "true")).is_ok());
    }

    #[test]
    fn test_metadata_has_no_env_values() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager
            .execute(&BlockRequest::new("s", BlockKind::Command, "export SECRET=hunter2"))
            .unwrap();

        let json = serde_json::to_string(&manager.metadata()).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("execution_count"));
    }
}
