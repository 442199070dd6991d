//! Introspection trailer.
//!
//! A child process cannot hand its environment back to the parent, so shell
//! scripts are wrapped: once the user script finishes, an `EXIT` handler in
//! the same shell invocation writes the final working directory and the
//! exported environment to a trailer file.
//!
//! Wire format, every field terminated by a NUL byte:
//!
//! ```text
//! __RUNBOOKS_PWD__ \0 <cwd> \0 __RUNBOOKS_ENV__ \0 KEY=VALUE \0 ... __RUNBOOKS_END__ \0
//! ```
//!
//! NUL cannot appear in a path or an environment value, so values containing
//! newlines (keys, JSON, PEM blobs) survive unchanged.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use thiserror::Error;

/// Environment variable that tells the wrapper where to write the trailer.
pub const TRAILER_ENV_VAR: &str = "__RUNBOOKS_TRAILER_PATH";

const PWD_MARKER: &str = "__RUNBOOKS_PWD__";
const ENV_MARKER: &str = "__RUNBOOKS_ENV__";
const END_MARKER: &str = "__RUNBOOKS_END__";

/// Variables owned by the shell or by this crate, never merged into a session.
const EXCLUDED_VARS: &[&str] = &[
    "_",
    "SHLVL",
    "PWD",
    "OLDPWD",
    "FUNCNAME",
    "LINENO",
    "RANDOM",
    "SRANDOM",
    "SECONDS",
    "EPOCHSECONDS",
    "EPOCHREALTIME",
    "BASHPID",
    "PPID",
    "PIPESTATUS",
    "HISTCMD",
    "RUNBOOK_OUTPUT",
    "RUNBOOK_FILES",
    "GENERATED_FILES",
    "REPO_FILES",
    TRAILER_ENV_VAR,
];

/// Errors from parsing a trailer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrailerError {
    #[error("trailer is empty")]
    Empty,

    #[error("expected marker {expected}, found {found:?}")]
    UnexpectedField { expected: &'static str, found: String },

    #[error("trailer ends before {0}")]
    Truncated(&'static str),

    #[error("environment entry without '=': {0:?}")]
    MalformedEntry(String),
}

/// Session state recovered after a script ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    /// Final working directory of the script
    pub working_dir: PathBuf,
    /// Final exported environment, shell internals already removed
    pub env: HashMap<String, String>,
}

/// Changes between two environment snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl EnvDiff {
    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// All affected names, sorted.
    pub fn names(&self) -> Vec<String> {
        let names: BTreeSet<&String> =
            self.added.iter().chain(&self.changed).chain(&self.removed).collect();
        names.into_iter().cloned().collect()
    }
}

/// Wrap a bash script so it writes the trailer on exit.
///
/// User `trap ... EXIT` registrations are intercepted: the user handler runs
/// first, then the trailer is written, then the original exit code is
/// restored.
pub fn wrap_script(script: &str) -> String {
    format!(
        r#"#!/usr/bin/env bash
__runbooks_trailer_path="${{{trailer_var}}}"
unset {trailer_var}
__runbooks_user_exit_handler=""

__runbooks_write_trailer() {{
    [[ -n "$__runbooks_trailer_path" ]] || return 0
    {{
        printf '%s\0' "{pwd_marker}" "$PWD" "{env_marker}"
        env -0
        printf '%s\0' "{end_marker}"
    }} > "$__runbooks_trailer_path" 2>/dev/null
}}

trap() {{
    if [[ "$1" == "-p" || "$1" == "-l" ]]; then
        builtin trap "$@"
        return $?
    fi
    local has_exit=false
    local arg
    for arg in "${{@:2}}"; do
        if [[ "$arg" == "EXIT" || "$arg" == "0" ]]; then
            has_exit=true
            break
        fi
    done
    if $has_exit; then
        if [[ "$1" == "-" || -z "$1" ]]; then
            __runbooks_user_exit_handler=""
        else
            __runbooks_user_exit_handler="$1"
        fi
        return 0
    fi
    builtin trap "$@"
}}

__runbooks_on_exit() {{
    local exit_code=$?
    if [[ -n "$__runbooks_user_exit_handler" ]]; then
        eval "$__runbooks_user_exit_handler" || true
    fi
    __runbooks_write_trailer
    exit $exit_code
}}

builtin trap __runbooks_on_exit EXIT

{script}
"#,
        trailer_var = TRAILER_ENV_VAR,
        pwd_marker = PWD_MARKER,
        env_marker = ENV_MARKER,
        end_marker = END_MARKER,
        script = script,
    )
}

/// Parse a trailer written by [`wrap_script`].
pub fn parse_trailer(data: &[u8]) -> Result<Trailer, TrailerError> {
    if data.is_empty() {
        return Err(TrailerError::Empty);
    }

    let mut fields = data.split(|b| *b == 0).map(String::from_utf8_lossy);

    expect_marker(fields.next(), PWD_MARKER)?;
    let working_dir = fields.next().ok_or(TrailerError::Truncated("working directory"))?;
    expect_marker(fields.next(), ENV_MARKER)?;

    let mut env = HashMap::new();
    loop {
        let field = fields.next().ok_or(TrailerError::Truncated(END_MARKER))?;
        if field == END_MARKER {
            break;
        }
        if field.is_empty() {
            continue;
        }
        let Some((key, value)) = field.split_once('=') else {
            return Err(TrailerError::MalformedEntry(field.into_owned()));
        };
        env.insert(key.to_string(), value.to_string());
    }

    Ok(Trailer { working_dir: PathBuf::from(working_dir.into_owned()), env: filter_env(env) })
}

fn expect_marker(
    field: Option<std::borrow::Cow<'_, str>>,
    expected: &'static str,
) -> Result<(), TrailerError> {
    match field {
        Some(f) if f == expected => Ok(()),
        Some(f) => Err(TrailerError::UnexpectedField { expected, found: f.into_owned() }),
        None => Err(TrailerError::Truncated(expected)),
    }
}

/// Check if a variable is a shell internal or one of the injected variables.
pub fn is_excluded_var(name: &str) -> bool {
    name.is_empty() || name.starts_with("BASH_") || EXCLUDED_VARS.contains(&name)
}

/// Drop shell internals from a captured environment.
pub fn filter_env(env: HashMap<String, String>) -> HashMap<String, String> {
    env.into_iter().filter(|(k, _)| !is_excluded_var(k)).collect()
}

/// Diff two environments, ignoring excluded variables on both sides.
pub fn diff_env(before: &HashMap<String, String>, after: &HashMap<String, String>) -> EnvDiff {
    let mut diff = EnvDiff::default();

    for (key, value) in after {
        if is_excluded_var(key) {
            continue;
        }
        match before.get(key) {
            None => diff.added.push(key.clone()),
            Some(old) if old != value => diff.changed.push(key.clone()),
            Some(_) => {}
        }
    }

    for key in before.keys() {
        if !is_excluded_var(key) && !after.contains_key(key) {
            diff.removed.push(key.clone());
        }
    }

    diff.added.sort();
    diff.changed.sort();
    diff.removed.sort();
    diff
}
