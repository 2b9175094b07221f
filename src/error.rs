//! Error taxonomy.
//!
//! The library returns typed errors so callers can tell a bad boards file
//! apart from a failed `make` run. The CLI wraps them in `anyhow` context.

use std::path::PathBuf;
use std::time::Duration;

use crate::package::Stage;

/// Problems with the settings file, the boards file or a board entry.
///
/// All of these are detected before any external tool is invoked.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}:{line}: duplicate board section [{name}]", path.display())]
    DuplicateSection {
        path: PathBuf,
        line: usize,
        name: String,
    },

    #[error("{}:{line}: duplicate key '{key}' in section [{section}]", path.display())]
    DuplicateKey {
        path: PathBuf,
        line: usize,
        section: String,
        key: String,
    },

    #[error("missing \"{key}\" in board section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("line {line}: undefined variable '${variable}' in key '{key}' of section [{section}]")]
    UndefinedVariable {
        section: String,
        key: String,
        line: usize,
        variable: String,
    },

    #[error("line {line}: invalid value for '{key}' in section [{section}]: {message}")]
    InvalidValue {
        section: String,
        key: String,
        line: usize,
        message: String,
    },

    #[error("board '{name}' not configured; available: {}", available.join(", "))]
    UnknownBoard { name: String, available: Vec<String> },

    #[error("board '{board}': {what} not found at '{}'", path.display())]
    MissingFile {
        board: String,
        what: &'static str,
        path: PathBuf,
    },

    #[error("parsing settings '{}': {source}", path.display())]
    Settings {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Failure of a single external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}{}", describe_code(*code), describe_tail(tail))]
    Exit {
        program: String,
        code: Option<i32>,
        tail: String,
    },

    #[error("'{program}' timed out after {after:?}")]
    TimedOut { program: String, after: Duration },

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("expected build artifact missing: {}", .0.display())]
    MissingArtifact(PathBuf),
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

fn describe_tail(tail: &str) -> String {
    let tail = tail.trim();
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{tail}")
    }
}

/// An external tool failed while a board was at a given stage.
#[derive(Debug, thiserror::Error)]
#[error("board '{board}' failed at {stage}: {source}")]
pub struct BuildError {
    pub board: String,
    pub stage: Stage,
    pub source: ToolError,
}

/// Any error that aborts a package assembly.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("board '{board}' failed at {stage}: '{}': {source}", path.display())]
    Io {
        board: String,
        stage: Stage,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("board '{board}': reading '{}' after the last stage: {source}", path.display())]
    Finalize {
        board: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("writing archive '{}': {source}", path.display())]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PackageError {
    /// The stage the assembly reached, if it got past validation.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PackageError::Config(_)
            | PackageError::Finalize { .. }
            | PackageError::Archive { .. } => None,
            PackageError::Build(e) => Some(e.stage),
            PackageError::Io { stage, .. } => Some(*stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_error_includes_status_and_tail() {
        let err = ToolError::Exit {
            program: "make".to_string(),
            code: Some(2),
            tail: "error: foo.c:12\n".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("status 2"));
        assert!(msg.contains("foo.c:12"));
    }

    #[test]
    fn sub_second_timeout_is_printed_exactly() {
        let err = ToolError::TimedOut {
            program: "make".to_string(),
            after: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "'make' timed out after 200ms");
    }

    #[test]
    fn build_error_names_board_and_stage() {
        let err = BuildError {
            board: "rk3399_arm64".to_string(),
            stage: Stage::ResolveVersion,
            source: ToolError::MalformedOutput("empty".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("rk3399_arm64"));
        assert!(msg.contains("stage 3"));
    }
}
