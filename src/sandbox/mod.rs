//! Runs a persisted program in a child process with a pinned interpreter.
//!
//! Isolation is process-level only: the child inherits the working directory,
//! the filesystem and the network. It is not a security boundary.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    process::Stdio,
    str::FromStr,
    time::Duration,
};

use serde::Serialize;
use tokio::process::Command;

use crate::{
    config::Settings,
    error::{PipelineError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl Language {
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            _ => Err(PipelineError::UnsupportedTarget(s.to_string())),
        }
    }
}

/// Interpreter inside a virtual environment rooted at `venv`.
pub fn venv_interpreter(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

/// Captured result of one run. A non-zero exit is data, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl Execution {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: PathBuf,
    timeout: Duration,
}

impl Sandbox {
    /// Bind the sandbox to an explicit interpreter. There is no `PATH` lookup.
    pub fn new(interpreter: Option<PathBuf>, timeout: Duration) -> Result<Self> {
        let interpreter = interpreter.ok_or_else(|| {
            PipelineError::SandboxUnavailable(
                "set PYTHON_INTERPRETER or activate a virtual environment (VIRTUAL_ENV)".into(),
            )
        })?;
        if !interpreter.is_file() {
            return Err(PipelineError::SandboxUnavailable(format!(
                "{} does not exist",
                interpreter.display()
            )));
        }
        tracing::debug!(interpreter = %interpreter.display(), "sandbox ready");
        Ok(Self {
            interpreter,
            timeout,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.interpreter.clone(), settings.execution_timeout)
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run `code_file` and capture both streams. `output_dir` exists afterwards.
    pub async fn execute(
        &self,
        code_file: &Path,
        target: &str,
        output_dir: &Path,
    ) -> Result<Execution> {
        let language: Language = target.parse()?;
        fs::create_dir_all(output_dir)
            .map_err(|e| PipelineError::persist(output_dir.display().to_string(), e))?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(code_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONIOENCODING", "utf-8")
            .env("MPLBACKEND", "Agg")
            .kill_on_drop(true);

        tracing::debug!(%language, file = %code_file.display(), "spawning interpreter");
        let child = cmd.spawn().map_err(PipelineError::Spawn)?;
        let out = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PipelineError::ExecutionTimedOut(self.timeout))?
            .map_err(PipelineError::Spawn)?;

        let execution = Execution {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code(),
        };
        if execution.success() {
            tracing::info!(file = %code_file.display(), "program finished");
        } else {
            tracing::warn!(
                file = %code_file.display(),
                exit_code = ?execution.exit_code,
                "program exited unsuccessfully"
            );
        }
        Ok(execution)
    }
}
