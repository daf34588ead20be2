//! Request orchestration: synthesize → normalize → persist → execute → collect.

use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    collect,
    config::Settings,
    error::{ErrorKind, PipelineError, Result},
    sandbox::{Language, Sandbox},
    store::{stage_inputs, ArtifactStore},
    synth::{strip_fences, CodeModel, Synthesizer},
};

/// One user interaction.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub instruction: String,
    pub attachments: Vec<PathBuf>,
    pub target: String,
}

impl TaskRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            attachments: Vec::new(),
            target: Language::Python.as_str().to_string(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<PathBuf>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

/// Paths scoped to a single request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: Uuid,
    pub output_dir: PathBuf,
    pub input_dir: PathBuf,
}

impl RequestContext {
    pub fn new(settings: &Settings) -> Self {
        let id = Uuid::new_v4();
        let (output_dir, input_dir) = if settings.isolate_requests {
            let sub = id.to_string();
            (settings.outputs_dir.join(&sub), settings.inputs_dir.join(&sub))
        } else {
            (settings.outputs_dir.clone(), settings.inputs_dir.clone())
        };
        Self {
            id,
            output_dir,
            input_dir,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Synthesizing,
    Normalizing,
    Persisting,
    Executing,
    Collecting,
    Reported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<'a> {
    Stage(Stage),
    /// Generated source received so far.
    Code(&'a str),
    /// Generation failed and is being retried; earlier code is discarded.
    Restarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Plot { path: PathBuf },
    Text { output: String },
    NoOutput,
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub request_id: Uuid,
    pub code: Option<String>,
    pub code_path: Option<PathBuf>,
    pub stdout: String,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub plot: Option<PathBuf>,
    pub report: Report,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self.report, Report::Error { .. })
    }

    /// `(code, stdout, stderr, plot)`; on failure `("Error: <message>", "", None, None)`.
    pub fn into_parts(self) -> (String, String, Option<String>, Option<PathBuf>) {
        match self.report {
            Report::Error { message, .. } => (format!("Error: {message}"), String::new(), None, None),
            _ => (
                self.code.unwrap_or_default(),
                self.stdout,
                self.stderr,
                self.plot,
            ),
        }
    }
}

/// Whatever a request produced before it stopped.
#[derive(Debug, Default)]
struct Partial {
    code: Option<String>,
    code_path: Option<PathBuf>,
}

pub struct Pipeline {
    settings: Settings,
    synthesizer: Synthesizer,
    store: ArtifactStore,
    sandbox: Sandbox,
}

impl Pipeline {
    /// Fails with `SandboxUnavailable` when no valid interpreter is configured.
    pub fn new(settings: Settings, model: Arc<dyn CodeModel>) -> Result<Self> {
        let sandbox = Sandbox::from_settings(&settings)?;
        Ok(Self {
            synthesizer: Synthesizer::new(model, settings.synthesis_timeout),
            store: ArtifactStore::from_settings(&settings),
            sandbox,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn handle_request(
        &self,
        request: TaskRequest,
        mut on_progress: impl FnMut(Progress<'_>),
    ) -> Outcome {
        let ctx = RequestContext::new(&self.settings);
        let span = tracing::info_span!("request", id = %ctx.id);
        let mut stage = Stage::Idle;
        let mut partial = Partial::default();

        let result = self
            .run(&ctx, request, &mut stage, &mut partial, &mut on_progress)
            .instrument(span)
            .await;
        advance(&mut stage, Stage::Reported, &mut on_progress);

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(request = %ctx.id, kind = ?e.kind(), "request failed: {e}");
                Outcome {
                    request_id: ctx.id,
                    code: partial.code,
                    code_path: partial.code_path,
                    stdout: String::new(),
                    stderr: None,
                    exit_code: None,
                    plot: None,
                    report: Report::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                }
            }
        }
    }

    async fn run<F: FnMut(Progress<'_>)>(
        &self,
        ctx: &RequestContext,
        request: TaskRequest,
        stage: &mut Stage,
        partial: &mut Partial,
        on_progress: &mut F,
    ) -> Result<Outcome> {
        let language: Language = request.target.parse()?;

        let mut task = request.instruction;
        for staged in stage_inputs(&request.attachments, &ctx.input_dir)? {
            if let Some(name) = staged.file_name() {
                task.push_str(&format!(
                    " The file '{}' has been added to the '{}' folder.",
                    name.to_string_lossy(),
                    ctx.input_dir.display()
                ));
            }
        }

        // Only this execution may leave a plot behind.
        collect::clear_stale(&ctx.output_dir).map_err(|e| {
            PipelineError::persist(collect::plot_path(&ctx.output_dir).display().to_string(), e)
        })?;

        advance(stage, Stage::Synthesizing, on_progress);
        let raw = self.synthesize_with_retry(&task, ctx, on_progress).await?;

        advance(stage, Stage::Normalizing, on_progress);
        let code = strip_fences(&raw).to_string();
        if code.trim().is_empty() {
            return Err(PipelineError::SynthesisEmpty);
        }
        partial.code = Some(code.clone());

        advance(stage, Stage::Persisting, on_progress);
        let code_path =
            self.store
                .try_persist(&code, &self.settings.code_base_name, language.extension())?;
        partial.code_path = Some(code_path.clone());

        advance(stage, Stage::Executing, on_progress);
        let execution = self
            .sandbox
            .execute(&code_path, language.as_str(), &ctx.output_dir)
            .await?;

        advance(stage, Stage::Collecting, on_progress);
        let plot = collect::collect(&ctx.output_dir);
        let report = match &plot {
            Some(path) => Report::Plot { path: path.clone() },
            None if !execution.stdout.is_empty() => Report::Text {
                output: execution.stdout.trim_end().to_string(),
            },
            None => Report::NoOutput,
        };

        Ok(Outcome {
            request_id: ctx.id,
            code: Some(code),
            code_path: Some(code_path),
            stderr: Some(execution.stderr).filter(|s| !s.is_empty()),
            stdout: execution.stdout,
            exit_code: execution.exit_code,
            plot,
            report,
        })
    }

    async fn synthesize_with_retry<F: FnMut(Progress<'_>)>(
        &self,
        task: &str,
        ctx: &RequestContext,
        on_progress: &mut F,
    ) -> Result<String> {
        let mut retries_left = self.settings.synthesis_retries.min(1);
        loop {
            let attempt = self
                .synthesizer
                .synthesize(task, &ctx.output_dir, |so_far| on_progress(Progress::Code(so_far)))
                .await;
            match attempt {
                Err(PipelineError::SynthesisFailed(msg)) if retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!("code generation failed, retrying once: {msg}");
                    on_progress(Progress::Restarted);
                }
                other => return other,
            }
        }
    }
}

fn advance<F: FnMut(Progress<'_>)>(current: &mut Stage, next: Stage, on_progress: &mut F) {
    debug_assert!(next > *current, "stage {next:?} does not follow {current:?}");
    tracing::debug!(from = ?*current, to = ?next, "stage transition");
    *current = next;
    on_progress(Progress::Stage(next));
}
