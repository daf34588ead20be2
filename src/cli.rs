use std::{path::PathBuf, time::Duration};

use arc_analysis::{config::Settings, llm::ChatOptions};
use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "arc", about = "Generate Python for a prompt, run it, and show the output", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
pub struct Cli {
    /// What the generated program should do.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Input file handed to the program via the inputs folder.
    /// Can be used multiple times: --file a.csv --file b.xlsx
    #[arg(short = 'f', long = "file", action = clap::ArgAction::Append)]
    pub files: Vec<PathBuf>,

    /// Execution language. Only python is supported.
    #[arg(long, default_value = "python")]
    pub lang: String,

    /// Large language model to use.
    #[arg(long)]
    pub model: Option<String>,

    /// Randomness of generated output.
    #[arg(long, default_value_t = 0.0, value_parser = clap::value_parser!(f32))]
    pub temperature: f32,

    /// Limits highest probable tokens (words).
    #[arg(long = "top-p", default_value_t = 1.0, value_parser = clap::value_parser!(f32))]
    pub top_p: f32,

    /// Upper bound on generated tokens.
    #[arg(long = "max-tokens")]
    pub max_tokens: Option<u32>,

    /// Directory receiving generated programs.
    #[arg(long = "codes-dir")]
    pub codes_dir: Option<PathBuf>,

    /// Directory the program writes files and plots into.
    #[arg(long = "outputs-dir")]
    pub outputs_dir: Option<PathBuf>,

    /// Directory attachments are copied into.
    #[arg(long = "inputs-dir")]
    pub inputs_dir: Option<PathBuf>,

    /// Python interpreter to run generated code with.
    #[arg(long)]
    pub python: Option<PathBuf>,

    /// Share one outputs/inputs folder across runs instead of a per-run subfolder.
    #[arg(long = "shared-dirs")]
    pub shared_dirs: bool,

    /// Seconds the program may run before it is killed.
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Print the outcome as JSON.
    #[arg(long)]
    pub json: bool,

    /// Render the generated code as Markdown once complete.
    #[arg(long)]
    pub md: bool,
    /// Stream the code as it is generated instead of rendering it.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Debug logging on stderr.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn apply_settings(&self, settings: &mut Settings) {
        if let Some(dir) = &self.codes_dir {
            settings.codes_dir = dir.clone();
        }
        if let Some(dir) = &self.outputs_dir {
            settings.outputs_dir = dir.clone();
        }
        if let Some(dir) = &self.inputs_dir {
            settings.inputs_dir = dir.clone();
        }
        if let Some(python) = &self.python {
            settings.interpreter = Some(python.clone());
        }
        if self.shared_dirs {
            settings.isolate_requests = false;
        }
        if let Some(secs) = self.timeout {
            settings.execution_timeout = Duration::from_secs(secs);
        }
    }

    pub fn apply_chat_options(&self, opts: &mut ChatOptions) {
        if let Some(model) = &self.model {
            opts.model = model.clone();
        }
        opts.temperature = self.temperature;
        opts.top_p = self.top_p;
        if let Some(n) = self.max_tokens {
            opts.max_tokens = n;
        }
    }
}
