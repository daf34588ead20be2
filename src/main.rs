mod cli;
mod printer;

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use anyhow::{bail, Result};
use arc_analysis::{
    config::{Config, Settings},
    llm::{ChatOptions, LlmClient},
    synth::ChatModel,
    Pipeline, Progress, Stage, TaskRequest,
};
use is_terminal::IsTerminal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ARC_LOG").unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cfg = Config::load();
    let mut settings = Settings::from_config(&cfg)?;
    args.apply_settings(&mut settings);

    // stdin handling (pipe support)
    let mut prompt_from_stdin = String::new();
    if !io::stdin().is_terminal() {
        io::stdin().read_to_string(&mut prompt_from_stdin)?;
    }
    let arg_prompt = args.prompt.clone().unwrap_or_default();
    let prompt = match (prompt_from_stdin.trim().is_empty(), arg_prompt.trim().is_empty()) {
        (false, false) => format!("{}\n\n{}", prompt_from_stdin.trim(), arg_prompt),
        (false, true) => prompt_from_stdin.trim().to_string(),
        _ => arg_prompt,
    };
    if prompt.trim().is_empty() {
        bail!("Please enter a prompt.");
    }

    let mut opts = ChatOptions::from_config(&cfg);
    args.apply_chat_options(&mut opts);
    let model = Arc::new(ChatModel::new(LlmClient::from_config(&cfg)?, opts));
    let pipeline = Pipeline::new(settings, model)?;

    let markdown = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        cfg.get_bool("PRETTIFY_MARKDOWN")
    };
    let live = !args.json && !markdown && io::stdout().is_terminal();

    let request = TaskRequest::new(prompt)
        .with_attachments(args.files.clone())
        .with_target(args.lang.clone());

    let mut printed = 0usize;
    let outcome = pipeline
        .handle_request(request, |progress| match progress {
            Progress::Code(so_far) if live => {
                print!("{}", so_far.get(printed..).unwrap_or_default());
                io::stdout().flush().ok();
                printed = so_far.len();
            }
            Progress::Restarted if live => {
                println!("\n(retrying)");
                printed = 0;
            }
            Progress::Stage(Stage::Normalizing) if live => println!(),
            _ => {}
        })
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        printer::print_outcome(&outcome, !live, markdown);
    }

    if outcome.is_error() {
        std::process::exit(1);
    }
    Ok(())
}
