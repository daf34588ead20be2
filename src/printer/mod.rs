//! Printers: text and markdown (termimad).

use arc_analysis::{Outcome, Report};
use owo_colors::OwoColorize;
use termimad::MadSkin;

pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    fn paint(&self, text: &str) -> String {
        match self.color {
            Some("green") => text.green().to_string(),
            Some("cyan") => text.cyan().to_string(),
            Some("yellow") => text.yellow().to_string(),
            Some("red") => text.red().to_string(),
            _ => text.to_string(),
        }
    }

    pub fn print(&self, text: &str) {
        println!("{}", self.paint(text));
    }

    pub fn eprint(&self, text: &str) {
        eprintln!("{}", self.paint(text));
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print_code(&self, code: &str, lang: &str) {
        let md = format!("```{}\n{}\n```", lang, code.trim_end());
        self.skin.print_text(&md);
        println!();
    }
}

/// Print the generated code (unless already streamed) followed by the result.
pub fn print_outcome(outcome: &Outcome, show_code: bool, markdown: bool) {
    if show_code {
        if let Some(code) = &outcome.code {
            if markdown {
                MarkdownPrinter::default().print_code(code, "python");
            } else {
                println!("{}", code.trim_end());
            }
        }
    }

    match &outcome.report {
        Report::Plot { path } => TextPrinter { color: Some("green") }
            .print(&format!("Plot saved to {}", path.display())),
        Report::Text { output } => {
            println!("{}", output);
            if output.contains("Error: ") {
                TextPrinter { color: Some("red") }
                    .eprint("An error occurred while generating the plot.");
            }
        }
        Report::NoOutput => TextPrinter { color: Some("cyan") }.print("No Output Received"),
        Report::Error { message, .. } => {
            TextPrinter { color: Some("red") }.eprint(&format!("Error: {}", message))
        }
    }

    if let Some(stderr) = &outcome.stderr {
        TextPrinter { color: Some("yellow") }.eprint(stderr.trim_end());
    }
    if let (Some(path), Some(code)) = (&outcome.code_path, outcome.exit_code) {
        if code != 0 {
            TextPrinter { color: Some("yellow") }
                .eprint(&format!("{} exited with status {}", path.display(), code));
        }
    }
}
