//! Instruction template wrapped around every task.

use std::path::Path;

pub const SYSTEM_ROLE: &str = "You are an AI Python coder.\nProvide only code as output without any description.\nProvide only code in plain text format without Markdown formatting.\nIf there is a lack of details, provide most logical solution.\nYou are not allowed to ask for more details.";

pub fn instruction(task: &str, output_dir: &Path) -> String {
    let out = output_dir.display();
    format!(
        "Write python code for {task}, you must follow the given rules\n\
         Rule 1. Do not wrap the response in ```python and ```.\n\
         Rule 2. Do not take variable input from user.\n\
         Rule 3. If asked for a plot use matplotlib.pyplot.subplots_adjust for full plot and save it at '{out}/plot.png'.\n\
         Rule 4. If asked for files save them in the '{out}' folder."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_names_output_locations() {
        let text = instruction("a bar chart of sales", Path::new("outputs"));
        assert!(text.starts_with("Write python code for a bar chart of sales,"));
        assert!(text.contains("'outputs/plot.png'"));
        assert!(text.contains("in the 'outputs' folder"));
        assert!(text.contains("Do not take variable input"));
    }
}
