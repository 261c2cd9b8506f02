use anyhow::Result;
use bat::WrappingMode;
use cliclack::spinner;
use console::style;
use rustyline::error::ReadlineError;

const PROMPT: &str = "\x1b[1m\x1b[38;5;30m❓ > \x1b[0m";
const THEME: &str = "zenburn";

pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a question
    Exit,     // User wants to exit the session
}

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>,
}

impl Input {
    fn control(input_type: InputType) -> Self {
        Self {
            input_type,
            content: None,
        }
    }
}

/// Classify one line typed by the user
pub fn parse_input(line: &str) -> Input {
    let text = line.trim();
    if text.is_empty() {
        return Input::control(InputType::AskAgain);
    }
    if ["exit", "quit", "q"]
        .iter()
        .any(|command| text.eq_ignore_ascii_case(command))
    {
        return Input::control(InputType::Exit);
    }
    Input {
        input_type: InputType::Message,
        content: Some(text.to_string()),
    }
}

pub struct RustylinePrompt {
    spinner: cliclack::ProgressBar,
}

impl RustylinePrompt {
    pub fn new() -> Self {
        RustylinePrompt { spinner: spinner() }
    }

    pub fn banner(&self) {
        println!("{}", style("GitHub Analytics Assistant").bold().cyan());
        println!(
            "Ask questions about GitHub repositories {}",
            style("- type \"exit\", \"quit\" or \"q\" to end the session").dim()
        );
        println!();
        println!("{}", style("Example questions:").dim());
        for example in [
            "How many stars does facebook/react have?",
            "Who are the top contributors to rust-lang/rust?",
            "How many open issues does microsoft/vscode have?",
            "Compare the languages used in vercel/next.js and sveltejs/svelte",
        ] {
            println!("  {} {}", style("•").dim(), example);
        }
        println!();
    }

    pub fn get_input(&mut self) -> Result<Input> {
        let mut editor = rustyline::DefaultEditor::new()?;
        match editor.readline(PROMPT) {
            Ok(text) => Ok(parse_input(&text)),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                Ok(Input::control(InputType::Exit))
            }
            Err(e) => {
                eprintln!("Input error: {}", e);
                Ok(Input::control(InputType::Exit))
            }
        }
    }

    pub fn show_busy(&mut self) {
        self.spinner = spinner();
        self.spinner.start("Analyzing...");
    }

    pub fn hide_busy(&self) {
        self.spinner.stop("");
    }

    pub fn render(&self, answer: &str) {
        if let Err(e) = print_markdown(answer) {
            tracing::debug!("Falling back to plain output: {}", e);
            println!("{}", answer);
        }
        println!();
    }

    pub fn render_error(&self, error: &str) {
        println!("{} {}", style("Error:").red().bold(), error);
        println!();
    }

    pub fn goodbye(&self) {
        println!("{}", style("Goodbye!").dim());
    }
}

fn print_markdown(content: &str) -> Result<()> {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(THEME)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print()?;
    Ok(())
}
