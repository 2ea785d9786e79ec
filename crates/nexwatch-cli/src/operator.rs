use std::io::{self, Write};

use async_trait::async_trait;
use nexwatch_core::Operator;
use tracing::warn;

/// Interprets a yes/no answer; `None` for anything else.
pub fn parse_yes_no(input: &str) -> Option<bool> {
    let answer = input.trim();
    if answer.eq_ignore_ascii_case("y") {
        Some(true)
    } else if answer.eq_ignore_ascii_case("n") {
        Some(false)
    } else {
        None
    }
}

pub struct TerminalOperator;

impl TerminalOperator {
    /// Asks until a valid answer arrives. A closed stdin answers `on_eof`.
    async fn ask(&self, question: &str, on_eof: bool) -> bool {
        loop {
            let prompt = format!("\n{question} (Y or N)? ");
            let line = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
                let mut stdout = io::stdout();
                stdout.write_all(prompt.as_bytes())?;
                stdout.flush()?;
                let mut line = String::new();
                let read = io::stdin().read_line(&mut line)?;
                Ok((read > 0).then_some(line))
            })
            .await;

            match line {
                Ok(Ok(Some(line))) => match parse_yes_no(&line) {
                    Some(answer) => return answer,
                    None => println!("Your input is invalid. Please enter Y or N."),
                },
                Ok(Ok(None)) => return on_eof,
                Ok(Err(err)) => {
                    warn!(error = %err, "cannot read answer");
                    return on_eof;
                }
                Err(err) => {
                    warn!(error = %err, "prompt task failed");
                    return on_eof;
                }
            }
        }
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    fn present(&mut self, text: &str) {
        println!("{text}");
    }

    async fn confirm_exit(&mut self) -> bool {
        self.ask("Do you want to exit the program?", true).await
    }

    async fn confirm_detail_toggle(&mut self, detailed: bool) -> bool {
        let question = if detailed {
            "Do you want to turn off the full-detail comparison?"
        } else {
            "Do you want to turn on the full-detail comparison?"
        };
        self.ask(question, false).await
    }
}
