//! Operator dialogue.

use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use sts_core::{ChannelRef, StsError, StsResult};
use sts_experiment::Operator;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Where questions go and answers come from.
#[async_trait]
pub trait Console: Send + Sync {
    /// Ask a question and wait for a line of input, without the newline.
    async fn ask(&self, question: &str) -> StsResult<String>;

    /// Show a message.
    fn show(&self, message: &str);

    /// Ask a yes/no question. Anything starting with `y` is a yes.
    async fn confirm(&self, question: &str) -> StsResult<bool> {
        let answer = self.ask(&format!("{question} [y/n]")).await?;
        Ok(answer.trim_start().starts_with(['y', 'Y']))
    }
}

/// Terminal console on stdin/stdout.
pub struct StdinConsole {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinConsole {
    /// Console reading the process's standard input.
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for StdinConsole {
    async fn ask(&self, question: &str) -> StsResult<String> {
        print!("{question}: ");
        std::io::stdout().flush()?;
        match self.lines.lock().await.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(StsError::Configuration("console input closed".into())),
        }
    }

    fn show(&self, message: &str) {
        println!("{message}");
    }
}

/// Reference prompts answered on the console.
pub struct ConsoleOperator {
    console: Arc<dyn Console>,
}

impl ConsoleOperator {
    /// Operator talking through `console`.
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn confirm_reference_connection(&self, channel: ChannelRef) -> StsResult<()> {
        self.console
            .ask(&format!(
                "Connect the reference fibre to {channel} and press ENTER"
            ))
            .await?;
        Ok(())
    }
}
