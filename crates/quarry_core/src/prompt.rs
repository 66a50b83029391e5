use std::io::{BufRead, Write};

use async_trait::async_trait;

use crate::error::{QuarryError, Result};

/// Interactive questions asked while a command runs.
///
/// A prompt the user aborts resolves to [`QuarryError::Cancelled`], which
/// callers propagate without writing anything.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Asks for a secret. Empty answers are treated as an abort.
    async fn password(&self, message: &str) -> Result<String>;

    /// Asks a yes/no question.
    async fn confirm(&self, message: &str) -> Result<bool>;
}

/// Answers every prompt with fixed values. Used for scripted runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPrompter {
    password: Option<String>,
    confirm: bool,
}

impl StaticPrompter {
    pub fn new(password: Option<String>, confirm: bool) -> Self {
        Self { password, confirm }
    }

    pub fn with_password(password: impl Into<String>) -> Self {
        Self::new(Some(password.into()), true)
    }

    /// A prompter that aborts every password prompt.
    pub fn cancelling() -> Self {
        Self::new(None, false)
    }
}

#[async_trait]
impl Prompter for StaticPrompter {
    async fn password(&self, _message: &str) -> Result<String> {
        self.password.clone().ok_or(QuarryError::Cancelled)
    }

    async fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(self.confirm)
    }
}

/// Reads answers from stdin. EOF (Ctrl-D) cancels the command.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    async fn ask(message: String) -> Result<String> {
        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut stderr = std::io::stderr();
            write!(stderr, "{message}").map_err(|e| QuarryError::Storage(e.to_string()))?;
            stderr
                .flush()
                .map_err(|e| QuarryError::Storage(e.to_string()))?;

            let mut line = String::new();
            let read = std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            if read == 0 {
                return Err(QuarryError::Cancelled);
            }
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(|e| QuarryError::Storage(format!("prompt task failed: {e}")))?
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn password(&self, message: &str) -> Result<String> {
        let answer = Self::ask(format!("{message}: ")).await?;
        if answer.is_empty() {
            return Err(QuarryError::Cancelled);
        }
        Ok(answer)
    }

    async fn confirm(&self, message: &str) -> Result<bool> {
        let answer = Self::ask(format!("{message} [y/N]: ")).await?;
        Ok(parse_confirmation(&answer))
    }
}

fn parse_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_prompter_returns_password() {
        let prompter = StaticPrompter::with_password("hunter2");
        assert_eq!(prompter.password("Password").await.unwrap(), "hunter2");
        assert!(prompter.confirm("Sure?").await.unwrap());
    }

    #[tokio::test]
    async fn cancelling_prompter_cancels() {
        let prompter = StaticPrompter::cancelling();
        let err = prompter.password("Password").await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!prompter.confirm("Sure?").await.unwrap());
    }

    #[test]
    fn confirmation_answers() {
        assert!(parse_confirmation("y"));
        assert!(parse_confirmation(" YES "));
        assert!(!parse_confirmation(""));
        assert!(!parse_confirmation("no"));
        assert!(!parse_confirmation("yep"));
    }
}
