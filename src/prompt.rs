use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Toast shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// Confirmation dialog and notification collaborators
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;

    fn notify(&self, notice: Notice);
}

/// Answers every confirmation the same way and keeps the notices for later reads.
/// Used where no interactive user is attached (web mode, tests).
pub struct ScriptedPrompter {
    answers: Mutex<Vec<bool>>,
    default_answer: bool,
    notices: Mutex<Vec<Notice>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn always(answer: bool) -> Self {
        Self::with_answers(Vec::new(), answer)
    }

    /// Pops `answers` in order, then falls back to `default_answer`
    pub fn with_answers(answers: Vec<bool>, default_answer: bool) -> Self {
        let mut answers = answers;
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            default_answer,
            notices: Mutex::new(Vec::new()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Drains the collected notices
    pub fn take_notices(&self) -> Vec<Notice> {
        self.notices.lock().map(|mut n| std::mem::take(&mut *n)).unwrap_or_default()
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(title.to_string());
        }
        let answer = self
            .answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop())
            .unwrap_or(self.default_answer);
        info!(title, message, answer, "confirmation answered");
        answer
    }

    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => warn!(message = %notice.message, "notice"),
            _ => info!(message = %notice.message, "notice"),
        }
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

/// Asks on stdin, prints notices to stdout
pub struct ConsolePrompter;

#[async_trait]
impl Prompter for ConsolePrompter {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        println!("\n== {} ==\n{}\nProceed? [y/N]", title, message);
        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }

    fn notify(&self, notice: Notice) {
        let marker = match notice.level {
            NoticeLevel::Success => "✔",
            NoticeLevel::Info => "ℹ",
            NoticeLevel::Error => "✖",
        };
        println!("{} {}", marker, notice.message);
    }
}
