use chrono::Local;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends the chat transcript to a file chosen with `chat --log`.
pub struct LoggingState {
    file_path: Option<PathBuf>,
}

impl LoggingState {
    /// Checks that the file is writable and marks the start of a new session.
    pub fn new(log_file: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let logging = LoggingState {
            file_path: log_file,
        };
        if logging.file_path.is_some() {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            logging.write_to_log(&format!("## Currency exchange chat started {stamp}"))?;
        }
        Ok(logging)
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn log_user(&self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.log_message(&format!("You: {text}"))
    }

    pub fn log_assistant(&self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.log_message(&format!("Assistant: {text}"))
    }

    /// Session events such as `clear`, written with a `##` prefix.
    pub fn log_event(&self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.log_message(&format!("## {text}"))
    }

    pub fn log_message(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        if self.file_path.is_none() {
            return Ok(());
        }
        self.write_to_log(content)
    }

    fn write_to_log(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_ref() else {
            return Ok(());
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::new(file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        // Blank line between entries.
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn get_status_string(&self) -> String {
        match &self.file_path {
            None => "disabled".to_string(),
            Some(path) => format!(
                "active ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn transcript_appends_entries_after_a_header() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("chat.log");
        let logging = LoggingState::new(Some(path.clone())).expect("open log");

        logging.log_user("INR to USD?").expect("log user");
        logging
            .log_assistant("1 INR = 0.0120 USD\nRates change often.")
            .expect("log assistant");
        logging.log_event("Conversation history cleared.").expect("log event");

        let contents = std::fs::read_to_string(&path).expect("read log");
        let mut blocks = contents.split("\n\n");
        assert!(blocks
            .next()
            .expect("header")
            .starts_with("## Currency exchange chat started "));
        assert_eq!(blocks.next(), Some("You: INR to USD?"));
        assert_eq!(
            blocks.next(),
            Some("Assistant: 1 INR = 0.0120 USD\nRates change often.")
        );
        assert_eq!(blocks.next(), Some("## Conversation history cleared."));
        assert_eq!(logging.get_status_string(), "active (chat.log)");
    }

    #[test]
    fn disabled_logging_writes_nothing() {
        let logging = LoggingState::new(None).expect("no log");
        assert!(!logging.is_active());
        logging.log_user("hello").expect("no-op");
        assert_eq!(logging.get_status_string(), "disabled");
    }

    #[test]
    fn unwritable_path_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("missing").join("chat.log");
        assert!(LoggingState::new(Some(path)).is_err());
    }
}
