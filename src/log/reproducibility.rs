/// Analysis log
///
/// Each pipeline step appends one entry: its operation name, what it
/// produced, and the named parameters it ran with. Re-running the listed
/// operations with those parameters on the same images reproduces the
/// results bit for bit. Exported as plain text or JSON.

use std::fmt;
use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A named parameter value, stored in its display form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

impl Parameter {
    pub fn new(name: &str, value: impl fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// 1-based position in the log
    pub sequence: usize,
    pub timestamp: DateTime<Local>,
    pub operation: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
}

impl LogEntry {
    /// Value of the named parameter, if the operation recorded one
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{:>3}. {}  {}\n     {}",
            self.sequence,
            self.timestamp.format("%H:%M:%S"),
            self.operation,
            self.description
        );
        for parameter in &self.parameters {
            out.push_str(&format!("\n       {}", parameter));
        }
        out
    }
}

/// Ordered record of one analysis session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisLog {
    pub session_id: String,
    pub session_start: DateTime<Local>,
    /// Every image file read during the session, in load order
    pub sources: Vec<String>,
    pub software_version: String,
    pub entries: Vec<LogEntry>,
}

impl AnalysisLog {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_start: Local::now(),
            sources: Vec::new(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            entries: Vec::new(),
        }
    }

    pub fn add_source(&mut self, source: &str) {
        self.sources.push(source.to_string());
    }

    pub fn add_entry(&mut self, operation: &str, description: &str, parameters: Vec<Parameter>) {
        let sequence = self.entries.len() + 1;
        log::info!("[LOG {:03}] {}: {}", sequence, operation, description);
        self.entries.push(LogEntry {
            sequence,
            timestamp: Local::now(),
            operation: operation.to_string(),
            description: description.to_string(),
            parameters,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose operation name matches exactly
    pub fn entries_for<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a LogEntry> {
        self.entries.iter().filter(move |e| e.operation == operation)
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "# tlc-quant v{} analysis log\n# session {} started {}\n",
            self.software_version,
            self.session_id,
            self.session_start.format("%Y-%m-%d %H:%M:%S")
        );
        for source in &self.sources {
            out.push_str(&format!("# source {}\n", source));
        }
        out.push_str(&format!("# {} operations\n\n", self.entries.len()));
        for entry in &self.entries {
            out.push_str(&entry.to_text());
            out.push_str("\n\n");
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// JSON for a `.json` path, plain text otherwise
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let is_json = path
            .extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case("json"));
        let body = if is_json {
            self.to_json()?
        } else {
            self.to_text()
        };
        std::fs::write(path, body)
    }
}

impl Default for AnalysisLog {
    fn default() -> Self {
        Self::new()
    }
}
