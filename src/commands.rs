//! Operator command parsing.
//!
//! Commands arrive as text on the control channel, optionally behind a
//! prefix shared with other consumers of that channel (e.g. `/triage STATUS`).

use regex::Regex;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Approve(String),
    Deny(String),
    Status,
    Tasks,
    Swap(String),
    Help,
    /// Unrecognised verb, or a known verb missing its argument. Holds the
    /// uppercased verb (empty for a bare prefix).
    Unknown(String),
}

/// Parses control-channel text into [`Command`]s.
#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: Option<String>,
    prefix_re: Option<Regex>,
}

impl CommandParser {
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = prefix.map(str::trim).filter(|p| !p.is_empty());
        let prefix_re = prefix.and_then(|p| {
            Regex::new(&format!(r"(?i)^\s*{}(?:\s+|$)", regex::escape(p))).ok()
        });
        Self {
            prefix: prefix.map(str::to_string),
            prefix_re,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Whether `text` is addressed to this daemon. Always true without a prefix.
    pub fn is_command(&self, text: &str) -> bool {
        match &self.prefix_re {
            Some(re) => re.is_match(text),
            None => true,
        }
    }

    /// Parse `text`, stripping the prefix if present.
    pub fn parse(&self, text: &str) -> Command {
        let body = match &self.prefix_re {
            Some(re) => match re.find(text) {
                Some(m) => &text[m.end()..],
                None => text,
            },
            None => text,
        };

        let mut parts = body.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_uppercase();
        let arg = parts.next();

        match (verb.as_str(), arg) {
            ("APPROVE", Some(id)) => Command::Approve(id.to_lowercase()),
            ("DENY", Some(id)) => Command::Deny(id.to_lowercase()),
            ("STATUS", _) => Command::Status,
            ("TASKS", _) => Command::Tasks,
            ("SWAP", Some(key)) => Command::Swap(key.to_string()),
            ("HELP", _) => Command::Help,
            _ => Command::Unknown(verb),
        }
    }

    /// Render a verb as the operator must type it, e.g. `/triage APPROVE`.
    pub fn with_prefix(&self, verb: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, verb),
            None => verb.to_string(),
        }
    }

    /// The HELP reply.
    pub fn help_text(&self, model_keys: &[&str]) -> String {
        let p = |verb: &str| self.with_prefix(verb);
        let header = match &self.prefix {
            Some(prefix) => format!("Commands (prefix: {}):", prefix),
            None => "Commands:".to_string(),
        };
        format!(
            "{header}\n\
             {} <id> - approve pending action\n\
             {} <id> - deny pending action\n\
             {} - daemon and model status\n\
             {} - list pending actions\n\
             {} <model> - swap LLM ({})\n\
             {} - this message",
            p("APPROVE"),
            p("DENY"),
            p("STATUS"),
            p("TASKS"),
            p("SWAP"),
            model_keys.join("|"),
            p("HELP"),
        )
    }
}
