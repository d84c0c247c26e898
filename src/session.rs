//! Attached shell sessions as reported by the daemon's `list-clients` call.

use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Shell flavor of an attached client.
///
/// The daemon needs it to regenerate the right shell-integration script on
/// reattachment. Tags the daemon knows about but this crate does not are kept
/// verbatim so they round-trip back into `attach`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    Other(String),
}

impl ShellKind {
    pub fn as_str(&self) -> &str {
        match self {
            ShellKind::Bash => "bash",
            ShellKind::Zsh => "zsh",
            ShellKind::Fish => "fish",
            ShellKind::Other(tag) => tag,
        }
    }
}

impl FromStr for ShellKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bash" => ShellKind::Bash,
            "zsh" => ShellKind::Zsh,
            "fish" => ShellKind::Fish,
            other => ShellKind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One shell's attachment to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub client_process_id: u32,
    pub shell_kind: ShellKind,
}

impl Session {
    pub fn new(client_process_id: u32, shell_kind: ShellKind) -> Self {
        Self {
            client_process_id,
            shell_kind,
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.client_process_id, self.shell_kind)
    }
}

/// Parse `list-clients` output: one `<pid> <shell>` pair per line.
///
/// Blank lines are ignored and malformed lines are skipped with a warning, so a
/// single garbled entry never costs the remaining sessions. Order is preserved.
pub fn parse_client_listing(output: &str) -> Vec<Session> {
    let mut sessions = Vec::new();

    for (index, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_client_line(line) {
            Some(session) => sessions.push(session),
            None => warn!(line = index + 1, content = line, "Skipping malformed client entry"),
        }
    }

    sessions
}

fn parse_client_line(line: &str) -> Option<Session> {
    let mut tokens = line.split_whitespace();
    let pid = tokens.next()?.parse::<u32>().ok()?;
    let shell = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }
    let shell_kind = shell.parse().ok()?;
    Some(Session::new(pid, shell_kind))
}
