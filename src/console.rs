//! Line commands read from stdin while the monitor runs.

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Change the number of slots. May be negative; the monitor rejects it.
    SetSlots(i64),
    /// Print the current monitor state.
    Status,
    /// Stop the monitor and exit.
    Quit,
    /// Blank line.
    Empty,
    /// Anything else, kept for the error message.
    Unknown(String),
}

/// Parse one line of console input.
///
/// Accepts a bare integer, `slots <n>`, `status`, and `quit`/`exit`.
pub fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }

    if let Ok(n) = line.parse::<i64>() {
        return ConsoleCommand::SetSlots(n);
    }

    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next();

    match (verb.as_str(), arg, parts.next()) {
        ("slots" | "n", Some(n), None) => match n.parse::<i64>() {
            Ok(n) => ConsoleCommand::SetSlots(n),
            Err(_) => ConsoleCommand::Unknown(line.to_string()),
        },
        ("status" | "s", None, None) => ConsoleCommand::Status,
        ("quit" | "exit" | "q", None, None) => ConsoleCommand::Quit,
        _ => ConsoleCommand::Unknown(line.to_string()),
    }
}
