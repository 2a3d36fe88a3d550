//! Prefix command parsing.

/// A recognized chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ask <question>`; the question may be empty
    Ask(String),
    /// `forget`: clear the caller's memory
    Forget,
    /// `memory`: report how many turns are remembered
    Memory,
    /// `status`: report tool provider connectivity
    Status,
}

impl Command {
    /// Parse `content` as a command. Returns `None` when it does not start
    /// with `prefix` or names an unknown command. Names are case-sensitive.
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        let rest = content.strip_prefix(prefix)?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        match name {
            "ask" => Some(Self::Ask(args.to_string())),
            "forget" => Some(Self::Forget),
            "memory" => Some(Self::Memory),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}
