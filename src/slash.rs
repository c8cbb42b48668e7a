use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a fresh conversation
    New,
    /// Open a stored conversation by id
    Open,
    /// List conversations for this chat flow
    Chats,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Conversation id argument for `/open`
    pub fn chat_target(&self) -> Option<i64> {
        if self.command != SlashCommand::Open {
            return None;
        }

        self.argument()?.trim().parse().ok()
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a fresh conversation",
            SlashCommand::Open => "open a stored conversation: /open <id>",
            SlashCommand::Chats => "list conversations for this chat flow",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Return all built-in commands paired with their command string.
pub fn built_in_slash_commands() -> Vec<(&'static str, SlashCommand)> {
    SlashCommand::iter().map(|c| (c.command(), c)).collect()
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input[1..].split_whitespace();
    let head = parts.next()?;
    let rest: Vec<String> = parts.map(|s| s.to_string()).collect();

    let command = SlashCommand::from_str(head)
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "quit" | "exit" => Some(SlashCommand::Bye),
            "n" => Some(SlashCommand::New),
            "o" => Some(SlashCommand::Open),
            "c" | "list" => Some(SlashCommand::Chats),
            "h" => Some(SlashCommand::Help),
            _ => None,
        })?;

    let argument = if rest.is_empty() {
        None
    } else {
        Some(rest.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for (command_str, command) in built_in_slash_commands() {
        help.push_str(&format!("/{} - {}\n", command_str, command.description()));
    }

    help.push_str("\nYou can also use aliases like /q for /bye, /n for /new, /o for /open, /c for /chats");

    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_command() {
        let parsed = parse_slash_command("/new").unwrap();
        assert_eq!(parsed.command, SlashCommand::New);
        assert!(parsed.argument.is_none());
    }

    #[test]
    fn parses_open_with_chat_id() {
        let parsed = parse_slash_command("/open 12").unwrap();
        assert_eq!(parsed.command, SlashCommand::Open);
        assert_eq!(parsed.chat_target(), Some(12));
    }

    #[test]
    fn open_with_bad_id_has_no_target() {
        let parsed = parse_slash_command("/open twelve").unwrap();
        assert_eq!(parsed.chat_target(), None);
    }

    #[test]
    fn resolves_aliases() {
        assert_eq!(
            parse_slash_command("/q").unwrap().command,
            SlashCommand::Bye
        );
        assert_eq!(
            parse_slash_command("/list").unwrap().command,
            SlashCommand::Chats
        );
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert!(parse_slash_command("hello there").is_none());
    }
}
