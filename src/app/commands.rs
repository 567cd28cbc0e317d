//! Command grammar: `/<command> [arg ...]`, whitespace-delimited.

/// Which right a command requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Whitelisted,
    Administrator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    ViewConfig,
    SetConfig(Vec<String>),
    /// Empty list means "show the whitelist".
    Whitelist(Vec<String>),
    Blacklist(Vec<String>),
    Restart,
    FetchLogs,
}

impl Command {
    /// Parses one inbound message. `None` for plain text and unknown commands.
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let head = tokens.next()?.strip_prefix('/')?;
        // `/viewconfig@SomeBot` in group chats.
        let name = head.split_once('@').map_or(head, |(name, _)| name);
        let args: Vec<&str> = tokens.collect();

        let command = match name.to_ascii_lowercase().as_str() {
            "help" => Command::Help,
            "viewconfig" => Command::ViewConfig,
            "setconfig" => Command::SetConfig(args.iter().map(|s| s.to_string()).collect()),
            "whitelist" => Command::Whitelist(split_ids(&args)),
            "blacklist" => Command::Blacklist(split_ids(&args)),
            "restartbot" => Command::Restart,
            "getlogs" => Command::FetchLogs,
            _ => return None,
        };
        Some(command)
    }

    pub fn access(&self) -> Access {
        match self {
            Command::Help | Command::ViewConfig | Command::SetConfig(_) => Access::Whitelisted,
            Command::Whitelist(_) | Command::Blacklist(_) | Command::Restart | Command::FetchLogs => {
                Access::Administrator
            }
        }
    }
}

/// `a,b,c` (optionally spread over several tokens) into trimmed, non-empty ids.
fn split_ids(args: &[&str]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse("  /viewconfig  "), Some(Command::ViewConfig));
        assert_eq!(
            Command::parse("/setconfig  max_qty=7   zip_output=true"),
            Some(Command::SetConfig(vec!["max_qty=7".into(), "zip_output=true".into()]))
        );
        assert_eq!(
            Command::parse("/whitelist 1,2,,3"),
            Some(Command::Whitelist(vec!["1".into(), "2".into(), "3".into()]))
        );
        assert_eq!(Command::parse("/whitelist"), Some(Command::Whitelist(vec![])));
        assert_eq!(Command::parse("/restartbot@ConfigBot"), Some(Command::Restart));
    }

    #[test]
    fn ignores_plain_text_and_unknown_commands() {
        assert_eq!(Command::parse("hello there"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("/dance"), None);
    }

    #[test]
    fn privileged_commands_need_an_administrator() {
        assert_eq!(Command::parse("/getlogs").unwrap().access(), Access::Administrator);
        assert_eq!(Command::parse("/blacklist 4").unwrap().access(), Access::Administrator);
        assert_eq!(Command::parse("/setconfig a=b").unwrap().access(), Access::Whitelisted);
    }
}
