use crate::error_handling::types::CommandError;
use crate::session_management::Role;

/// The command token of a line, matched case-insensitively with or without a
/// leading `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Hello,
    Admin,
    Msg,
    List,
    Read,
    Upload,
    Download,
    Delete,
    Search,
    Info,
    Stats,
    Help,
    Quit,
}

impl Verb {
    pub fn from_token(token: &str) -> Option<Verb> {
        let token = token.strip_prefix('/').unwrap_or(token);
        let verb = match token.to_ascii_uppercase().as_str() {
            "HELLO" => Verb::Hello,
            "ADMIN" => Verb::Admin,
            "MSG" => Verb::Msg,
            "LIST" => Verb::List,
            "READ" => Verb::Read,
            "UPLOAD" => Verb::Upload,
            "DOWNLOAD" => Verb::Download,
            "DELETE" => Verb::Delete,
            "SEARCH" => Verb::Search,
            "INFO" => Verb::Info,
            "STATS" => Verb::Stats,
            "HELP" => Verb::Help,
            "QUIT" | "EXIT" => Verb::Quit,
            _ => return None,
        };
        Some(verb)
    }

    pub fn required_role(self) -> Role {
        match self {
            Verb::List
            | Verb::Read
            | Verb::Upload
            | Verb::Download
            | Verb::Delete
            | Verb::Search
            | Verb::Info => Role::Admin,
            Verb::Hello | Verb::Admin | Verb::Msg | Verb::Stats | Verb::Help | Verb::Quit => {
                Role::Read
            }
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            Verb::Hello => "HELLO <name> <READ|ADMIN>",
            Verb::Admin => "ADMIN <password>",
            Verb::Msg => "MSG <text>",
            Verb::List => "LIST",
            Verb::Read => "READ <filename>",
            Verb::Upload => "UPLOAD <filename> <base64>",
            Verb::Download => "DOWNLOAD <filename>",
            Verb::Delete => "DELETE <filename>",
            Verb::Search => "SEARCH <keyword>",
            Verb::Info => "INFO <filename>",
            Verb::Stats => "STATS",
            Verb::Help => "HELP",
            Verb::Quit => "QUIT",
        }
    }

    pub const ALL: [Verb; 13] = [
        Verb::Hello,
        Verb::Admin,
        Verb::Msg,
        Verb::Stats,
        Verb::Help,
        Verb::Quit,
        Verb::List,
        Verb::Read,
        Verb::Upload,
        Verb::Download,
        Verb::Delete,
        Verb::Search,
        Verb::Info,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hello { name: String, role: Role },
    Admin { password: String },
    Message { text: String },
    List,
    Read { name: String },
    Upload { name: String, payload: String },
    Download { name: String },
    Delete { name: String },
    Search { needle: String },
    Info { name: String },
    Stats,
    Help,
    Quit,
}

/// Splits a line into its verb and the untouched remainder.
pub fn split_line(line: &str) -> Result<(Verb, &str), CommandError> {
    let line = line.trim();
    let (token, rest) = match line.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim()),
        None => (line, ""),
    };
    let verb = Verb::from_token(token).ok_or(CommandError::UnknownCommand)?;
    Ok((verb, rest))
}

impl Command {
    /// Parses a whole line.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let (verb, args) = split_line(line)?;
        Command::from_args(verb, args)
    }

    /// Builds the command for `verb` from its arguments.
    pub fn from_args(verb: Verb, args: &str) -> Result<Command, CommandError> {
        let usage = || CommandError::Usage(verb.usage());
        let words: Vec<&str> = args.split_whitespace().collect();

        let single = |words: &[&str]| match words {
            [one] => Ok(one.to_string()),
            _ => Err(usage()),
        };
        let none = |words: &[&str]| {
            if words.is_empty() {
                Ok(())
            } else {
                Err(usage())
            }
        };

        let command = match verb {
            Verb::Hello => match words.as_slice() {
                [name, role] => Command::Hello {
                    name: name.to_string(),
                    role: role.parse().map_err(|_| usage())?,
                },
                _ => return Err(usage()),
            },
            Verb::Admin if args.is_empty() => return Err(usage()),
            Verb::Admin => Command::Admin {
                password: args.to_string(),
            },
            Verb::Msg if args.is_empty() => return Err(usage()),
            Verb::Msg => Command::Message {
                text: args.to_string(),
            },
            Verb::Upload => match words.as_slice() {
                [name, payload] => Command::Upload {
                    name: name.to_string(),
                    payload: payload.to_string(),
                },
                _ => return Err(usage()),
            },
            Verb::Read => Command::Read {
                name: single(&words)?,
            },
            Verb::Download => Command::Download {
                name: single(&words)?,
            },
            Verb::Delete => Command::Delete {
                name: single(&words)?,
            },
            Verb::Info => Command::Info {
                name: single(&words)?,
            },
            Verb::Search => Command::Search {
                needle: single(&words)?,
            },
            Verb::List => {
                none(&words)?;
                Command::List
            }
            Verb::Stats => {
                none(&words)?;
                Command::Stats
            }
            Verb::Help => Command::Help,
            Verb::Quit => Command::Quit,
        };
        Ok(command)
    }
}
