//! Protocol line parsing
//!
//! One received line becomes a [`Message`]: an optional source, the command
//! token and up to [`MAX_PARAMS`] parameters, the last of which may be a
//! `:`-prefixed trailing parameter that keeps its spaces.

use std::fmt;

use crate::{Error, Result};

/// Maximum number of parameters kept from a single line
pub const MAX_PARAMS: usize = 42;

/// Message source (`name`, `name!ident` or `name!ident@host`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub name: String,
    pub ident: Option<String>,
    pub host: Option<String>,
}

impl Prefix {
    fn parse(token: &str) -> Self {
        match token.split_once('!') {
            Some((name, rest)) => {
                let (ident, host) = match rest.split_once('@') {
                    Some((ident, host)) => (ident, Some(host.to_string())),
                    None => (rest, None),
                };
                Prefix {
                    name: name.to_string(),
                    ident: Some(ident.to_string()),
                    host,
                }
            }
            None => Prefix {
                name: token.to_string(),
                ident: None,
                host: None,
            },
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ident) = &self.ident {
            write!(f, "!{}", ident)?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{}", host)?;
        }
        Ok(())
    }
}

/// A parsed protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Absent when the line came from the peer itself
    pub prefix: Option<Prefix>,
    /// Command token as received (numerics stay numeric)
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Create a new message
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    /// Parse one line, CR/LF already removed
    pub fn parse(input: &str) -> Result<Self> {
        let line = input.trim_end_matches(' ');
        if line.is_empty() {
            return Err(Error::MessageParse("Empty message".to_string()));
        }

        let (prefix, rest) = match line.strip_prefix(':') {
            Some(stripped) => {
                let (token, rest) = stripped.split_once(' ').ok_or_else(|| {
                    Error::MessageParse(format!("No command after source in '{}'", line))
                })?;
                (Some(Prefix::parse(token)), rest)
            }
            None => (None, line),
        };

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((command, params)) => (command, Some(params)),
            None => (rest, None),
        };
        if command.is_empty() {
            return Err(Error::MessageParse(format!("No command found in '{}'", line)));
        }

        let mut params = Vec::new();
        while let Some(chunk) = remaining {
            if params.len() >= MAX_PARAMS {
                break;
            }
            if let Some(trailing) = chunk.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match chunk.split_once(' ') {
                Some((param, next)) => {
                    params.push(param.to_string());
                    remaining = Some(next);
                }
                None => {
                    params.push(chunk.to_string());
                    remaining = None;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_string(),
            params,
        })
    }

    /// Source name, empty when the line had none
    pub fn source(&self) -> &str {
        self.prefix.as_ref().map(|p| p.name.as_str()).unwrap_or("")
    }

    pub fn ident(&self) -> &str {
        self.prefix
            .as_ref()
            .and_then(|p| p.ident.as_deref())
            .unwrap_or("")
    }

    pub fn host(&self) -> &str {
        self.prefix
            .as_ref()
            .and_then(|p| p.host.as_deref())
            .unwrap_or("")
    }

    /// Parameter `index`, or the empty string when it was not sent
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }

    /// Case-insensitive command comparison
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i + 1 == self.params.len() && (param.contains(' ') || param.is_empty()) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// True when `target` names a channel rather than a nickname
pub fn is_channel_name(target: &str) -> bool {
    matches!(target.chars().next(), Some('#' | '&' | '!' | '$'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_message() {
        let msg = Message::parse("NICK alice").unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn test_parse_message_with_prefix() {
        let msg = Message::parse(":nick!ident@host PRIVMSG #chan :hello world").unwrap();
        let prefix = msg.prefix.clone().unwrap();
        assert_eq!(prefix.name, "nick");
        assert_eq!(prefix.ident.as_deref(), Some("ident"));
        assert_eq!(prefix.host.as_deref(), Some("host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "hello world"]);
    }

    #[test]
    fn test_source_without_command_is_error() {
        assert!(Message::parse(":lonely.server").is_err());
        assert!(Message::parse(":lonely.server   ").is_err());
        assert!(Message::parse("").is_err());
    }

    #[test]
    fn test_trailing_spaces_stripped() {
        let msg = Message::parse("JOIN #a   ").unwrap();
        assert_eq!(msg.params, vec!["#a"]);
    }

    #[test]
    fn test_server_prefix_and_numeric() {
        let msg = Message::parse(":irc.example.net 001 relay :Welcome").unwrap();
        assert_eq!(msg.source(), "irc.example.net");
        assert_eq!(msg.ident(), "");
        assert!(msg.is("001"));
        assert_eq!(msg.param(1), "Welcome");
        assert_eq!(msg.param(5), "");
    }

    #[test]
    fn test_ident_without_host() {
        let msg = Message::parse(":bob!bobby QUIT :gone").unwrap();
        assert_eq!(msg.source(), "bob");
        assert_eq!(msg.ident(), "bobby");
        assert_eq!(msg.host(), "");
    }

    #[test]
    fn test_empty_middle_param_kept() {
        let msg = Message::parse(":srv SJOIN 1 1 #c +  :@bob").unwrap();
        assert_eq!(msg.param(4), "");
        assert_eq!(msg.param(5), "@bob");
    }

    #[test]
    fn test_param_limit() {
        let line = format!("CMD {}", vec!["x"; 50].join(" "));
        let msg = Message::parse(&line).unwrap();
        assert_eq!(msg.params.len(), MAX_PARAMS);
    }

    #[test]
    fn test_display_round_trip() {
        let msg = Message::parse(":a!b@c PRIVMSG #x :two words").unwrap();
        assert_eq!(msg.to_string(), ":a!b@c PRIVMSG #x :two words");
    }

    #[test]
    fn test_channel_names() {
        assert!(is_channel_name("#rust"));
        assert!(is_channel_name("&local"));
        assert!(!is_channel_name("alice"));
        assert!(!is_channel_name(""));
    }
}
