//! User commands accepted by a [`ChatSession`](crate::session::ChatSession).

use duet_shared::protocol::UpdateProfileRequest;
use duet_shared::{MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(UserId),
    Close,
    /// Send to the open conversation. `image` is a base64 data URI.
    Send {
        text: String,
        image: Option<String>,
    },
    Delete(MessageId),
    Refresh,
    /// Create the caller's directory entry.
    Register {
        full_name: String,
    },
    UpdateProfile(UpdateProfileRequest),
    /// Act as another user; the event channel is reopened.
    SwitchUser(UserId),
    Quit,
}

/// Parse one line of terminal input.
///
/// Lines starting with `/` are commands; anything else is message text.
/// Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send {
            text: line.to_string(),
            image: None,
        }));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "open" => Command::Open(parse_arg(arg, "user id")?),
        "close" => Command::Close,
        "delete" => Command::Delete(parse_arg(arg, "message id")?),
        "refresh" => Command::Refresh,
        "quit" | "exit" => Command::Quit,
        "as" => Command::SwitchUser(parse_arg(arg, "user id")?),
        "register" | "profile" if arg.is_empty() => {
            return Err(format!("/{name} needs a name"));
        }
        "register" => Command::Register {
            full_name: arg.to_string(),
        },
        "profile" => {
            let (full_name, bio) = match arg.split_once('|') {
                Some((full_name, bio)) => (full_name.trim(), bio.trim()),
                None => (arg, ""),
            };
            Command::UpdateProfile(UpdateProfileRequest {
                full_name: full_name.to_string(),
                bio: bio.to_string(),
                profile_pic: None,
            })
        }
        other => return Err(format!("Unknown command: /{other}")),
    };
    Ok(Some(command))
}

fn parse_arg<T: std::str::FromStr>(arg: &str, what: &str) -> Result<T, String> {
    arg.parse().map_err(|_| format!("Expected a {what}, got {arg:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(
            parse_line("  hello there ").unwrap(),
            Some(Command::Send {
                text: "hello there".into(),
                image: None,
            })
        );
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn test_commands_parse() {
        let user = UserId::new();
        assert_eq!(
            parse_line(&format!("/open {user}")).unwrap(),
            Some(Command::Open(user))
        );
        assert_eq!(parse_line("/close").unwrap(), Some(Command::Close));
        assert_eq!(parse_line("/quit").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse_line("/profile Ada Lovelace | engines").unwrap(),
            Some(Command::UpdateProfile(UpdateProfileRequest {
                full_name: "Ada Lovelace".into(),
                bio: "engines".into(),
                profile_pic: None,
            }))
        );
    }

    #[test]
    fn test_bad_input_is_reported() {
        assert!(parse_line("/open nobody").is_err());
        assert!(parse_line("/register").is_err());
        assert!(parse_line("/dance").is_err());
    }
}
