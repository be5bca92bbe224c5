//! Operator commands and the status indicator

use std::fmt;

/// A recognised operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Activate,
    Deactivate,
}

impl Command {
    /// Parse one line of input. Case-insensitive; anything else is discarded.
    pub fn parse(input: &str) -> Option<Command> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("ACTIVATE") {
            Some(Command::Activate)
        } else if input.eq_ignore_ascii_case("DEACTIVATE") {
            Some(Command::Deactivate)
        } else {
            None
        }
    }
}

/// The status indicator shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    Online,
    #[default]
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "ONLINE",
            Status::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_is_case_insensitive() {
        for input in ["activate", "Activate", "ACTIVATE", "aCtIvAtE"] {
            assert_eq!(Command::parse(input), Some(Command::Activate), "{}", input);
        }
    }

    #[test]
    fn test_deactivate_is_case_insensitive() {
        for input in ["deactivate", "Deactivate", "DEACTIVATE"] {
            assert_eq!(Command::parse(input), Some(Command::Deactivate));
        }
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert_eq!(Command::parse("  activate\n"), Some(Command::Activate));
        assert_eq!(Command::parse("\tDEACTIVATE\r\n"), Some(Command::Deactivate));
    }

    #[test]
    fn test_other_input_discarded() {
        for input in ["", "activated", "ACTIVATE NOW", "stop", "de-activate"] {
            assert_eq!(Command::parse(input), None, "{}", input);
        }
    }

    #[test]
    fn test_status_text() {
        assert_eq!(Status::default(), Status::Offline);
        assert_eq!(Status::Online.to_string(), "ONLINE");
    }
}
