//! Commands that drive the capture state machines from outside.

use serde::{Deserialize, Serialize};

/// Interactive commands, one per line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Toggle capture (video) or take the next frame (stills).
    Toggle,

    /// Zoom in one step.
    ZoomIn,

    /// Zoom out one step.
    ZoomOut,

    /// Reset zoom to the full frame.
    ZoomReset,

    /// Terminate the session.
    Exit,
}

impl ControlCommand {
    /// Parses one line of interactive input.
    ///
    /// Only the first character matters; anything unrecognised, including
    /// an empty line, is a toggle.
    pub fn parse_line(line: &str) -> Self {
        match line.trim_start().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('x') => Self::Exit,
            Some('i') => Self::ZoomIn,
            Some('o') => Self::ZoomOut,
            Some('r') => Self::ZoomReset,
            _ => Self::Toggle,
        }
    }

    /// Returns true for the zoom commands.
    pub fn is_zoom(self) -> bool {
        matches!(self, Self::ZoomIn | Self::ZoomOut | Self::ZoomReset)
    }
}

/// External asynchronous notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalSignal {
    /// Toggle capture (video) or capture and continue (stills).
    Continue,

    /// Capture and exit (stills).
    Exit,

    /// The wait itself failed with an OS error.
    Failed { errno: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(ControlCommand::parse_line("x\n"), ControlCommand::Exit);
        assert_eq!(ControlCommand::parse_line("X"), ControlCommand::Exit);
        assert_eq!(ControlCommand::parse_line("i"), ControlCommand::ZoomIn);
        assert_eq!(ControlCommand::parse_line("o"), ControlCommand::ZoomOut);
        assert_eq!(ControlCommand::parse_line("r"), ControlCommand::ZoomReset);
        assert_eq!(ControlCommand::parse_line(""), ControlCommand::Toggle);
        assert_eq!(ControlCommand::parse_line("\n"), ControlCommand::Toggle);
        assert_eq!(ControlCommand::parse_line("hello"), ControlCommand::Toggle);
    }

    #[test]
    fn test_is_zoom() {
        assert!(ControlCommand::ZoomIn.is_zoom());
        assert!(!ControlCommand::Toggle.is_zoom());
        assert!(!ControlCommand::Exit.is_zoom());
    }
}
