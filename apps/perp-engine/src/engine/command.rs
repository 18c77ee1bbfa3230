//! Operator commands and the handle used to send them.

use std::fmt;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

use crate::models::Side;

use super::EngineError;

/// Operator command processed by the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a manual position at market, or rest a limit entry.
    OpenManual {
        /// Position direction.
        side: Side,
        /// Limit price; `None` enters at market.
        limit: Option<Decimal>,
    },
    /// Close one position.
    ClosePosition {
        /// Position id.
        id: String,
    },
    /// Flatten everything and cancel all orders.
    PanicCloseAll,
    /// Re-place every stop, then reconcile.
    RestoreProtection,
    /// Cancel unreferenced orders, then reconcile.
    CleanOrders,
    /// Report positions and capital.
    StatusReport,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenManual { side, limit: None } => write!(f, "open {side}"),
            Self::OpenManual {
                side,
                limit: Some(limit),
            } => write!(f, "open {side} limit {limit}"),
            Self::ClosePosition { id } => write!(f, "close {id}"),
            Self::PanicCloseAll => write!(f, "panic"),
            Self::RestoreProtection => write!(f, "protect"),
            Self::CleanOrders => write!(f, "clean"),
            Self::StatusReport => write!(f, "status"),
        }
    }
}

impl Command {
    /// Parse a console line (`long [limit]`, `short [limit]`, `close <id>`,
    /// `panic`, `protect`, `clean`, `status`).
    ///
    /// # Errors
    ///
    /// Returns a usage message for anything else.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();

        match (verb.as_str(), words.next()) {
            ("long", limit) => Ok(Self::OpenManual {
                side: Side::Long,
                limit: limit.map(parse_limit).transpose()?,
            }),
            ("short", limit) => Ok(Self::OpenManual {
                side: Side::Short,
                limit: limit.map(parse_limit).transpose()?,
            }),
            ("close", Some(id)) => Ok(Self::ClosePosition { id: id.to_string() }),
            ("panic", None) => Ok(Self::PanicCloseAll),
            ("protect", None) => Ok(Self::RestoreProtection),
            ("clean", None) => Ok(Self::CleanOrders),
            ("status", None) => Ok(Self::StatusReport),
            _ => Err(format!(
                "unknown command '{}'; expected long [limit] | short [limit] | close <id> | panic | protect | clean | status",
                line.trim()
            )),
        }
    }
}

fn parse_limit(word: &str) -> Result<Decimal, String> {
    match word.parse::<Decimal>() {
        Ok(price) if price > Decimal::ZERO => Ok(price),
        _ => Err(format!("invalid limit price '{word}'")),
    }
}

/// A command and where to send the reply.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) command: Command,
    pub(crate) reply: Option<oneshot::Sender<String>>,
}

/// Cloneable sender for operator commands.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    sender: mpsc::Sender<Envelope>,
}

impl CommandHandle {
    pub(crate) const fn new(sender: mpsc::Sender<Envelope>) -> Self {
        Self { sender }
    }

    /// Send `command` and wait for the plain-text reply.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] if the engine has stopped.
    pub async fn request(&self, command: Command) -> Result<String, EngineError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Envelope {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        response.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Enqueue `command` without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] if the engine has stopped.
    pub async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.sender
            .send(Envelope {
                command,
                reply: None,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case("long", Command::OpenManual { side: Side::Long, limit: None } ; "long")]
    #[test_case("SHORT", Command::OpenManual { side: Side::Short, limit: None } ; "short uppercase")]
    #[test_case("long 99.5", Command::OpenManual { side: Side::Long, limit: Some(dec!(99.5)) } ; "long limit")]
    #[test_case("close trend-abc", Command::ClosePosition { id: "trend-abc".to_string() } ; "close")]
    #[test_case("  panic ", Command::PanicCloseAll ; "panic padded")]
    #[test_case("protect", Command::RestoreProtection ; "protect")]
    #[test_case("clean", Command::CleanOrders ; "clean")]
    #[test_case("status", Command::StatusReport ; "status")]
    fn test_parse_console_line(line: &str, expected: Command) {
        assert_eq!(Command::parse(line).unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("close" ; "close without id")]
    #[test_case("long now" ; "non numeric limit")]
    #[test_case("short -3" ; "negative limit")]
    #[test_case("buy" ; "unknown verb")]
    fn test_parse_rejects(line: &str) {
        assert!(Command::parse(line).is_err());
    }
}
