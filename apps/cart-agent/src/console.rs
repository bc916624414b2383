//! Line parser for the bench console.

use thiserror::Error;

use cart_engine::ControlCommand;

pub const HELP: &str = "\
commands:
  w <grams>        set the load on the simulated scale
  <digits>         scan a barcode
  {\"type\": ...}    send a control command (session_started, payment_created,
                   end_session, generate_qr, cancel_removal, reset_cart)
  status           print the cart status
  help             show this help
  q                quit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    SetWeight(f64),
    Scan(String),
    Command(ControlCommand),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConsoleError {
    #[error("not a weight: {0}")]
    InvalidWeight(String),

    #[error("{0}")]
    InvalidCommand(String),

    #[error("unrecognized input: {0} (type `help`)")]
    Unrecognized(String),
}

/// Parses one line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let input = match line {
        "q" | "quit" | "exit" => ConsoleInput::Quit,
        "status" => ConsoleInput::Status,
        "help" | "?" => ConsoleInput::Help,
        _ if line.starts_with('{') => ControlCommand::from_json(line)
            .map(ConsoleInput::Command)
            .map_err(|e| ConsoleError::InvalidCommand(e.to_string()))?,
        _ if line.chars().all(|c| c.is_ascii_digit()) => ConsoleInput::Scan(line.to_string()),
        _ => match line.strip_prefix("w ") {
            Some(grams) => {
                let grams = grams.trim();
                match grams.parse::<f64>() {
                    Ok(g) if g.is_finite() => ConsoleInput::SetWeight(g),
                    _ => return Err(ConsoleError::InvalidWeight(grams.to_string())),
                }
            }
            None => return Err(ConsoleError::Unrecognized(line.to_string())),
        },
    };
    Ok(Some(input))
}
