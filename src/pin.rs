//! PIN acquisition.
//!
//! Kept behind a single trait so the orchestrator is identical whether the PIN came from
//! `--pin` or an interactive terminal prompt.

use std::io::{self, Write};

use crossterm::terminal;

use crate::error::{Error, ErrorKind, Result};

/// A validated decimal PIN, 1-16 digits, as required by BlueZ's `RequestPinCode`/
/// `RequestPasskey` agent callbacks.
#[derive(Clone, Eq, PartialEq)]
pub struct Pin(String);

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pin(<redacted, {} digits>)", self.0.len())
    }
}

impl Pin {
    pub fn new(digits: impl Into<String>) -> Result<Self> {
        let digits = digits.into();
        if digits.is_empty() || digits.len() > 16 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::with_message(ErrorKind::PairingError, "PIN must be 1-16 decimal digits"));
        }
        Ok(Self(digits))
    }

    /// The PIN as a string, for `RequestPinCode`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The PIN decoded as a passkey, for `RequestPasskey`.
    pub fn as_passkey(&self) -> u32 {
        self.0.parse().unwrap_or(0)
    }
}

/// A capability that produces a PIN on demand.
pub trait PinSource {
    fn pin(&mut self) -> Result<Pin>;
}

/// A PIN supplied up front, e.g. via `--pin`. Never prompts.
pub struct StaticPin(Pin);

impl StaticPin {
    pub fn new(pin: Pin) -> Self {
        Self(pin)
    }
}

impl PinSource for StaticPin {
    fn pin(&mut self) -> Result<Pin> {
        Ok(self.0.clone())
    }
}

/// Prompts on the controlling terminal with echo suppressed.
#[derive(Default)]
pub struct InteractivePin;

impl PinSource for InteractivePin {
    fn pin(&mut self) -> Result<Pin> {
        print!("Enter pairing PIN: ");
        io::stdout().flush()?;

        terminal::enable_raw_mode()?;
        let read = read_line_hidden();
        let _ = terminal::disable_raw_mode();
        println!();

        Pin::new(read?)
    }
}

/// Reads one line from the terminal in raw mode without echoing keystrokes, stopping at Enter.
fn read_line_hidden() -> Result<String> {
    use crossterm::event::{self, Event, KeyCode};

    let mut buf = String::new();
    loop {
        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Enter => break,
                KeyCode::Char(c) => buf.push(c),
                KeyCode::Backspace => {
                    buf.pop();
                }
                _ => {}
            }
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_digit_strings() {
        assert!(Pin::new("123456").is_ok());
        assert!(Pin::new("0").is_ok());
        assert!(Pin::new("1234567890123456").is_ok());
    }

    #[test]
    fn rejects_empty_too_long_or_non_digit() {
        assert!(Pin::new("").is_err());
        assert!(Pin::new("12345678901234567").is_err());
        assert!(Pin::new("12ab56").is_err());
    }

    #[test]
    fn debug_never_prints_the_digits() {
        let pin = Pin::new("123456").unwrap();
        assert!(!format!("{pin:?}").contains("123456"));
    }

    #[test]
    fn as_passkey_parses_the_digits() {
        let pin = Pin::new("000123").unwrap();
        assert_eq!(pin.as_passkey(), 123);
    }

    #[test]
    fn static_pin_returns_the_same_pin_every_time() {
        let pin = Pin::new("654321").unwrap();
        let mut source = StaticPin::new(pin.clone());
        assert_eq!(source.pin().unwrap().as_str(), pin.as_str());
        assert_eq!(source.pin().unwrap().as_str(), pin.as_str());
    }
}
