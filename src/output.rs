//! Standard-output progress lines: a fixed sequence of `Key: value` lines, `Result:` last.

use std::fmt::Display;

/// Writes the aligned `Key: value` progress lines to stdout, and (when verbose) `trace:` lines
/// to the same stream for every D-Bus call, using plain `println!` rather than a templating
/// library.
pub struct OutputWriter {
    verbose: bool,
}

impl OutputWriter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn line(&self, key: &str, value: impl Display) {
        println!("{key}: {value}");
    }

    /// A diagnostic line shown only in verbose mode, interleaved with the `Key: value` lines.
    pub fn trace(&self, message: impl Display) {
        if self.verbose {
            println!("trace: {message}");
        }
    }

    /// The final `Result:` line, always written last.
    pub fn result(&self, outcome: impl Display) {
        println!("Result: {outcome}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_records_verbosity() {
        assert!(OutputWriter::new(true).verbose);
        assert!(!OutputWriter::new(false).verbose);
    }
}
