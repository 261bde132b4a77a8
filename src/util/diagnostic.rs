//! User-facing diagnostic messages.
//!
//! Every pipeline failure is rendered as a primary message, context lines
//! (the failing command, exit code, a tail of captured output) and numbered
//! suggestions.

use std::fmt;
use std::path::PathBuf;

/// Common suggestion messages.
pub mod suggestions {
    pub const INTEGRITY: &str =
        "The upstream file changed or the download was corrupted; check the recipe checksum";

    pub const FETCH: &str = "Check your network connection and the URL in the recipe";

    pub const BUILD_STEP: &str = "Run `kiln install --verbose --keep-work` to inspect the build tree";

    pub const PATCH: &str = "The patch no longer applies; update it or drop it from the recipe";

    pub const RELOCATION: &str =
        "The install step did not produce this file; check the relocation entries";

    pub const ACCEPTANCE: &str =
        "Run `kiln test --verbose` to see the server log of the failed run";

    pub const RECIPE: &str = "Run `kiln info <recipe>` to validate the recipe file";
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Additional context lines
    pub context: Vec<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
    /// Related location (file path)
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Add the last `max_lines` lines of captured output as context.
    pub fn with_output_tail(mut self, output: &str, max_lines: usize) -> Self {
        let lines: Vec<&str> = output.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        if start > 0 {
            self.context
                .push(format!("... {} earlier lines omitted", start));
        }
        for line in &lines[start..] {
            self.context.push(format!("| {}", line));
        }
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let label = if color {
            "\x1b[1;31merror\x1b[0m"
        } else {
            "error"
        };

        output.push_str(&format!("{}: {}\n", label, self.message));

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  {}\n", ctx));
        }

        if !self.suggestions.is_empty() {
            output.push('\n');
            let help_prefix = if color {
                "\x1b[1;32mhelp\x1b[0m"
            } else {
                "help"
            };
            output.push_str(&format!("{}: consider:\n", help_prefix));
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("build step 2 failed")
            .with_context("command: make -j4")
            .with_context("exit code: 2")
            .with_suggestion(suggestions::BUILD_STEP);

        let output = diag.format(false);
        assert!(output.contains("error: build step 2 failed"));
        assert!(output.contains("exit code: 2"));
        assert!(output.contains("help: consider:"));
        assert!(output.contains("1. Run `kiln install"));
    }

    #[test]
    fn test_output_tail() {
        let output = (1..=10).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let diag = Diagnostic::error("x").with_output_tail(&output, 3);

        assert_eq!(diag.context.len(), 4);
        assert_eq!(diag.context[0], "... 7 earlier lines omitted");
        assert_eq!(diag.context[3], "| line 10");
    }
}
