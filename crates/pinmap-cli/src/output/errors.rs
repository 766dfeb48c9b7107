//! Error message formatting with actionable suggestions.

use std::error::Error;

use pinmap_core::error::PinmapError;

use super::colors::ColorSupport;

/// Error formatter with suggestions
pub struct ErrorFormatter {
    colors: ColorSupport,
}

impl ErrorFormatter {
    pub fn new() -> Self {
        Self {
            colors: ColorSupport::detect(),
        }
    }

    pub fn with_colors(colors: ColorSupport) -> Self {
        Self { colors }
    }

    /// Format an error with its suggestion and source chain
    pub fn format_error(&self, error: &PinmapError) -> String {
        let mut output = String::new();

        output.push_str(&self.colors.red("error"));
        output.push_str(": ");
        output.push_str(&error.to_string());
        output.push('\n');

        if let Some(suggestion) = error.suggestion() {
            output.push('\n');
            output.push_str(&self.colors.dim("help"));
            output.push_str(": ");
            output.push_str(suggestion);
            output.push('\n');
        }

        let mut source = error.source();
        while let Some(err) = source {
            output.push('\n');
            output.push_str(&self.colors.dim("caused by"));
            output.push_str(": ");
            output.push_str(&err.to_string());
            source = err.source();
        }

        output
    }

    /// Format an error from the command layer, using the pinmap error inside
    /// it when there is one
    pub fn format_anyhow(&self, error: &anyhow::Error) -> String {
        if let Some(error) = error.downcast_ref::<PinmapError>() {
            return self.format_error(error);
        }
        let mut output = format!("{}: {}", self.colors.red("error"), error);
        for cause in error.chain().skip(1) {
            output.push_str(&format!("\n{}: {}", self.colors.dim("caused by"), cause));
        }
        output
    }
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::new()
    }
}
