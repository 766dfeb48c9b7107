//! Terminal output formatting.
//!
//! Status lines go to stderr so that a map printed to stdout can be piped.

pub mod colors;
pub mod errors;

/// Output handler for consistent terminal formatting
pub struct OutputHandler {
    colors: colors::ColorSupport,
}

impl OutputHandler {
    pub fn new() -> Self {
        Self {
            colors: colors::ColorSupport::detect(),
        }
    }

    /// Handler that never emits color codes
    pub fn plain() -> Self {
        Self {
            colors: colors::ColorSupport::disabled(),
        }
    }

    pub fn info(&self, message: &str) {
        eprintln!("{}", self.colors.dim(message));
    }

    pub fn success(&self, message: &str) {
        eprintln!("{} {}", self.colors.green("✓"), message);
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", self.colors.yellow("!"), message);
    }

    pub fn step(&self, emoji: &str, message: &str) {
        eprintln!("{} {}", emoji, message);
    }

    /// Command output proper, on stdout
    pub fn raw(&self, text: &str) {
        println!("{}", text);
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new()
    }
}
