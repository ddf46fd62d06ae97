//! Terminal styling for status lines.

use console::Style;
use std::io::IsTerminal;
use std::sync::LazyLock;

pub static THEME: LazyLock<Theme> = LazyLock::new(Theme::default);

/// Styles for job outcomes printed to the terminal.
#[derive(Debug, Clone)]
pub struct Theme {
    pub success: Style,
    pub error: Style,
    pub warning: Style,
    /// Secondary details such as artifact paths
    pub muted: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            success: Style::new().green().bright(),
            error: Style::new().red().bright(),
            warning: Style::new().yellow().bright(),
            muted: Style::new().dim(),
        }
    }
}

impl Theme {
    pub fn success_with_icon(&self, text: &str) -> String {
        format!("✓ {}", self.paint(&self.success, text))
    }

    pub fn error_with_icon(&self, text: &str) -> String {
        format!("✗ {}", self.paint(&self.error, text))
    }

    pub fn warning_with_icon(&self, text: &str) -> String {
        format!("⚠ {}", self.paint(&self.warning, text))
    }

    /// Dims `text` unless colors are off.
    pub fn muted(&self, text: &str) -> String {
        self.paint(&self.muted, text)
    }

    /// Colors are off under `NO_COLOR` or when stdout is piped.
    pub fn should_disable_colors() -> bool {
        std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal()
    }

    fn paint(&self, style: &Style, text: &str) -> String {
        if Self::should_disable_colors() {
            text.to_string()
        } else {
            style.apply_to(text).to_string()
        }
    }
}
