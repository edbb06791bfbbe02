//! Shared colored output helpers for CLI commands.
//!
//! Uses `termcolor` for cross-platform colored terminal output and respects
//! the `NO_COLOR` environment variable.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn color_choice() -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn print_colored(stream: &mut StandardStream, color: Color, prefix: &str, message: &str) {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color)).set_bold(true);
    let _ = stream.set_color(&spec);
    let _ = write!(stream, "{}", prefix);
    let _ = stream.reset();
    let _ = writeln!(stream, "{}", message);
}

/// Bold red `error:` line on stderr.
pub fn print_error(message: &str) {
    let mut stderr = StandardStream::stderr(color_choice());
    print_colored(&mut stderr, Color::Red, "error: ", message);
}

/// Bold yellow banner line on stdout (pause notifications).
pub fn print_banner(message: &str) {
    let mut stdout = StandardStream::stdout(color_choice());
    print_colored(&mut stdout, Color::Yellow, "* ", message);
}
