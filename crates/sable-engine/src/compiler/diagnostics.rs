//! Diagnostic rendering on top of codespan-reporting.

use crate::parser::Diagnostic;
use codespan_reporting::diagnostic as csd;
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term;
use termcolor::{Buffer, ColorChoice, StandardStream};

/// Render diagnostics against the source with caret labels, returning the
/// plain-text report.
pub fn render(file_name: &str, source: &str, diagnostics: &[Diagnostic]) -> String {
    let file = SimpleFile::new(file_name, source);
    let config = term::Config::default();
    let mut buffer = Buffer::no_color();
    for diag in diagnostics {
        let report = to_codespan(diag, source);
        let _ = term::emit(&mut buffer, &config, &file, &report);
    }
    String::from_utf8_lossy(buffer.as_slice()).into_owned()
}

/// Emit diagnostics to stderr with color when the terminal supports it.
pub fn emit_stderr(file_name: &str, source: &str, diagnostics: &[Diagnostic]) {
    let file = SimpleFile::new(file_name, source);
    let config = term::Config::default();
    let writer = StandardStream::stderr(ColorChoice::Auto);
    let mut writer = writer.lock();
    for diag in diagnostics {
        let report = to_codespan(diag, source);
        let _ = term::emit(&mut writer, &config, &file, &report);
    }
}

fn to_codespan(diag: &Diagnostic, source: &str) -> csd::Diagnostic<()> {
    let start = diag.span.start.min(source.len());
    let end = diag.span.end.clamp(start, source.len());
    csd::Diagnostic::error()
        .with_message(diag.message.clone())
        .with_labels(vec![csd::Label::primary((), start..end)])
}

/// One-line-per-error summary used in `Display` impls, where the full
/// codespan rendering would be too noisy.
pub fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
