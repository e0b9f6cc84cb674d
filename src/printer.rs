use std::env;
use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use owo_colors::OwoColorize;

static COLOR: AtomicBool = AtomicBool::new(false);

/// Enables colors when both output streams are terminals and the user did not
/// opt out with `--no-color` or `NO_COLOR`.
pub fn init(no_color: bool) {
    let enable = !no_color
        && env::var_os("NO_COLOR").map_or(true, |v| v.is_empty())
        && io::stdout().is_terminal()
        && io::stderr().is_terminal();
    COLOR.store(enable, Ordering::Relaxed);
}

fn color_enabled() -> bool {
    COLOR.load(Ordering::Relaxed)
}

pub fn success<W: Write + ?Sized>(w: &mut W, msg: impl Display) -> io::Result<()> {
    if color_enabled() {
        writeln!(w, "{} {msg}", "✔".green())
    } else {
        writeln!(w, "✔ {msg}")
    }
}

pub fn warning<W: Write + ?Sized>(w: &mut W, msg: impl Display) -> io::Result<()> {
    if color_enabled() {
        writeln!(w, "{} {msg}", "warning:".yellow().bold())
    } else {
        writeln!(w, "warning: {msg}")
    }
}

pub fn error<W: Write + ?Sized>(w: &mut W, msg: impl Display) -> io::Result<()> {
    if color_enabled() {
        writeln!(w, "{} {msg}", "error:".red().bold())
    } else {
        writeln!(w, "error: {msg}")
    }
}

/// Highlights a name inside a status message.
pub fn highlight(s: &str) -> String {
    if color_enabled() {
        s.green().bold().to_string()
    } else {
        s.to_string()
    }
}

/// Renders an entry of a listing, marking the active one.
pub fn item(name: &str, active: bool) -> String {
    if active && color_enabled() {
        name.black().on_yellow().to_string()
    } else {
        name.to_string()
    }
}
