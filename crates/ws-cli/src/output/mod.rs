//! Coloured status messages for the terminal

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_marked(out: &mut impl Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message (green check)
pub fn print_success(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message to stderr (red cross)
pub fn print_error(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message to stderr (yellow)
pub fn print_warning(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message (cyan)
pub fn print_info(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

/// Print a line while the terminal may be in raw mode
pub fn print_raw_line(msg: &str) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "{}\r\n", msg);
    let _ = stdout.flush();
}
