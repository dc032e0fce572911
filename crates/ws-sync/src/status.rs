//! One-line rendering of a session state

use crossterm::style::{Color, Stylize};

use crate::state::{SessionState, StagingProgress, Status};

/// Render the monitor line for `state`, with ANSI colours when `color` is set
pub fn status_line(state: &SessionState, color: bool) -> String {
    let paint = |text: &str, c: Color| {
        if color {
            text.with(c).to_string()
        } else {
            text.to_string()
        }
    };

    if state.paused {
        return paint("[Paused]", Color::Yellow);
    }

    let mut line = String::new();

    if !state.conflicts.is_empty() {
        line.push_str(&paint("[C] ", Color::Yellow));
    }
    if state.alpha.has_problems() || state.beta.has_problems() {
        line.push_str(&paint("[!] ", Color::Yellow));
    }
    if !state.last_error.is_empty() {
        line.push_str(&paint("[X] ", Color::Red));
    }

    // When the stager handles as many files as the source endpoint has, the
    // source's total size is a usable denominator
    let mut progress: Option<&StagingProgress> = None;
    let mut total_expected = 0;
    match state.status {
        Status::StagingAlpha => {
            line.push_str("[←] ");
            progress = state.alpha.staging_progress.as_ref();
            match progress {
                None => line.push_str("Preparing to stage files on alpha"),
                Some(p) if p.expected_files == state.beta.files => {
                    total_expected = state.beta.total_file_size;
                }
                Some(_) => {}
            }
        }
        Status::StagingBeta => {
            line.push_str("[→] ");
            progress = state.beta.staging_progress.as_ref();
            match progress {
                None => line.push_str("Preparing to stage files on beta"),
                Some(p) if p.expected_files == state.alpha.files => {
                    total_expected = state.alpha.total_file_size;
                }
                Some(_) => {}
            }
        }
        other => line.push_str(other.description()),
    }

    if let Some(p) = progress {
        let (fraction, denominator) = if total_expected != 0 {
            (
                p.total_received_size as f64 / total_expected as f64,
                format!("/{}", humanize_bytes(total_expected)),
            )
        } else if p.expected_files != 0 {
            (p.received_files as f64 / p.expected_files as f64, String::new())
        } else {
            (0.0, String::new())
        };

        line.push_str(&format!(
            "[{}/{} - {}{} - {:.0}%] {} ({}/{})",
            p.received_files,
            p.expected_files,
            humanize_bytes(p.total_received_size),
            denominator,
            100.0 * fraction,
            base_name(&p.path),
            humanize_bytes(p.received_size),
            humanize_bytes(p.expected_size),
        ));
    }

    line
}

/// Decimal byte size, e.g. `4.1 kB`, `83 MB`
pub fn humanize_bytes(size: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

    if size < 10 {
        return format!("{} B", size);
    }

    let exponent = ((size as f64).ln() / 1000f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = ((size as f64) / 1000f64.powi(exponent as i32) * 10.0 + 0.5).floor() / 10.0;

    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[exponent])
    } else {
        format!("{:.0} {}", value, UNITS[exponent])
    }
}

/// Last element of a slash-separated path
fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
