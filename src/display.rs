use std::fs::File;
use std::io::Write;

use crate::assignment::slot_utils::session_time_window;
use crate::assignment::types::{AssignmentOutcome, Monitor};
use crate::assignment::view::{AttemptResult, SessionEntry};
use crate::assignment::CourseView;

/// "Name (ID: n)" or a placeholder when nobody is assigned
pub fn format_monitor(monitor: Option<&Monitor>) -> String {
    match monitor {
        Some(m) => format!("{} (ID: {})", m.display_name(), m.id),
        None => "[NO MONITOR]".to_string(),
    }
}

fn format_entry(entry: &SessionEntry, duration_minutes: u32) -> String {
    let (start, end) =
        session_time_window(&entry.hour_start, entry.hour_end.as_deref(), duration_minutes);
    format!(
        "#{:<3} {} {}-{} {:>2} students  {}{}",
        entry.index,
        entry.date.format("%d/%m/%Y"),
        start,
        end,
        entry.student_count,
        format_monitor(entry.monitor.as_ref()),
        if entry.modified { "  *modified" } else { "" },
    )
}

/// Prints the sessions of the view, grouped under interval headers when there are several
pub fn print_course_view(view: &mut CourseView) {
    let course = view.course();
    println!("\n=== {} (course {}) ===", course.name, course.id);
    let duration = course.duration_minutes;
    let headers = if view.has_multiple_intervals() {
        view.get_interval_headers()
    } else {
        Vec::new()
    };

    let entries = view.get_dates_for_subgroup();
    println!("Sessions for this subgroup: {}", entries.len());
    for entry in &entries {
        if let Some(header) = headers.iter().find(|h| h.first_index == entry.index) {
            println!("\n-- {} ({} sessions) --", header.name, header.session_count);
        }
        println!("  {}", format_entry(entry, duration));
    }
}

pub fn print_monitors(title: &str, monitors: &[Monitor]) {
    println!("\n{} ({}):", title, monitors.len());
    for monitor in monitors {
        println!("  - {}", format_monitor(Some(monitor)));
    }
}

fn print_outcome(outcome: &AssignmentOutcome) {
    println!("Committed sessions: {:?}", outcome.committed_indexes);
    if outcome.chunks.len() > 1 {
        for chunk in &outcome.chunks {
            let status = match &chunk.failure {
                None => "ok".to_string(),
                Some(failure) => format!("failed ({})", failure),
            };
            println!("  chunk {:?} -> {}", chunk.indexes, status);
        }
    }
    if let Some(failure) = &outcome.first_failure {
        println!("⚠️  {}", failure.user_message());
    }
}

pub fn print_attempt(result: &AttemptResult) {
    println!("\n=== Assignment result ===");
    match result {
        AttemptResult::NoOp => println!("Monitor already assigned, nothing to do"),
        AttemptResult::Aborted { reason } => println!("Aborted: {:?}", reason),
        AttemptResult::Applied { outcome } => print_outcome(outcome),
    }
}

/// Writes the session list to a file, one session per line
pub fn write_sessions_to_file(
    view: &mut CourseView,
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(filename)?;
    let duration = view.course().duration_minutes;
    writeln!(file, "** {} **", view.course().name)?;
    for entry in view.get_dates_for_subgroup() {
        writeln!(file, "{}", format_entry(&entry, duration))?;
    }
    Ok(())
}
