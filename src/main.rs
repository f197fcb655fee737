mod assignment;
mod backend;
mod config;
mod display;
mod error;
mod parser;
mod prompt;
mod web;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use assignment::{AssignmentScope, CourseView, ScopeKind, SyncBus};
use backend::{InMemoryBackend, MonitorBackend, SchoolContext};
use config::Config;
use display::{print_attempt, print_course_view, print_monitors, write_sessions_to_file};
use parser::{load_course, load_monitors};
use prompt::ConsolePrompter;

const USAGE: &str = "usage:
  monitor-assignment web [port] [course.csv monitors.csv]
  monitor-assignment <course.csv> <monitors.csv> <session> <monitor_id|none> [scope] [level] [pos]
    scope: single | interval | from | all | range:A-B";

/// "range:2-5" or a scope kind name
fn parse_scope(raw: &str) -> Option<AssignmentScope> {
    if let Some(bounds) = raw.strip_prefix("range:") {
        let (start, end) = bounds.split_once('-')?;
        return Some(AssignmentScope::range(start.trim().parse().ok()?, end.trim().parse().ok()?));
    }
    let kind = match raw.to_lowercase().as_str() {
        "single" => ScopeKind::Single,
        "interval" => ScopeKind::Interval,
        "from" => ScopeKind::From,
        "all" => ScopeKind::All,
        _ => return None,
    };
    Some(AssignmentScope::of(kind))
}

fn build_backend(
    course_csv: &str,
    monitors_csv: &str,
) -> Result<(InMemoryBackend, i64), Box<dyn std::error::Error>> {
    let course = load_course(course_csv)?;
    let course_id = course.id;
    println!("Loaded course {} with {} sessions", course.name, course.sessions.len());
    let mut backend = InMemoryBackend::new().with_course(course);
    for (monitor, busy) in load_monitors(monitors_csv)? {
        backend = backend.with_monitor(monitor, busy);
    }
    Ok((backend, course_id))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let school = SchoolContext { school_id: 1, user_id: 1 };

    if args.len() > 1 && args[1] == "web" {
        let mut config = Config::from_env();
        if let Some(port) = args.get(2).and_then(|p| p.parse::<u16>().ok()) {
            config.port = port;
        }
        let backend = match (args.get(3), args.get(4)) {
            (Some(course_csv), Some(monitors_csv)) => build_backend(course_csv, monitors_csv)?.0,
            _ => InMemoryBackend::new(),
        };

        println!("Starting web server on port {}...", config.port);
        println!("Access the API at http://localhost:{}/api", config.port);
        web::start_server(config, Arc::new(backend), school).await?;
        return Ok(());
    }

    if args.len() < 5 {
        println!("{}", USAGE);
        return Ok(());
    }

    let (backend, course_id) = build_backend(&args[1], &args[2])?;
    let session: usize = args[3].parse()?;
    let monitor_id = match args[4].as_str() {
        "none" => None,
        id => Some(id.parse::<i64>()?),
    };
    let scope = match args.get(5) {
        Some(raw) => parse_scope(raw).ok_or_else(|| format!("unknown scope '{}'\n{}", raw, USAGE))?,
        None => AssignmentScope::single(),
    };

    let backend = Arc::new(backend);
    let config = Config::from_env();
    let course = backend.load_course(course_id).await?;
    // Default to the level of the first subgroup on the chosen session
    let level = match args.get(6) {
        Some(level) => level.parse()?,
        None => course
            .sessions
            .get(session)
            .and_then(|s| s.course_subgroups.first())
            .map(|s| s.degree_id)
            .ok_or("session has no subgroup")?,
    };
    let position = match args.get(7) {
        Some(position) => position.parse()?,
        None => 0,
    };

    let mut view = CourseView::new(
        course,
        level,
        position,
        school,
        backend.clone(),
        Arc::new(ConsolePrompter),
        SyncBus::new(config.sync_channel_capacity),
    );
    print_course_view(&mut view);

    let free = view.on_select_date(session).await?;
    print_monitors("Available monitors", &free);

    let effective = view.on_assignment_scope_change(scope);
    if effective != scope {
        println!("Scope narrowed to {:?} for this course type", effective.kind);
    }

    match view.on_monitor_selection_change(monitor_id).await {
        Ok(result) => print_attempt(&result),
        Err(e) => println!("✖ {}", e),
    }

    print_course_view(&mut view);
    write_sessions_to_file(&mut view, "assignment_result.txt")?;
    println!("\nSessions saved to assignment_result.txt");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_arguments() {
        assert_eq!(parse_scope("all"), Some(AssignmentScope::of(ScopeKind::All)));
        assert_eq!(parse_scope("range:2-5"), Some(AssignmentScope::range(2, 5)));
        assert_eq!(parse_scope("range:x-5"), None);
        assert_eq!(parse_scope("weekly"), None);
    }
}
