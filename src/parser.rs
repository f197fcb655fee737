use csv::{Reader, StringRecord};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::assignment::slot_utils::normalize_date;
use crate::assignment::types::{
    BookingUser, Course, CourseInterval, CourseType, Monitor, Session, Subgroup,
};
use crate::backend::memory::BusyPeriod;

/// Column positions found by header name, falling back to the documented order
struct CourseColumns {
    course_id: usize,
    course_name: usize,
    course_type: usize,
    sport_id: usize,
    duration: usize,
    session_id: usize,
    date: usize,
    hour_start: usize,
    hour_end: usize,
    interval_id: usize,
    interval_name: usize,
    degree_id: usize,
    course_group_id: usize,
    subgroup_id: usize,
    max_participants: usize,
    monitor_id: usize,
    monitor_name: usize,
    booking_user_ids: usize,
}

impl CourseColumns {
    fn from_headers(headers: &StringRecord) -> Self {
        let col = |name: &str, fallback: usize| column(headers, name, fallback);
        Self {
            course_id: col("course_id", 0),
            course_name: col("course_name", 1),
            course_type: col("course_type", 2),
            sport_id: col("sport_id", 3),
            duration: col("duration_minutes", 4),
            session_id: col("session_id", 5),
            date: col("date", 6),
            hour_start: col("hour_start", 7),
            hour_end: col("hour_end", 8),
            interval_id: col("interval_id", 9),
            interval_name: col("interval_name", 10),
            degree_id: col("degree_id", 11),
            course_group_id: col("course_group_id", 12),
            subgroup_id: col("subgroup_id", 13),
            max_participants: col("max_participants", 14),
            monitor_id: col("monitor_id", 15),
            monitor_name: col("monitor_name", 16),
            booking_user_ids: col("booking_user_ids", 17),
        }
    }
}

fn column(headers: &StringRecord, name: &str, fallback: usize) -> usize {
    headers.iter().position(|h| h.trim() == name).unwrap_or(fallback)
}

fn field<'a>(record: &'a StringRecord, index: usize) -> &'a str {
    record.get(index).unwrap_or("").trim()
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parses a number, returning 0 if empty or invalid
fn parse_number<T: std::str::FromStr + Default>(value: &str) -> T {
    value.trim().parse().unwrap_or_default()
}

fn parse_course_type(value: &str) -> CourseType {
    match value.trim().to_lowercase().as_str() {
        "private" | "2" => CourseType::Private,
        "activity" | "3" => CourseType::Activity,
        _ => CourseType::Collective,
    }
}

/// "First Last" → monitor; an empty id means no monitor
fn parse_monitor(id: &str, name: &str) -> Option<Monitor> {
    let id: i64 = id.parse().ok()?;
    let mut parts = name.splitn(2, ' ');
    Some(Monitor {
        id,
        first_name: parts.next().unwrap_or("").to_string(),
        last_name: parts.next().unwrap_or("").to_string(),
    })
}

fn parse_booking_users(value: &str, subgroup_id: i64) -> Vec<BookingUser> {
    value
        .split(';')
        .filter_map(|part| part.trim().parse().ok())
        .map(|id| BookingUser { id, client_id: subgroup_id })
        .collect()
}

/// Reads a course from rows of one (session, subgroup) pair each.
/// Course fields come from the first row; sessions are ordered by date and start time.
pub fn parse_course<R: Read>(input: R) -> Result<Course, Box<dyn std::error::Error>> {
    let mut reader = Reader::from_reader(input);
    let headers = reader.headers()?.clone();
    let cols = CourseColumns::from_headers(&headers);

    let mut course: Option<Course> = None;
    let mut session_positions: HashMap<i64, usize> = HashMap::new();

    for result in reader.records() {
        let record = result?;
        let session_id: i64 = parse_number(field(&record, cols.session_id));
        let Some(date) = normalize_date(field(&record, cols.date)) else {
            // Skip rows without a usable date
            continue;
        };

        let course = course.get_or_insert_with(|| Course {
            id: parse_number(field(&record, cols.course_id)),
            name: field(&record, cols.course_name).to_string(),
            course_type: parse_course_type(field(&record, cols.course_type)),
            sport_id: parse_number(field(&record, cols.sport_id)),
            duration_minutes: parse_number(field(&record, cols.duration)),
            intervals: Vec::new(),
            sessions: Vec::new(),
        });

        let interval_id = optional(field(&record, cols.interval_id));
        if let Some(id) = &interval_id {
            let name = field(&record, cols.interval_name);
            if !name.is_empty() && course.interval_name(id).is_none() {
                course.intervals.push(CourseInterval { id: id.clone(), name: name.to_string() });
            }
        }

        let position = *session_positions.entry(session_id).or_insert_with(|| {
            course.sessions.push(Session {
                id: session_id,
                date,
                hour_start: field(&record, cols.hour_start).to_string(),
                hour_end: optional(field(&record, cols.hour_end)),
                interval_id,
                course_subgroups: Vec::new(),
                course_groups: Vec::new(),
            });
            course.sessions.len() - 1
        });

        let subgroup_id = field(&record, cols.subgroup_id).parse().ok();
        let degree_id: i64 = parse_number(field(&record, cols.degree_id));
        if degree_id == 0 {
            continue;
        }
        course.sessions[position].course_subgroups.push(Subgroup {
            id: subgroup_id,
            degree_id,
            course_group_id: parse_number(field(&record, cols.course_group_id)),
            course_date_id: session_id,
            max_participants: parse_number(field(&record, cols.max_participants)),
            monitor: parse_monitor(
                field(&record, cols.monitor_id),
                field(&record, cols.monitor_name),
            ),
            monitor_modified: false,
            booking_users: parse_booking_users(
                field(&record, cols.booking_user_ids),
                subgroup_id.unwrap_or(0),
            ),
        });
    }

    let mut course = course.ok_or("course file has no sessions")?;
    course
        .sessions
        .sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.hour_start.cmp(&b.hour_start)));
    Ok(course)
}

/// Loads a course from a CSV file
pub fn load_course<P: AsRef<Path>>(csv_path: P) -> Result<Course, Box<dyn std::error::Error>> {
    parse_course(std::fs::File::open(csv_path)?)
}

/// Busy entries look like `2026-01-03@10:00-12:00` or a bare date for the whole day,
/// separated by `;`
fn parse_busy(value: &str) -> Vec<BusyPeriod> {
    value
        .split(';')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (day, window) = match entry.split_once('@') {
                Some((day, window)) => (day, Some(window)),
                None => (entry, None),
            };
            let date = normalize_date(day)?;
            Some(match window.and_then(|w| w.split_once('-')) {
                Some((start, end)) => BusyPeriod::new(date, start, end, "already booked"),
                None => BusyPeriod::whole_day(date, "not working"),
            })
        })
        .collect()
}

/// A monitor with its busy calendar
pub type MonitorRow = (Monitor, Vec<BusyPeriod>);

/// Reads monitors with their busy calendar: `id,first_name,last_name,busy`
pub fn parse_monitors<R: Read>(input: R) -> Result<Vec<MonitorRow>, Box<dyn std::error::Error>> {
    let mut reader = Reader::from_reader(input);
    let headers = reader.headers()?.clone();
    let id_col = column(&headers, "id", 0);
    let first_col = column(&headers, "first_name", 1);
    let last_col = column(&headers, "last_name", 2);
    let busy_col = column(&headers, "busy", 3);

    let mut monitors = Vec::new();
    for result in reader.records() {
        let record = result?;
        let Ok(id) = field(&record, id_col).parse::<i64>() else {
            continue;
        };
        let monitor = Monitor {
            id,
            first_name: field(&record, first_col).to_string(),
            last_name: field(&record, last_col).to_string(),
        };
        monitors.push((monitor, parse_busy(field(&record, busy_col))));
    }
    Ok(monitors)
}

pub fn load_monitors<P: AsRef<Path>>(
    csv_path: P,
) -> Result<Vec<MonitorRow>, Box<dyn std::error::Error>> {
    parse_monitors(std::fs::File::open(csv_path)?)
}
