use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Parses a time string (HH:MM or HH:MM:SS) to minutes since midnight
pub fn parse_time_to_minutes(time_str: &str) -> Option<u32> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let hours: u32 = parts[0].parse().ok()?;
    let minutes: u32 = parts[1].parse().ok()?;
    if hours >= 24 || minutes >= 60 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Formats minutes since midnight to time string (HH:MM)
pub fn minutes_to_time_string(minutes: u32) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;
    format!("{:02}:{:02}", hours % 24, mins)
}

/// Sessions never run past midnight
pub const LAST_MINUTE_OF_DAY: u32 = 23 * 60 + 59;

/// Start and end time of a session, trimmed to HH:MM.
/// Without an explicit end the course duration is added to the start.
pub fn session_time_window(
    hour_start: &str,
    hour_end: Option<&str>,
    duration_minutes: u32,
) -> (String, String) {
    let start_minutes = parse_time_to_minutes(hour_start).unwrap_or(0);
    let end_minutes = hour_end.and_then(parse_time_to_minutes).unwrap_or_else(|| {
        start_minutes
            .saturating_add(duration_minutes)
            .min(LAST_MINUTE_OF_DAY)
    });
    (
        minutes_to_time_string(start_minutes),
        minutes_to_time_string(end_minutes),
    )
}

/// Accepts `YYYY-MM-DD` optionally followed by a time part (`T...` or ` ...`)
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Human label used in confirmation dialogs
pub fn slot_label(session_index: usize, date: NaiveDate, start: &str, end: &str) -> String {
    format!(
        "Session {} · {} {}-{}",
        session_index + 1,
        date.format("%d/%m/%Y"),
        start,
        end
    )
}

/// Sorts ascending, drops duplicates, then groups consecutive integers.
/// A gap of more than one starts a new chunk.
pub fn chunk_contiguous(indexes: &[usize]) -> Vec<Vec<usize>> {
    let mut sorted = indexes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut chunks: Vec<Vec<usize>> = Vec::new();
    for index in sorted {
        match chunks.last_mut() {
            Some(chunk) if chunk.last().map(|&last| last + 1) == Some(index) => chunk.push(index),
            _ => chunks.push(vec![index]),
        }
    }
    chunks
}

/// Identifies a session across views that may index sessions differently
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: String,
    pub level_id: i64,
    pub subgroup_position: usize,
}

impl SlotKey {
    pub fn new(date: NaiveDate, level_id: i64, subgroup_position: usize) -> Self {
        Self {
            date: date.format("%Y-%m-%d").to_string(),
            level_id,
            subgroup_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_times() {
        assert_eq!(parse_time_to_minutes("09:30"), Some(570));
        assert_eq!(parse_time_to_minutes("09:30:00"), Some(570));
        assert_eq!(parse_time_to_minutes("24:00"), None);
        assert_eq!(parse_time_to_minutes("nine"), None);
        assert_eq!(minutes_to_time_string(570), "09:30");
    }

    #[test]
    fn derives_end_time_from_duration() {
        assert_eq!(
            session_time_window("10:00:00", None, 90),
            ("10:00".to_string(), "11:30".to_string())
        );
        assert_eq!(
            session_time_window("10:00", Some("13:15:00"), 90),
            ("10:00".to_string(), "13:15".to_string())
        );
    }

    #[test]
    fn derived_end_time_stops_at_midnight() {
        assert_eq!(
            session_time_window("23:00", None, 120),
            ("23:00".to_string(), "23:59".to_string())
        );
        assert_eq!(session_time_window("10:00", None, u32::MAX).1, "23:59");
    }

    #[test]
    fn normalizes_backend_dates() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 14);
        assert_eq!(normalize_date("2026-02-14"), expected);
        assert_eq!(normalize_date("2026-02-14T00:00:00.000000Z"), expected);
        assert_eq!(normalize_date("2026-02-14 00:00:00"), expected);
        assert_eq!(normalize_date("14/02/2026"), None);
    }

    #[test]
    fn chunks_split_on_gaps() {
        assert_eq!(chunk_contiguous(&[5, 2, 3]), vec![vec![2, 3], vec![5]]);
        assert_eq!(chunk_contiguous(&[0, 1, 2]), vec![vec![0, 1, 2]]);
        assert_eq!(chunk_contiguous(&[4, 4, 9]), vec![vec![4], vec![9]]);
        assert!(chunk_contiguous(&[]).is_empty());
    }

    #[test]
    fn chunk_flatten_reconstructs_sorted_input() {
        let input = [11, 3, 4, 7, 8, 9, 0, 12];
        let chunks = chunk_contiguous(&input);
        let flat: Vec<usize> = chunks.iter().flatten().copied().collect();
        let mut sorted = input.to_vec();
        sorted.sort_unstable();
        assert_eq!(flat, sorted);
        for chunk in &chunks {
            assert!(chunk.windows(2).all(|w| w[1] == w[0] + 1));
        }
        assert_eq!(chunk_contiguous(&flat), chunks);
    }

    #[test]
    fn slot_keys_normalize_dates() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 3).unwrap();
        assert_eq!(SlotKey::new(date, 4, 1).date, "2026-01-03");
        assert_eq!(slot_label(0, date, "10:00", "12:00"), "Session 1 · 03/01/2026 10:00-12:00");
    }
}
