use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use super::{
    AvailabilityContext, AvailableMonitorsQuery, BackendError, MonitorBackend, TransferPayload,
};
use crate::assignment::slot_utils::{parse_time_to_minutes, session_time_window};
use crate::assignment::types::{AvailabilityCheckResult, AvailabilitySlot, Course, Monitor};

/// A booking the monitor already teaches
#[derive(Debug, Clone)]
pub struct BusyPeriod {
    pub date: NaiveDate,
    pub start_minutes: u32,
    pub end_minutes: u32,
    pub reason: String,
}

impl BusyPeriod {
    pub fn new(date: NaiveDate, start: &str, end: &str, reason: &str) -> Self {
        Self {
            date,
            start_minutes: parse_time_to_minutes(start).unwrap_or(0),
            end_minutes: parse_time_to_minutes(end).unwrap_or(24 * 60),
            reason: reason.to_string(),
        }
    }

    pub fn whole_day(date: NaiveDate, reason: &str) -> Self {
        Self::new(date, "00:00", "23:59", reason)
    }

    fn overlaps(&self, date: NaiveDate, start: u32, end: u32) -> bool {
        self.date == date && self.start_minutes < end && start < self.end_minutes
    }
}

#[derive(Default)]
struct State {
    courses: HashMap<i64, Course>,
    monitors: Vec<Monitor>,
    busy: HashMap<i64, Vec<BusyPeriod>>,
    transfers: Vec<TransferPayload>,
    /// 1-based transfer call number -> error returned for that call
    transfer_failures: HashMap<usize, BackendError>,
    availability_failure: Option<BackendError>,
    availability_calls: usize,
}

/// Backend stand-in holding courses, monitors and their calendars in memory
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Transport("backend state poisoned".to_string()))
    }

    pub fn with_course(self, course: Course) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.courses.insert(course.id, course);
        }
        self
    }

    pub fn with_monitor(self, monitor: Monitor, busy: Vec<BusyPeriod>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            if !busy.is_empty() {
                state.busy.entry(monitor.id).or_default().extend(busy);
            }
            state.monitors.push(monitor);
        }
        self
    }

    /// Makes the n-th transfer call (1-based) fail with `error`
    pub fn fail_transfer_call(&self, call: usize, error: BackendError) {
        if let Ok(mut state) = self.state.lock() {
            state.transfer_failures.insert(call, error);
        }
    }

    pub fn fail_availability_checks(&self, error: BackendError) {
        if let Ok(mut state) = self.state.lock() {
            state.availability_failure = Some(error);
        }
    }

    /// Every transfer payload received, failed calls included
    pub fn transfers(&self) -> Vec<TransferPayload> {
        self.state.lock().map(|s| s.transfers.clone()).unwrap_or_default()
    }

    pub fn availability_calls(&self) -> usize {
        self.state.lock().map(|s| s.availability_calls).unwrap_or(0)
    }

    pub fn monitors(&self) -> Vec<Monitor> {
        self.state.lock().map(|s| s.monitors.clone()).unwrap_or_default()
    }
}

impl State {
    fn blocking_reason(
        &self,
        monitor_id: i64,
        date: NaiveDate,
        start: u32,
        end: u32,
    ) -> Option<String> {
        self.busy
            .get(&monitor_id)?
            .iter()
            .find(|b| b.overlaps(date, start, end))
            .map(|b| b.reason.clone())
    }
}

#[async_trait]
impl MonitorBackend for InMemoryBackend {
    async fn load_course(&self, course_id: i64) -> Result<Course, BackendError> {
        self.state()?
            .courses
            .get(&course_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("course {}", course_id)))
    }

    async fn available_monitors(
        &self,
        query: &AvailableMonitorsQuery,
    ) -> Result<Vec<Monitor>, BackendError> {
        let state = self.state()?;
        let start = parse_time_to_minutes(&query.start_time).unwrap_or(0);
        let end = parse_time_to_minutes(&query.end_time).unwrap_or(24 * 60);
        Ok(state
            .monitors
            .iter()
            .filter(|m| state.blocking_reason(m.id, query.date, start, end).is_none())
            .cloned()
            .collect())
    }

    async fn check_availability(
        &self,
        monitor_id: i64,
        slots: &[AvailabilitySlot],
        context: &AvailabilityContext,
    ) -> Result<AvailabilityCheckResult, BackendError> {
        let mut state = self.state()?;
        state.availability_calls += 1;
        if let Some(error) = state.availability_failure.clone() {
            return Err(error);
        }
        debug!(
            monitor_id,
            slots = slots.len(),
            course_id = context.course_id,
            "checking availability"
        );

        let mut result = AvailabilityCheckResult::default();
        for slot in slots {
            let start = parse_time_to_minutes(&slot.start_time).unwrap_or(0);
            let end = parse_time_to_minutes(&slot.end_time).unwrap_or(24 * 60);
            match state.blocking_reason(monitor_id, slot.date, start, end) {
                Some(reason) => result.blocked.push(AvailabilitySlot {
                    reason: Some(reason),
                    ..slot.clone()
                }),
                None => result.available.push(slot.clone()),
            }
        }
        Ok(result)
    }

    async fn transfer_monitor(&self, payload: &TransferPayload) -> Result<(), BackendError> {
        let mut state = self.state()?;
        state.transfers.push(payload.clone());
        let call = state.transfers.len();
        if let Some(error) = state.transfer_failures.remove(&call) {
            return Err(error);
        }

        let monitor = match payload.monitor_id {
            Some(id) => Some(
                state
                    .monitors
                    .iter()
                    .find(|m| m.id == id)
                    .cloned()
                    .ok_or_else(|| BackendError::NotFound(format!("monitor {}", id)))?,
            ),
            None => None,
        };

        let State { courses, busy, .. } = &mut *state;
        let course = courses
            .get_mut(&payload.course_id)
            .ok_or_else(|| BackendError::NotFound(format!("course {}", payload.course_id)))?;
        let duration = course.duration_minutes;

        if let Some(monitor) = &monitor {
            let periods = busy.get(&monitor.id).map(Vec::as_slice).unwrap_or(&[]);
            for session in &course.sessions {
                let touched = session
                    .course_subgroups
                    .iter()
                    .chain(session.course_groups.iter().flat_map(|g| g.subgroups.iter()))
                    .any(|s| s.id.is_some_and(|id| payload.subgroup_ids.contains(&id)));
                if !touched {
                    continue;
                }
                let (start, end) =
                    session_time_window(&session.hour_start, session.hour_end.as_deref(), duration);
                let start = parse_time_to_minutes(&start).unwrap_or(0);
                let end = parse_time_to_minutes(&end).unwrap_or(24 * 60);
                if periods.iter().any(|b| b.overlaps(session.date, start, end)) {
                    return Err(BackendError::Rejected {
                        message: format!(
                            "Overlap: monitor {} is busy on {}",
                            monitor.id, session.date
                        ),
                    });
                }
            }
        }

        for session in &mut course.sessions {
            let subgroups = session
                .course_subgroups
                .iter_mut()
                .chain(session.course_groups.iter_mut().flat_map(|g| g.subgroups.iter_mut()));
            for subgroup in subgroups {
                if subgroup.id.is_some_and(|id| payload.subgroup_ids.contains(&id)) {
                    subgroup.monitor = monitor.clone();
                    subgroup.monitor_modified = true;
                }
            }
        }
        info!(
            course_id = payload.course_id,
            monitor_id = ?payload.monitor_id,
            subgroups = payload.subgroup_ids.len(),
            "monitor transferred"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::session_index::tests::course;
    use crate::assignment::types::ScopeKind;

    fn monitor(id: i64) -> Monitor {
        Monitor { id, first_name: format!("M{}", id), last_name: "Test".to_string() }
    }

    fn payload(monitor_id: i64, subgroup_ids: Vec<i64>) -> TransferPayload {
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        TransferPayload {
            monitor_id: Some(monitor_id),
            booking_users: vec![1],
            scope: ScopeKind::Single,
            start_date: day,
            end_date: day,
            course_id: 7,
            subgroup_id: None,
            course_subgroup_id: None,
            course_date_id: 1,
            subgroup_ids,
        }
    }

    #[tokio::test]
    async fn transfer_updates_stored_course() {
        let backend = InMemoryBackend::new()
            .with_course(course(2))
            .with_monitor(monitor(5), Vec::new());
        backend.transfer_monitor(&payload(5, vec![1001])).await.unwrap();
        let reloaded = backend.load_course(7).await.unwrap();
        let first = &reloaded.sessions[0].course_subgroups[0];
        assert_eq!(first.monitor_id(), Some(5));
        assert!(first.monitor_modified);
        assert_eq!(reloaded.sessions[1].course_subgroups[0].monitor_id(), None);
    }

    #[tokio::test]
    async fn transfer_rejects_overlapping_booking() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let backend = InMemoryBackend::new()
            .with_course(course(2))
            .with_monitor(
                monitor(5),
                vec![BusyPeriod::new(day, "11:00", "13:00", "private lesson")],
            );
        let err = backend.transfer_monitor(&payload(5, vec![1001])).await.unwrap_err();
        assert!(
            matches!(err, BackendError::Rejected { message } if message.starts_with("Overlap"))
        );
    }

    #[tokio::test]
    async fn late_session_still_overlaps_before_midnight() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut c = course(2);
        c.sessions[0].hour_start = "23:00".to_string();
        c.sessions[0].hour_end = None;
        let backend = InMemoryBackend::new()
            .with_course(c)
            .with_monitor(monitor(5), vec![BusyPeriod::new(day, "23:30", "23:59", "night ski")]);
        let err = backend.transfer_monitor(&payload(5, vec![1001])).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { .. }));
    }

    #[tokio::test]
    async fn injected_failures_hit_the_requested_call() {
        let backend = InMemoryBackend::new()
            .with_course(course(2))
            .with_monitor(monitor(5), Vec::new());
        backend.fail_transfer_call(2, BackendError::Transport("timeout".to_string()));
        assert!(backend.transfer_monitor(&payload(5, vec![1001])).await.is_ok());
        assert!(backend.transfer_monitor(&payload(5, vec![2001])).await.is_err());
        assert_eq!(backend.transfers().len(), 2);
    }

    #[tokio::test]
    async fn available_monitors_skip_busy_ones() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let backend = InMemoryBackend::new()
            .with_monitor(monitor(1), vec![BusyPeriod::whole_day(day, "sick")])
            .with_monitor(monitor(2), Vec::new());
        let query = AvailableMonitorsQuery {
            date: day,
            start_time: "10:00".to_string(),
            end_time: "12:00".to_string(),
            minimum_degree_id: 1,
            sport_id: 1,
            booking_user_ids: Vec::new(),
            subgroup_ids: Vec::new(),
            course_id: 7,
            school_id: 1,
        };
        let free = backend.available_monitors(&query).await.unwrap();
        assert_eq!(free.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2]);
    }
}
