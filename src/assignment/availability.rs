use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, error, warn};

use super::session_index::SessionIndex;
use super::slot_utils::{session_time_window, slot_label};
use super::types::{AvailabilitySlot, Monitor, SlotContext};
use crate::backend::{AvailabilityContext, AvailableMonitorsQuery, MonitorBackend, SchoolContext};
use crate::error::{AssignmentError, AssignmentResult};
use crate::prompt::Prompter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Full,
    Partial,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityDecision {
    /// `narrowed` is set when blocked sessions were dropped from the request
    Proceed { indexes: Vec<usize>, narrowed: bool },
    Declined,
}

/// Booking-user ids and persisted subgroup ids behind `targets`, deduplicated
pub fn affected_ids(index: &SessionIndex, targets: &[usize]) -> (Vec<i64>, Vec<i64>) {
    let mut booking_users = BTreeSet::new();
    let mut subgroups = BTreeSet::new();
    for &i in targets {
        if let Some(subgroup) = index.subgroup_for(i) {
            booking_users.extend(subgroup.booking_users.iter().map(|b| b.id));
            subgroups.extend(subgroup.id);
        }
    }
    (booking_users.into_iter().collect(), subgroups.into_iter().collect())
}

/// One slot per target that resolves to a subgroup
pub fn build_slots(index: &SessionIndex, targets: &[usize]) -> Vec<AvailabilitySlot> {
    let course = index.course();
    targets
        .iter()
        .filter_map(|&i| {
            let session = index.session(i)?;
            let subgroup = index.subgroup_for(i)?;
            let (start, end) = session_time_window(
                &session.hour_start,
                session.hour_end.as_deref(),
                course.duration_minutes,
            );
            Some(AvailabilitySlot {
                session_index: i,
                date: session.date,
                label: slot_label(i, session.date, &start, &end),
                start_time: start,
                end_time: end,
                degree_id: subgroup.degree_id,
                sport_id: course.sport_id,
                context: SlotContext {
                    session_index: i,
                    course_date_id: session.id,
                    subgroup_id: subgroup.id,
                },
                reason: None,
            })
        })
        .collect()
}

/// Filters `targets` down to the sessions `monitor` can take.
///
/// No monitor means unassigning, which never conflicts. Blocked sessions are
/// listed to the user who decides whether to continue with the rest; when
/// nothing is left the attempt fails with [`AssignmentError::NoAvailability`].
/// A failed backend call is never read as "available".
pub async fn check_availability(
    backend: &dyn MonitorBackend,
    prompter: &dyn Prompter,
    monitor: Option<&Monitor>,
    index: &SessionIndex,
    targets: &[usize],
    school: &SchoolContext,
) -> AssignmentResult<AvailabilityDecision> {
    let Some(monitor) = monitor else {
        return Ok(AvailabilityDecision::Proceed { indexes: targets.to_vec(), narrowed: false });
    };

    let slots = build_slots(index, targets);
    let (booking_user_ids, subgroup_ids) = affected_ids(index, targets);
    let context = AvailabilityContext {
        booking_user_ids,
        subgroup_ids,
        course_id: index.course().id,
        school_id: school.school_id,
    };

    let result = backend
        .check_availability(monitor.id, &slots, &context)
        .await
        .map_err(|e| {
            error!(monitor_id = monitor.id, error = %e, "availability check failed");
            AssignmentError::from(e)
        })?;

    if result.blocked.is_empty() {
        debug!(
            monitor_id = monitor.id,
            sessions = targets.len(),
            "monitor available for every session"
        );
        return Ok(AvailabilityDecision::Proceed { indexes: targets.to_vec(), narrowed: false });
    }

    let available: Vec<usize> = result
        .available
        .iter()
        .map(|s| s.context.session_index)
        .filter(|i| targets.contains(i))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if available.is_empty() {
        warn!(monitor_id = monitor.id, "monitor blocked on every requested session");
        return Err(AssignmentError::NoAvailability { monitor_id: monitor.id });
    }

    let blocked_lines: Vec<String> = result
        .blocked
        .iter()
        .map(|s| match &s.reason {
            Some(reason) => format!("{}: {}", s.label, reason),
            None => s.label.clone(),
        })
        .collect();
    let message = format!(
        "{} is not available for {} of {} sessions:\n{}\n\nAssign the remaining {} sessions?",
        monitor.display_name(),
        result.blocked.len(),
        targets.len(),
        blocked_lines.join("\n"),
        available.len()
    );
    if !prompter.confirm("Monitor partially available", &message).await {
        debug!(monitor_id = monitor.id, "partial assignment declined");
        return Ok(AvailabilityDecision::Declined);
    }
    Ok(AvailabilityDecision::Proceed { indexes: available, narrowed: true })
}

/// Query for the monitors free during one session
pub fn available_monitors_query(
    index: &SessionIndex,
    session_index: usize,
    school: &SchoolContext,
) -> Option<AvailableMonitorsQuery> {
    let course = index.course();
    let session = index.session(session_index)?;
    let subgroup = index.subgroup_for(session_index)?;
    let (start_time, end_time) = session_time_window(
        &session.hour_start,
        session.hour_end.as_deref(),
        course.duration_minutes,
    );
    let (booking_user_ids, subgroup_ids) = affected_ids(index, &[session_index]);
    Some(AvailableMonitorsQuery {
        date: session.date,
        start_time,
        end_time,
        minimum_degree_id: subgroup.degree_id,
        sport_id: course.sport_id,
        booking_user_ids,
        subgroup_ids,
        course_id: course.id,
        school_id: school.school_id,
    })
}

/// Monitors free per session index, valid for the current selection cycle only
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    entries: HashMap<usize, Vec<Monitor>>,
}

impl AvailabilityCache {
    pub fn get(&self, session_index: usize) -> Option<&[Monitor]> {
        self.entries.get(&session_index).map(Vec::as_slice)
    }

    pub fn insert(&mut self, session_index: usize, monitors: Vec<Monitor>) {
        self.entries.insert(session_index, monitors);
    }

    pub fn invalidate(&mut self, indexes: &[usize]) {
        for i in indexes {
            self.entries.remove(i);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
