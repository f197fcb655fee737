//! One open view of a course's subgroup schedule.
//!
//! A [`CourseView`] owns its session snapshot, availability cache and legend.
//! An assignment attempt walks `Idle → ScopeResolved → AvailabilityChecked →
//! Applying → Idle`; only one attempt per view may be in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::applier::{apply_assignment, is_noop};
use super::availability::{
    available_monitors_query, check_availability, AvailabilityCache, AvailabilityDecision,
    AvailabilityStatus,
};
use super::legend::Legend;
use super::scope::{effective_scope, resolve_targets};
use super::session_index::SessionIndex;
use super::slot_utils::SlotKey;
use super::sync::{new_instance_id, AssignmentChanged, SyncBus};
use super::types::{AssignmentOutcome, AssignmentScope, Course, Monitor, MonitorChanged};
use crate::backend::{MonitorBackend, SchoolContext};
use crate::error::{AssignmentError, AssignmentResult};
use crate::prompt::{Notice, Prompter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    Single,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum AssignmentPhase {
    Idle,
    ScopeResolved,
    AvailabilityChecked(AvailabilityStatus),
    Applying(ApplyMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    NothingToAssign,
    ScopeDeclined,
    AvailabilityDeclined,
    NoneAvailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    /// The monitor was already assigned
    NoOp,
    Aborted { reason: AbortReason },
    Applied { outcome: AssignmentOutcome },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub index: usize,
    pub session_id: i64,
    pub date: NaiveDate,
    pub hour_start: String,
    pub hour_end: Option<String>,
    pub interval_id: Option<String>,
    pub monitor: Option<Monitor>,
    pub student_count: usize,
    pub modified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalHeader {
    pub interval_id: Option<String>,
    pub name: String,
    pub first_index: usize,
    pub session_count: usize,
}

/// Clears the in-flight flag when the attempt ends, even if its future is dropped
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(Arc::clone(flag)))
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CourseView {
    instance_id: String,
    school: SchoolContext,
    backend: Arc<dyn MonitorBackend>,
    prompter: Arc<dyn Prompter>,
    index: SessionIndex,
    scope: AssignmentScope,
    selected: Option<usize>,
    selected_monitor: Option<i64>,
    availability: AvailabilityCache,
    legend: Legend,
    bus: SyncBus,
    sync_rx: broadcast::Receiver<AssignmentChanged>,
    changes: broadcast::Sender<MonitorChanged>,
    in_flight: Arc<AtomicBool>,
    phase: AssignmentPhase,
}

impl CourseView {
    pub fn new(
        course: Course,
        level: i64,
        position: usize,
        school: SchoolContext,
        backend: Arc<dyn MonitorBackend>,
        prompter: Arc<dyn Prompter>,
        bus: SyncBus,
    ) -> Self {
        let mut index = SessionIndex::new(course, level, position);
        let mut legend = Legend::default();
        legend.recompute(&mut index, None);
        let (changes, _) = broadcast::channel(256);
        let view = Self {
            instance_id: new_instance_id(),
            school,
            backend,
            prompter,
            index,
            scope: AssignmentScope::single(),
            selected: None,
            selected_monitor: None,
            availability: AvailabilityCache::default(),
            legend,
            sync_rx: bus.subscribe(),
            bus,
            changes,
            in_flight: Arc::new(AtomicBool::new(false)),
            phase: AssignmentPhase::Idle,
        };
        debug!(instance_id = %view.instance_id, course_id = view.course_id(), "course view opened");
        view
    }

    /// Loads the course snapshot from the backend and opens a view on it
    pub async fn open(
        course_id: i64,
        level: i64,
        position: usize,
        school: SchoolContext,
        backend: Arc<dyn MonitorBackend>,
        prompter: Arc<dyn Prompter>,
        bus: SyncBus,
    ) -> AssignmentResult<Self> {
        let course = backend.load_course(course_id).await?;
        Ok(Self::new(course, level, position, school, backend, prompter, bus))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn course_id(&self) -> i64 {
        self.index.course().id
    }

    pub fn course(&self) -> &Course {
        self.index.course()
    }

    pub fn phase(&self) -> AssignmentPhase {
        self.phase
    }

    pub fn scope(&self) -> AssignmentScope {
        self.scope
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_monitor(&self) -> Option<i64> {
        self.selected_monitor
    }

    pub fn legend(&self) -> &Legend {
        &self.legend
    }

    /// Set while an assignment is being saved; readable without borrowing the view
    pub fn in_flight_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.in_flight)
    }

    pub fn cached_monitors(&self, session_index: usize) -> Option<&[Monitor]> {
        self.availability.get(session_index)
    }

    /// Per-session monitor change notifications
    pub fn subscribe_changes(&self) -> broadcast::Receiver<MonitorChanged> {
        self.changes.subscribe()
    }

    /// Selects the reference session and returns the monitors free for it
    pub async fn on_select_date(&mut self, session_index: usize) -> AssignmentResult<Vec<Monitor>> {
        if self.index.session(session_index).is_none() {
            return Err(AssignmentError::InvalidSession(session_index));
        }
        let subgroup = self
            .index
            .subgroup_for(session_index)
            .ok_or(AssignmentError::NoSubgroup(session_index))?;
        self.selected = Some(session_index);
        self.selected_monitor = subgroup.monitor_id();
        self.load_availability(session_index).await
    }

    async fn load_availability(&mut self, session_index: usize) -> AssignmentResult<Vec<Monitor>> {
        if let Some(cached) = self.availability.get(session_index) {
            return Ok(cached.to_vec());
        }
        let query = available_monitors_query(&self.index, session_index, &self.school)
            .ok_or(AssignmentError::NoSubgroup(session_index))?;
        let monitors = self.backend.available_monitors(&query).await?;
        debug!(session_index, monitors = monitors.len(), "availability loaded");
        self.availability.insert(session_index, monitors.clone());
        Ok(monitors)
    }

    /// Stores the scope for the next attempt; non-collective courses stay on `Single`
    pub fn on_assignment_scope_change(&mut self, scope: AssignmentScope) -> AssignmentScope {
        self.scope = effective_scope(scope, self.index.course().is_collective());
        self.scope
    }

    pub fn set_interval_filter(&mut self, filter: Option<String>) {
        if self.index.set_interval_filter(filter) {
            self.availability.clear();
            self.legend.recompute(&mut self.index, None);
        }
    }

    /// Assigns (or with `None` removes) a monitor on the selected session and
    /// every other session the current scope reaches.
    pub async fn on_monitor_selection_change(
        &mut self,
        monitor_id: Option<i64>,
    ) -> AssignmentResult<AttemptResult> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            warn!(
                instance_id = %self.instance_id,
                restored = ?self.selected_monitor,
                "assignment already in flight"
            );
            return Err(AssignmentError::Busy);
        };
        let result = self.run_attempt(monitor_id).await;
        self.phase = AssignmentPhase::Idle;
        if let Err(e) = &result {
            self.prompter.notify(Notice::error(e.user_message()));
        }
        result
    }

    async fn run_attempt(&mut self, monitor_id: Option<i64>) -> AssignmentResult<AttemptResult> {
        let reference = self.selected.ok_or(AssignmentError::NoSessionSelected)?;
        // the current monitor usually shows as busy in its own class
        if is_noop(&self.index, reference, monitor_id) {
            debug!(reference, ?monitor_id, "monitor already assigned");
            return Ok(AttemptResult::NoOp);
        }

        let monitor = match monitor_id {
            Some(id) => {
                let free = self.load_availability(reference).await?;
                match free.into_iter().find(|m| m.id == id) {
                    Some(m) => Some(m),
                    None => return Err(AssignmentError::NoAvailability { monitor_id: id }),
                }
            }
            None => None,
        };

        let targets = resolve_targets(self.scope, reference, &self.index);
        self.phase = AssignmentPhase::ScopeResolved;
        if targets.is_empty() {
            return Ok(AttemptResult::Aborted { reason: AbortReason::NothingToAssign });
        }

        if targets.len() > 1 {
            let who = monitor.as_ref().map_or("No monitor".to_string(), Monitor::display_name);
            let message = format!("{} will be set on {} sessions.", who, targets.len());
            if !self.prompter.confirm("Apply to several sessions", &message).await {
                return Ok(AttemptResult::Aborted { reason: AbortReason::ScopeDeclined });
            }
        }

        let decision = check_availability(
            self.backend.as_ref(),
            self.prompter.as_ref(),
            monitor.as_ref(),
            &self.index,
            &targets,
            &self.school,
        )
        .await;
        let (filtered, narrowed) = match decision {
            Ok(AvailabilityDecision::Proceed { indexes, narrowed }) => (indexes, narrowed),
            Ok(AvailabilityDecision::Declined) => {
                self.phase = AssignmentPhase::AvailabilityChecked(AvailabilityStatus::Partial);
                return Ok(AttemptResult::Aborted { reason: AbortReason::AvailabilityDeclined });
            }
            Err(e @ AssignmentError::NoAvailability { .. }) => {
                self.phase = AssignmentPhase::AvailabilityChecked(AvailabilityStatus::None);
                self.prompter.notify(Notice::error(e.user_message()));
                return Ok(AttemptResult::Aborted { reason: AbortReason::NoneAvailable });
            }
            Err(e) => return Err(e),
        };
        let status = if narrowed { AvailabilityStatus::Partial } else { AvailabilityStatus::Full };
        self.phase = AssignmentPhase::AvailabilityChecked(status);

        let mode = if narrowed { ApplyMode::Chunked } else { ApplyMode::Single };
        self.phase = AssignmentPhase::Applying(mode);
        let backend = Arc::clone(&self.backend);
        let changes = self.changes.clone();
        let outcome = apply_assignment(
            backend.as_ref(),
            &mut self.index,
            monitor.as_ref(),
            &filtered,
            self.scope.kind,
            narrowed,
            &mut |change: MonitorChanged| {
                // nobody listening is fine
                let _ = changes.send(change);
            },
        )
        .await?;

        self.finish(monitor.as_ref(), &outcome).await;
        Ok(AttemptResult::Applied { outcome })
    }

    async fn finish(&mut self, monitor: Option<&Monitor>, outcome: &AssignmentOutcome) {
        let committed = &outcome.committed_indexes;
        if !committed.is_empty() {
            self.selected_monitor = monitor.map(|m| m.id);
            self.availability.invalidate(committed);
            let event = AssignmentChanged {
                source_instance_id: self.instance_id.clone(),
                course_id: self.course_id(),
                monitor_id: monitor.map(|m| m.id),
                affected_slot_keys: self.slot_keys(committed),
            };
            let receivers = self.bus.publish(event);
            info!(
                instance_id = %self.instance_id,
                sessions = ?committed,
                receivers,
                "assignment committed"
            );
            let message = match monitor {
                Some(m) => {
                    format!("{} assigned to {} session(s)", m.display_name(), committed.len())
                }
                None => format!("Monitor removed from {} session(s)", committed.len()),
            };
            self.prompter.notify(Notice::success(message));
        }
        if let Some(conflict) = outcome.conflict() {
            self.prompter.notify(Notice::error(conflict.user_message()));
        }

        self.legend.recompute(&mut self.index, None);
        if let Some(selected) = self.selected {
            if let Err(e) = self.load_availability(selected).await {
                warn!(selected, error = %e, "could not reload availability");
            }
        }
    }

    fn slot_keys(&self, indexes: &[usize]) -> Vec<SlotKey> {
        indexes
            .iter()
            .filter_map(|&i| self.index.session(i))
            .map(|s| SlotKey::new(s.date, self.index.level(), self.index.position()))
            .collect()
    }

    /// Applies a peer's event. Returns false when the event was ignored.
    pub async fn handle_sync_event(&mut self, event: &AssignmentChanged) -> bool {
        if !event.concerns(&self.instance_id, self.course_id()) {
            return false;
        }
        debug!(
            instance_id = %self.instance_id,
            source = %event.source_instance_id,
            "peer assignment received"
        );
        self.refresh_after_peer_change().await;
        true
    }

    /// Processes every pending peer event; returns how many were relevant
    pub async fn drain_sync_events(&mut self) -> usize {
        let mut relevant = 0;
        loop {
            match self.sync_rx.try_recv() {
                Ok(event) => {
                    if event.concerns(&self.instance_id, self.course_id()) {
                        relevant += 1;
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(instance_id = %self.instance_id, skipped, "sync events lagged");
                    relevant += 1;
                }
                Err(_) => break,
            }
        }
        if relevant > 0 {
            self.refresh_after_peer_change().await;
        }
        relevant
    }

    async fn refresh_after_peer_change(&mut self) {
        self.availability.clear();
        match self.backend.load_course(self.course_id()).await {
            Ok(course) => self.index.replace_course(course),
            Err(e) => warn!(course_id = self.course_id(), error = %e, "course reload failed"),
        }
        if let Some(selected) = self.selected {
            if let Err(e) = self.load_availability(selected).await {
                warn!(selected, error = %e, "could not reload availability");
            }
        }
        self.legend.recompute(&mut self.index, None);
    }

    /// Sessions under the active filter that have a subgroup for this level/position
    pub fn get_dates_for_subgroup(&mut self) -> Vec<SessionEntry> {
        let indexes = self.index.filtered_indexes().to_vec();
        indexes
            .into_iter()
            .filter_map(|i| {
                let session = self.index.session(i)?;
                let subgroup = self.index.subgroup_for(i)?;
                Some(SessionEntry {
                    index: i,
                    session_id: session.id,
                    date: session.date,
                    hour_start: session.hour_start.clone(),
                    hour_end: session.hour_end.clone(),
                    interval_id: session.interval_id.clone(),
                    monitor: subgroup.monitor.clone(),
                    student_count: subgroup.booking_users.len(),
                    modified: self.legend.is_modified(i),
                })
            })
            .collect()
    }

    pub fn get_student_count(&self, session_index: usize) -> usize {
        self.index
            .subgroup_for(session_index)
            .map_or(0, |s| s.booking_users.len())
    }

    pub fn has_multiple_intervals(&self) -> bool {
        self.get_interval_headers().len() > 1
    }

    /// One header per distinct interval, in order of first appearance
    pub fn get_interval_headers(&self) -> Vec<IntervalHeader> {
        let course = self.index.course();
        let mut headers: Vec<IntervalHeader> = Vec::new();
        for (i, session) in course.sessions.iter().enumerate() {
            let existing = headers.iter_mut().find(|h| h.interval_id == session.interval_id);
            if let Some(header) = existing {
                header.session_count += 1;
                continue;
            }
            let name = session
                .interval_id
                .as_deref()
                .and_then(|id| course.interval_name(id))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Interval {}", headers.len() + 1));
            headers.push(IntervalHeader {
                interval_id: session.interval_id.clone(),
                name,
                first_index: i,
                session_count: 1,
            });
        }
        headers
    }
}
