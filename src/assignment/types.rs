use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Course kinds known to the booking backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseType {
    Collective,
    Private,
    Activity,
}

/// A staff member that can be put in charge of a subgroup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl Monitor {
    pub fn display_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingUser {
    pub id: i64,
    pub client_id: i64,
}

/// Roster of participants at one level for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgroup {
    /// `None` until the backend has persisted the subgroup
    pub id: Option<i64>,
    pub degree_id: i64,
    pub course_group_id: i64,
    pub course_date_id: i64,
    pub max_participants: u32,
    pub monitor: Option<Monitor>,
    #[serde(default)]
    pub monitor_modified: bool,
    #[serde(default)]
    pub booking_users: Vec<BookingUser>,
}

impl Subgroup {
    pub fn monitor_id(&self) -> Option<i64> {
        self.monitor.as_ref().map(|m| m.id)
    }
}

/// Group-level container, used when a session payload carries no subgroups of its own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseGroup {
    pub id: i64,
    pub degree_id: i64,
    #[serde(default)]
    pub subgroups: Vec<Subgroup>,
}

/// One dated, timed occurrence of a course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub date: NaiveDate,
    pub hour_start: String,
    pub hour_end: Option<String>,
    pub interval_id: Option<String>,
    #[serde(default)]
    pub course_subgroups: Vec<Subgroup>,
    #[serde(default)]
    pub course_groups: Vec<CourseGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInterval {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub course_type: CourseType,
    pub sport_id: i64,
    /// Used when a session has no explicit end time
    pub duration_minutes: u32,
    #[serde(default)]
    pub intervals: Vec<CourseInterval>,
    pub sessions: Vec<Session>,
}

impl Course {
    pub fn is_collective(&self) -> bool {
        self.course_type == CourseType::Collective
    }

    pub fn interval_name(&self, interval_id: &str) -> Option<&str> {
        self.intervals
            .iter()
            .find(|i| i.id == interval_id)
            .map(|i| i.name.as_str())
    }
}

/// Breadth of sessions an assignment should affect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Single,
    Interval,
    From,
    Range,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentScope {
    pub kind: ScopeKind,
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl AssignmentScope {
    pub fn single() -> Self {
        Self::of(ScopeKind::Single)
    }

    pub fn of(kind: ScopeKind) -> Self {
        Self { kind, start: None, end: None }
    }

    pub fn range(start: usize, end: usize) -> Self {
        Self { kind: ScopeKind::Range, start: Some(start), end: Some(end) }
    }
}

impl Default for AssignmentScope {
    fn default() -> Self {
        Self::single()
    }
}

/// Correlates a slot sent to the backend with the session it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotContext {
    pub session_index: usize,
    pub course_date_id: i64,
    pub subgroup_id: Option<i64>,
}

/// Unit checked against a monitor's calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub session_index: usize,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub degree_id: i64,
    pub sport_id: i64,
    pub label: String,
    pub context: SlotContext,
    /// Filled by the backend for blocked slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilityCheckResult {
    pub available: Vec<AvailabilitySlot>,
    pub blocked: Vec<AvailabilitySlot>,
}

/// Why a chunk's transfer call did not commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TransferFailure {
    /// The monitor already teaches an overlapping booking
    MonitorBusy(String),
    Conflict(String),
    Transport(String),
}

impl TransferFailure {
    /// Classifies a backend rejection message
    pub fn from_rejection(message: &str) -> Self {
        if message.to_lowercase().contains("overlap") {
            TransferFailure::MonitorBusy(message.to_string())
        } else {
            TransferFailure::Conflict(message.to_string())
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            TransferFailure::MonitorBusy(_) => {
                "The monitor is busy with another booking at that time"
            }
            TransferFailure::Conflict(_) => {
                "The monitor could not be assigned because of a conflict"
            }
            TransferFailure::Transport(_) => "Something went wrong while saving the assignment",
        }
    }
}

impl std::fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferFailure::MonitorBusy(m) => write!(f, "monitor busy: {}", m),
            TransferFailure::Conflict(m) => write!(f, "conflict: {}", m),
            TransferFailure::Transport(m) => write!(f, "transport: {}", m),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub indexes: Vec<usize>,
    pub scope: ScopeKind,
    pub failure: Option<TransferFailure>,
}

impl ChunkOutcome {
    pub fn committed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of applying one assignment, possibly over several chunks
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentOutcome {
    pub committed_indexes: Vec<usize>,
    pub first_failure: Option<TransferFailure>,
    pub chunks: Vec<ChunkOutcome>,
}

impl AssignmentOutcome {
    pub fn is_total_failure(&self) -> bool {
        self.committed_indexes.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.committed_indexes.is_empty() && self.first_failure.is_some()
    }
}

/// Emitted once per session whose subgroup monitor changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorChanged {
    pub session_index: usize,
    pub monitor_id: Option<i64>,
}
