//! Collaborator contract for the booking backend.
//!
//! The engine never talks HTTP itself; it is handed something that
//! implements [`MonitorBackend`]. [`memory::InMemoryBackend`] backs the CLI,
//! the web surface and the tests.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assignment::types::{
    AvailabilityCheckResult, AvailabilitySlot, Course, Monitor, ScopeKind,
};

pub use memory::InMemoryBackend;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Transport(String),
    /// The backend answered but refused the operation
    #[error("{message}")]
    Rejected { message: String },
    #[error("{0} not found")]
    NotFound(String),
}

/// School/user scope for backend calls, passed in explicitly by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolContext {
    pub school_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableMonitorsQuery {
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub minimum_degree_id: i64,
    pub sport_id: i64,
    pub booking_user_ids: Vec<i64>,
    pub subgroup_ids: Vec<i64>,
    pub course_id: i64,
    pub school_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityContext {
    pub booking_user_ids: Vec<i64>,
    pub subgroup_ids: Vec<i64>,
    pub course_id: i64,
    pub school_id: i64,
}

/// Body of the transfer-monitor call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    /// `None` unassigns the monitor
    pub monitor_id: Option<i64>,
    pub booking_users: Vec<i64>,
    pub scope: ScopeKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub course_id: i64,
    pub subgroup_id: Option<i64>,
    pub course_subgroup_id: Option<i64>,
    pub course_date_id: i64,
    pub subgroup_ids: Vec<i64>,
}

#[async_trait]
pub trait MonitorBackend: Send + Sync {
    async fn load_course(&self, course_id: i64) -> Result<Course, BackendError>;

    /// Monitors free for one session window
    async fn available_monitors(
        &self,
        query: &AvailableMonitorsQuery,
    ) -> Result<Vec<Monitor>, BackendError>;

    async fn check_availability(
        &self,
        monitor_id: i64,
        slots: &[AvailabilitySlot],
        context: &AvailabilityContext,
    ) -> Result<AvailabilityCheckResult, BackendError>;

    async fn transfer_monitor(&self, payload: &TransferPayload) -> Result<(), BackendError>;
}
