use tracing::debug;

use super::types::{Course, Session, Subgroup};

/// Finds the subgroup at `position` among the subgroups of degree `level`.
/// Session-level subgroups win; the course-group lists are the fallback.
pub fn resolve_subgroup(session: &Session, level: i64, position: usize) -> Option<&Subgroup> {
    session
        .course_subgroups
        .iter()
        .filter(|s| s.degree_id == level)
        .nth(position)
        .or_else(|| {
            session
                .course_groups
                .iter()
                .filter(|g| g.degree_id == level)
                .flat_map(|g| g.subgroups.iter())
                .filter(|s| s.degree_id == level)
                .nth(position)
        })
}

/// Mutable twin of [`resolve_subgroup`], same lookup order
pub fn resolve_subgroup_mut(
    session: &mut Session,
    level: i64,
    position: usize,
) -> Option<&mut Subgroup> {
    let in_session = session
        .course_subgroups
        .iter()
        .filter(|s| s.degree_id == level)
        .count()
        > position;
    if in_session {
        return session
            .course_subgroups
            .iter_mut()
            .filter(|s| s.degree_id == level)
            .nth(position);
    }
    session
        .course_groups
        .iter_mut()
        .filter(|g| g.degree_id == level)
        .flat_map(|g| g.subgroups.iter_mut())
        .filter(|s| s.degree_id == level)
        .nth(position)
}

/// In-memory projection of a course's sessions for one level/position
pub struct SessionIndex {
    course: Course,
    level: i64,
    position: usize,
    interval_filter: Option<String>,
    filtered: Option<Vec<usize>>,
}

impl SessionIndex {
    pub fn new(course: Course, level: i64, position: usize) -> Self {
        Self {
            course,
            level,
            position,
            interval_filter: None,
            filtered: None,
        }
    }

    pub fn course(&self) -> &Course {
        &self.course
    }

    pub fn level(&self) -> i64 {
        self.level
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.course.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.course.sessions.is_empty()
    }

    pub fn session(&self, index: usize) -> Option<&Session> {
        self.course.sessions.get(index)
    }

    pub fn interval_filter(&self) -> Option<&str> {
        self.interval_filter.as_deref()
    }

    /// Returns true when the filter actually changed
    pub fn set_interval_filter(&mut self, filter: Option<String>) -> bool {
        if self.interval_filter == filter {
            return false;
        }
        debug!(?filter, "interval filter changed");
        self.interval_filter = filter;
        self.filtered = None;
        true
    }

    /// Swaps in a freshly loaded snapshot; every index handed out before is stale
    pub fn replace_course(&mut self, course: Course) {
        self.course = course;
        self.filtered = None;
    }

    /// Indexes of the sessions visible under the active interval filter
    pub fn filtered_indexes(&mut self) -> &[usize] {
        if self.filtered.is_none() {
            let indexes = self
                .course
                .sessions
                .iter()
                .enumerate()
                .filter(|(_, s)| match &self.interval_filter {
                    Some(filter) => s.interval_id.as_deref() == Some(filter.as_str()),
                    None => true,
                })
                .map(|(i, _)| i)
                .collect();
            self.filtered = Some(indexes);
        }
        self.filtered.as_deref().unwrap_or(&[])
    }

    pub fn sessions_for_active_filter(&mut self) -> Vec<(&Session, usize)> {
        let indexes = self.filtered_indexes().to_vec();
        indexes
            .into_iter()
            .filter_map(|i| self.course.sessions.get(i).map(|s| (s, i)))
            .collect()
    }

    pub fn subgroup_for(&self, index: usize) -> Option<&Subgroup> {
        self.course
            .sessions
            .get(index)
            .and_then(|s| resolve_subgroup(s, self.level, self.position))
    }

    pub fn subgroup_for_mut(&mut self, index: usize) -> Option<&mut Subgroup> {
        let (level, position) = (self.level, self.position);
        self.course
            .sessions
            .get_mut(index)
            .and_then(|s| resolve_subgroup_mut(s, level, position))
    }

    pub fn has_subgroup(&self, index: usize) -> bool {
        self.subgroup_for(index).is_some()
    }
}
