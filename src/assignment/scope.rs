use tracing::debug;

use super::session_index::SessionIndex;
use super::types::{AssignmentScope, ScopeKind, Session};

/// Scope actually applied; non-collective courses only support `Single`
pub fn effective_scope(scope: AssignmentScope, collective: bool) -> AssignmentScope {
    if !collective && scope.kind != ScopeKind::Single {
        debug!(requested = ?scope.kind, "non-collective course, scope coerced to single");
        return AssignmentScope::single();
    }
    scope
}

/// Inclusive `[start, end]` window of session indexes for `scope` around `reference`.
/// `None` when there is nothing to address.
pub fn resolve_window(
    scope: AssignmentScope,
    reference: usize,
    sessions: &[Session],
    collective: bool,
) -> Option<(usize, usize)> {
    let n = sessions.len();
    if n == 0 || reference >= n {
        return None;
    }
    let last = n - 1;
    let scope = effective_scope(scope, collective);
    if scope.kind == ScopeKind::Single || n <= 1 {
        return Some((reference, reference));
    }

    let window = match scope.kind {
        ScopeKind::Single => (reference, reference),
        ScopeKind::All => (0, last),
        ScopeKind::Interval => match (scope.start, scope.end) {
            (Some(start), Some(end)) if has_explicit_interval(scope) => {
                let (a, b) = (start.min(last), end.min(last));
                (a.min(b), a.max(b))
            }
            _ => interval_span(reference, sessions),
        },
        ScopeKind::From => (scope.start.unwrap_or(reference).min(last), last),
        ScopeKind::Range => {
            let start = scope.start.unwrap_or(reference).min(last);
            let end = scope.end.unwrap_or(reference).min(last);
            (start.min(end), start.max(end))
        }
    };
    Some(window)
}

/// Span of the sessions sharing the reference session's interval id.
/// Sessions without an interval id count as one interval.
fn interval_span(reference: usize, sessions: &[Session]) -> (usize, usize) {
    let interval = &sessions[reference].interval_id;
    let mut matching = sessions
        .iter()
        .enumerate()
        .filter(|(_, s)| &s.interval_id == interval)
        .map(|(i, _)| i);
    let first = matching.next().unwrap_or(reference);
    let last = matching.last().unwrap_or(first);
    (first, last)
}

fn has_explicit_interval(scope: AssignmentScope) -> bool {
    matches!((scope.start, scope.end), (Some(start), Some(end)) if start != end)
}

/// Ordered target indexes: the window, minus sessions without a resolvable subgroup
pub fn resolve_targets(
    scope: AssignmentScope,
    reference: usize,
    index: &SessionIndex,
) -> Vec<usize> {
    let course = index.course();
    let scope = effective_scope(scope, course.is_collective());
    let collective = course.is_collective();
    let Some((start, end)) = resolve_window(scope, reference, &course.sessions, collective) else {
        return Vec::new();
    };
    // a derived interval window may straddle sessions of other intervals
    let interval = (scope.kind == ScopeKind::Interval && !has_explicit_interval(scope))
        .then(|| &course.sessions[reference].interval_id);
    let targets: Vec<usize> = (start..=end)
        .filter(|&i| interval.map_or(true, |id| &course.sessions[i].interval_id == id))
        .filter(|&i| index.has_subgroup(i))
        .collect();
    debug!(?scope, reference, ?targets, "scope resolved");
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::session_index::tests::{course, session};
    use crate::assignment::types::CourseType;

    fn index(n: usize) -> SessionIndex {
        SessionIndex::new(course(n), 1, 0)
    }

    fn strictly_ordered_in_bounds(targets: &[usize], n: usize) -> bool {
        targets.windows(2).all(|w| w[0] < w[1]) && targets.iter().all(|&i| i < n)
    }

    #[test]
    fn single_scope_targets_reference_only() {
        let idx = index(6);
        assert_eq!(resolve_targets(AssignmentScope::single(), 3, &idx), vec![3]);
    }

    #[test]
    fn all_scope_targets_every_resolvable_session() {
        let mut c = course(5);
        c.sessions[2].course_subgroups.clear();
        let idx = SessionIndex::new(c, 1, 0);
        assert_eq!(resolve_targets(AssignmentScope::of(ScopeKind::All), 1, &idx), vec![0, 1, 3, 4]);
    }

    #[test]
    fn single_without_subgroup_is_empty() {
        let mut c = course(3);
        c.sessions[1].course_subgroups.clear();
        let idx = SessionIndex::new(c, 1, 0);
        assert!(resolve_targets(AssignmentScope::single(), 1, &idx).is_empty());
    }

    #[test]
    fn range_normalizes_and_clamps_bounds() {
        let idx = index(6);
        assert_eq!(resolve_targets(AssignmentScope::range(5, 2), 0, &idx), vec![2, 3, 4, 5]);
        assert_eq!(resolve_targets(AssignmentScope::range(4, 40), 0, &idx), vec![4, 5]);
        let open_end = AssignmentScope { kind: ScopeKind::Range, start: Some(1), end: None };
        assert_eq!(resolve_targets(open_end, 3, &idx), vec![1, 2, 3]);
    }

    #[test]
    fn from_scope_runs_to_the_end() {
        let idx = index(5);
        assert_eq!(resolve_targets(AssignmentScope::of(ScopeKind::From), 2, &idx), vec![2, 3, 4]);
        let explicit = AssignmentScope { kind: ScopeKind::From, start: Some(1), end: None };
        assert_eq!(resolve_targets(explicit, 3, &idx), vec![1, 2, 3, 4]);
    }

    #[test]
    fn interval_scope_follows_reference_interval() {
        let mut c = course(0);
        c.sessions = vec![
            session(0, Some("w1")),
            session(1, Some("w1")),
            session(2, Some("w2")),
            session(3, Some("w2")),
            session(4, Some("w2")),
        ];
        let idx = SessionIndex::new(c, 1, 0);
        let scope = AssignmentScope::of(ScopeKind::Interval);
        assert_eq!(resolve_targets(scope, 3, &idx), vec![2, 3, 4]);
        assert_eq!(resolve_targets(scope, 0, &idx), vec![0, 1]);
        let explicit = AssignmentScope { kind: ScopeKind::Interval, start: Some(3), end: Some(1) };
        assert_eq!(resolve_targets(explicit, 0, &idx), vec![1, 2, 3]);
    }

    #[test]
    fn interval_less_sessions_group_together() {
        let mut c = course(0);
        c.sessions = vec![session(0, None), session(1, Some("w1")), session(2, None)];
        let idx = SessionIndex::new(c, 1, 0);
        assert_eq!(resolve_targets(AssignmentScope::of(ScopeKind::Interval), 0, &idx), vec![0, 2]);
    }

    #[test]
    fn non_collective_course_forces_single() {
        let mut c = course(6);
        c.course_type = CourseType::Private;
        let idx = SessionIndex::new(c, 1, 0);
        for kind in [ScopeKind::All, ScopeKind::Range, ScopeKind::From, ScopeKind::Interval] {
            let scope = AssignmentScope { kind, start: Some(0), end: Some(5) };
            assert_eq!(resolve_targets(scope, 4, &idx), vec![4]);
        }
    }

    #[test]
    fn invalid_reference_or_empty_course() {
        assert!(resolve_targets(AssignmentScope::of(ScopeKind::All), 0, &index(0)).is_empty());
        assert!(resolve_targets(AssignmentScope::of(ScopeKind::All), 9, &index(3)).is_empty());
    }

    #[test]
    fn every_scope_yields_ordered_in_bounds_targets() {
        let n = 7;
        let idx = index(n);
        let kinds = [
            ScopeKind::Single,
            ScopeKind::Interval,
            ScopeKind::From,
            ScopeKind::Range,
            ScopeKind::All,
        ];
        let bounds = [(None, None), (Some(6), Some(1)), (Some(20), Some(2)), (Some(3), Some(3))];
        for kind in kinds {
            for reference in 0..n {
                for (start, end) in bounds {
                    let scope = AssignmentScope { kind, start, end };
                    let targets = resolve_targets(scope, reference, &idx);
                    assert!(
                        strictly_ordered_in_bounds(&targets, n),
                        "{:?} {} {:?}",
                        kind,
                        reference,
                        targets
                    );
                }
            }
        }
    }
}
