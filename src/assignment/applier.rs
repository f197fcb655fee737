use tracing::{error, info, warn};

use super::availability::affected_ids;
use super::session_index::SessionIndex;
use super::slot_utils::chunk_contiguous;
use super::types::{
    AssignmentOutcome, ChunkOutcome, Monitor, MonitorChanged, ScopeKind, TransferFailure,
};
use crate::backend::{BackendError, MonitorBackend, TransferPayload};
use crate::error::{AssignmentError, AssignmentResult};

/// True when the reference session's subgroup already has `monitor_id`
pub fn is_noop(index: &SessionIndex, reference: usize, monitor_id: Option<i64>) -> bool {
    index
        .subgroup_for(reference)
        .is_some_and(|s| s.monitor_id() == monitor_id)
}

fn classify(error: &BackendError) -> TransferFailure {
    match error {
        BackendError::Rejected { message } => TransferFailure::from_rejection(message),
        BackendError::NotFound(what) => TransferFailure::Conflict(format!("{} not found", what)),
        BackendError::Transport(message) => TransferFailure::Transport(message.clone()),
    }
}

/// Transfer body for `indexes`; the first index is the reference session.
/// Rejected locally when nothing persisted would be touched.
pub fn build_payload(
    index: &SessionIndex,
    monitor_id: Option<i64>,
    indexes: &[usize],
    scope: ScopeKind,
) -> AssignmentResult<TransferPayload> {
    let course = index.course();
    let reference = *indexes.first().ok_or(AssignmentError::Validation)?;
    let session = index.session(reference).ok_or(AssignmentError::InvalidSession(reference))?;
    let subgroup = index.subgroup_for(reference).ok_or(AssignmentError::NoSubgroup(reference))?;

    let (booking_users, subgroup_ids) = affected_ids(index, indexes);
    if booking_users.is_empty() && subgroup_ids.is_empty() {
        return Err(AssignmentError::Validation);
    }

    let dates: Vec<_> = indexes.iter().filter_map(|&i| index.session(i)).map(|s| s.date).collect();
    let start_date = dates.iter().min().copied().unwrap_or(session.date);
    let end_date = dates.iter().max().copied().unwrap_or(session.date);
    let scope = if course.is_collective() { scope } else { ScopeKind::Single };

    Ok(TransferPayload {
        monitor_id,
        booking_users,
        scope,
        start_date,
        end_date,
        course_id: course.id,
        subgroup_id: Some(subgroup.course_group_id),
        course_subgroup_id: subgroup.id,
        course_date_id: session.id,
        subgroup_ids,
    })
}

/// Writes the committed monitor into the local snapshot
fn commit_locally(
    index: &mut SessionIndex,
    indexes: &[usize],
    monitor: Option<&Monitor>,
    on_change: &mut dyn FnMut(MonitorChanged),
) {
    for &i in indexes {
        if let Some(subgroup) = index.subgroup_for_mut(i) {
            subgroup.monitor = monitor.cloned();
            subgroup.monitor_modified = true;
            on_change(MonitorChanged { session_index: i, monitor_id: monitor.map(|m| m.id) });
        }
    }
}

/// Persists `monitor` on `targets`.
///
/// Without `force_split` a single call covers every target under `scope`.
/// With it the targets are cut into contiguous runs, sent one after another
/// in ascending order as `Single`/`Range`; the first failing run stops the
/// sequence and earlier runs stay committed.
pub async fn apply_assignment(
    backend: &dyn MonitorBackend,
    index: &mut SessionIndex,
    monitor: Option<&Monitor>,
    targets: &[usize],
    scope: ScopeKind,
    force_split: bool,
    on_change: &mut dyn FnMut(MonitorChanged),
) -> AssignmentResult<AssignmentOutcome> {
    let mut outcome = AssignmentOutcome::default();
    if targets.is_empty() {
        return Ok(outcome);
    }
    let monitor_id = monitor.map(|m| m.id);

    let batches: Vec<(Vec<usize>, ScopeKind)> = if force_split {
        chunk_contiguous(targets)
            .into_iter()
            .map(|chunk| {
                let scope = if chunk.len() > 1 { ScopeKind::Range } else { ScopeKind::Single };
                (chunk, scope)
            })
            .collect()
    } else {
        vec![(targets.to_vec(), scope)]
    };

    // every payload is validated before the first call goes out
    let snapshot: &SessionIndex = index;
    let payloads = batches
        .iter()
        .map(|(chunk, scope)| build_payload(snapshot, monitor_id, chunk, *scope))
        .collect::<AssignmentResult<Vec<_>>>()?;

    for ((chunk, _), payload) in batches.into_iter().zip(payloads) {
        match backend.transfer_monitor(&payload).await {
            Ok(()) => {
                info!(?monitor_id, sessions = ?chunk, scope = ?payload.scope, "chunk committed");
                commit_locally(index, &chunk, monitor, on_change);
                outcome.committed_indexes.extend(&chunk);
                outcome.chunks.push(ChunkOutcome {
                    indexes: chunk,
                    scope: payload.scope,
                    failure: None,
                });
            }
            Err(e) => {
                let failure = classify(&e);
                match &failure {
                    TransferFailure::Transport(_) => {
                        error!(?monitor_id, sessions = ?chunk, error = %e, "transfer failed")
                    }
                    _ => warn!(?monitor_id, sessions = ?chunk, error = %e, "transfer rejected"),
                }
                outcome.chunks.push(ChunkOutcome {
                    indexes: chunk,
                    scope: payload.scope,
                    failure: Some(failure.clone()),
                });
                outcome.first_failure = Some(failure);
                break;
            }
        }
    }
    Ok(outcome)
}

impl AssignmentOutcome {
    /// The first failure as an error, for callers that report it
    pub fn conflict(&self) -> Option<AssignmentError> {
        self.first_failure.clone().map(AssignmentError::TransferConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::session_index::tests::course;
    use crate::assignment::types::CourseType;
    use crate::backend::memory::InMemoryBackend;

    fn monitor() -> Monitor {
        Monitor { id: 42, first_name: "Ana".to_string(), last_name: "Ruiz".to_string() }
    }

    fn setup(n: usize) -> (InMemoryBackend, SessionIndex) {
        let backend = InMemoryBackend::new()
            .with_course(course(n))
            .with_monitor(monitor(), Vec::new());
        (backend, SessionIndex::new(course(n), 1, 0))
    }

    /// Assigns the test monitor, ignoring change notifications
    async fn assign(
        backend: &InMemoryBackend,
        index: &mut SessionIndex,
        targets: &[usize],
        scope: ScopeKind,
        split: bool,
    ) -> AssignmentResult<AssignmentOutcome> {
        let m = monitor();
        apply_assignment(backend, index, Some(&m), targets, scope, split, &mut |_| {}).await
    }

    #[tokio::test]
    async fn single_call_without_split() {
        let (backend, mut index) = setup(6);
        let m = monitor();
        let mut changes = Vec::new();
        let targets = [2, 3, 4, 5];
        let mut record = |c: MonitorChanged| changes.push(c);
        let outcome = apply_assignment(
            &backend,
            &mut index,
            Some(&m),
            &targets,
            ScopeKind::Range,
            false,
            &mut record,
        )
        .await
        .unwrap();
        assert_eq!(outcome.committed_indexes, vec![2, 3, 4, 5]);
        let transfers = backend.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].scope, ScopeKind::Range);
        assert_eq!(transfers[0].subgroup_ids, vec![3001, 4001, 5001, 6001]);
        assert_eq!(transfers[0].start_date, index.session(2).unwrap().date);
        assert_eq!(transfers[0].end_date, index.session(5).unwrap().date);
        assert_eq!(changes.len(), 4);
        assert!(index.subgroup_for(4).unwrap().monitor_modified);
    }

    #[tokio::test]
    async fn split_runs_are_sequential_single_or_range() {
        let (backend, mut index) = setup(6);
        let outcome =
            assign(&backend, &mut index, &[5, 2, 3], ScopeKind::Range, true).await.unwrap();
        assert_eq!(outcome.committed_indexes, vec![2, 3, 5]);
        let scopes: Vec<_> = backend.transfers().iter().map(|t| t.scope).collect();
        assert_eq!(scopes, vec![ScopeKind::Range, ScopeKind::Single]);
    }

    #[tokio::test]
    async fn first_failure_halts_later_chunks() {
        let (backend, mut index) = setup(8);
        let overlap = BackendError::Rejected { message: "Overlap with booking 77".to_string() };
        backend.fail_transfer_call(2, overlap);
        let outcome = assign(&backend, &mut index, &[0, 1, 3, 5, 6], ScopeKind::All, true)
            .await
            .unwrap();
        assert_eq!(outcome.committed_indexes, vec![0, 1]);
        assert!(matches!(outcome.first_failure, Some(TransferFailure::MonitorBusy(_))));
        assert_eq!(backend.transfers().len(), 2);
        assert!(outcome.is_partial());
        assert!(index.subgroup_for(1).unwrap().monitor_modified);
        assert!(!index.subgroup_for(3).unwrap().monitor_modified);
    }

    #[tokio::test]
    async fn generic_rejection_is_a_conflict() {
        let (backend, mut index) = setup(3);
        let full = BackendError::Rejected { message: "subgroup full".to_string() };
        backend.fail_transfer_call(1, full);
        let outcome = assign(&backend, &mut index, &[0], ScopeKind::Single, false).await.unwrap();
        assert!(outcome.is_total_failure());
        assert!(matches!(
            outcome.conflict(),
            Some(AssignmentError::TransferConflict(TransferFailure::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn nothing_persisted_is_rejected_before_any_call() {
        let mut c = course(3);
        for s in &mut c.sessions {
            for g in &mut s.course_subgroups {
                g.id = None;
                g.booking_users.clear();
            }
        }
        let backend = InMemoryBackend::new()
            .with_course(c.clone())
            .with_monitor(monitor(), Vec::new());
        let mut index = SessionIndex::new(c, 1, 0);
        let err = assign(&backend, &mut index, &[0, 1], ScopeKind::Range, false).await.unwrap_err();
        assert!(matches!(err, AssignmentError::Validation));
        assert!(backend.transfers().is_empty());
    }

    #[test]
    fn non_collective_payload_is_single() {
        let mut c = course(3);
        c.course_type = CourseType::Private;
        let index = SessionIndex::new(c, 1, 0);
        let payload = build_payload(&index, Some(1), &[0, 1], ScopeKind::All).unwrap();
        assert_eq!(payload.scope, ScopeKind::Single);
        assert_eq!(payload.course_date_id, 1);
        assert_eq!(payload.course_subgroup_id, Some(1001));
    }

    #[test]
    fn noop_when_monitor_already_set() {
        let mut index = SessionIndex::new(course(3), 1, 0);
        let m = monitor();
        assert!(!is_noop(&index, 1, Some(m.id)));
        index.subgroup_for_mut(1).unwrap().monitor = Some(m.clone());
        assert!(is_noop(&index, 1, Some(m.id)));
        assert!(is_noop(&index, 0, None));
    }
}
