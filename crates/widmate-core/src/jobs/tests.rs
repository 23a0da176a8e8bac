use std::collections::HashSet;
use std::sync::Arc;

use super::*;
use crate::error::ServiceError;

#[test]
fn create_starts_pending() {
    let store = JobStore::new();
    let id = store.create("https://example.com/v");
    let job = store.get(id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0.0);
    assert_eq!(job.source_url, "https://example.com/v");
    assert!(job.output_path.is_none());
}

#[test]
fn get_unknown_is_not_found() {
    let store = JobStore::new();
    let err = store.get(uuid::Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[test]
fn terminal_states_reject_further_mutation() {
    let store = JobStore::new();
    let id = store.create("https://example.com/v");
    store.mark_running(id).unwrap();
    let done = store.complete(id, Some("/tmp/a.mp4".into())).unwrap();

    assert!(matches!(
        store.cancel(id),
        Err(ServiceError::InvalidTransition { .. })
    ));
    assert!(matches!(
        store.fail(id, "late"),
        Err(ServiceError::InvalidTransition { .. })
    ));
    assert!(store.update(id, |j| j.progress = 10.0).is_err());
    assert_eq!(store.get(id).unwrap(), done);
}

#[test]
fn progress_never_goes_backwards_while_running() {
    let store = JobStore::new();
    let id = store.create("https://example.com/v");
    store.mark_running(id).unwrap();
    store.update(id, |j| j.progress = 40.0).unwrap();
    let job = store.update(id, |j| j.progress = 25.0).unwrap();
    assert_eq!(job.progress, 40.0);
    let job = store.update(id, |j| j.progress = 250.0).unwrap();
    assert_eq!(job.progress, 100.0);
}

#[test]
fn updated_at_strictly_advances() {
    let store = JobStore::new();
    let id = store.create("https://example.com/v");
    let before = store.get(id).unwrap().updated_at;
    let a = store.mark_running(id).unwrap().updated_at;
    let b = store.update(id, |j| j.speed = Some("1MiB/s".into())).unwrap().updated_at;
    assert!(a > before);
    assert!(b > a);
}

#[test]
fn invalid_transitions_are_rejected_and_not_committed() {
    let store = JobStore::new();
    let id = store.create("https://example.com/v");
    // pending -> completed skips running
    assert!(store.complete(id, None).is_err());
    // error field outside failed
    assert!(store.update(id, |j| j.error = Some("x".into())).is_err());
    // immutable url
    assert!(store
        .update(id, |j| j.source_url = "https://other".into())
        .is_err());
    assert_eq!(store.get(id).unwrap().status, JobStatus::Pending);
}

#[test]
fn terminal_transition_clears_speed_and_eta() {
    let store = JobStore::new();
    let id = store.create("https://example.com/v");
    store.mark_running(id).unwrap();
    store
        .update(id, |j| {
            j.speed = Some("2MiB/s".into());
            j.eta = Some("00:10".into());
        })
        .unwrap();
    let job = store.fail(id, "boom").unwrap();
    assert_eq!(job.error.as_deref(), Some("boom"));
    assert!(job.speed.is_none());
    assert!(job.eta.is_none());
}

#[test]
fn parallel_creates_yield_distinct_ids() {
    let store = Arc::new(JobStore::new());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                (0..50)
                    .map(|i| store.create(&format!("https://example.com/{i}")))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut ids = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(ids.insert(id));
        }
    }
    assert_eq!(ids.len(), 800);
    assert_eq!(store.len(), 800);
}

#[test]
fn purge_removes_exactly_terminal_jobs() {
    let store = JobStore::new();
    let pending = store.create("https://example.com/1");
    let running = store.create("https://example.com/2");
    store.mark_running(running).unwrap();
    let completed = store.create("https://example.com/3");
    store.mark_running(completed).unwrap();
    store.complete(completed, Some("/d/x.mp4".into())).unwrap();
    let failed = store.create("https://example.com/4");
    store.fail(failed, "nope").unwrap();
    let cancelled = store.create("https://example.com/5");
    store.cancel(cancelled).unwrap();

    assert_eq!(store.purge_terminal(), 3);
    let left: HashSet<_> = store.list().into_iter().map(|j| j.id).collect();
    assert_eq!(left, HashSet::from([pending, running]));
    assert_eq!(store.count_active(), 2);
}

#[test]
fn delete_if_terminal_refuses_active_jobs() {
    let store = JobStore::new();
    let id = store.create("https://example.com/v");
    assert!(matches!(
        store.delete_if_terminal(id),
        Err(ServiceError::InvalidTransition { .. })
    ));
    store.cancel(id).unwrap();
    assert!(store.delete_if_terminal(id).unwrap());
    assert!(matches!(
        store.delete_if_terminal(id),
        Err(ServiceError::NotFound(_))
    ));
}

#[test]
fn restore_fails_interrupted_jobs() {
    let store = JobStore::new();
    let mut running = JobRecord::new(uuid::Uuid::new_v4(), "https://example.com/a");
    running.status = JobStatus::Running;
    running.progress = 30.0;
    let mut done = JobRecord::new(uuid::Uuid::new_v4(), "https://example.com/b");
    done.status = JobStatus::Completed;
    done.output_path = Some("/d/b.mp4".into());

    assert_eq!(store.restore(vec![running.clone(), done.clone()]), 1);
    let r = store.get(running.id).unwrap();
    assert_eq!(r.status, JobStatus::Failed);
    assert_eq!(r.error.as_deref(), Some(INTERRUPTED_ERROR));
    assert_eq!(store.get(done.id).unwrap(), done);
}

#[test]
fn journal_receives_changes_in_order() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let store = JobStore::with_journal(tx);
    let id = store.create("https://example.com/v");
    store.cancel(id).unwrap();
    store.purge_terminal();

    match rx.try_recv().unwrap() {
        PersistOp::Upsert(r) => assert_eq!(r.status, JobStatus::Pending),
        other => panic!("unexpected {other:?}"),
    }
    match rx.try_recv().unwrap() {
        PersistOp::Upsert(r) => assert_eq!(r.status, JobStatus::Cancelled),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(rx.try_recv().unwrap(), PersistOp::Delete(vec![id]));
}

#[test]
fn unchanged_update_is_not_committed() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let store = JobStore::with_journal(tx);
    let id = store.create("https://example.com/v");
    store.mark_running(id).unwrap();
    store.update(id, |j| j.progress = 40.0).unwrap();
    while rx.try_recv().is_ok() {}
    let before = store.get(id).unwrap();

    // No-op mutator, and a lower percent that gets clamped back.
    assert_eq!(store.update(id, |_| {}).unwrap(), before);
    assert_eq!(store.update(id, |j| j.progress = 10.0).unwrap(), before);

    assert_eq!(store.get(id).unwrap().updated_at, before.updated_at);
    assert!(rx.try_recv().is_err());
}

#[test]
fn format_selector_follows_options() {
    let mut opts = DownloadOptions::default();
    assert_eq!(opts.format_selector(), "best[height<=720]");
    opts.quality = Some("1080p".into());
    assert_eq!(opts.format_selector(), "best[height<=1080]");
    opts.format_id = Some("137".into());
    assert_eq!(opts.format_selector(), "137");
    opts.format_id = Some("best".into());
    assert_eq!(opts.format_selector(), "best[height<=1080]");
    opts.audio_only = true;
    assert_eq!(opts.format_selector(), "bestaudio/best");
}

#[test]
fn status_strings_roundtrip() {
    for s in [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ] {
        assert_eq!(JobStatus::from_str(s.as_str()), s);
    }
    assert_eq!(JobStatus::from_str("garbage"), JobStatus::Failed);
}

#[test]
fn options_validation_rejects_unsafe_values() {
    let ok = DownloadOptions {
        playlist_items: Some("1-3,7".into()),
        output_path: Some("music/live".into()),
        ..Default::default()
    };
    assert!(ok.validate().is_ok());

    for items in ["1;rm", "", "a-b"] {
        let o = DownloadOptions {
            playlist_items: Some(items.into()),
            ..Default::default()
        };
        assert!(matches!(o.validate(), Err(ServiceError::InvalidRequest(_))));
    }
    for sub in ["/etc", "../up", "a/../../b"] {
        let o = DownloadOptions {
            output_path: Some(sub.into()),
            ..Default::default()
        };
        assert!(matches!(o.validate(), Err(ServiceError::InvalidRequest(_))));
    }
}
