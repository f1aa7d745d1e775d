use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::test_helpers::{Harness, limit};
use crate::config::SessionConfig;
use crate::error::Error;
use crate::types::{Event, Progress, Status};

mod control;

fn urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://example.com/file{i}.bin"))
        .collect()
}

#[tokio::test]
async fn download_rejects_invalid_url() {
    let h = Harness::new(SessionConfig::default()).await;
    let err = h.manager.download("not a url", None, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)), "got {err:?}");
    assert!(h.manager.tasks().await.unwrap().is_empty());
    assert_eq!(h.factory.connects(), 0, "no transport for rejected input");
}

#[tokio::test]
async fn concurrency_limit_holds_extra_tasks_waiting() {
    let h = Harness::new(limit(2)).await;
    let urls = urls(4);
    let tasks = h
        .manager
        .multi_download(urls.clone(), vec![], vec![])
        .await
        .unwrap();

    let transport = h.factory.latest();
    assert_eq!(transport.active().len(), 2);
    let statuses: Vec<Status> = tasks.iter().map(|t| t.status()).collect();
    assert_eq!(
        statuses,
        vec![Status::Running, Status::Running, Status::Waiting, Status::Waiting]
    );
    assert_eq!(h.manager.status(), Status::Running);

    transport.finish(transport.id_for(&urls[0]).unwrap(), b"first");
    h.sync().await;

    assert_eq!(tasks[0].status(), Status::Succeeded);
    assert_eq!(tasks[2].status(), Status::Running, "freed slot goes to the next waiting task");
    assert_eq!(tasks[3].status(), Status::Waiting);
    assert_eq!(transport.active().len(), 2);
    assert_eq!(std::fs::read(tasks[0].file_path()).unwrap(), b"first");
}

#[tokio::test]
async fn file_already_present_succeeds_without_transport() {
    let h = Harness::new(SessionConfig::default()).await;
    let url = "https://example.com/present.bin";
    let file_name = crate::utils::default_file_name(url);
    std::fs::write(h.manager.file_path(&file_name), b"12345").unwrap();
    let mut events = h.manager.subscribe();

    let task = h.manager.download(url, None, None).await.unwrap();
    assert_eq!(task.status(), Status::Succeeded);
    assert_eq!(task.progress(), Progress::new(5, 5));
    let end_date = task.end_date();
    assert!(end_date > 0.0);

    let successes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&successes);
    task.on_success(false, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    task.start().await.unwrap();

    assert_eq!(successes.load(Ordering::SeqCst), 1, "restart re-reports success");
    assert_eq!(task.end_date(), end_date, "end date is set once");
    assert_eq!(h.factory.connects(), 0, "transport never touched");
    assert_eq!(h.manager.status(), Status::Succeeded);

    let mut saw_success = false;
    while let Ok(event) = events.try_recv() {
        if event
            == (Event::TaskStatusChanged {
                url: url.to_string(),
                status: Status::Succeeded,
            })
        {
            saw_success = true;
        }
    }
    assert!(saw_success);
}

#[tokio::test]
async fn multi_download_rejects_mismatched_headers() {
    let h = Harness::new(SessionConfig::default()).await;
    let err = h
        .manager
        .multi_download(urls(2), vec![Default::default()], vec![])
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::HeadersMatchFailed { expected: 2, actual: 1 }),
        "got {err:?}"
    );

    let err = h
        .manager
        .multi_download(urls(2), vec![], vec!["a.bin".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNamesMatchFailed { .. }), "got {err:?}");
    assert!(h.manager.tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn multi_download_drops_duplicates_and_invalid_urls() {
    let h = Harness::new(SessionConfig::default()).await;
    let a = "https://example.com/a.bin".to_string();
    let b = "https://example.com/b.bin".to_string();
    let tasks = h
        .manager
        .multi_download(vec![a.clone(), a.clone(), "::".into(), b.clone()], vec![], vec![])
        .await
        .unwrap();

    let created: Vec<&str> = tasks.iter().map(|t| t.url()).collect();
    assert_eq!(created, vec![a.as_str(), b.as_str()]);
    assert_eq!(h.manager.tasks().await.unwrap().len(), 2);
    assert_eq!(h.factory.latest().log().begins.len(), 2);
}

#[tokio::test]
async fn download_of_existing_url_returns_same_task() {
    let h = Harness::new(SessionConfig::default()).await;
    let first = h.manager.download("https://example.com/x.bin", None, None).await.unwrap();
    let second = h.manager.download("https://example.com/x.bin", None, None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.factory.latest().log().begins.len(), 1, "running task is not restarted");
}

#[tokio::test]
async fn fetch_task_finds_by_url() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/x.bin", None, None).await.unwrap();
    assert_eq!(h.manager.fetch_task("https://example.com/x.bin").await.unwrap(), Some(task));
    assert_eq!(h.manager.fetch_task("https://example.com/other").await.unwrap(), None);
}

#[tokio::test]
async fn progress_updates_task_and_session() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/p.bin", None, None).await.unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    task.on_progress(false, move |t| log.lock().push(t.progress()));

    let transport = h.factory.latest();
    transport.report_progress(transport.id_for(task.url()).unwrap(), 50, 200);
    h.sync().await;

    assert_eq!(task.progress(), Progress::new(50, 200));
    assert_eq!(h.manager.progress(), Progress::new(50, 200));
    assert_eq!(*seen.lock(), vec![Progress::new(50, 200)]);
}

#[tokio::test]
async fn late_progress_never_moves_backwards() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/late.bin", None, None).await.unwrap();
    let transport = h.factory.latest();
    let id = transport.id_for(task.url()).unwrap();

    transport.report_progress(id, 50, 100);
    transport.report_progress(id, 30, 100);
    h.sync().await;
    assert_eq!(task.progress(), Progress::new(50, 100));

    transport.report_progress(id, 70, 100);
    h.sync().await;
    assert_eq!(task.progress(), Progress::new(70, 100));
}

#[tokio::test]
async fn unacceptable_status_code_fails_and_discards_file() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/nf.bin", None, None).await.unwrap();
    let transport = h.factory.latest();
    transport.finish_with_status(transport.id_for(task.url()).unwrap(), b"not found", 404);
    h.sync().await;

    assert_eq!(task.status(), Status::Failed);
    assert_eq!(
        task.error(),
        Some(crate::error::TaskError::UnacceptableStatusCode(404))
    );
    assert!(task.end_date() > 0.0);
    assert!(!task.file_path().exists());
    assert_eq!(h.manager.status(), Status::Failed);
}

#[tokio::test]
async fn session_success_callback_fires_when_all_tasks_succeed() {
    let h = Harness::new(SessionConfig::default()).await;
    let settled = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&settled);
    h.manager
        .on_success(false, move |s| log.lock().push((s.status, s.succeeded_count)));

    let urls = urls(2);
    h.manager.multi_download(urls.clone(), vec![], vec![]).await.unwrap();
    let transport = h.factory.latest();
    transport.finish(transport.id_for(&urls[0]).unwrap(), b"a");
    h.sync().await;
    assert!(settled.lock().is_empty(), "one task still running");

    transport.finish(transport.id_for(&urls[1]).unwrap(), b"b");
    h.sync().await;
    assert_eq!(*settled.lock(), vec![(Status::Succeeded, 2)]);
    assert_eq!(h.manager.status(), Status::Succeeded);
    assert_eq!(transport.log().invalidations, 1, "idle transport is released");

    let succeeded: Vec<String> = h
        .manager
        .succeeded_tasks()
        .await
        .unwrap()
        .iter()
        .map(|t| t.url().to_string())
        .collect();
    assert_eq!(succeeded, urls);
}

#[tokio::test]
async fn unexpected_invalidation_restarts_running_tasks() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/i.bin", None, None).await.unwrap();
    let old = h.factory.latest();
    let old_id = old.id_for(task.url()).unwrap();

    old.invalidate_unexpectedly();
    h.sync().await;

    assert_eq!(h.factory.connects(), 2);
    let fresh = h.factory.latest();
    assert_eq!(fresh.generation(), 1);
    assert_eq!(fresh.log().begins.len(), 1);
    assert_eq!(task.status(), Status::Running);

    // Callbacks from the retired transport are ignored
    old.finish(old_id, b"stale");
    h.sync().await;
    assert_eq!(task.status(), Status::Running);
    assert!(!task.file_path().exists());
}

#[tokio::test]
async fn restart_restores_tasks_as_suspended() {
    let h = Harness::new(SessionConfig::default()).await;
    let urls = urls(2);
    h.manager.multi_download(urls.clone(), vec![], vec![]).await.unwrap();
    let transport = h.factory.latest();
    transport.finish(transport.id_for(&urls[0]).unwrap(), b"done");
    h.sync().await;
    let (dir, _) = h.close().await;

    let h = Harness::in_dir(dir, SessionConfig::default(), Default::default()).await;
    let tasks = h.manager.tasks().await.unwrap();
    let restored: Vec<(String, Status)> = tasks
        .iter()
        .map(|t| (t.url().to_string(), t.status()))
        .collect();
    assert_eq!(
        restored,
        vec![
            (urls[0].clone(), Status::Succeeded),
            (urls[1].clone(), Status::Suspended),
        ]
    );
    assert_eq!(h.manager.status(), Status::Suspended);
    assert_eq!(h.factory.connects(), 0, "nothing starts on restore");
    assert_eq!(h.manager.succeeded_tasks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn shutdown_closes_the_session() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/s.bin", None, None).await.unwrap();
    h.manager.shutdown().await.unwrap();

    let err = task.start().await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed(ref id) if id == "unit"), "got {err:?}");
    assert_eq!(h.factory.latest().log().invalidations, 1);
}
