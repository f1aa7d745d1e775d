use super::*;
use crate::error::TaskError;
use crate::manager::test_helpers::partial_file_name;
use crate::transport::{TransferId, TransportError};

#[tokio::test]
async fn control_on_unknown_task_is_reported() {
    let h = Harness::new(SessionConfig::default()).await;
    let err = h.manager.start("https://example.com/missing").await.unwrap_err();
    assert!(matches!(err, Error::TaskNotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn suspend_then_start_resumes_from_token() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/r.bin", None, None).await.unwrap();
    let first = h.factory.latest();
    let id = first.id_for(task.url()).unwrap();
    first.report_progress(id, 40, 100);

    task.suspend().await.unwrap();
    assert_eq!(task.status(), Status::Suspended);
    assert!(task.has_resume_token());
    assert_eq!(task.error(), Some(TaskError::Cancelled));
    assert_eq!(task.progress(), Progress::new(40, 100), "progress survives a suspend");

    task.start().await.unwrap();
    let second = h.factory.latest();
    let log = second.log();
    assert_eq!(log.resumes.len(), 1);
    assert!(log.begins.is_empty());
    assert_eq!(
        crate::resume_token::ResumeTokenCodec::temp_file_name(&log.resumes[0].1),
        Some(partial_file_name(0, id))
    );
    assert_eq!(task.status(), Status::Running);
    assert_eq!(task.error(), None);
}

#[tokio::test]
async fn changed_headers_force_a_fresh_transfer() {
    let h = Harness::new(SessionConfig::default()).await;
    let url = "https://example.com/h.bin";
    let task = h.manager.download(url, None, None).await.unwrap();
    let id = h.factory.latest().id_for(url).unwrap();
    task.suspend().await.unwrap();
    let partial = h.manager.cache().system_tmp_path().join(partial_file_name(0, id));
    assert!(partial.exists());

    let headers = [("Authorization".to_string(), "Bearer t".to_string())]
        .into_iter()
        .collect();
    h.manager.download(url, Some(headers), None).await.unwrap();

    let log = h.factory.latest().log();
    assert!(log.resumes.is_empty());
    assert_eq!(log.begins.len(), 1);
    assert_eq!(
        log.begins[0].headers.get("Authorization").map(String::as_str),
        Some("Bearer t")
    );
    assert!(!partial.exists(), "stale partial data is discarded");
}

#[tokio::test]
async fn suspending_a_waiting_task_is_immediate() {
    let h = Harness::new(limit(1)).await;
    let urls = urls(2);
    let tasks = h.manager.multi_download(urls, vec![], vec![]).await.unwrap();
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    tasks[1].on_failure(false, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tasks[1].suspend().await.unwrap();
    assert_eq!(tasks[1].status(), Status::Suspended);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(h.factory.latest().log().cancels.is_empty());
}

#[tokio::test]
async fn cancel_running_task_removes_it() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/c.bin", None, None).await.unwrap();
    let transport = h.factory.latest();

    task.cancel().await.unwrap();

    assert_eq!(task.status(), Status::Canceled);
    assert!(task.end_date() > 0.0);
    assert_eq!(transport.log().cancels, vec![(TransferId(1), false)]);
    assert!(h.manager.tasks().await.unwrap().is_empty());
    assert_eq!(h.manager.fetch_task(task.url()).await.unwrap(), None);
}

#[tokio::test]
async fn cancel_upgrades_a_pending_suspend() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/u.bin", None, None).await.unwrap();
    let transport = h.factory.latest();
    transport.defer_cancels();
    let id = transport.id_for(task.url()).unwrap();

    let suspend = task.suspend();
    let cancel = task.cancel();
    h.sync().await;
    assert_eq!(task.status(), Status::WillCancel);

    transport.flush_cancels();
    suspend.await.unwrap();
    cancel.await.unwrap();

    assert_eq!(task.status(), Status::Canceled);
    assert!(!task.has_resume_token());
    let partial = h.manager.cache().system_tmp_path().join(partial_file_name(0, id));
    assert!(!partial.exists(), "canceled task leaves no partial data");
    assert!(h.manager.tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_completely_deletes_the_file() {
    let h = Harness::new(SessionConfig::default()).await;
    let kept = h.manager.download("https://example.com/k.bin", None, None).await.unwrap();
    let gone = h.manager.download("https://example.com/g.bin", None, None).await.unwrap();
    let transport = h.factory.latest();
    transport.finish(transport.id_for(kept.url()).unwrap(), b"keep");
    transport.finish(transport.id_for(gone.url()).unwrap(), b"gone");
    h.sync().await;

    kept.cancel().await.unwrap();
    h.manager.remove(&gone, true).await.unwrap();

    assert!(kept.file_path().exists(), "canceling a finished task keeps its file");
    assert!(!gone.file_path().exists());
    assert_eq!(gone.status(), Status::Removed);
    assert!(h.manager.succeeded_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn background_invalidation_with_token_suspends() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/b.bin", None, None).await.unwrap();
    let transport = h.factory.latest();
    let token = crate::resume_token::sample_token("bg.tmp");
    transport.fail(
        transport.id_for(task.url()).unwrap(),
        TransportError::network("connection reset")
            .with_resume_token(token)
            .invalidated(),
    );
    h.sync().await;

    assert_eq!(task.status(), Status::Suspended);
    assert!(task.has_resume_token());
    assert_eq!(task.end_date(), 0.0, "suspension is not a terminal transition");

    std::fs::write(h.manager.cache().system_tmp_path().join("bg.tmp"), b"partial").unwrap();
    task.start().await.unwrap();
    let log = h.factory.latest().log();
    assert_eq!(log.resumes.len(), 1, "the saved token is used");
    assert!(log.begins.is_empty());
    assert_eq!(task.status(), Status::Running);
}

#[tokio::test]
async fn network_failure_fails_the_task() {
    let h = Harness::new(SessionConfig::default()).await;
    let task = h.manager.download("https://example.com/n.bin", None, None).await.unwrap();
    let transport = h.factory.latest();
    transport.fail(
        transport.id_for(task.url()).unwrap(),
        TransportError::network("connection reset"),
    );
    h.sync().await;

    assert_eq!(task.status(), Status::Failed);
    assert_eq!(task.error(), Some(TaskError::Network("connection reset".into())));
    let end_date = task.end_date();
    assert!(end_date > 0.0);

    task.start().await.unwrap();
    assert_eq!(task.status(), Status::Running);
    assert_eq!(task.end_date(), 0.0);
}

#[tokio::test]
async fn move_task_checks_bounds() {
    let h = Harness::new(SessionConfig::default()).await;
    let urls = urls(3);
    h.manager.multi_download(urls.clone(), vec![], vec![]).await.unwrap();

    let err = h.manager.move_task(0, 5).await.unwrap_err();
    assert!(
        matches!(err, Error::IndexOutOfRange { index: 5, len: 3 }),
        "got {err:?}"
    );

    h.manager.move_task(2, 0).await.unwrap();
    let order: Vec<String> = h
        .manager
        .tasks()
        .await
        .unwrap()
        .iter()
        .map(|t| t.url().to_string())
        .collect();
    assert_eq!(order, vec![urls[2].clone(), urls[0].clone(), urls[1].clone()]);
}

#[tokio::test]
async fn sort_tasks_reorders_the_list() {
    let h = Harness::new(SessionConfig::default()).await;
    let urls = urls(3);
    h.manager.multi_download(urls.clone(), vec![], vec![]).await.unwrap();

    h.manager.sort_tasks(|a, b| b.url.cmp(&a.url)).await.unwrap();
    let order: Vec<String> = h
        .manager
        .tasks()
        .await
        .unwrap()
        .iter()
        .map(|t| t.url().to_string())
        .collect();
    let mut expected = urls;
    expected.reverse();
    assert_eq!(order, expected);
}
