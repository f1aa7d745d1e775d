//! Shared test utilities for session tests
//!
//! [`MockTransport`] records every call and lets a test drive transfers to
//! completion by hand. Cancellation settles immediately, with a resume token
//! and a partial file in the system tmp area when one was asked for.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::config::{CacheConfig, Config, SessionConfig};
use crate::executer::InlineExecutor;
use crate::resume_token::sample_token;
use crate::transport::{
    TransferId, TransferInfo, Transport, TransportDelegate, TransportError, TransportFactory,
    TransportRequest,
};

use super::{ManagerOptions, SessionManager};

/// Calls made on a transport
#[derive(Clone, Debug, Default)]
pub(crate) struct CallLog {
    pub(crate) begins: Vec<TransportRequest>,
    pub(crate) resumes: Vec<(TransportRequest, Vec<u8>)>,
    pub(crate) cancels: Vec<(TransferId, bool)>,
    pub(crate) invalidations: usize,
}

pub(crate) struct MockTransport {
    delegate: TransportDelegate,
    tmp_dir: PathBuf,
    next_id: AtomicU64,
    log: Mutex<CallLog>,
    /// Live transfers by id, with the URL they were requested for
    transfers: Mutex<BTreeMap<u64, String>>,
    /// When set, cancellations wait for `flush_cancels`
    defer_cancels: AtomicBool,
    pending_cancels: Mutex<Vec<(TransferId, bool)>>,
}

impl MockTransport {
    pub(crate) fn log(&self) -> CallLog {
        self.log.lock().clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.delegate.generation()
    }

    /// Live transfers in start order
    pub(crate) fn active(&self) -> Vec<(TransferId, String)> {
        self.transfers
            .lock()
            .iter()
            .map(|(id, url)| (TransferId(*id), url.clone()))
            .collect()
    }

    pub(crate) fn id_for(&self, url: &str) -> Option<TransferId> {
        self.active()
            .into_iter()
            .find(|(_, u)| u == url)
            .map(|(id, _)| id)
    }

    fn info(&self, id: TransferId, url: &str) -> TransferInfo {
        TransferInfo {
            id,
            original_url: url.to_string(),
            current_url: url.to_string(),
        }
    }

    fn take(&self, id: TransferId) -> Option<String> {
        self.transfers.lock().remove(&id.0)
    }

    /// Report progress on a live transfer
    pub(crate) fn report_progress(&self, id: TransferId, written: u64, expected: u64) {
        let Some(url) = self.transfers.lock().get(&id.0).cloned() else { return };
        self.delegate
            .progress(self.info(id, &url), written, written, Some(expected));
    }

    /// Deliver `body` and complete the transfer with `status_code`
    pub(crate) fn finish_with_status(&self, id: TransferId, body: &[u8], status_code: u16) {
        let Some(url) = self.take(id) else { return };
        let info = self.info(id, &url);
        let location = self.tmp_dir.join(format!("download-{}-{}", self.generation(), id.0));
        std::fs::write(&location, body).unwrap();
        let len = body.len() as u64;
        self.delegate.progress(info.clone(), len, len, Some(len));
        self.delegate.finished(info.clone(), location);
        self.delegate.completed(info, Some(status_code), None);
    }

    /// Deliver `body` and complete the transfer successfully
    pub(crate) fn finish(&self, id: TransferId, body: &[u8]) {
        self.finish_with_status(id, body, 200);
    }

    /// Complete the transfer with `error`
    pub(crate) fn fail(&self, id: TransferId, error: TransportError) {
        let Some(url) = self.take(id) else { return };
        self.delegate.completed(self.info(id, &url), None, Some(error));
    }

    /// Report the whole channel as invalid
    pub(crate) fn invalidate_unexpectedly(&self) {
        self.delegate.invalidated(Some("connection lost".into()));
    }

    /// Hold cancellations until `flush_cancels` is called
    pub(crate) fn defer_cancels(&self) {
        self.defer_cancels.store(true, Ordering::SeqCst);
    }

    /// Settle every held cancellation
    pub(crate) fn flush_cancels(&self) {
        let pending = std::mem::take(&mut *self.pending_cancels.lock());
        for (id, produce_token) in pending {
            self.settle_cancel(id, produce_token);
        }
    }

    fn settle_cancel(&self, id: TransferId, produce_token: bool) {
        let Some(url) = self.take(id) else { return };
        let mut error = TransportError::cancelled();
        if produce_token {
            let name = partial_file_name(self.generation(), id);
            std::fs::write(self.tmp_dir.join(&name), b"partial bytes").unwrap();
            error = error.with_resume_token(sample_token(&name));
        }
        self.delegate.completed(self.info(id, &url), None, Some(error));
    }

    fn start(&self, request: &TransportRequest) -> TransferId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.transfers.lock().insert(id, request.url.clone());
        TransferId(id)
    }
}

impl Transport for MockTransport {
    fn begin(&self, request: TransportRequest) -> TransferId {
        let id = self.start(&request);
        self.log.lock().begins.push(request);
        id
    }

    fn resume(&self, request: TransportRequest, token: Vec<u8>) -> TransferId {
        let id = self.start(&request);
        self.log.lock().resumes.push((request, token));
        id
    }

    fn cancel(&self, id: TransferId, produce_token: bool) {
        self.log.lock().cancels.push((id, produce_token));
        if self.defer_cancels.load(Ordering::SeqCst) {
            self.pending_cancels.lock().push((id, produce_token));
            return;
        }
        self.settle_cancel(id, produce_token);
    }

    fn invalidate(&self) {
        self.log.lock().invalidations += 1;
        self.transfers.lock().clear();
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Factory handing out [`MockTransport`]s and remembering each one
pub(crate) struct MockFactory {
    tmp_dir: PathBuf,
    transports: Mutex<Vec<(SessionConfig, Arc<MockTransport>)>>,
}

impl MockFactory {
    pub(crate) fn new(tmp_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            tmp_dir: tmp_dir.to_path_buf(),
            transports: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn connects(&self) -> usize {
        self.transports.lock().len()
    }

    /// Most recently connected transport
    pub(crate) fn latest(&self) -> Arc<MockTransport> {
        self.transports.lock().last().map(|(_, t)| Arc::clone(t)).unwrap()
    }

    pub(crate) fn latest_config(&self) -> SessionConfig {
        self.transports.lock().last().map(|(c, _)| c.clone()).unwrap()
    }

    /// Begin calls over every transport connected so far
    pub(crate) fn total_begins(&self) -> usize {
        self.transports
            .lock()
            .iter()
            .map(|(_, t)| t.log().begins.len())
            .sum()
    }
}

impl TransportFactory for MockFactory {
    fn connect(&self, config: &SessionConfig, delegate: TransportDelegate) -> Arc<dyn Transport> {
        let transport = Arc::new(MockTransport {
            delegate,
            tmp_dir: self.tmp_dir.clone(),
            next_id: AtomicU64::new(1),
            log: Mutex::new(CallLog::default()),
            transfers: Mutex::new(BTreeMap::new()),
            defer_cancels: AtomicBool::new(false),
            pending_cancels: Mutex::new(Vec::new()),
        });
        self.transports
            .lock()
            .push((config.clone(), Arc::clone(&transport)));
        transport
    }
}

/// A session over a temporary directory with a mock transport
pub(crate) struct Harness {
    pub(crate) manager: SessionManager,
    pub(crate) factory: Arc<MockFactory>,
    pub(crate) dir: TempDir,
}

impl Harness {
    pub(crate) async fn new(session: SessionConfig) -> Self {
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir, session, ManagerOptions::default()).await
    }

    pub(crate) async fn with_options(session: SessionConfig, options: ManagerOptions) -> Self {
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir, session, options).await
    }

    pub(crate) async fn in_dir(dir: TempDir, session: SessionConfig, mut options: ManagerOptions) -> Self {
        let config = config_in(dir.path(), session);
        std::fs::create_dir_all(&config.cache.system_tmp_dir).unwrap();
        let factory = MockFactory::new(&config.cache.system_tmp_dir);
        if options.main_executor.is_none() {
            options.main_executor = Some(Arc::new(InlineExecutor));
        }
        let manager = SessionManager::with_options(config, factory.clone(), options)
            .await
            .unwrap();
        Self {
            manager,
            factory,
            dir,
        }
    }

    /// Wait until every command queued so far has been processed
    pub(crate) async fn sync(&self) {
        self.manager.tasks().await.unwrap();
    }

    /// Shut the session down and hand back its directory
    pub(crate) async fn close(self) -> (TempDir, Arc<MockFactory>) {
        self.manager.shutdown().await.unwrap();
        (self.dir, self.factory)
    }
}

/// Name of the partial file a cancelled transfer leaves in the system tmp area
pub(crate) fn partial_file_name(generation: u64, id: TransferId) -> String {
    format!("partial-{generation}-{}.tmp", id.0)
}

pub(crate) fn config_in(dir: &Path, session: SessionConfig) -> Config {
    Config {
        identifier: "unit".into(),
        cache: CacheConfig {
            root_dir: dir.join("root"),
            system_tmp_dir: dir.join("system-tmp"),
        },
        session,
    }
}

pub(crate) fn limit(max_concurrent_tasks_limit: usize) -> SessionConfig {
    SessionConfig {
        max_concurrent_tasks_limit,
        ..Default::default()
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub(crate) async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
