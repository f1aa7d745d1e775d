//! Common test utilities for durable-dl integration tests
//!
//! [`ScriptedTransport`] is driven by hand through the public transport
//! contract only. Cancellation with a token request writes a partial file to
//! the system tmp area and hands back a version-2 resume token naming it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use durable_dl::{
    CacheConfig, Config, SessionConfig, TransferId, TransferInfo, Transport, TransportDelegate,
    TransportError, TransportFactory, TransportRequest,
};
use parking_lot::Mutex;
use plist::{Dictionary, Value};

pub const IDENTIFIER: &str = "integration";

/// Build a resume token the way the platform transport does
pub fn resume_token(temp_file_name: &str) -> Vec<u8> {
    let mut dict = Dictionary::new();
    dict.insert(
        "NSURLSessionResumeInfoVersion".to_string(),
        Value::Integer(2i64.into()),
    );
    dict.insert(
        "NSURLSessionResumeInfoTempFileName".to_string(),
        Value::String(temp_file_name.to_string()),
    );
    let mut out = Vec::new();
    Value::Dictionary(dict).to_writer_binary(&mut out).unwrap();
    out
}

pub fn config_in(dir: &Path) -> Config {
    Config {
        identifier: IDENTIFIER.into(),
        cache: CacheConfig {
            root_dir: dir.join("root"),
            system_tmp_dir: dir.join("system-tmp"),
        },
        session: SessionConfig::default(),
    }
}

#[derive(Default)]
pub struct Recorded {
    pub begins: Vec<String>,
    pub resumes: Vec<(String, Vec<u8>)>,
}

pub struct ScriptedTransport {
    delegate: TransportDelegate,
    tmp_dir: PathBuf,
    next_id: AtomicU64,
    transfers: Mutex<BTreeMap<u64, String>>,
    pub recorded: Mutex<Recorded>,
}

impl ScriptedTransport {
    fn info(id: TransferId, url: &str) -> TransferInfo {
        TransferInfo {
            id,
            original_url: url.to_string(),
            current_url: url.to_string(),
        }
    }

    pub fn id_for(&self, url: &str) -> Option<TransferId> {
        self.transfers
            .lock()
            .iter()
            .find(|(_, u)| u.as_str() == url)
            .map(|(id, _)| TransferId(*id))
    }

    pub fn progress(&self, url: &str, written: u64, expected: u64) {
        let Some(id) = self.id_for(url) else { return };
        self.delegate
            .progress(Self::info(id, url), written, written, Some(expected));
    }

    /// Deliver `body` for `url` and complete its transfer
    pub fn finish(&self, url: &str, body: &[u8]) {
        let Some(id) = self.id_for(url) else { return };
        self.transfers.lock().remove(&id.0);
        let location = self.tmp_dir.join(format!("body-{}-{}", self.delegate.generation(), id));
        std::fs::write(&location, body).unwrap();
        self.delegate.finished(Self::info(id, url), location);
        self.delegate.completed(Self::info(id, url), Some(200), None);
    }

    fn start(&self, url: &str) -> TransferId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.transfers.lock().insert(id, url.to_string());
        TransferId(id)
    }
}

impl Transport for ScriptedTransport {
    fn begin(&self, request: TransportRequest) -> TransferId {
        self.recorded.lock().begins.push(request.url.clone());
        self.start(&request.url)
    }

    fn resume(&self, request: TransportRequest, token: Vec<u8>) -> TransferId {
        self.recorded
            .lock()
            .resumes
            .push((request.url.clone(), token));
        self.start(&request.url)
    }

    fn cancel(&self, id: TransferId, produce_token: bool) {
        let Some(url) = self.transfers.lock().remove(&id.0) else { return };
        let mut error = TransportError::cancelled();
        if produce_token {
            let name = format!("partial-{}.tmp", id);
            std::fs::write(self.tmp_dir.join(&name), b"first half").unwrap();
            error = error.with_resume_token(resume_token(&name));
        }
        self.delegate
            .completed(Self::info(id, &url), None, Some(error));
    }

    fn invalidate(&self) {
        self.transfers.lock().clear();
    }
}

pub struct ScriptedFactory {
    tmp_dir: PathBuf,
    transports: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedFactory {
    pub fn new(config: &Config) -> Arc<Self> {
        std::fs::create_dir_all(&config.cache.system_tmp_dir).unwrap();
        Arc::new(Self {
            tmp_dir: config.cache.system_tmp_dir.clone(),
            transports: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn latest(&self) -> Arc<ScriptedTransport> {
        self.transports.lock().last().cloned().unwrap()
    }
}

impl TransportFactory for ScriptedFactory {
    fn connect(&self, _config: &SessionConfig, delegate: TransportDelegate) -> Arc<dyn Transport> {
        let transport = Arc::new(ScriptedTransport {
            delegate,
            tmp_dir: self.tmp_dir.clone(),
            next_id: AtomicU64::new(1),
            transfers: Mutex::new(BTreeMap::new()),
            recorded: Mutex::new(Recorded::default()),
        });
        self.transports.lock().push(Arc::clone(&transport));
        transport
    }
}

/// Poll `condition` until it holds, failing after a few seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
