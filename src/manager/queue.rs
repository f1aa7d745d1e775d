//! Task creation, listing and ordering

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::task::DownloadTask;
use crate::types::{Headers, Status};
use crate::utils::parse_url;

use super::TaskComparator;
use super::actor::SessionCore;

impl SessionCore {
    pub(super) async fn download(
        &mut self,
        url: String,
        headers: Option<Headers>,
        file_name: Option<String>,
    ) -> Result<DownloadTask> {
        let key = parse_url(&url)
            .inspect_err(|e| tracing::error!(error = %e, "rejected download"))?
            .to_string();
        let task = self.upsert(key.clone(), headers, file_name);
        self.persist().await;
        self.start_task(&key, None).await;
        Ok(task)
    }

    pub(super) async fn multi_download(
        &mut self,
        urls: Vec<String>,
        headers: Vec<Headers>,
        file_names: Vec<String>,
    ) -> Result<Vec<DownloadTask>> {
        if !headers.is_empty() && headers.len() != urls.len() {
            let err = Error::HeadersMatchFailed {
                expected: urls.len(),
                actual: headers.len(),
            };
            tracing::error!(error = %err, "rejected batch download");
            return Err(err);
        }
        if !file_names.is_empty() && file_names.len() != urls.len() {
            let err = Error::FileNamesMatchFailed {
                expected: urls.len(),
                actual: file_names.len(),
            };
            tracing::error!(error = %err, "rejected batch download");
            return Err(err);
        }

        let mut headers = headers.into_iter().map(Some);
        let mut file_names = file_names.into_iter().map(Some);
        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(urls.len());

        for url in urls {
            let headers = headers.next().flatten();
            let file_name = file_names.next().flatten();
            let key = match parse_url(&url) {
                Ok(parsed) => parsed.to_string(),
                Err(e) => {
                    tracing::error!(error = %e, "skipping invalid URL in batch");
                    continue;
                }
            };
            if !seen.insert(key.clone()) {
                let err = Error::DuplicateUrl(key);
                tracing::error!(error = %err, "skipping duplicate URL in batch");
                continue;
            }
            tasks.push(self.upsert(key, headers, file_name));
        }

        self.persist().await;
        for task in &tasks {
            if task.status() != Status::Succeeded {
                self.start_task(task.url(), None).await;
            }
        }
        Ok(tasks)
    }

    /// Find the task for `key`, updating it, or create it
    fn upsert(
        &mut self,
        key: String,
        headers: Option<Headers>,
        file_name: Option<String>,
    ) -> DownloadTask {
        let file_name = file_name.filter(|name| !name.is_empty());

        if let Some(entry) = self.tasks.get_mut(&key) {
            let task = entry.task.clone();
            let request_changed = task.update(|s| {
                let mut changed = false;
                if let Some(headers) = headers
                    && s.headers.as_ref() != Some(&headers)
                {
                    s.headers = Some(headers);
                    changed = true;
                }
                if let Some(name) = file_name
                    && s.file_name != name
                {
                    s.file_name = name;
                    changed = true;
                }
                changed
            });
            if request_changed && task.has_resume_token() {
                tracing::debug!(url = %key, "request changed, resume token will not be used");
                entry.token_stale = true;
            }
            return task;
        }

        let task = DownloadTask::new(
            key.clone(),
            file_name,
            headers,
            self.cache.download_file_path().to_path_buf(),
            self.link(),
        );
        tracing::debug!(url = %key, file_name = %task.file_name(), "task created");
        self.insert_task(task.clone());
        task
    }

    pub(super) async fn move_task(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.tasks.len();
        for index in [from, to] {
            if index >= len {
                let err = Error::IndexOutOfRange { index, len };
                tracing::error!(error = %err, "cannot move task");
                return Err(err);
            }
        }
        if from != to {
            self.tasks.move_index(from, to);
            self.persist().await;
        }
        Ok(())
    }

    pub(super) async fn sort_tasks(&mut self, mut compare: TaskComparator) {
        let mut entries: Vec<_> = self
            .tasks
            .drain(..)
            .map(|(key, entry)| (entry.task.snapshot(), key, entry))
            .collect();
        entries.sort_by(|a, b| compare(&a.0, &b.0));
        self.tasks = entries
            .into_iter()
            .map(|(_, key, entry)| (key, entry))
            .collect();
        self.persist().await;
    }
}
