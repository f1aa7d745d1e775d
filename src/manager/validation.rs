//! Checksum validation scheduling

use std::sync::Arc;

use crate::checksum;
use crate::error::ChecksumError;
use crate::types::{ChecksumAlgorithm, Event, Status, Validation};

use super::Command;
use super::actor::SessionCore;

impl SessionCore {
    /// Register the expected digest for a task and validate when possible
    pub(super) async fn validate_file(&mut self, url: String, code: String, algorithm: ChecksumAlgorithm) {
        let Some(key) = self.resolve_key(&url) else {
            tracing::warn!(url = %url, "validation requested for unknown task");
            return;
        };
        let Some(entry) = self.tasks.get(&key) else { return };
        let changed = entry.task.update(|s| {
            let changed =
                s.verification_code.as_deref() != Some(code.as_str()) || s.verification_type != algorithm;
            if changed {
                s.verification_code = Some(code.clone());
                s.verification_type = algorithm;
                if s.validated_with.as_ref() != Some(&(code, algorithm)) {
                    s.validation = Validation::Unknown;
                    s.validation_error = None;
                }
            }
            changed
        });
        if changed {
            self.persist().await;
        }
        self.request_validation(&key);
    }

    /// Validate a succeeded task's file against its registered digest
    ///
    /// An outcome already computed for the same digest is delivered again
    /// without re-reading the file.
    pub(super) fn request_validation(&mut self, key: &str) {
        let Some(entry) = self.tasks.get_mut(key) else { return };
        let task = entry.task.clone();
        let (status, code, algorithm, validated_with, validation) = task.read(|s| {
            (
                s.status,
                s.verification_code.clone(),
                s.verification_type,
                s.validated_with.clone(),
                s.validation,
            )
        });
        let Some(code) = code else { return };
        if status != Status::Succeeded {
            return;
        }
        let pair = (code, algorithm);
        if validation != Validation::Unknown && validated_with.as_ref() == Some(&pair) {
            task.fire_validation(self.main.as_ref());
            return;
        }
        if entry.validating.as_ref() == Some(&pair) {
            return;
        }
        entry.validating = Some(pair.clone());

        let (code, algorithm) = pair;
        let checksum = Arc::clone(&self.checksum);
        let tx = self.tx.clone();
        let path = task.file_path();
        let url = key.to_string();
        tracing::debug!(url = %url, algorithm = ?algorithm, validator = checksum.name(), "validating file");
        tokio::task::spawn_blocking(move || {
            let result = checksum.validate(&path, &code, algorithm);
            if let Some(tx) = tx.upgrade() {
                tx.send(Command::ValidationFinished {
                    url,
                    code,
                    algorithm,
                    result,
                })
                .ok();
            }
        });
    }

    pub(super) async fn validation_finished(
        &mut self,
        url: String,
        code: String,
        algorithm: ChecksumAlgorithm,
        result: Result<bool, ChecksumError>,
    ) {
        let Some(entry) = self.tasks.get_mut(&url) else {
            tracing::debug!(url = %url, "validation finished for a task that left the session");
            return;
        };
        let pair = (code, algorithm);
        if entry.validating.as_ref() == Some(&pair) {
            entry.validating = None;
        }
        let task = entry.task.clone();

        let (current_code, current_algorithm, status) =
            task.read(|s| (s.verification_code.clone(), s.verification_type, s.status));
        if current_code.as_deref() != Some(pair.0.as_str())
            || current_algorithm != algorithm
            || status != Status::Succeeded
        {
            tracing::debug!(url = %url, "discarding validation for an outdated digest");
            self.request_validation(&url);
            return;
        }

        let validation = checksum::outcome(&result);
        let error = result.as_ref().err().cloned();
        match (&validation, &error) {
            (Validation::Correct, _) => tracing::info!(url = %url, "checksum matches"),
            (_, Some(e)) => tracing::warn!(url = %url, error = %e, "checksum could not be verified"),
            _ => tracing::warn!(url = %url, "checksum mismatch"),
        }
        task.update(|s| {
            s.validation = validation;
            s.validated_with = Some(pair);
            s.validation_error = error.clone();
        });
        self.emit(Event::TaskValidated {
            url: url.clone(),
            validation,
            error: error.map(|e| e.to_string()),
        });
        self.persist().await;
        task.fire_validation(self.main.as_ref());
    }
}
