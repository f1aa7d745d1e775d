//! Runtime configuration updates and transport lifecycle

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::transport::{Transport, TransportDelegate};
use crate::types::{Event, Status};

use super::actor::SessionCore;

impl SessionCore {
    /// The live transport, connecting a new one if needed
    pub(super) fn ensure_transport(&mut self) -> Arc<dyn Transport> {
        if let Some(transport) = &self.transport {
            return Arc::clone(transport);
        }
        let delegate = TransportDelegate::new(self.generation, self.tx.clone());
        let transport = self.factory.connect(&self.config, delegate);
        tracing::info!(
            identifier = %self.identifier,
            generation = self.generation,
            transport = transport.name(),
            "transport connected"
        );
        if self.generation > 0 {
            self.emit(Event::TransportRebuilt {
                generation: self.generation,
            });
        }
        self.transport = Some(Arc::clone(&transport));
        transport
    }

    /// Invalidate the transport; callbacks from it are ignored from now on
    pub(super) fn teardown_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.invalidate();
            self.generation += 1;
            tracing::debug!(
                identifier = %self.identifier,
                generation = self.generation,
                "transport torn down"
            );
        }
    }

    /// Apply new transport settings
    ///
    /// With transfers in flight the running and waiting tasks are suspended;
    /// once the session has settled the transport is rebuilt and the same
    /// tasks are started again.
    pub(super) async fn update_config(&mut self, config: SessionConfig) {
        let config = config.clamped();
        if config == self.config {
            tracing::debug!(identifier = %self.identifier, "configuration unchanged");
            return;
        }
        tracing::info!(
            identifier = %self.identifier,
            max_concurrent = config.max_concurrent_tasks_limit,
            timeout_secs = config.timeout_interval_for_request.as_secs(),
            "updating session configuration"
        );
        *self.shared.config.lock() = config.clone();
        self.config = config;

        let captured: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, entry)| matches!(entry.status(), Status::Running | Status::Waiting))
            .map(|(key, _)| key.clone())
            .collect();
        let any_running = captured
            .iter()
            .any(|key| self.tasks.get(key).is_some_and(|e| e.status() == Status::Running));

        if !any_running {
            // Next transfer connects with the new settings
            self.teardown_transport();
            self.determine_status(true).await;
            return;
        }

        self.restart_set = captured.clone();
        self.should_rebuild = true;
        self.set_session_status(Status::WillSuspend);
        for key in &captured {
            self.suspend_task(key, None).await;
        }
        self.determine_status(false).await;
    }

    /// Reconnect and restart the tasks captured before a rebuild
    pub(super) async fn rebuild_and_restart(&mut self) {
        self.should_rebuild = false;
        self.teardown_transport();
        self.ensure_transport();

        let restart = std::mem::take(&mut self.restart_set);
        tracing::info!(
            identifier = %self.identifier,
            generation = self.generation,
            tasks = restart.len(),
            "transport rebuilt, restarting tasks"
        );
        for key in restart {
            let startable = self
                .tasks
                .get(&key)
                .is_some_and(|entry| entry.status().is_startable());
            if startable {
                self.start_task(&key, None).await;
            }
        }
        // A restarted task may finish on the spot and free its slot
        self.determine_status(true).await;
    }
}
