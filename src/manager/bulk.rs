//! Whole-session start, suspend, cancel and remove

use crate::types::Status;

use super::actor::{SessionCore, ack};
use super::control::Removal;
use super::{ControlAction, ControlReply};

impl SessionCore {
    pub(super) async fn bulk(&mut self, action: ControlAction, reply: ControlReply) {
        let keys: Vec<String> = self.tasks.keys().cloned().collect();
        tracing::info!(identifier = %self.identifier, ?action, tasks = keys.len(), "bulk request");

        if let ControlAction::Start = action {
            for key in keys {
                let succeeded = self
                    .tasks
                    .get(&key)
                    .is_none_or(|entry| entry.status() == Status::Succeeded);
                if !succeeded {
                    self.start_task(&key, None).await;
                }
            }
            ack(Some(reply), Ok(()));
            return;
        }

        if keys.is_empty() {
            ack(Some(reply), Ok(()));
            return;
        }

        let intent = match action {
            ControlAction::Suspend => Status::WillSuspend,
            ControlAction::Cancel => Status::WillCancel,
            _ => Status::WillRemove,
        };
        self.set_session_status(intent);
        self.session_acks.push(reply);

        for key in keys {
            match action {
                ControlAction::Suspend => self.suspend_task(&key, None).await,
                ControlAction::Cancel => self.stop_task(&key, Removal::Cancel, None).await,
                ControlAction::Remove { completely } => {
                    self.stop_task(&key, Removal::Remove { completely }, None).await;
                }
                ControlAction::Start => {}
            }
        }
        self.determine_status(false).await;
    }
}
