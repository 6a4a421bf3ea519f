//! Unread-notification feed and the task/notification joins used by listings.

use std::collections::HashMap;
use std::time::Duration;

use shared_types::{Notification, Task};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::error::Result;

/// Attach each notification to the task it references.
///
/// Notifications for tasks not in `tasks` are ignored.
pub fn attach_messages(tasks: &mut [Task], messages: &[Notification]) {
    let mut by_task: HashMap<&str, Vec<Notification>> = HashMap::new();
    for message in messages {
        by_task
            .entry(message.task_id.as_str())
            .or_default()
            .push(message.clone());
    }
    for task in tasks.iter_mut() {
        task.messages = by_task.remove(task.id.as_str()).unwrap_or_default();
    }
}

pub fn unread(messages: &[Notification]) -> Vec<Notification> {
    messages.iter().filter(|m| !m.read).cloned().collect()
}

/// One refresh of the notification badge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    /// Unread notifications with `task_name` filled in where the task resolved
    pub unread: Vec<Notification>,
}

impl FeedSnapshot {
    pub fn unread_count(&self) -> usize {
        self.unread.len()
    }
}

/// Polls `/api/messages` and resolves task names, caching them across polls.
pub struct NotificationFeed {
    api: ApiClient,
    interval: Duration,
    task_names: HashMap<String, String>,
}

impl NotificationFeed {
    pub fn new(api: ApiClient, interval: Duration) -> Self {
        Self {
            api,
            interval,
            task_names: HashMap::new(),
        }
    }

    pub async fn refresh(&mut self) -> Result<FeedSnapshot> {
        let messages = self.api.list_messages(None).await?;
        let mut unread = unread(&messages);

        for message in &mut unread {
            message.task_name = self.task_name(&message.task_id).await;
        }
        debug!(unread = unread.len(), "notification feed refreshed");
        Ok(FeedSnapshot { unread })
    }

    async fn task_name(&mut self, task_id: &str) -> Option<String> {
        if let Some(name) = self.task_names.get(task_id) {
            return Some(name.clone());
        }
        match self.api.get_task(task_id).await {
            Ok(task) => {
                self.task_names.insert(task_id.to_string(), task.name.clone());
                Some(task.name)
            }
            Err(e) => {
                warn!(task_id, error = %e, "failed to resolve task for notification");
                None
            }
        }
    }

    /// Refresh on every tick until cancelled or the receiver goes away.
    ///
    /// Failed refreshes are logged and retried on the next tick.
    pub async fn watch(mut self, snapshots: mpsc::Sender<FeedSnapshot>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.refresh().await {
                Ok(snapshot) => {
                    if snapshots.send(snapshot).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "notification refresh failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            name: format!("task {id}"),
            ..Default::default()
        }
    }

    fn message(id: &str, task_id: &str, read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            task_id: task_id.to_string(),
            read,
            ..Default::default()
        }
    }

    #[test]
    fn test_attach_messages_joins_by_task_id() {
        let mut tasks = vec![task("a"), task("b")];
        let messages = vec![
            message("1", "a", false),
            message("2", "a", true),
            message("3", "c", false),
        ];
        attach_messages(&mut tasks, &messages);

        assert_eq!(tasks[0].messages.len(), 2);
        assert_eq!(tasks[0].unread_count(), 1);
        assert!(tasks[1].messages.is_empty());
    }

    #[test]
    fn test_attach_replaces_previous_join() {
        let mut tasks = vec![task("a")];
        attach_messages(&mut tasks, &[message("1", "a", false)]);
        attach_messages(&mut tasks, &[]);
        assert!(tasks[0].messages.is_empty());
    }

    #[test]
    fn test_unread_filters_read() {
        let messages = vec![message("1", "a", true), message("2", "a", false)];
        let unread = unread(&messages);
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, "2");
    }
}
