use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use super::message::{Notification, NotificationKind};

/// Well-known topic names.
pub mod topics {
    pub const SCRIPTS: &str = "scripts";
    pub const ANALYSIS: &str = "analysis";
    pub const PROJECTS: &str = "projects";
    pub const ERRORS: &str = "errors";

    pub fn script(script_id: i64) -> String {
        format!("script_{}", script_id)
    }

    pub fn project(project_id: i64) -> String {
        format!("project_{}", project_id)
    }
}

struct HubInner {
    capacity: usize,
    running: AtomicBool,
    channels: RwLock<HashMap<String, broadcast::Sender<Notification>>>,
}

/// Topic-keyed publish/subscribe fan-out.
///
/// Created stopped; owners call [`start`](Self::start) once wiring is done.
/// Delivery is best-effort: publishing while stopped, to a topic nobody
/// listens on, or to a lagging receiver simply drops the message.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                capacity: capacity.max(1),
                running: AtomicBool::new(false),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn start(&self) {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            log::debug!("Notification hub started");
        }
    }

    /// Stops delivery and closes every topic; existing receivers see
    /// `RecvError::Closed` once drained.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            let mut channels = self
                .inner
                .channels
                .write()
                .unwrap_or_else(|e| e.into_inner());
            channels.clear();
            log::debug!("Notification hub stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Notification> {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner());
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }

    /// Sends to one topic. Returns the number of receivers reached.
    pub fn publish(&self, topic: &str, notification: Notification) -> usize {
        if !self.is_running() {
            return 0;
        }
        let channels = self
            .inner
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner());
        match channels.get(topic) {
            // No active receivers is fine
            Some(sender) => sender.send(notification).unwrap_or(0),
            None => 0,
        }
    }

    /// Sends the same notification (same id and timestamp) to several topics.
    pub fn publish_to<T: AsRef<str>>(&self, topics: &[T], kind: NotificationKind) -> usize {
        if !self.is_running() {
            return 0;
        }
        let notification = Notification::new(kind);
        topics
            .iter()
            .map(|topic| self.publish(topic.as_ref(), notification.clone()))
            .sum()
    }

    pub fn receiver_count(&self, topic: &str) -> usize {
        let channels = self
            .inner
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner());
        channels.get(topic).map(|s| s.receiver_count()).unwrap_or(0)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(256)
    }
}
