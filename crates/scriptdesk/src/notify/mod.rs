//! In-process notification fan-out for status updates.

pub mod hub;
pub mod message;

pub use hub::{topics, NotificationHub};
pub use message::{AnalysisState, Notification, NotificationKind, ResourceAction};
