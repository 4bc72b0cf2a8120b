//! Outbound notification collaborator. Delivery is best-effort: the
//! orchestrator dispatches on a detached task and only logs failures.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Created,
    Cancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Created => "created",
            NotificationKind::Cancelled => "cancelled",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            NotificationKind::Created => "/notify/reserva",
            NotificationKind::Cancelled => "/notify/cancelacion",
        }
    }
}

/// Payload shape expected by the notification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    #[serde(rename = "email")]
    pub contact_address: String,
    #[serde(rename = "nombre")]
    pub display_name: String,
    #[serde(rename = "servicio")]
    pub service_name: String,
    #[serde(rename = "fecha")]
    pub formatted_schedule: String,
}

#[derive(Debug)]
pub enum NotifyError {
    Delivery(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Delivery(e) => write!(f, "notification delivery failed: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts JSON to `{base}/notify/reserva` or `{base}/notify/cancelacion`.
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, kind: NotificationKind, notification: &Notification) -> Result<(), NotifyError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), kind.path());
        self.client
            .post(url)
            .json(notification)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }
}
