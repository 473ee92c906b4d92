use async_trait::async_trait;
use log::{debug, warn};
use puzzle_ref::PushToken;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::task::JoinHandle;

pub const EXPO_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Failed to send push notification, cause: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Push notification rejected: {0}")]
    Rejected(String),
}

/// One notification addressed to one device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: PushToken,
    pub title: String,
    pub body: String,
    /// Routing data the app reads when the notification is opened.
    pub data: Value,
}

#[async_trait]
pub trait PushDispatcher: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), Error>;
}

/// Sends `message` in the background. Failures are logged and otherwise dropped.
pub fn dispatch(dispatcher: Arc<dyn PushDispatcher>, message: PushMessage) -> JoinHandle<()> {
    tokio::spawn(async move {
        match dispatcher.send(&message).await {
            Ok(()) => debug!("push sent to {}", message.to),
            Err(err) => warn!("push to {} failed: {}", message.to, err),
        }
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpoConfig {
    pub endpoint: String,
}

impl Default for ExpoConfig {
    fn default() -> Self {
        Self {
            endpoint: EXPO_PUSH_ENDPOINT.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ExpoNotification<'a> {
    to: &'a PushToken,
    sound: &'static str,
    title: &'a str,
    body: &'a str,
    data: &'a Value,
}

impl<'a> From<&'a PushMessage> for ExpoNotification<'a> {
    fn from(message: &'a PushMessage) -> Self {
        Self {
            to: &message.to,
            sound: "default",
            title: &message.title,
            body: &message.body,
            data: &message.data,
        }
    }
}

#[derive(Deserialize)]
struct ExpoResponse {
    data: Option<ExpoTicket>,
}

#[derive(Deserialize)]
struct ExpoTicket {
    status: String,
    message: Option<String>,
}

/// [`PushDispatcher`] for the Expo push service.
pub struct ExpoPush {
    client: reqwest::Client,
    config: ExpoConfig,
}

impl ExpoPush {
    pub fn new(config: ExpoConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl PushDispatcher for ExpoPush {
    async fn send(&self, message: &PushMessage) -> Result<(), Error> {
        let response: ExpoResponse = self
            .client
            .post(&self.config.endpoint)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&ExpoNotification::from(message))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.data {
            Some(ticket) if ticket.status == "error" => Err(Error::Rejected(
                ticket.message.unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => Ok(()),
        }
    }
}

/// [`PushDispatcher`] used when notifications are switched off.
pub struct DisabledPush;

#[async_trait]
impl PushDispatcher for DisabledPush {
    async fn send(&self, message: &PushMessage) -> Result<(), Error> {
        debug!("push disabled, not notifying {}", message.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    fn message() -> PushMessage {
        PushMessage {
            to: PushToken::from_string("ExponentPushToken[abc123]".to_string()).unwrap(),
            title: "🧩 New Post in PuzzleTogether!".to_string(),
            body: "a@example.com just posted in PuzzleTogether!".to_string(),
            data: json!({ "screen": "Feed" }),
        }
    }

    #[test]
    fn expo_payload_shape() {
        let message = message();
        let payload = serde_json::to_value(ExpoNotification::from(&message)).unwrap();
        assert_eq!(
            payload,
            json!({
                "to": "ExponentPushToken[abc123]",
                "sound": "default",
                "title": "🧩 New Post in PuzzleTogether!",
                "body": "a@example.com just posted in PuzzleTogether!",
                "data": { "screen": "Feed" }
            })
        );
    }

    #[test]
    fn parses_error_ticket() {
        let response: ExpoResponse = serde_json::from_value(json!({
            "data": { "status": "error", "message": "DeviceNotRegistered" }
        }))
        .unwrap();
        let ticket = response.data.unwrap();
        assert_eq!(ticket.status, "error");
        assert_eq!(ticket.message.as_deref(), Some("DeviceNotRegistered"));
    }

    struct Failing(Mutex<usize>);

    #[async_trait]
    impl PushDispatcher for Failing {
        async fn send(&self, _message: &PushMessage) -> Result<(), Error> {
            *self.0.lock().await += 1;
            Err(Error::Rejected("DeviceNotRegistered".to_string()))
        }
    }

    #[tokio::test]
    async fn dispatch_swallows_failures() {
        let failing = Arc::new(Failing(Mutex::new(0)));
        dispatch(failing.clone(), message()).await.unwrap();
        assert_eq!(*failing.0.lock().await, 1);
    }
}
