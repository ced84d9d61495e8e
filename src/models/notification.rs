//! Push notification payloads received over the WebSocket API

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Wire key carrying the id the server wants acknowledged
pub const CONFIRM_ID_KEY: &str = "hass_confirm_id";

/// An actionable button attached to a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// 1-based position in the original `actions` list
    pub index: usize,
    pub action: String,
    pub title: String,
    pub uri: Option<String>,
    pub behavior: Option<String>,
}

/// The `data` section of a push notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    pub actions: Vec<NotificationAction>,
    /// Every other key, untouched
    pub extra: BTreeMap<String, Value>,
}

/// A push notification event as delivered by `mobile_app/push_notification_channel`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub message: Option<String>,
    pub title: Option<String>,
    pub confirm_id: Option<String>,
    pub data: Option<PushData>,
}

impl PushMessage {
    /// Build a message from the raw event object. Unknown shapes degrade to
    /// an empty message rather than failing.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut root) = value else {
            log::warn!("push notification event is not an object");
            return Self::default();
        };

        let data = match root.remove("data") {
            Some(Value::Object(data)) => Some(parse_data(data)),
            Some(Value::Null) | None => None,
            Some(other) => {
                log::debug!("ignoring non-object notification data: {}", other);
                None
            }
        };

        Self {
            message: root.get("message").map(value_to_string),
            title: root.get("title").map(value_to_string),
            confirm_id: root.get(CONFIRM_ID_KEY).map(value_to_string),
            data,
        }
    }

    /// Flatten into the string map handed to the notification handler.
    ///
    /// Actions become `action_{n}_key`, `action_{n}_title` and, when set,
    /// `action_{n}_uri` / `action_{n}_behavior`. Root `message` and `title`
    /// win over same-named data keys.
    pub fn flatten(&self, webhook_id: Option<&str>) -> HashMap<String, String> {
        let mut flattened = HashMap::new();

        if let Some(data) = &self.data {
            for (key, value) in &data.extra {
                flattened.insert(key.clone(), value_to_string(value));
            }
            for action in &data.actions {
                let n = action.index;
                flattened.insert(format!("action_{}_key", n), action.action.clone());
                flattened.insert(format!("action_{}_title", n), action.title.clone());
                if let Some(uri) = &action.uri {
                    flattened.insert(format!("action_{}_uri", n), uri.clone());
                }
                if let Some(behavior) = &action.behavior {
                    flattened.insert(format!("action_{}_behavior", n), behavior.clone());
                }
            }
        }

        if let Some(message) = &self.message {
            flattened.insert("message".to_string(), message.clone());
        }
        if let Some(title) = &self.title {
            flattened.insert("title".to_string(), title.clone());
        }
        if let Some(webhook_id) = webhook_id {
            flattened.insert("webhook_id".to_string(), webhook_id.to_string());
        }

        flattened
    }
}

fn parse_data(mut data: Map<String, Value>) -> PushData {
    let actions = match data.remove("actions") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_object().map(|obj| parse_action(i + 1, obj)))
            .collect(),
        // A non-list "actions" is just another data key
        Some(other) => {
            data.insert("actions".to_string(), other);
            Vec::new()
        }
        None => Vec::new(),
    };

    PushData {
        actions,
        extra: data.into_iter().collect(),
    }
}

fn parse_action(index: usize, obj: &Map<String, Value>) -> NotificationAction {
    let field = |name: &str| {
        obj.get(name)
            .filter(|v| !v.is_null())
            .map(value_to_string)
    };
    NotificationAction {
        index,
        action: field("action").unwrap_or_default(),
        title: field("title").unwrap_or_default(),
        uri: field("uri"),
        behavior: field("behavior"),
    }
}

/// Strings verbatim, everything else as JSON text
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
