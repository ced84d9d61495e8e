//! Server-related data models

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{HomelinkError, Result};
use crate::platform::DeviceState;

/// When the persistent WebSocket connection to a server should be kept open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebsocketSetting {
    Never,
    #[default]
    Always,
    HomeWifi,
    ScreenOn,
}

impl WebsocketSetting {
    pub fn name(&self) -> &'static str {
        match self {
            WebsocketSetting::Never => "never",
            WebsocketSetting::Always => "always",
            WebsocketSetting::HomeWifi => "home_wifi",
            WebsocketSetting::ScreenOn => "screen_on",
        }
    }
}

impl std::str::FromStr for WebsocketSetting {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "never" => Ok(WebsocketSetting::Never),
            "always" => Ok(WebsocketSetting::Always),
            "home_wifi" => Ok(WebsocketSetting::HomeWifi),
            "screen_on" => Ok(WebsocketSetting::ScreenOn),
            other => Err(format!(
                "Unknown websocket setting '{}'. Expected never, always, home_wifi or screen_on",
                other
            )),
        }
    }
}

/// A registered Home Assistant instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// URL used when away from home
    pub external_url: String,
    /// URL used on the home network, if different
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_url: Option<String>,
    /// mobile_app webhook the push notification channel is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    /// Long-lived access token for the WebSocket API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub websocket_setting: WebsocketSetting,
    /// Wi-Fi networks considered "home"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal_ssids: Vec<String>,
    /// Treat any wired connection as home
    #[serde(default)]
    pub internal_ethernet: bool,
    /// Treat any VPN connection as home
    #[serde(default)]
    pub internal_vpn: bool,
}

impl Server {
    pub fn new(id: u32, external_url: impl Into<String>) -> Self {
        Self {
            id,
            name: String::new(),
            external_url: external_url.into(),
            internal_url: None,
            webhook_id: None,
            access_token: None,
            websocket_setting: WebsocketSetting::default(),
            internal_ssids: Vec::new(),
            internal_ethernet: false,
            internal_vpn: false,
        }
    }

    /// Display name, falling back to the external URL
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.external_url
        } else {
            &self.name
        }
    }

    /// Whether the device is currently on this server's home network.
    ///
    /// Does not require an internal URL to be configured.
    pub async fn is_internal(&self, device: &dyn DeviceState) -> bool {
        if self.internal_ethernet && device.is_using_ethernet().await {
            log::debug!("server {}: on home network via ethernet", self.id);
            return true;
        }

        if self.internal_vpn && device.is_using_vpn().await {
            log::debug!("server {}: on home network via VPN", self.id);
            return true;
        }

        if self.internal_ssids.is_empty() {
            return false;
        }

        match device.current_ssid().await {
            Some(ssid) => {
                let home = self.internal_ssids.iter().any(|s| s == &ssid);
                log::debug!("server {}: current ssid '{}', home={}", self.id, ssid, home);
                home
            }
            None => false,
        }
    }

    /// Base URL to use given whether we are at home
    pub fn url_for(&self, internal: bool) -> &str {
        match (&self.internal_url, internal) {
            (Some(url), true) if !url.trim().is_empty() => url,
            _ => &self.external_url,
        }
    }

    /// WebSocket API endpoint derived from an http(s) base URL
    pub fn websocket_url(base_url: &str) -> Result<Url> {
        let mut url = Url::parse(base_url.trim())?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            "ws" | "wss" => url.scheme(),
            other => {
                return Err(HomelinkError::InvalidInput(format!(
                    "Unsupported URL scheme '{}'",
                    other
                )));
            }
        }
        .to_string();
        url.set_scheme(&scheme).map_err(|_| {
            HomelinkError::InvalidInput(format!("Cannot convert {} to a websocket URL", base_url))
        })?;
        url.set_path("/api/websocket");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}
