//! Individual connectivity probes used by the diagnostic pipeline

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

use crate::errors::Result;
use crate::models::{CheckResult, MessageKey};

/// One probe per diagnostic stage. Probes never fail: every problem is
/// reported as a [`CheckResult::Failure`].
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    async fn dns(&self, host: &str) -> CheckResult;

    async fn port(&self, host: &str, port: u16) -> CheckResult;

    async fn tls(&self, url: &str) -> CheckResult;

    async fn server(&self, url: &str) -> CheckResult;

    async fn home_assistant(&self, url: &str) -> CheckResult;
}

/// Probes over the real network
pub struct DefaultConnectivityChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl DefaultConnectivityChecker {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("homelink/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Run `check`, turning an elapsed timeout into the timeout failure
    async fn bounded<F>(&self, stage: &str, check: F) -> CheckResult
    where
        F: Future<Output = CheckResult> + Send,
    {
        match tokio::time::timeout(self.timeout, check).await {
            Ok(result) => result,
            Err(_) => {
                log::debug!("{} check timed out after {:?}", stage, self.timeout);
                CheckResult::failure(MessageKey::ErrorTimeout)
            }
        }
    }
}

fn request_failure(stage: &str, error: &reqwest::Error, otherwise: MessageKey) -> CheckResult {
    log::debug!("{} check failed: {}", stage, error);
    if error.is_timeout() {
        CheckResult::failure(MessageKey::ErrorTimeout)
    } else {
        CheckResult::failure(otherwise)
    }
}

/// Distinct addresses in resolution order, comma separated
fn join_addresses(addresses: impl IntoIterator<Item = IpAddr>) -> String {
    let mut seen: Vec<IpAddr> = Vec::new();
    for ip in addresses {
        if !seen.contains(&ip) {
            seen.push(ip);
        }
    }
    seen.iter()
        .map(IpAddr::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<scheme>://<host>[:port]/manifest.json`
fn manifest_url(url: &str) -> Option<Url> {
    Url::parse(url).ok()?.join("/manifest.json").ok()
}

/// Whether a web app manifest names Home Assistant
fn is_home_assistant_manifest(manifest: &Value) -> bool {
    manifest
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| name.contains("Home Assistant"))
}

#[async_trait]
impl ConnectivityChecker for DefaultConnectivityChecker {
    async fn dns(&self, host: &str) -> CheckResult {
        self.bounded("dns", async {
            match tokio::net::lookup_host((host, 0)).await {
                Ok(addrs) => {
                    let joined = join_addresses(addrs.map(|addr| addr.ip()));
                    if joined.is_empty() {
                        CheckResult::failure(MessageKey::ErrorDns)
                    } else {
                        CheckResult::success_with(MessageKey::Dns, joined)
                    }
                }
                Err(e) => {
                    log::debug!("dns lookup of {} failed: {}", host, e);
                    CheckResult::failure(MessageKey::ErrorDns)
                }
            }
        })
        .await
    }

    async fn port(&self, host: &str, port: u16) -> CheckResult {
        self.bounded("port", async {
            match TcpStream::connect((host, port)).await {
                Ok(_) => CheckResult::success_with(MessageKey::Port, port.to_string()),
                Err(e) => {
                    log::debug!("connect to {}:{} failed: {}", host, port, e);
                    CheckResult::failure(MessageKey::ErrorPort)
                }
            }
        })
        .await
    }

    async fn tls(&self, url: &str) -> CheckResult {
        self.bounded("tls", async {
            // Any response at all means the handshake and chain validated
            match self.client.head(url).send().await {
                Ok(_) => CheckResult::success(MessageKey::TlsSuccess),
                Err(e) => request_failure("tls", &e, MessageKey::ErrorTls),
            }
        })
        .await
    }

    async fn server(&self, url: &str) -> CheckResult {
        self.bounded("server", async {
            match self.client.get(url).send().await {
                Ok(response) => CheckResult::success_with(
                    MessageKey::ServerSuccess,
                    response.status().as_u16().to_string(),
                ),
                Err(e) => request_failure("server", &e, MessageKey::ErrorServer),
            }
        })
        .await
    }

    async fn home_assistant(&self, url: &str) -> CheckResult {
        let Some(manifest) = manifest_url(url) else {
            return CheckResult::failure(MessageKey::ErrorNotHomeAssistant);
        };

        self.bounded("home assistant", async {
            let response = match self.client.get(manifest.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    return request_failure("home assistant", &e, MessageKey::ErrorNotHomeAssistant);
                }
            };

            if !response.status().is_success() {
                log::debug!("{} answered {}", manifest, response.status());
                return CheckResult::failure(MessageKey::ErrorNotHomeAssistant);
            }

            match response.json::<Value>().await {
                Ok(body) if is_home_assistant_manifest(&body) => {
                    CheckResult::success(MessageKey::HomeAssistantSuccess)
                }
                Ok(_) => CheckResult::failure(MessageKey::ErrorNotHomeAssistant),
                Err(e) => request_failure("home assistant", &e, MessageKey::ErrorNotHomeAssistant),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::Ipv4Addr;

    #[test]
    fn test_join_addresses_dedups_in_order() {
        let a = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let b = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));
        assert_eq!(join_addresses([a, b, a]), "192.0.2.1, 192.0.2.2");
        assert_eq!(join_addresses(Vec::new()), "");
    }

    #[test]
    fn test_manifest_url_uses_origin() {
        let url = manifest_url("https://ha.example.com:8443/lovelace/0?kiosk").unwrap();
        assert_eq!(url.as_str(), "https://ha.example.com:8443/manifest.json");
        assert!(manifest_url("nonsense").is_none());
    }

    #[test]
    fn test_manifest_detection() {
        assert!(is_home_assistant_manifest(&json!({"name": "Home Assistant"})));
        assert!(!is_home_assistant_manifest(&json!({"name": "Grafana"})));
        assert!(!is_home_assistant_manifest(&json!({"short_name": "Home Assistant"})));
    }

    #[tokio::test]
    async fn test_port_check_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = DefaultConnectivityChecker::new(Duration::from_secs(2)).unwrap();

        assert_eq!(
            checker.port("127.0.0.1", port).await,
            CheckResult::success_with(MessageKey::Port, port.to_string())
        );

        drop(listener);
        assert!(checker.port("127.0.0.1", port).await.is_failure());
    }

    #[tokio::test]
    async fn test_dns_of_ip_literal() {
        let checker = DefaultConnectivityChecker::new(Duration::from_secs(2)).unwrap();
        assert_eq!(
            checker.dns("127.0.0.1").await,
            CheckResult::success_with(MessageKey::Dns, "127.0.0.1")
        );
    }

    /// Accepts connections and holds them open without ever answering
    async fn silent_listener() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        port
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let port = silent_listener().await;
        let checker = DefaultConnectivityChecker::new(Duration::from_millis(300)).unwrap();

        let started = std::time::Instant::now();
        let result = checker.server(&format!("http://127.0.0.1:{}", port)).await;
        assert_eq!(result, CheckResult::failure(MessageKey::ErrorTimeout));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_each_check_gets_its_own_budget() {
        let port = silent_listener().await;
        let url = format!("http://127.0.0.1:{}", port);
        let timeout = Duration::from_millis(300);
        let checker = DefaultConnectivityChecker::new(timeout).unwrap();

        for _ in 0..2 {
            let started = std::time::Instant::now();
            assert_eq!(
                checker.server(&url).await,
                CheckResult::failure(MessageKey::ErrorTimeout)
            );
            let elapsed = started.elapsed();
            assert!(elapsed >= timeout - Duration::from_millis(50), "{:?}", elapsed);
            assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
        }

        // A quick check right after a slow one is unaffected
        assert_eq!(
            checker.port("127.0.0.1", port).await,
            CheckResult::success_with(MessageKey::Port, port.to_string())
        );
    }
}
