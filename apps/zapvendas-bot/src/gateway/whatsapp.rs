use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use zapvendas_db::utils::to_send_jid;

use crate::gateway::{MessageSender, RetryPolicy};

/// Last-known bridge connectivity with a TTL. Shared between the heartbeat
/// task and the send path; a stale entry forces a fresh `/status` probe.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<Mutex<Option<(bool, Instant)>>>,
    ttl: Duration,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            ttl,
        }
    }

    pub fn get(&self) -> Option<bool> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match *inner {
            Some((connected, at)) if at.elapsed() < self.ttl => Some(connected),
            _ => None,
        }
    }

    pub fn set(&self, connected: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner = Some((connected, Instant::now()));
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    connected: bool,
}

#[derive(Deserialize)]
struct ContactInfoResponse {
    #[serde(default)]
    is_saved: Option<bool>,
}

#[derive(Deserialize)]
struct KeywordResponse {
    #[serde(default)]
    has_keyword: bool,
}

#[derive(Deserialize)]
struct QrResponse {
    #[serde(default)]
    qr: String,
}

/// HTTP client for the WhatsApp bridge process. Reconnects before sending
/// when the cached status says disconnected, and retries sends on transient
/// and session-closed failures under the injected policy.
pub struct BridgeGateway {
    base_url: String,
    client: reqwest::Client,
    status: StatusCache,
    retry: RetryPolicy,
}

impl BridgeGateway {
    pub fn new(base_url: String, status: StatusCache, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build bridge HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            status,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn probe_status(&self) -> bool {
        let connected = match self.client.get(self.url("/status")).send().await {
            Ok(resp) => resp
                .json::<StatusResponse>()
                .await
                .map(|s| s.connected)
                .unwrap_or(false),
            Err(err) => {
                debug!(error = %err, "Bridge status probe failed");
                false
            }
        };
        self.status.set(connected);
        connected
    }

    pub async fn is_connected(&self) -> bool {
        match self.status.get() {
            Some(connected) => connected,
            None => self.probe_status().await,
        }
    }

    /// Asks the bridge to (re)start its session and waits briefly for the
    /// connection to come up.
    pub async fn connect(&self) -> bool {
        if let Err(err) = self.client.get(self.url("/start")).send().await {
            warn!(error = %err, "Bridge start request failed");
            self.status.set(false);
            return false;
        }
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if self.probe_status().await {
                info!("Bridge session connected");
                return true;
            }
        }
        false
    }

    pub async fn qr_code(&self) -> Result<String> {
        let resp = self
            .client
            .get(self.url("/qr"))
            .send()
            .await
            .context("Bridge unreachable for QR code")?;
        let qr: QrResponse = resp.json().await.context("Malformed QR response")?;
        Ok(qr.qr)
    }

    pub async fn logout(&self) -> Result<()> {
        self.client
            .post(self.url("/logout"))
            .send()
            .await
            .context("Bridge unreachable for logout")?;
        self.status.set(false);
        Ok(())
    }

    /// Periodic `/ping` keeping the status cache warm. Runs until the
    /// process exits.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let alive = gateway
                    .client
                    .get(gateway.url("/ping"))
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false);
                if alive {
                    gateway.probe_status().await;
                } else {
                    gateway.status.set(false);
                }
            }
        });
    }

    fn is_session_closed(body: &str) -> bool {
        let lower = body.to_lowercase();
        lower.contains("session closed") || lower.contains("not connected")
    }

    async fn post_send(&self, jid: &str, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/send"))
            .json(&serde_json::json!({ "jid": jid, "text": text }))
            .send()
            .await
            .context("Bridge unreachable")?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("Bridge send failed ({}): {}", status, body))
    }

    async fn post_send_image(&self, jid: &str, path: &Path, caption: Option<&str>) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut form = reqwest::multipart::Form::new()
            .text("jid", jid.to_string())
            .part("file", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }
        let resp = self
            .client
            .post(self.url("/send-image"))
            .multipart(form)
            .send()
            .await
            .context("Bridge unreachable")?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("Bridge image send failed ({}): {}", status, body))
    }

    async fn send_with_retry<F, Fut>(&self, send: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        if !self.is_connected().await {
            self.connect().await;
        }

        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match send().await {
                Ok(()) => {
                    self.status.set(true);
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Bridge send attempt failed");
                    if Self::is_session_closed(&err.to_string()) {
                        self.status.set(false);
                        self.connect().await;
                    }
                    last_err = Some(err);
                }
            }
            if attempt + 1 < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay_after(attempt)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("Bridge send failed")))
    }
}

#[async_trait]
impl MessageSender for BridgeGateway {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let jid = to_send_jid(to);
        self.send_with_retry(|| self.post_send(&jid, text)).await
    }

    async fn send_image(&self, to: &str, path: &Path, caption: Option<&str>) -> Result<()> {
        let jid = to_send_jid(to);
        self.send_with_retry(|| self.post_send_image(&jid, path, caption))
            .await
    }

    async fn check_keyword(&self, number: &str, keyword: &str) -> Result<bool> {
        let resp = self
            .client
            .get(self.url(&format!("/check-keyword/{}", number)))
            .query(&[("keyword", keyword)])
            .send()
            .await
            .context("Bridge unreachable for keyword check")?;
        let body: KeywordResponse = resp.json().await.context("Malformed keyword response")?;
        Ok(body.has_keyword)
    }

    async fn contact_is_saved(&self, number: &str) -> Result<Option<bool>> {
        let resp = self
            .client
            .get(self.url(&format!("/contact-info/{}", number)))
            .send()
            .await
            .context("Bridge unreachable for contact info")?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let info: ContactInfoResponse = resp.json().await.context("Malformed contact info")?;
        Ok(info.is_saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_cache_expires() {
        let cache = StatusCache::new(Duration::from_millis(10));
        assert_eq!(cache.get(), None);
        cache.set(true);
        assert_eq!(cache.get(), Some(true));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn session_closed_detection() {
        assert!(BridgeGateway::is_session_closed("Error: Session closed"));
        assert!(BridgeGateway::is_session_closed("bridge not connected"));
        assert!(!BridgeGateway::is_session_closed("timeout"));
    }
}
