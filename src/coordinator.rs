//! Client for the session coordination service.
//!
//! Quickstart registers `{passcode, tunnel_url, token}` so the mobile app can
//! look the session up by passcode. The base URL comes from the
//! `COORDINATOR_URL` environment variable when set.

use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE as BASE64_URL;
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_COORDINATOR_URL: &str = "https://coordinator.claudecode.app";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Uppercase letters and digits, minus the ambiguous 0/O/1/I pairs.
const PASSCODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PASSCODE_LEN: usize = 6;
const TOKEN_BYTES: usize = 32;

/// Credentials minted once per quickstart session.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub passcode: String,
    pub token: String,
}

impl SessionCredentials {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let passcode = (0..PASSCODE_LEN)
            .map(|_| PASSCODE_ALPHABET[rng.gen_range(0..PASSCODE_ALPHABET.len())] as char)
            .collect();
        let mut token_bytes = [0u8; TOKEN_BYTES];
        rng.fill(&mut token_bytes[..]);
        Self {
            passcode,
            token: BASE64_URL.encode(token_bytes),
        }
    }
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    passcode: &'a str,
    tunnel_url: &'a str,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(default)]
    pub passcode: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    pub tunnel_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .context("failed to build coordinator http client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Base URL from `COORDINATOR_URL`, falling back to the default service.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("COORDINATOR_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COORDINATOR_URL.to_string());
        Self::new(base_url)
    }

    /// Register a session under its passcode.
    pub async fn register(
        &self,
        passcode: &str,
        tunnel_url: &str,
        token: &str,
    ) -> Result<RegisterResponse> {
        let response = self
            .http
            .post(format!("{}/register", self.base_url))
            .json(&RegisterRequest {
                passcode,
                tunnel_url,
                token,
            })
            .send()
            .await
            .context("coordinator register request failed")?;

        let body: RegisterResponse = response
            .json()
            .await
            .context("coordinator register response was not valid json")?;
        if !body.success {
            anyhow::bail!(
                "registration failed: {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
        }
        tracing::info!(
            target = "agent_console::coordinator",
            passcode,
            expires_in = body.expires_in,
            "session registered with coordinator"
        );
        Ok(body)
    }

    /// Resolve a passcode back to its tunnel URL and bearer token.
    pub async fn lookup(&self, passcode: &str) -> Result<LookupResponse> {
        let response = self
            .http
            .get(format!("{}/lookup/{passcode}", self.base_url))
            .send()
            .await
            .context("coordinator lookup request failed")?;

        let status = response.status();
        let body: LookupResponse = response
            .json()
            .await
            .context("coordinator lookup response was not valid json")?;
        if !status.is_success() {
            anyhow::bail!(
                "lookup failed: {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(body)
    }
}
