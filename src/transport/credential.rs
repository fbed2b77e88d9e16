//! Credential acquisition for the managed-identity transport.
//!
//! The transport only sees `CredentialProvider`. The provider shipped here
//! implements workload identity federation: the platform mounts a federated
//! token file into the pod, which is exchanged for an access token at the
//! identity endpoint.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::utils::error::TransportError;

/// Scope requested for the cloud messaging namespace.
pub const SERVICE_BUS_SCOPE: &str = "https://servicebus.azure.net/.default";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// Tokens this close to expiry are refreshed.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Opaque source of bearer tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self, scope: &str) -> Result<AccessToken, TransportError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Workload identity federation credential.
pub struct WorkloadIdentityCredential {
    client: reqwest::Client,
    authority_host: String,
    tenant_id: Option<String>,
    client_id: Option<String>,
    token_file: Option<PathBuf>,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl WorkloadIdentityCredential {
    pub fn new(
        authority_host: impl Into<String>,
        tenant_id: Option<String>,
        client_id: Option<String>,
        token_file: Option<PathBuf>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            authority_host: authority_host.into(),
            tenant_id,
            client_id,
            token_file,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Reads `AZURE_AUTHORITY_HOST`, `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
    /// `AZURE_FEDERATED_TOKEN_FILE` as injected by the platform. Missing
    /// values only fail once a token is requested.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self::new(
            var("AZURE_AUTHORITY_HOST").unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            var("AZURE_TENANT_ID"),
            var("AZURE_CLIENT_ID"),
            var("AZURE_FEDERATED_TOKEN_FILE").map(PathBuf::from),
        )
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            tenant_id
        )
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken, TransportError> {
        let missing = |name: &str| TransportError::Credential(format!("{name} is not set"));
        let tenant_id = self.tenant_id.as_deref().ok_or_else(|| missing("AZURE_TENANT_ID"))?;
        let client_id = self.client_id.as_deref().ok_or_else(|| missing("AZURE_CLIENT_ID"))?;
        let token_file = self
            .token_file
            .as_ref()
            .ok_or_else(|| missing("AZURE_FEDERATED_TOKEN_FILE"))?;

        let assertion = tokio::fs::read_to_string(token_file).await.map_err(|e| {
            TransportError::Credential(format!(
                "failed to read federated token {}: {e}",
                token_file.display()
            ))
        })?;

        let params = [
            ("client_id", client_id),
            ("scope", scope),
            ("grant_type", "client_credentials"),
            (
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            ),
            ("client_assertion", assertion.trim()),
        ];

        let response = self
            .client
            .post(self.token_url(tenant_id))
            .form(&params)
            .send()
            .await
            .map_err(|e| TransportError::Credential(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Credential(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Credential(e.to_string()))?;

        let expires_at = Duration::try_seconds(token.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                TransportError::Credential(format!(
                    "token endpoint returned unusable expires_in {}",
                    token.expires_in
                ))
            })?;

        debug!(scope, expires_in = token.expires_in, "acquired access token");
        Ok(AccessToken {
            token: token.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for WorkloadIdentityCredential {
    async fn token(&self, scope: &str) -> Result<AccessToken, TransportError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope).filter(|t| t.is_fresh()) {
            return Ok(token.clone());
        }

        let token = self.request_token(scope).await?;
        cache.insert(scope.to_string(), token.clone());
        Ok(token)
    }
}
