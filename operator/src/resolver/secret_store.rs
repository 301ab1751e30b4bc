use async_trait::async_trait;
use resources::objects::trigger_auth::SecretStoreSpec;

use crate::error::ScaleError;

/// Fetch surface of an external secret store. Concrete back-ends beyond
/// the HTTP one live outside the core.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, path: &str, field: &str) -> Result<String, ScaleError>;
}

/// Vault-style store: `GET {address}/{path}` with a token header,
/// extracting one field from the JSON document (either top-level or
/// under a `data` object).
pub struct HttpSecretStore {
    address: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpSecretStore {
    pub fn new(
        spec: &SecretStoreSpec,
        token: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ScaleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScaleError::ConfigInvalid(format!("secret store client: {}", e)))?;
        Ok(HttpSecretStore {
            address: spec.address.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn fetch(&self, path: &str, field: &str) -> Result<String, ScaleError> {
        let url = format!("{}/{}", self.address, path.trim_start_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header("X-Vault-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScaleError::TransientBackend(format!("secret store: {}", e)))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ScaleError::ResolutionFailed(format!(
                "secret store denied access to {}",
                path
            )));
        }
        if !status.is_success() {
            return Err(ScaleError::TransientBackend(format!(
                "secret store returned {} for {}",
                status, path
            )));
        }

        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScaleError::ResolutionFailed(format!("secret store payload: {}", e)))?;
        let value = document
            .get("data")
            .and_then(|data| data.get(field))
            .or_else(|| document.get(field));
        match value {
            Some(serde_json::Value::String(s)) => Ok(s.to_owned()),
            Some(other) => Ok(other.to_string()),
            None => Err(ScaleError::ResolutionFailed(format!(
                "field {} missing in secret {}",
                field, path
            ))),
        }
    }
}
