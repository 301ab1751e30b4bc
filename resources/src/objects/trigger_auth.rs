use serde::{Deserialize, Serialize};
use strum::Display;

use super::{Metadata, Object};

/// Namespaced credential declaration referenced by triggers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TriggerAuthentication {
    pub metadata: Metadata,
    pub spec: TriggerAuthenticationSpec,
}

impl Object for TriggerAuthentication {
    fn kind(&self) -> &'static str {
        "TriggerAuthentication"
    }

    fn plural() -> &'static str {
        "triggerauthentications"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Cluster-wide variant; its secret references resolve in the operator's
/// own namespace.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClusterTriggerAuthentication {
    pub metadata: Metadata,
    pub spec: TriggerAuthenticationSpec,
}

impl Object for ClusterTriggerAuthentication {
    fn kind(&self) -> &'static str {
        "ClusterTriggerAuthentication"
    }

    fn plural() -> &'static str {
        "clustertriggerauthentications"
    }

    fn cluster_scoped() -> bool {
        true
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAuthenticationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_identity: Option<PodIdentity>,
    #[serde(default)]
    pub secret_target_ref: Vec<SecretTargetRef>,
    #[serde(default)]
    pub config_map_target_ref: Vec<ConfigMapTargetRef>,
    #[serde(default)]
    pub env: Vec<EnvTargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_store: Option<SecretStoreSpec>,
}

impl TriggerAuthenticationSpec {
    /// Names of the secrets this declaration reads, for reverse indexing.
    pub fn referenced_secrets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .secret_target_ref
            .iter()
            .map(|r| r.name.to_owned())
            .collect();
        if let Some(store) = &self.secret_store {
            if let Some(token) = &store.token_secret {
                names.push(token.name.to_owned());
            }
        }
        names.dedup();
        names
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretTargetRef {
    /// Adapter parameter the resolved value is bound to.
    pub parameter: String,
    /// Secret name.
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapTargetRef {
    pub parameter: String,
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub optional: bool,
}

/// Reads a value from the workload's own container environment after
/// interpolation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvTargetRef {
    pub parameter: String,
    /// Environment variable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Vault-style external store; only the fetch surface is modelled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreSpec {
    /// Base URL of the store.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<SecretKeyRef>,
    #[serde(default)]
    pub secrets: Vec<StoreSecretRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreSecretRef {
    pub parameter: String,
    /// Path below the store address.
    pub path: String,
    /// Field extracted from the returned JSON document.
    pub field: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentity {
    #[serde(default)]
    pub provider: PodIdentityProvider,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PodIdentityProvider {
    None,
    Aws,
    Gcp,
    Azure,
}

impl Default for PodIdentityProvider {
    fn default() -> Self {
        PodIdentityProvider::None
    }
}
