use std::{collections::HashMap, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use resources::{
    config::Settings,
    informer::Store,
    objects::{
        config_map::ConfigMap,
        secret::Secret,
        trigger::{AuthenticationKind, Trigger},
        trigger_auth::{
            ClusterTriggerAuthentication, PodIdentityProvider, TriggerAuthentication,
            TriggerAuthenticationSpec,
        },
        uri_of,
        workload::Workload,
        Object,
    },
};

use crate::error::ScaleError;
use secret_store::{HttpSecretStore, SecretStore};

pub mod env;
pub mod secret_store;

/// Flat parameter map an adapter is built from, plus the pod identity the
/// authentication declared.
#[derive(Debug, Clone)]
pub struct ResolvedTrigger {
    pub params: HashMap<String, String>,
    pub pod_identity: PodIdentityProvider,
    /// Store key of the authentication this trigger depends on, for the
    /// cache's reverse index.
    pub auth_key: Option<String>,
}

/// Materializes trigger parameters from declarative references. All
/// reads go through informer stores; resolution is idempotent for
/// unchanged inputs.
pub struct Resolver {
    trigger_auth_store: Store<TriggerAuthentication>,
    cluster_trigger_auth_store: Store<ClusterTriggerAuthentication>,
    secret_store: Store<Secret>,
    config_map_store: Store<ConfigMap>,
    settings: Arc<Settings>,
}

impl Resolver {
    pub fn new(
        trigger_auth_store: Store<TriggerAuthentication>,
        cluster_trigger_auth_store: Store<ClusterTriggerAuthentication>,
        secret_store: Store<Secret>,
        config_map_store: Store<ConfigMap>,
        settings: Arc<Settings>,
    ) -> Self {
        Resolver {
            trigger_auth_store,
            cluster_trigger_auth_store,
            secret_store,
            config_map_store,
            settings,
        }
    }

    pub async fn resolve_trigger(
        &self,
        trigger: &Trigger,
        namespace: &str,
        workload: Option<&Workload>,
        env_source_container: Option<&str>,
    ) -> Result<ResolvedTrigger, ScaleError> {
        let mut params = trigger.metadata.clone();
        let mut pod_identity = PodIdentityProvider::None;
        let mut auth_key = None;

        if let Some(auth_ref) = &trigger.authentication_ref {
            let (spec, secret_namespace, key) = match auth_ref.kind {
                AuthenticationKind::TriggerAuthentication => {
                    let key = uri_of::<TriggerAuthentication>(namespace, &auth_ref.name);
                    let auth = self
                        .trigger_auth_store
                        .read()
                        .await
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| {
                            ScaleError::ResolutionFailed(format!(
                                "TriggerAuthentication {}/{} not found",
                                namespace, auth_ref.name
                            ))
                        })?;
                    (auth.spec, namespace.to_string(), key)
                },
                AuthenticationKind::ClusterTriggerAuthentication => {
                    let key = uri_of::<ClusterTriggerAuthentication>("", &auth_ref.name);
                    let auth = self
                        .cluster_trigger_auth_store
                        .read()
                        .await
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| {
                            ScaleError::ResolutionFailed(format!(
                                "ClusterTriggerAuthentication {} not found",
                                auth_ref.name
                            ))
                        })?;
                    // Cluster-scoped declarations resolve their secrets in
                    // the operator's own namespace.
                    (
                        auth.spec,
                        self.settings.cluster_object_namespace.to_owned(),
                        key,
                    )
                },
            };

            let resolved = self
                .resolve_auth_entries(&spec, &secret_namespace, workload, env_source_container)
                .await?;
            // Authentication entries win over bag keys they declare.
            params.extend(resolved);

            if let Some(identity) = &spec.pod_identity {
                pod_identity = identity.provider;
            }
            auth_key = Some(key);
        }

        Ok(ResolvedTrigger {
            params,
            pod_identity,
            auth_key,
        })
    }

    async fn resolve_auth_entries(
        &self,
        spec: &TriggerAuthenticationSpec,
        secret_namespace: &str,
        workload: Option<&Workload>,
        env_source_container: Option<&str>,
    ) -> Result<HashMap<String, String>, ScaleError> {
        let mut resolved = HashMap::new();

        for r in &spec.secret_target_ref {
            match self
                .read_secret_key(secret_namespace, &r.name, &r.key)
                .await
            {
                Ok(value) => {
                    resolved.insert(r.parameter.to_owned(), value);
                },
                Err(e) if r.optional && e.is_transient() => {
                    tracing::debug!("Skipping optional secret ref {}: {:#}", r.name, e);
                },
                Err(e) => return Err(e),
            }
        }

        for r in &spec.config_map_target_ref {
            match self
                .read_config_map_key(secret_namespace, &r.name, &r.key)
                .await
            {
                Ok(value) => {
                    resolved.insert(r.parameter.to_owned(), value);
                },
                Err(e) if r.optional && e.is_transient() => {
                    tracing::debug!("Skipping optional config map ref {}: {:#}", r.name, e);
                },
                Err(e) => return Err(e),
            }
        }

        if !spec.env.is_empty() {
            let container_env = self.container_env(workload, env_source_container)?;
            for r in &spec.env {
                let env = match &r.container_name {
                    // An explicit container overrides the target-level one.
                    Some(name) => self.named_container_env(workload, name)?,
                    None => container_env.clone(),
                };
                match env.get(&r.name) {
                    Some(value) => {
                        resolved.insert(r.parameter.to_owned(), value.to_owned());
                    },
                    None if r.optional => {},
                    None => {
                        return Err(ScaleError::ResolutionFailed(format!(
                            "env var {} not present on the workload",
                            r.name
                        )))
                    },
                }
            }
        }

        if let Some(store_spec) = &spec.secret_store {
            let token = match &store_spec.token_secret {
                Some(token_ref) => Some(
                    self.read_secret_key(secret_namespace, &token_ref.name, &token_ref.key)
                        .await?,
                ),
                None => None,
            };
            let store =
                HttpSecretStore::new(store_spec, token, self.settings.http_default_timeout)?;
            for r in &store_spec.secrets {
                let value = store.fetch(&r.path, &r.field).await?;
                resolved.insert(r.parameter.to_owned(), value);
            }
        }

        Ok(resolved)
    }

    async fn read_secret_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, ScaleError> {
        if self.settings.restrict_secret_access
            && namespace != self.settings.cluster_object_namespace
        {
            return Err(ScaleError::ResolutionFailed(format!(
                "secret access restricted to namespace {}, cannot read {}/{}",
                self.settings.cluster_object_namespace, namespace, name
            )));
        }

        let secret = self
            .secret_store
            .read()
            .await
            .get(&uri_of::<Secret>(namespace, name))
            .cloned()
            .ok_or_else(|| {
                ScaleError::ResolutionFailed(format!("secret {}/{} not found", namespace, name))
            })?;
        let encoded = secret.data.get(key).ok_or_else(|| {
            ScaleError::ResolutionFailed(format!(
                "key {} missing in secret {}/{}",
                key, namespace, name
            ))
        })?;
        let bytes = BASE64.decode(encoded).map_err(|_| {
            ScaleError::ResolutionFailed(format!(
                "key {} in secret {}/{} is not valid base64",
                key, namespace, name
            ))
        })?;
        String::from_utf8(bytes).map_err(|_| {
            ScaleError::ResolutionFailed(format!(
                "key {} in secret {}/{} is not valid UTF-8",
                key, namespace, name
            ))
        })
    }

    async fn read_config_map_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, ScaleError> {
        let config_map = self
            .config_map_store
            .read()
            .await
            .get(&uri_of::<ConfigMap>(namespace, name))
            .cloned()
            .ok_or_else(|| {
                ScaleError::ResolutionFailed(format!("config map {}/{} not found", namespace, name))
            })?;
        config_map.data.get(key).cloned().ok_or_else(|| {
            ScaleError::ResolutionFailed(format!(
                "key {} missing in config map {}/{}",
                key, namespace, name
            ))
        })
    }

    fn container_env(
        &self,
        workload: Option<&Workload>,
        env_source_container: Option<&str>,
    ) -> Result<HashMap<String, String>, ScaleError> {
        let workload = workload.ok_or_else(|| {
            ScaleError::ResolutionFailed("no workload pod spec to read env from".to_string())
        })?;
        let container = match env_source_container {
            Some(name) => workload
                .spec
                .template
                .containers
                .iter()
                .find(|c| c.name == name),
            None => workload.spec.template.containers.first(),
        }
        .ok_or_else(|| {
            ScaleError::ResolutionFailed(format!(
                "no matching container on workload {}",
                workload.name()
            ))
        })?;
        env::resolve_container_env(&container.env)
    }

    fn named_container_env(
        &self,
        workload: Option<&Workload>,
        container_name: &str,
    ) -> Result<HashMap<String, String>, ScaleError> {
        let workload = workload.ok_or_else(|| {
            ScaleError::ResolutionFailed("no workload pod spec to read env from".to_string())
        })?;
        let container = workload
            .spec
            .template
            .containers
            .iter()
            .find(|c| c.name == container_name)
            .ok_or_else(|| {
                ScaleError::ResolutionFailed(format!(
                    "container {} not found on workload {}",
                    container_name,
                    workload.name()
                ))
            })?;
        env::resolve_container_env(&container.env)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use resources::objects::{
        trigger::AuthenticationRef, trigger_auth::SecretTargetRef, workload::*, Metadata,
    };
    use tokio::sync::RwLock;

    use super::*;

    fn store<T: Object>(objects: Vec<T>) -> Store<T> {
        let mut map = HashMap::new();
        for object in objects {
            map.insert(object.uri(), object);
        }
        Arc::new(RwLock::new(map))
    }

    fn secret(namespace: &str, name: &str, entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: Metadata {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Metadata::default()
            },
            data: entries
                .iter()
                .map(|(k, v)| (k.to_string(), BASE64.encode(v)))
                .collect(),
        }
    }

    fn auth(namespace: &str, name: &str, refs: Vec<SecretTargetRef>) -> TriggerAuthentication {
        TriggerAuthentication {
            metadata: Metadata {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Metadata::default()
            },
            spec: TriggerAuthenticationSpec {
                secret_target_ref: refs,
                ..TriggerAuthenticationSpec::default()
            },
        }
    }

    fn trigger(auth_name: Option<&str>, bag: &[(&str, &str)]) -> Trigger {
        Trigger {
            type_: "metrics-api".to_string(),
            name: None,
            metadata: bag
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            authentication_ref: auth_name.map(|name| AuthenticationRef {
                name: name.to_string(),
                kind: AuthenticationKind::TriggerAuthentication,
            }),
            metric_type: None,
        }
    }

    fn resolver(
        auths: Vec<TriggerAuthentication>,
        secrets: Vec<Secret>,
        settings: Settings,
    ) -> Resolver {
        Resolver::new(
            store(auths),
            store::<ClusterTriggerAuthentication>(vec![]),
            store(secrets),
            store::<ConfigMap>(vec![]),
            Arc::new(settings),
        )
    }

    #[tokio::test]
    async fn auth_entries_win_over_property_bag() {
        let r = resolver(
            vec![auth(
                "default",
                "broker-auth",
                vec![SecretTargetRef {
                    parameter: "password".to_string(),
                    name: "broker-secret".to_string(),
                    key: "password".to_string(),
                    optional: false,
                }],
            )],
            vec![secret("default", "broker-secret", &[("password", "s3cr3t")])],
            Settings::default(),
        );

        let resolved = r
            .resolve_trigger(
                &trigger(Some("broker-auth"), &[("password", "from-bag"), ("queueName", "q")]),
                "default",
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(resolved.params["password"], "s3cr3t");
        assert_eq!(resolved.params["queueName"], "q");
        assert!(resolved.auth_key.is_some());
    }

    #[tokio::test]
    async fn missing_secret_is_resolution_failed() {
        let r = resolver(
            vec![auth(
                "default",
                "broker-auth",
                vec![SecretTargetRef {
                    parameter: "password".to_string(),
                    name: "missing".to_string(),
                    key: "password".to_string(),
                    optional: false,
                }],
            )],
            vec![],
            Settings::default(),
        );

        let result = r
            .resolve_trigger(&trigger(Some("broker-auth"), &[]), "default", None, None)
            .await;
        assert!(matches!(result, Err(ScaleError::ResolutionFailed(_))));
    }

    #[tokio::test]
    async fn optional_secret_may_be_absent() {
        let r = resolver(
            vec![auth(
                "default",
                "broker-auth",
                vec![SecretTargetRef {
                    parameter: "password".to_string(),
                    name: "missing".to_string(),
                    key: "password".to_string(),
                    optional: true,
                }],
            )],
            vec![],
            Settings::default(),
        );

        let resolved = r
            .resolve_trigger(&trigger(Some("broker-auth"), &[]), "default", None, None)
            .await
            .unwrap();
        assert!(!resolved.params.contains_key("password"));
    }

    #[tokio::test]
    async fn restriction_blocks_foreign_namespaces() {
        let settings = Settings {
            restrict_secret_access: true,
            cluster_object_namespace: "rkeda".to_string(),
            ..Settings::default()
        };
        let r = resolver(
            vec![auth(
                "default",
                "broker-auth",
                vec![SecretTargetRef {
                    parameter: "password".to_string(),
                    name: "broker-secret".to_string(),
                    key: "password".to_string(),
                    optional: false,
                }],
            )],
            vec![secret("default", "broker-secret", &[("password", "x")])],
            settings,
        );

        let result = r
            .resolve_trigger(&trigger(Some("broker-auth"), &[]), "default", None, None)
            .await;
        assert!(matches!(result, Err(ScaleError::ResolutionFailed(_))));
    }

    #[tokio::test]
    async fn env_entries_read_interpolated_container_env() {
        let workload = Workload {
            metadata: Metadata {
                name: "worker".to_string(),
                namespace: "default".to_string(),
                ..Metadata::default()
            },
            spec: WorkloadSpec {
                replicas: 1,
                template: PodTemplate {
                    labels: Default::default(),
                    containers: vec![Container {
                        name: "main".to_string(),
                        image: "worker:latest".to_string(),
                        env: vec![
                            EnvVar {
                                name: "HOST".to_string(),
                                value: "broker".to_string(),
                            },
                            EnvVar {
                                name: "URL".to_string(),
                                value: "amqp://$(HOST)".to_string(),
                            },
                        ],
                    }],
                },
            },
            status: None,
        };
        let mut auth = auth("default", "broker-auth", vec![]);
        auth.spec.env = vec![resources::objects::trigger_auth::EnvTargetRef {
            parameter: "host".to_string(),
            name: "URL".to_string(),
            container_name: None,
            optional: false,
        }];
        let r = resolver(vec![auth], vec![], Settings::default());

        let resolved = r
            .resolve_trigger(
                &trigger(Some("broker-auth"), &[]),
                "default",
                Some(&workload),
                None,
            )
            .await
            .unwrap();
        assert_eq!(resolved.params["host"], "amqp://broker");
    }
}
