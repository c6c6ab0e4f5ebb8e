//! Linode API token lookup.
//!
//! The token is read from a Kubernetes Secret. The secret referenced by the issuer
//! config is looked up in the certificate's namespace first; if that fails the
//! default secret (`linode-credentials`/`token`, overridable through
//! `LINODE_TOKEN_SECRET_NAME` and `LINODE_TOKEN_SECRET_KEY`) is looked up in the
//! namespace the webhook itself runs in.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use fs_err as fs;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::{debug, error, info, warn};

use crate::{
    challenge::{SecretKeyRef, DEFAULT_TOKEN_SECRET_KEY, DEFAULT_TOKEN_SECRET_NAME},
    Error,
};

pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";
pub const TOKEN_SECRET_NAME_ENV: &str = "LINODE_TOKEN_SECRET_NAME";
pub const TOKEN_SECRET_KEY_ENV: &str = "LINODE_TOKEN_SECRET_KEY";
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

const FALLBACK_NAMESPACE: &str = "default";

/// Read access to Kubernetes Secrets.
#[allow(async_fn_in_trait)]
pub trait SecretStore {
    /// Returns the decoded `data` of secret `name` in `namespace`.
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>>;
}

impl SecretStore for Client {
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let secret = Api::<Secret>::namespaced(self.clone(), namespace)
            .get(name)
            .await?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }
}

/// Read `secret_ref.key` from the referenced secret in `namespace`.
///
/// An incomplete reference is rejected before the store is queried.
pub async fn read_secret_key<S: SecretStore>(
    store: &S,
    secret_ref: &SecretKeyRef,
    namespace: &str,
) -> Result<String> {
    if !secret_ref.is_valid() {
        return Err(Error::InvalidSecretReference.into());
    }
    let data = store
        .get_secret_data(namespace, &secret_ref.name)
        .await
        .with_context(|| {
            format!(
                "failed to get secret {:?} in namespace {namespace:?}",
                secret_ref.name
            )
        })?;
    let value = data.get(&secret_ref.key).ok_or_else(|| Error::SecretKeyNotFound {
        key: secret_ref.key.clone(),
        namespace: namespace.to_string(),
        name: secret_ref.name.clone(),
    })?;
    Ok(String::from_utf8_lossy(value).into_owned())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The secret looked up in the webhook namespace when the issuer's secret is unusable.
pub fn default_secret_ref(name: Option<String>, key: Option<String>) -> SecretKeyRef {
    SecretKeyRef {
        name: non_empty(name).unwrap_or_else(|| DEFAULT_TOKEN_SECRET_NAME.to_string()),
        key: non_empty(key).unwrap_or_else(|| DEFAULT_TOKEN_SECRET_KEY.to_string()),
    }
}

/// Resolve the webhook's own namespace from `POD_NAMESPACE` or the service account mount.
pub fn resolve_pod_namespace(env_value: Option<String>, namespace_file: &Path) -> Option<String> {
    let namespace = match env_value.filter(|v| !v.trim().is_empty()) {
        Some(namespace) => namespace,
        None => match fs::read_to_string(namespace_file) {
            Ok(data) => data,
            Err(err) => {
                error!("failed to read pod namespace: {err}");
                return None;
            }
        },
    };
    let namespace = namespace.trim();
    (!namespace.is_empty()).then(|| namespace.to_string())
}

/// Resolves the Linode API token for a challenge.
///
/// The webhook namespace and the default secret reference are computed on first
/// use and kept for the lifetime of the resolver.
pub struct CredentialResolver<S> {
    store: S,
    pod_namespace: Option<String>,
    namespace_file: PathBuf,
    token_secret_name: Option<String>,
    token_secret_key: Option<String>,
    namespace: OnceLock<String>,
    default_ref: OnceLock<SecretKeyRef>,
}

impl<S: SecretStore> CredentialResolver<S> {
    pub fn new(
        store: S,
        pod_namespace: Option<String>,
        namespace_file: PathBuf,
        token_secret_name: Option<String>,
        token_secret_key: Option<String>,
    ) -> Self {
        Self {
            store,
            pod_namespace,
            namespace_file,
            token_secret_name,
            token_secret_key,
            namespace: OnceLock::new(),
            default_ref: OnceLock::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The namespace the webhook runs in.
    ///
    /// Falls back to `default` without remembering it, so a later call can still
    /// pick up the real namespace.
    pub fn pod_namespace(&self) -> String {
        if let Some(namespace) = self.namespace.get() {
            return namespace.clone();
        }
        let env_value = non_empty(self.pod_namespace.clone())
            .or_else(|| std::env::var(POD_NAMESPACE_ENV).ok());
        match resolve_pod_namespace(env_value, &self.namespace_file) {
            Some(namespace) => self.namespace.get_or_init(|| namespace).clone(),
            None => {
                error!("invalid webhook pod namespace provided");
                FALLBACK_NAMESPACE.to_string()
            }
        }
    }

    pub fn default_secret_ref(&self) -> SecretKeyRef {
        self.default_ref
            .get_or_init(|| {
                let name = non_empty(self.token_secret_name.clone())
                    .or_else(|| std::env::var(TOKEN_SECRET_NAME_ENV).ok());
                let key = non_empty(self.token_secret_key.clone())
                    .or_else(|| std::env::var(TOKEN_SECRET_KEY_ENV).ok());
                default_secret_ref(name, key)
            })
            .clone()
    }

    /// Look the token up in the certificate's namespace, then in the webhook's namespace.
    pub async fn api_key(&self, secret_ref: &SecretKeyRef, namespace: &str) -> Result<String> {
        match read_secret_key(&self.store, secret_ref, namespace).await {
            Ok(token) => {
                debug!(namespace, secret = %secret_ref.name, "using certificate namespace secret");
                return Ok(token);
            }
            Err(err) => {
                warn!("failed to find certificate namespace linode API token secret: {err:?}");
            }
        }
        info!("falling back to webhook namespace for linode API token secret");
        let fallback_ref = self.default_secret_ref();
        let pod_namespace = self.pod_namespace();
        read_secret_key(&self.store, &fallback_ref, &pod_namespace).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// Secrets kept in memory, keyed by (namespace, name).
    #[derive(Default)]
    pub(crate) struct MemorySecretStore {
        secrets: Mutex<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>,
        calls: AtomicUsize,
    }

    impl MemorySecretStore {
        pub(crate) fn with_secret(self, namespace: &str, name: &str, key: &str, value: &str) -> Self {
            self.secrets
                .lock()
                .unwrap()
                .entry((namespace.to_string(), name.to_string()))
                .or_default()
                .insert(key.to_string(), value.as_bytes().to_vec());
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SecretStore for MemorySecretStore {
        async fn get_secret_data(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<BTreeMap<String, Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.secrets
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
                .with_context(|| format!("secrets \"{name}\" not found"))
        }
    }

    /// Serializes tests that touch the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Sets environment variables for the lifetime of the guard.
    struct EnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        keys: Vec<&'static str>,
    }

    impl EnvGuard {
        fn set(vars: &[(&'static str, Option<&str>)]) -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            for (key, value) in vars {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
            Self {
                _lock: lock,
                keys: vars.iter().map(|(key, _)| *key).collect(),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for key in &self.keys {
                std::env::remove_var(key);
            }
        }
    }

    fn resolver(store: MemorySecretStore) -> CredentialResolver<MemorySecretStore> {
        CredentialResolver::new(
            store,
            Some("cert-manager".into()),
            PathBuf::from("/nonexistent"),
            Some("linode-credentials".into()),
            Some("token".into()),
        )
    }

    #[tokio::test]
    async fn invalid_reference_is_rejected_before_lookup() {
        let store = MemorySecretStore::default();
        for secret_ref in [
            SecretKeyRef::new("", "token"),
            SecretKeyRef::new("linode", ""),
            SecretKeyRef::default(),
        ] {
            let err = read_secret_key(&store, &secret_ref, "web").await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::InvalidSecretReference)
            ));
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn can_read_secret_key() {
        let store = MemorySecretStore::default().with_secret("web", "linode", "api", "abc");
        let token = read_secret_key(&store, &SecretKeyRef::new("linode", "api"), "web")
            .await
            .unwrap();
        assert_eq!(token, "abc");
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let store = MemorySecretStore::default().with_secret("web", "linode", "api", "abc");
        let err = read_secret_key(&store, &SecretKeyRef::new("linode", "token"), "web")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::SecretKeyNotFound { key, .. }) if key == "token"
        ));
    }

    #[tokio::test]
    async fn missing_secret_is_reported() {
        let store = MemorySecretStore::default();
        let err = read_secret_key(&store, &SecretKeyRef::new("linode", "token"), "web")
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("failed to get secret \"linode\" in namespace \"web\""));
    }

    #[tokio::test]
    async fn prefers_certificate_namespace() {
        let store = MemorySecretStore::default()
            .with_secret("web", "linode", "api", "from-web")
            .with_secret("cert-manager", "linode-credentials", "token", "from-webhook");
        let resolver = resolver(store);
        let token = resolver
            .api_key(&SecretKeyRef::new("linode", "api"), "web")
            .await
            .unwrap();
        assert_eq!(token, "from-web");
        assert_eq!(resolver.store().calls(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_webhook_namespace() {
        let store = MemorySecretStore::default().with_secret(
            "cert-manager",
            "linode-credentials",
            "token",
            "from-webhook",
        );
        let resolver = resolver(store);
        let token = resolver
            .api_key(&SecretKeyRef::new("linode", "api"), "web")
            .await
            .unwrap();
        assert_eq!(token, "from-webhook");
        assert_eq!(resolver.store().calls(), 2);
    }

    #[tokio::test]
    async fn empty_reference_falls_back_to_default() {
        let store = MemorySecretStore::default().with_secret(
            "cert-manager",
            "linode-credentials",
            "token",
            "from-webhook",
        );
        let resolver = resolver(store);
        let token = resolver
            .api_key(&SecretKeyRef::default(), "web")
            .await
            .unwrap();
        assert_eq!(token, "from-webhook");
        // Only the fallback reached the store.
        assert_eq!(resolver.store().calls(), 1);
    }

    #[tokio::test]
    async fn fails_when_both_lookups_fail() {
        let resolver = resolver(MemorySecretStore::default());
        let err = resolver
            .api_key(&SecretKeyRef::new("linode", "api"), "web")
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("failed to get secret \"linode-credentials\" in namespace \"cert-manager\""));
    }

    #[test]
    fn default_secret_ref_overrides() {
        assert_eq!(
            default_secret_ref(None, None),
            SecretKeyRef::new("linode-credentials", "token")
        );
        assert_eq!(
            default_secret_ref(Some(" custom ".into()), Some("".into())),
            SecretKeyRef::new("custom", "token")
        );
        assert_eq!(
            default_secret_ref(Some("  ".into()), Some("api-key".into())),
            SecretKeyRef::new("linode-credentials", "api-key")
        );
    }

    #[test]
    fn pod_namespace_from_env_value() {
        assert_eq!(
            resolve_pod_namespace(Some(" cert-manager\n".into()), Path::new("/nonexistent")),
            Some("cert-manager".to_string())
        );
    }

    #[test]
    fn pod_namespace_from_service_account_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("namespace");
        fs::write(&file, "webhooks\n").unwrap();
        assert_eq!(
            resolve_pod_namespace(Some("".into()), &file),
            Some("webhooks".to_string())
        );
        assert_eq!(resolve_pod_namespace(None, &file), Some("webhooks".to_string()));
    }

    #[test]
    fn pod_namespace_unresolvable() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("namespace");
        assert_eq!(resolve_pod_namespace(None, &file), None);
        fs::write(&file, "   ").unwrap();
        assert_eq!(resolve_pod_namespace(None, &file), None);
    }

    #[test]
    fn pod_namespace_is_memoized_once_resolved() {
        let _env = EnvGuard::set(&[(POD_NAMESPACE_ENV, None)]);
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("namespace");
        fs::write(&file, "webhooks").unwrap();
        let resolver = CredentialResolver::new(
            MemorySecretStore::default(),
            Some(" ".into()),
            file.clone(),
            None,
            None,
        );
        assert_eq!(resolver.pod_namespace(), "webhooks");
        fs::write(&file, "changed").unwrap();
        assert_eq!(resolver.pod_namespace(), "webhooks");
    }

    #[test]
    fn blank_override_defers_to_env() {
        let _env = EnvGuard::set(&[
            (POD_NAMESPACE_ENV, Some("hooks")),
            (TOKEN_SECRET_NAME_ENV, Some("env-secret")),
            (TOKEN_SECRET_KEY_ENV, None),
        ]);
        let resolver = CredentialResolver::new(
            MemorySecretStore::default(),
            Some("  ".into()),
            PathBuf::from("/nonexistent"),
            Some("".into()),
            Some(" ".into()),
        );
        assert_eq!(resolver.pod_namespace(), "hooks");
        assert_eq!(
            resolver.default_secret_ref(),
            SecretKeyRef::new("env-secret", "token")
        );
    }

    #[tokio::test]
    async fn falls_back_to_env_named_secret() {
        let _env = EnvGuard::set(&[
            (POD_NAMESPACE_ENV, Some("hooks")),
            (TOKEN_SECRET_NAME_ENV, Some(" env-secret ")),
            (TOKEN_SECRET_KEY_ENV, Some("env-key")),
        ]);
        let store = MemorySecretStore::default()
            .with_secret("hooks", "env-secret", "env-key", "tok")
            .with_secret("cert-manager", "linode-credentials", "token", "wrong");
        let resolver = CredentialResolver::new(
            store,
            None,
            PathBuf::from("/nonexistent"),
            None,
            None,
        );

        let token = resolver
            .api_key(&SecretKeyRef::new("linode", "api"), "web")
            .await
            .unwrap();
        assert_eq!(token, "tok");
        assert_eq!(resolver.pod_namespace(), "hooks");
        assert_eq!(
            resolver.default_secret_ref(),
            SecretKeyRef::new("env-secret", "env-key")
        );
    }
}
