use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use acme_linode::{SolverConfig, DEFAULT_TIMEOUT, LINODE_API_URL};
use anyhow::{Context, Result};
use documented::DocumentedFields;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use toml_edit::ser::to_document;
use tracing::info;

pub const CONFIG_NAME: &str = "acme-linode";
pub const ENV_PREFIX: &str = "ACME_LINODE_";

#[derive(Debug, Clone, Deserialize, Serialize, DocumentedFields)]
pub struct Config {
    /// Linode API base URL
    pub linode_api_url: String,
    /// Timeout in seconds for each Linode API operation
    pub request_timeout: u64,
    /// Namespace the webhook runs in.
    /// Empty means POD_NAMESPACE, then the service account namespace file.
    pub pod_namespace: String,
    /// Name of the fallback secret holding the Linode API token.
    /// Empty means LINODE_TOKEN_SECRET_NAME, then "linode-credentials".
    pub token_secret_name: String,
    /// Key of the token in the fallback secret.
    /// Empty means LINODE_TOKEN_SECRET_KEY, then "token".
    pub token_secret_key: String,
    /// File holding the namespace of the service account
    pub namespace_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            linode_api_url: LINODE_API_URL.into(),
            request_timeout: DEFAULT_TIMEOUT.as_secs(),
            pod_namespace: "".into(),
            token_secret_name: "".into(),
            token_secret_key: "".into(),
            namespace_file: acme_linode::credentials::SERVICE_ACCOUNT_NAMESPACE_FILE.into(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl Config {
    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig::builder()
            .linode_api_url(self.linode_api_url.clone())
            .request_timeout(Duration::from_secs(self.request_timeout))
            .maybe_pod_namespace(non_empty(&self.pod_namespace))
            .maybe_token_secret_name(non_empty(&self.token_secret_name))
            .maybe_token_secret_key(non_empty(&self.token_secret_key))
            .namespace_file(self.namespace_file.clone())
            .build()
    }

    pub fn to_commented_toml(&self) -> Result<String> {
        let mut doc = to_document(self)?;

        for (i, (mut key, _value)) in doc.iter_mut().enumerate() {
            let decor = key.leaf_decor_mut();
            let docstring = Self::FIELD_DOCS[i];

            let mut comment = String::new();
            for line in docstring.lines() {
                let line = if line.is_empty() {
                    String::from("#\n")
                } else {
                    format!("# {line}\n")
                };
                comment.push_str(&line);
            }
            decor.set_prefix(comment);
        }
        Ok(doc.to_string())
    }
}

fn load_config_file(path: &Path, figment: Figment) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

fn load_config_in_dir(dir: &Path, mut figment: Figment) -> Figment {
    for ext in ["toml", "json"] {
        let filename = dir.join(format!("{CONFIG_NAME}.{ext}"));
        if filename.exists() {
            info!("Loading config file: {}", filename.display());
            figment = load_config_file(&filename, figment);
        }
    }
    figment
}

/// Layer the built-in defaults, config files found in `search_paths`, the leaf
/// config and `ACME_LINODE_*` environment variables, in that order.
fn search_load_config(search_paths: &[&Path], leaf_config: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    for path in search_paths {
        figment = load_config_in_dir(path, figment);
    }
    if let Some(path) = leaf_config {
        figment = load_config_file(path, figment);
    }
    figment.merge(Env::prefixed(ENV_PREFIX))
}

pub fn load_config(leaf_config: Option<&Path>) -> Result<Config> {
    if let Some(path) = leaf_config {
        if !path.exists() {
            anyhow::bail!("config file {} not found", path.display());
        }
    }
    let etc_path = PathBuf::from(format!("/etc/{CONFIG_NAME}"));
    search_load_config(&[etc_path.as_path(), Path::new(".")], leaf_config)
        .extract()
        .context("failed to parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_err as fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config: Config = search_load_config(&[temp_dir.path()], None)
            .extract()
            .unwrap();
        assert_eq!(config.linode_api_url, "https://api.linode.com/v4");
        assert_eq!(config.request_timeout, 90);
        assert_eq!(config.token_secret_name, "");
    }

    #[test]
    fn test_load_config_in_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("acme-linode.toml"),
            r#"
pod_namespace = "cert-manager"
request_timeout = 30
"#,
        )
        .unwrap();

        let config: Config = search_load_config(&[temp_dir.path()], None)
            .extract()
            .unwrap();
        assert_eq!(config.pod_namespace, "cert-manager");
        assert_eq!(config.request_timeout, 30);
        assert_eq!(config.linode_api_url, "https://api.linode.com/v4");
    }

    #[test]
    fn test_leaf_config_overrides_search_paths() {
        let temp_dir1 = TempDir::new().unwrap();
        let temp_dir2 = TempDir::new().unwrap();

        fs::write(
            temp_dir1.path().join("acme-linode.toml"),
            r#"
token_secret_name = "dir1"
token_secret_key = "dir1"
pod_namespace = "dir1"
"#,
        )
        .unwrap();
        fs::write(
            temp_dir2.path().join("acme-linode.json"),
            r#"{"token_secret_key": "dir2", "pod_namespace": "dir2"}"#,
        )
        .unwrap();
        let leaf_config = temp_dir1.path().join("leaf.json");
        fs::write(&leaf_config, r#"{"pod_namespace": "leaf"}"#).unwrap();

        let config: Config =
            search_load_config(&[temp_dir1.path(), temp_dir2.path()], Some(leaf_config.as_path()))
                .extract()
                .unwrap();
        assert_eq!(config.token_secret_name, "dir1");
        assert_eq!(config.token_secret_key, "dir2");
        assert_eq!(config.pod_namespace, "leaf");
    }

    #[test]
    fn test_missing_leaf_config() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        let err = load_config(Some(missing.as_path())).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_commented_template_round_trips() {
        let toml_str = Config::default().to_commented_toml().unwrap();
        assert!(toml_str.contains("Linode API base URL"));
        assert!(toml_str.contains("Empty means POD_NAMESPACE"));

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("acme-linode.toml");
        fs::write(&path, toml_str).unwrap();
        let config: Config = search_load_config(&[], Some(path.as_path())).extract().unwrap();
        assert_eq!(config.request_timeout, 90);
    }
}
