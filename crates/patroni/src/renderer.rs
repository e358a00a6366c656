use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dbcp_config::AgentConfig;
use nix::unistd::{User, chown};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::PatroniRecord;

static DEFAULT_TEMPLATE: &str = include_str!("../templates/patroni.yml");

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o600;

/// Writes the HA manager's configuration file.
#[async_trait]
pub trait ConfigRenderer: Send + Sync {
    /// Renders `record` and returns the path written.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is missing or the file cannot be written.
    async fn render(&self, record: &PatroniRecord) -> Result<PathBuf>;
}

/// Options for [`TemplateRenderer`].
#[derive(Clone, Debug)]
pub struct TemplateRendererOptions {
    /// Where the rendered file goes.
    pub config_path: PathBuf,

    /// Account the file is handed to.
    pub owner: Option<String>,

    /// Template file. The built-in template is used when `None`.
    pub template_path: Option<PathBuf>,
}

/// Renders a `{placeholder}` template.
#[derive(Clone, Debug)]
pub struct TemplateRenderer {
    config_path: PathBuf,
    owner: Option<String>,
    template_path: Option<PathBuf>,
}

impl TemplateRenderer {
    /// Creates a new `TemplateRenderer`.
    #[must_use]
    pub fn new(
        TemplateRendererOptions {
            config_path,
            owner,
            template_path,
        }: TemplateRendererOptions,
    ) -> Self {
        Self {
            config_path,
            owner,
            template_path,
        }
    }

    /// Renderer for `node.patroni`, owned by `node.os_user`.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(TemplateRendererOptions {
            config_path: config.node.patroni.config_path.clone(),
            owner: Some(config.node.os_user.clone()).filter(|u| !u.is_empty()),
            template_path: config.node.patroni.template_path.clone(),
        })
    }

    async fn template(&self) -> Result<String> {
        match &self.template_path {
            Some(path) => {
                debug!(target: "render", "using template {}", path.display());
                fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::TemplateRead(path.clone(), e))
            }
            None => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }

    async fn write(&self, contents: &str) -> Result<()> {
        let path = &self.config_path;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(dir)
                .await
                .map_err(|e| Error::Write(dir.to_path_buf(), e))?;
        }

        let mut file = open_private(path).await?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| Error::Write(path.clone(), e))?;
        file.flush()
            .await
            .map_err(|e| Error::Write(path.clone(), e))?;

        if let Some(owner) = &self.owner {
            give_to(path, owner)?;
        }

        Ok(())
    }
}

/// Opens `path` truncated and restricted to its owner, before anything is written.
async fn open_private(path: &Path) -> Result<fs::File> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)
        .await
        .map_err(|e| Error::Write(path.to_path_buf(), e))?;

    // `mode` only applies on creation; a file left by an earlier run keeps its bits.
    file.set_permissions(std::fs::Permissions::from_mode(FILE_MODE))
        .await
        .map_err(|e| Error::Write(path.to_path_buf(), e))?;

    Ok(file)
}

#[async_trait]
impl ConfigRenderer for TemplateRenderer {
    async fn render(&self, record: &PatroniRecord) -> Result<PathBuf> {
        let template = self.template().await?;
        let rendered = substitute(&template, &record.placeholders()?)?;

        self.write(&rendered).await?;

        info!(
            target: "render",
            "patroni configuration written to {}",
            self.config_path.display()
        );
        Ok(self.config_path.clone())
    }
}

/// Replaces every `{name}` in `template` in a single pass.
///
/// Only lowercase identifiers in braces are placeholders, so YAML flow collections
/// such as `{}` or `{a: 1}` pass through untouched. Substituted text is never
/// rescanned.
///
/// # Errors
///
/// Returns an error for a placeholder missing from `values`.
pub fn substitute(template: &str, values: &BTreeMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let len = after
            .find(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..len];

        if !name.is_empty() && after[len..].starts_with('}') {
            let value = values
                .get(name)
                .ok_or_else(|| Error::UnknownPlaceholder(name.to_string()))?;
            out.push_str(value);
            rest = &after[len + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn give_to(path: &Path, owner: &str) -> Result<()> {
    let user = User::from_name(owner)
        .map_err(|e| Error::UserLookup(owner.to_string(), e))?
        .ok_or_else(|| Error::UnknownUser(owner.to_string()))?;

    chown(path, Some(user.uid), Some(user.gid))
        .map_err(|e| Error::Ownership(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&'static str, &str)]) -> BTreeMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, (*v).to_string())).collect()
    }

    #[test]
    fn test_substitute_replaces_placeholders() {
        let out = substitute(
            "scope: {cluster_name}\nname: {node_name}\n",
            &values(&[("cluster_name", "\"pg\""), ("node_name", "\"node1\"")]),
        )
        .unwrap();

        assert_eq!(out, "scope: \"pg\"\nname: \"node1\"\n");
    }

    #[test]
    fn test_substitute_leaves_flow_collections() {
        let out = substitute("tags: {}\nx: {a: 1}\ny: {Z}\n", &values(&[])).unwrap();

        assert_eq!(out, "tags: {}\nx: {a: 1}\ny: {Z}\n");
    }

    #[test]
    fn test_substitute_does_not_rescan_values() {
        let out = substitute(
            "{a} {b}",
            &values(&[("a", "{b}"), ("b", "two")]),
        )
        .unwrap();

        assert_eq!(out, "{b} two");
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let err = substitute("name: {nodename}", &values(&[])).unwrap_err();

        assert!(matches!(err, Error::UnknownPlaceholder(name) if name == "nodename"));
    }

    #[test]
    fn test_default_template_has_no_unknown_placeholders() {
        let names = [
            "cluster_name",
            "namespace",
            "node_name",
            "api_listen",
            "api_connect_address",
            "etcd3",
            "pg_listen",
            "pg_connect_address",
            "data_dir",
            "bin_dir",
            "users",
            "superuser",
            "replication",
            "initdb",
            "pg_hba",
            "dcs_ttl",
            "dcs_loop_wait",
            "dcs_retry_timeout",
            "dcs_maximum_lag_on_failover",
            "use_pg_rewind",
            "use_slots",
            "parameters",
            "create_replica_methods",
            "tags",
        ];
        let all: BTreeMap<&str, String> = names.iter().map(|n| (*n, "x".to_string())).collect();

        assert!(substitute(DEFAULT_TEMPLATE, &all).is_ok());
    }

    fn mode_of(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn test_new_file_is_private_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patroni.yml");

        let _file = open_private(&path).await.unwrap();

        assert_eq!(mode_of(&path), FILE_MODE);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_existing_file_is_emptied_and_restricted_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patroni.yml");
        std::fs::write(&path, "password: old-secret\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let _file = open_private(&path).await.unwrap();

        assert_eq!(mode_of(&path), FILE_MODE);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
