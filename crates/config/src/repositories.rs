use std::collections::BTreeMap;

use serde::Deserialize;

/// `repositories` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Repositories {
    /// PostgreSQL package repositories, keyed by OS family.
    #[serde(default)]
    pub postgresql: RepoEntry,

    /// etcd release archive locations, under the `url` key.
    #[serde(default)]
    pub etcd: RepoEntry,

    /// Patroni package names (`debian_package`, `rhel_pip`).
    #[serde(default)]
    pub patroni: RepoEntry,
}

/// A named set of sources with one selected as default.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RepoEntry {
    /// Key of the source to use.
    #[serde(default)]
    pub default: String,

    /// All known sources.
    #[serde(default)]
    pub sources: BTreeMap<String, BTreeMap<String, String>>,
}

impl RepoEntry {
    /// The selected source, if `default` names one.
    #[must_use]
    pub fn selected(&self) -> Option<&BTreeMap<String, String>> {
        self.sources.get(&self.default)
    }

    /// A value from the selected source.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.selected()
            .and_then(|source| source.get(key))
            .map(String::as_str)
    }
}
