//! Transport selection shared by the etcd server arguments and every client of it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dbcp_config::EtcdConfig;
use reqwest::{Certificate, Client, Identity};
use tracing::warn;

use crate::error::{Error, Result};

/// How etcd traffic is secured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    /// No transport security.
    Plaintext,

    /// TLS with client certificates on both client and peer ports.
    MutualTls,
}

/// Certificate material for mutual TLS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Certificate file.
    pub cert_file: PathBuf,

    /// Private key file.
    pub key_file: PathBuf,

    /// CA bundle.
    pub ca_file: PathBuf,
}

/// The one evaluation of transport security for an agent run.
///
/// Build it once and hand the same value to everything that talks to etcd, so the
/// server and its probes never disagree on the scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transport {
    tls: Option<TlsMaterial>,
}

impl Transport {
    /// Mutual TLS only when all three paths are non-empty, otherwise plaintext with
    /// a warning.
    #[must_use]
    pub fn select(cert_file: &str, key_file: &str, ca_file: &str) -> Self {
        if cert_file.is_empty() || key_file.is_empty() || ca_file.is_empty() {
            if !(cert_file.is_empty() && key_file.is_empty() && ca_file.is_empty()) {
                warn!(
                    target: "transport",
                    "etcd TLS material is incomplete (cert, key and CA are all required), ignoring it"
                );
            }
            warn!(target: "transport", "etcd is running without transport security");

            return Self { tls: None };
        }

        Self {
            tls: Some(TlsMaterial {
                cert_file: PathBuf::from(cert_file),
                key_file: PathBuf::from(key_file),
                ca_file: PathBuf::from(ca_file),
            }),
        }
    }

    /// Selects from the `node.etcd` section.
    #[must_use]
    pub fn from_config(etcd: &EtcdConfig) -> Self {
        Self::select(&etcd.cert_file, &etcd.key_file, &etcd.ca_file)
    }

    /// The selected mode.
    #[must_use]
    pub const fn mode(&self) -> TransportMode {
        if self.tls.is_some() {
            TransportMode::MutualTls
        } else {
            TransportMode::Plaintext
        }
    }

    /// `https` or `http`.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self.mode() {
            TransportMode::MutualTls => "https",
            TransportMode::Plaintext => "http",
        }
    }

    /// Certificate material, when mutual TLS is selected.
    #[must_use]
    pub const fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    /// Security flags for the etcd server: empty for plaintext.
    #[must_use]
    pub fn server_args(&self) -> Vec<String> {
        let Some(tls) = &self.tls else {
            return Vec::new();
        };

        let cert = tls.cert_file.display().to_string();
        let key = tls.key_file.display().to_string();
        let ca = tls.ca_file.display().to_string();

        vec![
            format!("--cert-file={cert}"),
            format!("--key-file={key}"),
            format!("--trusted-ca-file={ca}"),
            "--client-cert-auth=true".to_string(),
            format!("--peer-cert-file={cert}"),
            format!("--peer-key-file={key}"),
            format!("--peer-trusted-ca-file={ca}"),
            "--peer-client-cert-auth=true".to_string(),
        ]
    }

    /// Security flags for `etcdctl`: empty for plaintext.
    #[must_use]
    pub fn client_args(&self) -> Vec<String> {
        let Some(tls) = &self.tls else {
            return Vec::new();
        };

        vec![
            format!("--cacert={}", tls.ca_file.display()),
            format!("--cert={}", tls.cert_file.display()),
            format!("--key={}", tls.key_file.display()),
        ]
    }

    /// HTTP client matching this transport, for health probes.
    ///
    /// # Errors
    ///
    /// Returns an error if certificate material cannot be read or parsed.
    pub fn http_client(&self, timeout: Duration) -> Result<Client> {
        let mut builder = Client::builder().timeout(timeout);

        if let Some(tls) = &self.tls {
            let mut identity_pem = read(&tls.cert_file, "failed to read etcd certificate")?;
            identity_pem.push(b'\n');
            identity_pem.extend(read(&tls.key_file, "failed to read etcd private key")?);
            let ca_pem = read(&tls.ca_file, "failed to read etcd CA bundle")?;

            builder = builder
                .identity(Identity::from_pem(&identity_pem).map_err(Error::ClientBuild)?)
                .add_root_certificate(Certificate::from_pem(&ca_pem).map_err(Error::ClientBuild)?);
        }

        builder.build().map_err(Error::ClientBuild)
    }
}

fn read(path: &Path, context: &'static str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::Io(context, e))
}
