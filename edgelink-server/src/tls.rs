//! Loading of the TLS acceptor from PEM key/cert material.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use eyre::Context as _;
use tokio_rustls::TlsAcceptor;

/// Builds a [`TlsAcceptor`] from PEM files on disk.
///
/// Reads the certificate chain from `cert` and the private key from `key`.
pub(crate) fn load_acceptor(key: &Path, cert: &Path) -> eyre::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert).with_context(|| format!("while opening {}", cert.display()))?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .with_context(|| format!("while reading certificates from {}", cert.display()))?;
    if certs.is_empty() {
        eyre::bail!("no certificates in {}", cert.display());
    }

    let private_key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key).with_context(|| format!("while opening {}", key.display()))?,
    ))
    .with_context(|| format!("while reading private key from {}", key.display()))?
    .ok_or_else(|| eyre::eyre!("no private key in {}", key.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .context("while building TLS config")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_reported() {
        let err = load_acceptor(Path::new("/nonexistent/key.pem"), Path::new("/nonexistent/cert.pem"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn empty_material_is_rejected() {
        let dir = std::env::temp_dir();
        let cert = dir.join("edgelink-empty-cert.pem");
        let key = dir.join("edgelink-empty-key.pem");
        std::fs::write(&cert, "").unwrap();
        std::fs::write(&key, "").unwrap();
        let err = load_acceptor(&key, &cert).err().unwrap();
        assert!(err.to_string().contains("no certificates"));
    }
}
