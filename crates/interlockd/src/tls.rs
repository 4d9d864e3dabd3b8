//! TLS listener: plain HTTP when disabled, rustls otherwise, with optional
//! self-signed keypair generation and HSM-encrypted private keys.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;

use interlock_core::status::Severity;
use interlock_core::{Error, Result};

use crate::state::SharedState;

pub async fn serve(state: SharedState, app: Router) -> Result<()> {
    let addr: SocketAddr = state
        .config
        .bind_address
        .parse()
        .map_err(|e| Error::Other(format!("invalid bind address: {e}")))?;

    if state.config.tls == "gen" {
        generate_certs(&state)?;
    }

    if state.config.tls == "off" {
        tracing::info!("starting HTTP server on {addr}");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        return axum::serve(listener, app)
            .await
            .map_err(|e| Error::Other(format!("HTTP server: {e}")));
    }

    let cert = fs::read(&state.config.tls_cert)?;
    let key = load_tls_key(&state)?;

    let config = if state.config.tls_client_ca.is_empty() {
        RustlsConfig::from_pem(cert, key)
            .await
            .map_err(|e| Error::Other(format!("TLS configuration: {e}")))?
    } else {
        mutual_tls_config(&state.config.tls_client_ca, &cert, &key)?
    };

    tracing::info!("starting HTTPS server on {addr}");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::Other(format!("HTTPS server: {e}")))
}

/// Read the TLS private key, transparently converting and decrypting it
/// when the HSM `tls` role is active: the key file is kept encrypted on
/// disk with the HSM cipher and decrypted only in memory.
fn load_tls_key(state: &SharedState) -> Result<Vec<u8>> {
    let hsm = match &state.hsm_tls {
        Some(hsm) => hsm,
        None => return Ok(fs::read(&state.config.tls_key)?),
    };

    let ext = format!(".{}", hsm.cipher_info().extension);
    let configured = state.config.tls_key.clone();

    // use a previously converted key if found, as the tls_key directive
    // might not have been updated by the user
    let encrypted = if configured.ends_with(&ext) {
        configured
    } else {
        let converted = format!("{configured}{ext}");

        if !Path::new(&converted).exists() {
            encrypt_key_file(state, hsm, &configured, &converted)?;
        }

        converted
    };

    state
        .status
        .log(Severity::Notice, "decrypting TLS key file");

    let mut input = fs::File::open(&encrypted)?;
    let mut key = Vec::new();

    let mut cipher = hsm.cipher();
    cipher.decrypt(&mut input, &mut key, false)?;

    Ok(key)
}

/// One-time conversion of a plaintext key file into its HSM-encrypted
/// form; the plaintext original is removed.
fn encrypt_key_file(
    state: &SharedState,
    hsm: &Arc<interlock_hsm::Hsm>,
    src: &str,
    dst: &str,
) -> Result<()> {
    state
        .status
        .log(Severity::Notice, "encrypting existing TLS key file");

    let mut input = fs::File::open(src)?;

    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(dst)?;

    let mut cipher = hsm.cipher();
    cipher.encrypt(&mut input, &mut output, false)?;
    output.flush()?;

    fs::remove_file(src)?;

    state.status.log(
        Severity::Notice,
        format!("TLS key file {src} moved and encrypted to {dst}"),
    );

    Ok(())
}

fn mutual_tls_config(ca_path: &str, cert: &[u8], key: &[u8]) -> Result<RustlsConfig> {
    let tls_err = |e: &dyn std::fmt::Display| Error::Other(format!("TLS configuration: {e}"));

    let ca = fs::read(ca_path)?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &ca[..]) {
        let cert = cert.map_err(|e| tls_err(&e))?;
        roots
            .add(cert)
            .map_err(|e| Error::Other(format!("could not parse client certificate authority: {e}")))?;
    }

    let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| tls_err(&e))?;

    let certs = rustls_pemfile::certs(&mut &cert[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_err(&e))?;

    let key = rustls_pemfile::private_key(&mut &key[..])
        .map_err(|e| tls_err(&e))?
        .ok_or_else(|| Error::Other("no private key found in TLS key file".into()))?;

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| tls_err(&e))?;

    Ok(RustlsConfig::from_config(Arc::new(config)))
}

/// Self-sign a keypair for the bind address. Existing files are left
/// untouched.
fn generate_certs(state: &SharedState) -> Result<()> {
    if Path::new(&state.config.tls_cert).exists() || Path::new(&state.config.tls_key).exists() {
        tracing::info!("skipping TLS keypair generation: files exist");
        return Ok(());
    }

    let host = state
        .config
        .bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or("127.0.0.1")
        .to_string();

    state.status.log(
        Severity::Notice,
        format!("generating TLS keypair for {host}"),
    );

    let generated = rcgen::generate_simple_self_signed(vec![host])
        .map_err(|e| Error::Other(format!("TLS keypair generation: {e}")))?;

    let mut cert = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(&state.config.tls_cert)?;
    cert.write_all(generated.cert.pem().as_bytes())?;

    let mut key = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&state.config.tls_key)?;
    key.write_all(generated.key_pair.serialize_pem().as_bytes())?;

    let digest = {
        use sha2::Digest;
        sha2::Sha256::digest(generated.cert.der())
    };

    state.status.log(
        Severity::Notice,
        format!("SHA-256 fingerprint: {}", hex::encode(digest)),
    );

    Ok(())
}
