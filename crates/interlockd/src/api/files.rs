//! Filesystem surface: listing, transfer, maintenance and the crypto
//! operation pipeline. Every user-supplied path goes through the sandbox
//! before anything touches the volume.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use interlock_core::response::ApiResponse;
use interlock_core::status::{Notification, Severity};
use interlock_core::{exec, Error, Result};
use interlock_crypto::{Cipher, Key};
use interlock_volume::archive;

use crate::api::into_json;
use crate::request;
use crate::state::{AppState, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOp {
    Move,
    Copy,
    Mkdir,
    Extract,
    Delete,
}

#[derive(Serialize)]
struct Inode {
    name: String,
    dir: bool,
    size: u64,
    mtime: i64,
    key_path: bool,
    private: bool,
    key: Option<Key>,
    sha256: String,
}

fn create_exclusive(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?)
}

fn remove_any(path: &Path) -> Result<()> {
    if fs::metadata(path)?.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }

    Ok(())
}

/// Load the key at `key_path` into `cipher`.
fn load_key(state: &AppState, cipher: &mut Box<dyn Cipher>, key_path: &str) -> Result<()> {
    let abs = state.sandbox.absolute(key_path)?;
    let (key, _) = Key::parse(&abs, &state.sandbox, &state.registry)?;

    cipher.set_key(&key, &abs)
}

// ── Listing ──────────────────────────────────────────────────────────────

pub async fn list(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, list_inner(&state, &body))
}

fn list_inner(state: &AppState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["path:s", "sha256:b"])?;

    let path = state.sandbox.absolute(request::str_field(&req, "path"))?;
    let with_sha256 = request::bool_field(&req, "sha256");

    let stat = nix::sys::statvfs::statvfs(&path)
        .map_err(|e| Error::Other(format!("statvfs: {e}")))?;
    let total_space = stat.blocks() as u64 * stat.fragment_size() as u64;
    let free_space = stat.blocks_available() as u64 * stat.fragment_size() as u64;

    let mut inodes = Vec::new();

    for entry in fs::read_dir(&path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if name == "lost+found" {
            continue;
        }

        let meta = entry.metadata()?;
        let entry_path = entry.path();
        let (in_key_store, private) = state.sandbox.classify(&entry_path);

        let key = if !meta.is_dir() && in_key_store {
            match Key::parse(&entry_path, &state.sandbox, &state.registry) {
                Ok((key, _)) => Some(key),
                Err(e) => {
                    state
                        .status
                        .log(Severity::Error, format!("error parsing {name}, {e}"));
                    None
                }
            }
        } else {
            None
        };

        let sha256 = if !meta.is_dir() && with_sha256 {
            let mut hash = Sha256::new();
            std::io::copy(&mut File::open(&entry_path)?, &mut hash)?;
            hex::encode(hash.finalize())
        } else {
            String::new()
        };

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        inodes.push(Inode {
            name,
            dir: meta.is_dir(),
            size: meta.len(),
            mtime,
            key_path: in_key_store,
            private,
            key,
            sha256,
        });
    }

    Ok(ApiResponse::ok(json!({
        "total_space": total_space,
        "free_space": free_space,
        "inodes": inodes,
    })))
}

// ── Upload / download ────────────────────────────────────────────────────

pub async fn upload(State(state): State<SharedState>, req: Request) -> Response {
    match upload_inner(&state, req).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::warn!("upload failed: {e}");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn upload_inner(state: &SharedState, req: Request) -> Result<()> {
    let encoded = req
        .headers()
        .get("X-Uploadfilename")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let overwrite = req
        .headers()
        .get("X-Forceoverwrite")
        .and_then(|v| v.to_str().ok())
        == Some("true");

    // the path is URL encoded to support non-US-ASCII
    let file_name = percent_decode_str(&encoded)
        .decode_utf8()
        .map_err(|e| Error::BadRequest(format!("invalid file name encoding: {e}")))?
        .into_owned();

    let os_path = state.sandbox.absolute(&file_name)?;

    if os_path.exists() && !overwrite {
        return Err(Error::Denied(format!(
            "path {} exists, not overwriting",
            state.sandbox.relative(&os_path)
        )));
    }

    if let Some(parent) = os_path.parent() {
        fs::DirBuilder::new().recursive(true).mode(0o700).create(parent)?;
    }

    let mut output = tokio::fs::File::create(&os_path).await?;
    output
        .set_permissions(fs::Permissions::from_mode(0o600))
        .await?;

    let rel = state.sandbox.relative(&os_path);
    let _n = Notification::new(
        state.status.clone(),
        Severity::Notice,
        format!("uploading {rel}"),
    );

    let mut written: u64 = 0;
    let mut stream = req.into_body().into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Other(format!("upload interrupted: {e}")))?;
        written += chunk.len() as u64;
        output.write_all(&chunk).await?;
    }

    output.flush().await?;

    state
        .status
        .log(Severity::Info, format!("uploaded {rel} ({written} bytes)"));

    Ok(())
}

/// First leg of the download handshake: reserve a single-use ticket.
pub async fn download(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, download_inner(&state, &body))
}

fn download_inner(state: &AppState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["path:s"])?;

    let os_path = state.sandbox.absolute(request::str_field(&req, "path"))?;

    let (in_key_store, private) = state.sandbox.classify(&os_path);
    if in_key_store && private {
        return Err(Error::Denied(
            "downloading private key(s) is not allowed".into(),
        ));
    }

    fs::metadata(&os_path)?;

    let id = state.tickets.add(os_path);

    Ok(ApiResponse::ok(json!(id)))
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    id: Option<String>,
}

/// Second leg: stream the ticket's file (or a zip of a directory) with the
/// session cookie alone.
pub async fn download_by_id(
    State(state): State<SharedState>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    match download_by_id_inner(&state, query.id.as_deref().unwrap_or_default()).await {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!("download failed: {e}");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn download_by_id_inner(state: &SharedState, id: &str) -> Result<Response> {
    let os_path = state.tickets.remove(id)?;
    let meta = fs::metadata(&os_path)?;

    let mut file_name = os_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let rel = state.sandbox.relative(&os_path);
    let notification = Notification::new(
        state.status.clone(),
        Severity::Notice,
        format!("downloading {rel}"),
    );

    let (file, size) = if meta.is_dir() {
        file_name += ".zip";

        // TMPDIR points inside the mount, so the intermediate archive
        // never leaves encrypted storage
        let sandbox = state.sandbox.clone();
        let status = state.status.clone();
        let sources = vec![os_path];

        let spool = tokio::task::spawn_blocking(move || -> Result<File> {
            let mut spool = tempfile::tempfile()?;
            archive::zip_write(&sources, &mut spool, &sandbox, &status)?;
            Ok(spool)
        })
        .await
        .map_err(|e| Error::Other(e.to_string()))??;

        let mut spool = tokio::fs::File::from_std(spool);
        spool
            .seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(Error::Io)?;
        let size = spool.metadata().await?.len();

        (spool, size)
    } else {
        (tokio::fs::File::open(&os_path).await?, meta.len())
    };

    state
        .status
        .log(Severity::Info, format!("downloading {file_name} ({size} bytes)"));

    // the notification lives as long as the response stream
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _ = &notification;
        chunk
    });

    let headers = [
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CACHE_CONTROL, "no-store".to_string()),
    ];

    Ok((headers, axum::body::Body::from_stream(stream)).into_response())
}

// ── Maintenance ──────────────────────────────────────────────────────────

pub async fn delete(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, multi_op(&state, &body, FileOp::Delete).await)
}

pub async fn mv(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, multi_op(&state, &body, FileOp::Move).await)
}

pub async fn copy(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, multi_op(&state, &body, FileOp::Copy).await)
}

pub async fn mkdir(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, multi_op(&state, &body, FileOp::Mkdir).await)
}

pub async fn extract(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, multi_op(&state, &body, FileOp::Extract).await)
}

async fn multi_op(state: &SharedState, body: &[u8], op: FileOp) -> Result<ApiResponse> {
    let (sources, dst) = match op {
        FileOp::Move | FileOp::Copy | FileOp::Extract => {
            let req = request::parse_validated(body, &["src:a", "dst:s"])?;
            let dst = state.sandbox.absolute(request::str_field(&req, "dst"))?;
            let sources = state.sandbox.absolute_all(&request::str_array(&req, "src")?)?;
            (sources, Some(dst))
        }
        FileOp::Mkdir | FileOp::Delete => {
            let req = request::parse_validated(body, &["path:a"])?;
            let sources = state.sandbox.absolute_all(&request::str_array(&req, "path")?)?;
            (sources, None)
        }
    };

    match op {
        FileOp::Mkdir => {
            for path in &sources {
                fs::DirBuilder::new().recursive(true).mode(0o700).create(path)?;
            }
        }
        FileOp::Delete => {
            for path in &sources {
                remove_any(path)?;
                state.status.log(
                    Severity::Notice,
                    format!("deleted {}", state.sandbox.relative(path)),
                );
            }
        }
        FileOp::Move | FileOp::Copy => {
            let dst = dst.unwrap_or_default();

            for src in &sources {
                state.sandbox.deny_private(src, "move or copy")?;
            }

            let state_clone = state.clone();
            let sources = sources.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                for src in &sources {
                    move_or_copy(&state_clone, src, &dst, op)?;
                }
                Ok(())
            })
            .await
            .map_err(|e| Error::Other(e.to_string()))??;
        }
        FileOp::Extract => {
            let dst = dst.unwrap_or_default();

            for src in &sources {
                state.sandbox.deny_private(src, "move or copy")?;

                match src.extension().and_then(|e| e.to_str()) {
                    Some("zip") | Some("ZIP") => {}
                    _ => return Err(Error::Unsupported("unsupported archive format".into())),
                }
            }

            let state_clone = state.clone();
            tokio::task::spawn_blocking(move || {
                for src in &sources {
                    let rel = state_clone.sandbox.relative(src);
                    let _n = Notification::new(
                        state_clone.status.clone(),
                        Severity::Notice,
                        format!("extracting {rel}"),
                    );

                    match archive::unzip(src, &dst, &state_clone.status) {
                        Ok(()) => state_clone
                            .status
                            .log(Severity::Notice, format!("completed extraction of {rel}")),
                        Err(e) => state_clone.status.error(&e),
                    }
                }
            });
        }
    }

    Ok(ApiResponse::ok_empty())
}

fn move_or_copy(state: &AppState, src: &Path, dst: &Path, op: FileOp) -> Result<()> {
    if let Ok(stat) = fs::metadata(dst) {
        if !stat.is_dir() {
            return Err(Error::Denied(format!(
                "path {} exists",
                state.sandbox.relative(dst)
            )));
        }

        if let Some(name) = src.file_name() {
            let nested = dst.join(name);
            if nested.exists() {
                return Err(Error::Denied(format!(
                    "path {} exists",
                    state.sandbox.relative(&nested)
                )));
            }
        }
    }

    let src = src.to_string_lossy();
    let dst = dst.to_string_lossy();

    match op {
        FileOp::Copy => exec::run("/bin/cp", &["-ra", &src, &dst], false, None)?,
        FileOp::Move => exec::run("/bin/mv", &[&src, &dst], false, None)?,
        _ => return Err(Error::Unsupported("unsupported operation".into())),
    };

    Ok(())
}

pub async fn new_file(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, new_file_inner(&state, &body))
}

fn new_file_inner(state: &AppState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["path:s", "contents:s"])?;

    let path = state.sandbox.absolute(request::str_field(&req, "path"))?;

    let (in_key_store, _) = state.sandbox.classify(&path);
    if in_key_store {
        return Err(Error::Denied(
            "creating files within key storage is not allowed".into(),
        ));
    }

    if path.exists() {
        return Err(Error::Denied(format!(
            "path {} exists, not overwriting",
            state.sandbox.relative(&path)
        )));
    }

    let contents = request::str_field(&req, "contents");
    fs::write(&path, contents).map_err(|_| Error::Other("cannot create file".into()))?;

    state.status.log(
        Severity::Notice,
        format!(
            "created file {} ({} bytes)",
            state.sandbox.relative(&path),
            contents.len()
        ),
    );

    Ok(ApiResponse::ok_empty())
}

pub async fn compress(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, compress_inner(&state, &body))
}

fn compress_inner(state: &SharedState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["src:a", "dst:s"])?;

    let dst = state.sandbox.absolute(request::str_field(&req, "dst"))?;

    match dst.extension().and_then(|e| e.to_str()) {
        Some("zip") | Some("ZIP") => {}
        _ => return Err(Error::Unsupported("unsupported archive format".into())),
    }

    let sources = state.sandbox.absolute_all(&request::str_array(&req, "src")?)?;

    let mut output = create_exclusive(&dst)?;

    let state_clone = state.clone();
    tokio::task::spawn_blocking(move || {
        let rel = state_clone.sandbox.relative(&dst);

        match archive::zip_write(&sources, &mut output, &state_clone.sandbox, &state_clone.status)
        {
            Ok(_) => state_clone
                .status
                .log(Severity::Notice, format!("completed compression to {rel}")),
            Err(e) => state_clone.status.error(&e),
        }
    });

    Ok(ApiResponse::ok_empty())
}

// ── Crypto pipeline ──────────────────────────────────────────────────────

/// Output path for an encrypted file: the cipher extension is appended so
/// that decryption can recover the cipher identity later.
fn encrypted_path(src: &Path, extension: &str) -> PathBuf {
    PathBuf::from(format!("{}.{extension}", src.display()))
}

/// Output path for a decrypted file: strip the cipher extension when
/// present, fall back to a `.decrypted` suffix.
fn decrypted_path(src: &Path, extension: &str) -> PathBuf {
    let display = src.display().to_string();
    let suffix = format!(".{extension}");

    match display.strip_suffix(&suffix) {
        Some(stem) => PathBuf::from(stem),
        None => PathBuf::from(format!("{display}.decrypted")),
    }
}

pub async fn encrypt(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, encrypt_inner(&state, &body))
}

fn encrypt_inner(state: &SharedState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(
        body,
        &["src:s", "cipher:s", "wipe_src:b", "sign:b", "password:s", "key:s", "sig_key:s"],
    )?;

    let src = state.sandbox.absolute(request::str_field(&req, "src"))?;
    let wipe = request::bool_field(&req, "wipe_src");
    let sign = request::bool_field(&req, "sign");
    let password = request::str_field(&req, "password");
    let key_path = request::str_field(&req, "key");
    let sig_key_path = request::str_field(&req, "sig_key");

    let mut cipher = state.registry.instance(request::str_field(&req, "cipher"))?;

    if !cipher.info().enc {
        return Err(Error::Unsupported(
            "encryption requested but not supported by cipher".into(),
        ));
    }

    if cipher.info().key_format != "password" {
        if key_path.is_empty() {
            return Err(Error::BadRequest("encryption key not specified".into()));
        }

        load_key(state, &mut cipher, key_path)?;
    }

    if sign && !cipher.info().sig {
        return Err(Error::Unsupported(
            "signing requested but not supported by cipher".into(),
        ));
    }

    if sign {
        load_key(state, &mut cipher, sig_key_path)?;
    }

    if !password.is_empty() {
        cipher.set_password(password)?;
    }

    let mut input = File::open(&src)?;
    let output_path = encrypted_path(&src, cipher.info().extension);
    let mut output = create_exclusive(&output_path)?;

    let state_clone = state.clone();
    tokio::task::spawn_blocking(move || {
        let rel = state_clone.sandbox.relative(&src);
        let _n = Notification::new(
            state_clone.status.clone(),
            Severity::Info,
            format!("encrypting {rel}"),
        );

        match cipher.encrypt(&mut input, &mut output, sign) {
            Ok(()) => {
                if wipe {
                    if let Err(e) = fs::remove_file(&src) {
                        state_clone.status.error(&e);
                        return;
                    }
                }

                state_clone
                    .status
                    .log(Severity::Notice, format!("completed encryption of {rel}"));
            }
            Err(e) => state_clone.status.error(&e),
        }
    });

    Ok(ApiResponse::ok_empty())
}

pub async fn decrypt(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, decrypt_inner(&state, &body))
}

fn decrypt_inner(state: &SharedState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(
        body,
        &["src:s", "password:s", "verify:b", "key:s", "sig_key:s", "cipher:s"],
    )?;

    let src = state.sandbox.absolute(request::str_field(&req, "src"))?;
    let password = request::str_field(&req, "password");
    let verify = request::bool_field(&req, "verify");
    let key_path = request::str_field(&req, "key");
    let sig_key_path = request::str_field(&req, "sig_key");

    let mut cipher = state.registry.instance(request::str_field(&req, "cipher"))?;

    if !cipher.info().dec {
        return Err(Error::Unsupported(
            "decryption requested but not supported by cipher".into(),
        ));
    }

    if cipher.info().key_format != "password" {
        if key_path.is_empty() {
            return Err(Error::BadRequest("decryption key not specified".into()));
        }

        load_key(state, &mut cipher, key_path)?;
    }

    cipher.set_password(password)?;

    if verify && !cipher.info().sig {
        return Err(Error::Unsupported(
            "signature verification requested but not supported by cipher".into(),
        ));
    }

    if verify {
        load_key(state, &mut cipher, sig_key_path)?;
    }

    let mut input = File::open(&src)?;
    let output_path = decrypted_path(&src, cipher.info().extension);
    let mut output = create_exclusive(&output_path)?;

    let state_clone = state.clone();
    tokio::task::spawn_blocking(move || {
        let rel = state_clone.sandbox.relative(&src);
        let _n = Notification::new(
            state_clone.status.clone(),
            Severity::Info,
            format!("decrypting {rel}"),
        );

        match cipher.decrypt(&mut input, &mut output, verify) {
            Ok(()) => state_clone
                .status
                .log(Severity::Notice, format!("completed decryption of {rel}")),
            Err(e) => state_clone.status.error(&e),
        }
    });

    Ok(ApiResponse::ok_empty())
}

pub async fn sign(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, sign_inner(&state, &body))
}

fn sign_inner(state: &SharedState, body: &[u8]) -> Result<ApiResponse> {
    let req =
        request::parse_validated(body, &["src:s", "cipher:s", "password:s", "key:s"])?;

    let src = state.sandbox.absolute(request::str_field(&req, "src"))?;
    let password = request::str_field(&req, "password");
    let key_path = request::str_field(&req, "key");

    let mut cipher = state.registry.instance(request::str_field(&req, "cipher"))?;

    if !cipher.info().sig {
        return Err(Error::Unsupported(
            "signing requested but not supported by cipher".into(),
        ));
    }

    load_key(state, &mut cipher, key_path)?;

    if !password.is_empty() {
        cipher.set_password(password)?;
    }

    let mut input = File::open(&src)?;
    let output_path =
        PathBuf::from(format!("{}.{}-signature", src.display(), cipher.info().extension));
    let mut output = create_exclusive(&output_path)?;

    let state_clone = state.clone();
    tokio::task::spawn_blocking(move || {
        let rel = state_clone.sandbox.relative(&src);
        let _n = Notification::new(
            state_clone.status.clone(),
            Severity::Info,
            format!("signing {rel}"),
        );

        match cipher.sign(&mut input, &mut output) {
            Ok(()) => state_clone
                .status
                .log(Severity::Notice, format!("completed signing of {rel}")),
            Err(e) => state_clone.status.error(&e),
        }
    });

    Ok(ApiResponse::ok_empty())
}

pub async fn verify(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, verify_inner(&state, &body))
}

fn verify_inner(state: &SharedState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["src:s", "sig:s", "key:s", "cipher:s"])?;

    let src = state.sandbox.absolute(request::str_field(&req, "src"))?;
    let sig_path = state.sandbox.absolute(request::str_field(&req, "sig"))?;
    let key_path = request::str_field(&req, "key");

    let mut cipher = state.registry.instance(request::str_field(&req, "cipher"))?;

    if !cipher.info().sig {
        return Err(Error::Unsupported(
            "signature verification requested but not supported by cipher".into(),
        ));
    }

    if cipher.info().key_format != "password" {
        load_key(state, &mut cipher, key_path)?;
    }

    let mut input = File::open(&src)?;
    let mut sig = File::open(&sig_path)?;

    let state_clone = state.clone();
    tokio::task::spawn_blocking(move || {
        let rel = state_clone.sandbox.relative(&src);
        let _n = Notification::new(
            state_clone.status.clone(),
            Severity::Info,
            format!("verifying {rel}"),
        );

        match cipher.verify(&mut input, &mut sig) {
            Ok(()) => state_clone
                .status
                .log(Severity::Notice, format!("successful verification of {rel}")),
            Err(e) => state_clone.status.error(&e),
        }
    });

    Ok(ApiResponse::ok_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_path_appends_cipher_extension() {
        assert_eq!(
            encrypted_path(Path::new("/mnt/doc.txt"), "aes256ctr"),
            PathBuf::from("/mnt/doc.txt.aes256ctr")
        );
    }

    #[test]
    fn test_decrypted_path_strips_known_extension() {
        assert_eq!(
            decrypted_path(Path::new("/mnt/doc.txt.aes256ctr"), "aes256ctr"),
            PathBuf::from("/mnt/doc.txt")
        );
        assert_eq!(
            decrypted_path(Path::new("/mnt/doc.bin"), "aes256ctr"),
            PathBuf::from("/mnt/doc.bin.decrypted")
        );
    }
}
