//! Encrypting local files to `<file>.enc` and back.

use crate::envelope::Envelope;
use crate::errors::{Error, Result};
use crate::kms::KmsClient;
use crate::pipeline::{EncryptionPipeline, KeyHandle, KeyOverrides};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

pub const ENCRYPTED_EXTENSION: &str = ".enc";

/// `values.yaml` becomes `values.yaml.enc`.
pub fn encrypted_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(ENCRYPTED_EXTENSION);
    PathBuf::from(raw)
}

/// Removes the first `.enc` from the path. A path without one maps to itself,
/// so decrypting it overwrites the envelope with the plaintext. Non UTF-8
/// paths are rejected rather than rewritten lossily.
pub fn decrypted_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_str().ok_or_else(|| Error::Io {
        path: path.display().to_string(),
        message: "path is not valid utf-8".into(),
    })?;
    Ok(PathBuf::from(raw.replacen(ENCRYPTED_EXTENSION, "", 1)))
}

/// Encrypts `path` and writes the envelope next to it. Nothing is written
/// unless every chunk encrypted.
pub fn encrypt_file<K: KmsClient>(kms: K, handle: &KeyHandle, path: &Path) -> Result<PathBuf> {
    let plaintext = read_file(path)?;
    let envelope = EncryptionPipeline::new(kms).encrypt(&plaintext, handle)?;

    let target = encrypted_path(path);
    envelope.save(&target)?;
    info!(
        source = %path.display(),
        target = %target.display(),
        chunks = envelope.ciphertext_chunks.len(),
        "encrypted file"
    );
    Ok(target)
}

/// Decrypts the envelope at `path` and writes the plaintext to
/// [`decrypted_path`].
pub fn decrypt_file<K: KmsClient>(
    kms: K,
    overrides: &KeyOverrides,
    path: &Path,
) -> Result<PathBuf> {
    let target = decrypted_path(path)?;
    let mut envelope = Envelope::load(path)?;
    let plaintext = EncryptionPipeline::new(kms).decrypt(&mut envelope, overrides)?;

    write_atomic(&target, &plaintext)?;
    info!(
        source = %path.display(),
        target = %target.display(),
        bytes = plaintext.len(),
        "decrypted file"
    );
    Ok(target)
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| Error::io(path, err))
}

/// Writes through a temp file in the target directory, then renames over
/// `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| Error::io(dir, err))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| Error::io(tmp.path(), err))?;
    tmp.persist(path)
        .map_err(|err| Error::io(path, err.error))?;
    Ok(())
}
