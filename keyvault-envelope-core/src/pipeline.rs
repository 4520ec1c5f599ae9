//! Chunk-by-chunk encryption of whole payloads through a [`KmsClient`].

use crate::chunk::{self, DEFAULT_KEY_BITS};
use crate::envelope::Envelope;
use crate::errors::{Error, KmsError, Result};
use crate::id::ResourceIdentifier;
use crate::kms::{KeyLocator, KmsClient};
use crate::timestamp::LastModified;
use std::fmt;
use tracing::debug;

/// Key used to encrypt a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub vault: String,
    pub name: String,
    /// `None` binds the key's current version at encryption time.
    pub version: Option<String>,
    /// Modulus size, drives the chunk size.
    pub key_bits: u32,
}

impl KeyHandle {
    pub fn new(vault: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            vault: vault.into(),
            name: name.into(),
            version: None,
            key_bits: DEFAULT_KEY_BITS,
        }
    }

    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = non_empty(version);
        self
    }

    pub fn with_key_bits(mut self, key_bits: u32) -> Self {
        self.key_bits = key_bits;
        self
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// Replacements for the key coordinates recorded in an envelope. Unset
/// fields fall back to the envelope's `kid`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOverrides {
    pub vault: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

impl KeyOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_vault(mut self, vault: Option<&str>) -> Self {
        self.vault = non_empty(vault);
        self
    }

    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = non_empty(name);
        self
    }

    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = non_empty(version);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.vault.is_none() && self.name.is_none() && self.version.is_none()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Progress of a single encrypt or decrypt call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Loaded,
    Encrypting,
    Decrypting,
    Complete,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Idle => "idle",
            PipelineState::Loaded => "loaded",
            PipelineState::Encrypting => "encrypting",
            PipelineState::Decrypting => "decrypting",
            PipelineState::Complete => "complete",
            PipelineState::Failed => "failed",
        };
        f.write_str(label)
    }
}

struct Run {
    operation: &'static str,
    state: PipelineState,
}

impl Run {
    fn start(operation: &'static str) -> Self {
        Self {
            operation,
            state: PipelineState::Idle,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(operation = self.operation, from = %self.state, to = %next, "pipeline state");
        self.state = next;
    }

    fn finish<T>(mut self, result: &Result<T>) {
        match result {
            Ok(_) => self.advance(PipelineState::Complete),
            Err(err) => {
                debug!(operation = self.operation, error = %err, "pipeline aborted");
                self.advance(PipelineState::Failed);
            }
        }
    }
}

/// Drives envelope encryption and decryption. Every KMS call is made in
/// chunk order, one at a time; the first failure aborts the operation.
pub struct EncryptionPipeline<K>
where
    K: KmsClient,
{
    kms: K,
}

impl<K> EncryptionPipeline<K>
where
    K: KmsClient,
{
    pub fn new(kms: K) -> Self {
        Self { kms }
    }

    pub fn kms(&self) -> &K {
        &self.kms
    }

    /// Encrypts `plaintext` under `handle` into a fresh envelope.
    ///
    /// The returned envelope carries both chunk lists; only the ciphertext
    /// side is written by [`Envelope::save`].
    pub fn encrypt(&self, plaintext: &[u8], handle: &KeyHandle) -> Result<Envelope> {
        let mut run = Run::start("encrypt");
        let result = self.encrypt_chunks(plaintext, handle, &mut run);
        run.finish(&result);
        result
    }

    fn encrypt_chunks(
        &self,
        plaintext: &[u8],
        handle: &KeyHandle,
        run: &mut Run,
    ) -> Result<Envelope> {
        let version = match handle.version() {
            Some(version) => version.to_string(),
            None => self.current_version(handle)?,
        };
        let locator = KeyLocator::new(&handle.vault, &handle.name, Some(version.as_str()));

        let mut envelope = Envelope::new(locator.to_identifier());
        envelope.plaintext_chunks =
            chunk::encode_all(plaintext, chunk::chunk_size(handle.key_bits));
        run.advance(PipelineState::Loaded);

        run.advance(PipelineState::Encrypting);
        let total = envelope.plaintext_chunks.len();
        let mut ciphertext = Vec::with_capacity(total);
        for (index, chunk) in envelope.plaintext_chunks.iter().enumerate() {
            debug!(key = %locator, index, total, "encrypting chunk");
            ciphertext.push(self.kms.encrypt_chunk(&locator, chunk)?);
        }

        envelope.ciphertext_chunks = ciphertext;
        envelope.last_modified = Some(LastModified::now());
        Ok(envelope)
    }

    fn current_version(&self, handle: &KeyHandle) -> Result<String> {
        let bundle = self.kms.get_key(&handle.vault, &handle.name, None)?;
        bundle
            .kid
            .version()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Kms(KmsError::Response(format!(
                    "key {} was returned without a version",
                    bundle.kid
                )))
            })
    }

    /// Decrypts every chunk of `envelope` and returns the joined plaintext.
    ///
    /// On success `envelope.plaintext_chunks` holds the decrypted chunks; on
    /// failure the envelope is left untouched.
    pub fn decrypt(&self, envelope: &mut Envelope, overrides: &KeyOverrides) -> Result<Vec<u8>> {
        let mut run = Run::start("decrypt");
        let result = self.decrypt_chunks(envelope, overrides, &mut run);
        run.finish(&result);
        result
    }

    fn decrypt_chunks(
        &self,
        envelope: &mut Envelope,
        overrides: &KeyOverrides,
        run: &mut Run,
    ) -> Result<Vec<u8>> {
        let locator = effective_key(envelope.key_id.as_ref(), overrides)?;
        run.advance(PipelineState::Loaded);

        run.advance(PipelineState::Decrypting);
        let total = envelope.ciphertext_chunks.len();
        let mut plaintext_chunks = Vec::with_capacity(total);
        for (index, chunk) in envelope.ciphertext_chunks.iter().enumerate() {
            debug!(key = %locator, index, total, "decrypting chunk");
            plaintext_chunks.push(self.kms.decrypt_chunk(&locator, chunk)?);
        }

        let plaintext = chunk::decode_all(&plaintext_chunks)?;
        envelope.plaintext_chunks = plaintext_chunks;
        Ok(plaintext)
    }
}

/// Key coordinates for decryption: each override wins over the matching
/// `kid` field.
pub fn effective_key(
    key_id: Option<&ResourceIdentifier>,
    overrides: &KeyOverrides,
) -> Result<KeyLocator> {
    let recorded = key_id.map(KeyLocator::from);
    let pick = |override_value: &Option<String>, recorded_value: Option<&str>| {
        override_value
            .as_deref()
            .or(recorded_value)
            .map(str::to_string)
    };

    let vault = pick(&overrides.vault, recorded.as_ref().map(|key| key.vault.as_str()));
    let name = pick(&overrides.name, recorded.as_ref().map(|key| key.name.as_str()));
    let version = pick(&overrides.version, recorded.as_ref().and_then(KeyLocator::version));

    match (vault, name) {
        (Some(vault), Some(name)) => Ok(KeyLocator::new(vault, name, version.as_deref())),
        _ => Err(Error::InvalidEnvelope(
            "envelope has no kid and no key override was given".into(),
        )),
    }
}
