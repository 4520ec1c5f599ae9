use crate::errors::{Error, Result};
use crate::files;
use crate::id::{ObjectType, ResourceIdentifier};
use crate::timestamp::LastModified;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Ciphertext record written next to a protected file.
///
/// `ciphertext_chunks[i]` is the encryption of `plaintext_chunks[i]` under
/// `key_id`. Only the ciphertext side is ever persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(
        rename = "kid",
        default,
        deserialize_with = "deserialize_key_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_id: Option<ResourceIdentifier>,
    #[serde(
        rename = "chunks",
        default,
        deserialize_with = "deserialize_chunks",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ciphertext_chunks: Vec<String>,
    #[serde(skip)]
    pub plaintext_chunks: Vec<String>,
    #[serde(
        rename = "lastmodified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<LastModified>,
}

impl Envelope {
    /// Empty envelope bound to the key that will encrypt it.
    pub fn new(key_id: ResourceIdentifier) -> Self {
        Self {
            key_id: Some(key_id),
            ..Self::default()
        }
    }

    /// Serializes to the on-disk JSON document (one-space indent).
    pub fn to_json(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)
            .map_err(|err| Error::InvalidEnvelope(format!("failed to encode envelope: {err}")))?;
        String::from_utf8(buffer)
            .map_err(|err| Error::InvalidEnvelope(format!("envelope is not utf-8: {err}")))
    }

    /// Parses an envelope document.
    ///
    /// Missing `kid` or `chunks` produce empty fields rather than an error so
    /// that partially written files can still be inspected; call
    /// [`Envelope::validate`] before decrypting.
    pub fn from_json(input: &str) -> Result<Self> {
        Self::from_slice(input.as_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| Error::InvalidEnvelope(err.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = files::read_file(path)?;
        Self::from_slice(&bytes)
    }

    /// Writes the envelope atomically; an existing file is only replaced once
    /// the new document is fully on disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        files::write_atomic(path, json.as_bytes())
    }

    /// Returns the key identifier after checking it names a key.
    pub fn validate(&self) -> Result<&ResourceIdentifier> {
        let key_id = self
            .key_id
            .as_ref()
            .ok_or_else(|| Error::InvalidEnvelope("envelope has no kid".into()))?;
        if key_id.object_type() != ObjectType::Key {
            return Err(Error::InvalidEnvelope(format!(
                "kid {key_id} does not reference a key"
            )));
        }
        Ok(key_id)
    }
}

fn deserialize_key_id<'de, D>(deserializer: D) -> std::result::Result<Option<ResourceIdentifier>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => ResourceIdentifier::parse(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn deserialize_chunks<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
