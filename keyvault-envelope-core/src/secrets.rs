use crate::errors::{Error, Result};
use crate::id::ResourceIdentifier;
use crate::kms::{KmsClient, SecretBundle};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// Secret as reported to operators. Values written by this tool are standard
/// base64; use [`Secret::decode`] for the original bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: ResourceIdentifier,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "keyvault", default, skip_serializing_if = "String::is_empty")]
    pub vault: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Secret {
    fn from_id(id: ResourceIdentifier, value: Option<String>) -> Self {
        Self {
            name: id.name().to_string(),
            vault: id.vault().to_string(),
            version: id.version().map(str::to_string),
            value,
            id,
        }
    }

    /// Decodes the standard-base64 value.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let value = self.value.as_deref().unwrap_or_default();
        STANDARD
            .decode(value.trim())
            .map_err(|err| Error::InvalidEncoding(format!("secret {} is not base64: {err}", self.id)))
    }
}

impl From<SecretBundle> for Secret {
    fn from(bundle: SecretBundle) -> Self {
        Secret::from_id(bundle.id, Some(bundle.value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretList {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
}

pub fn get<K>(kms: &K, vault: &str, name: &str, version: Option<&str>) -> Result<Secret>
where
    K: KmsClient + ?Sized,
{
    Ok(kms.get_secret(vault, name, version)?.into())
}

/// Uploads `contents` as a new secret version, base64-encoded.
pub fn put<K>(kms: &K, vault: &str, name: &str, contents: &[u8]) -> Result<Secret>
where
    K: KmsClient + ?Sized,
{
    let encoded = STANDARD.encode(contents);
    Ok(kms.put_secret(vault, name, &encoded)?.into())
}

/// Lists secret identifiers. Values are never included.
pub fn list<K>(kms: &K, vault: &str) -> Result<SecretList>
where
    K: KmsClient + ?Sized,
{
    let secrets = kms
        .list_secrets(vault)?
        .into_iter()
        .map(|item| Secret::from_id(item.id, None))
        .collect();
    Ok(SecretList { secrets })
}
