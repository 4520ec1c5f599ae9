//! `keyvault+secret://` and `keyvault+file://` retrieval for downloader
//! plugins.

use crate::envelope::Envelope;
use crate::errors::{Error, Result};
use crate::id::{ObjectType, ResourceIdentifier};
use crate::kms::KmsClient;
use crate::pipeline::{EncryptionPipeline, KeyOverrides};
use crate::secrets;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use tracing::debug;
use url::Url;

pub const URI_PREFIX: &str = "keyvault+";

/// Remote secret named by `keyvault+secret://<vault>/secrets/<name>[/<version>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHandler {
    pub id: ResourceIdentifier,
}

/// Local envelope named by `keyvault+file://<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandler {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    Secret(SecretHandler),
    File(FileHandler),
}

impl Handler {
    /// Retrieves the payload this handler points at.
    pub fn fetch<K: KmsClient>(&self, kms: &K) -> Result<Vec<u8>> {
        match self {
            Handler::Secret(handler) => {
                let id = &handler.id;
                debug!(secret = %id, "fetching secret");
                secrets::get(kms, id.vault(), id.name(), id.version())?.decode()
            }
            Handler::File(handler) => {
                debug!(path = %handler.path.display(), "decrypting envelope");
                let mut envelope = Envelope::load(&handler.path)?;
                EncryptionPipeline::new(kms).decrypt(&mut envelope, &KeyOverrides::none())
            }
        }
    }
}

/// Maps a downloader URI onto a handler without touching the network.
pub fn resolve(uri: &str) -> Result<Handler> {
    let unknown = || Error::UnknownScheme(uri.to_string());
    let rest = uri.trim().strip_prefix(URI_PREFIX).ok_or_else(unknown)?;
    let (scheme, target) = rest.split_once("://").ok_or_else(unknown)?;

    match scheme.to_ascii_lowercase().as_str() {
        "secret" | "secrets" => {
            let id = ResourceIdentifier::parse(&format!("https://{target}"))?;
            if id.object_type() != ObjectType::Secret {
                return Err(Error::malformed(uri, "expected a /secrets/ path"));
            }
            Ok(Handler::Secret(SecretHandler { id }))
        }
        "file" | "files" => Ok(Handler::File(FileHandler {
            path: file_path(uri)?,
        })),
        _ => Err(unknown()),
    }
}

/// Host plus path of a file URI, percent-decoded. Query and fragment are
/// dropped.
fn file_path(uri: &str) -> Result<PathBuf> {
    let url = Url::parse(uri.trim())
        .map_err(|err| Error::malformed(uri, format!("invalid file uri: {err}")))?;
    let raw = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
    let decoded = percent_decode_str(&raw)
        .decode_utf8()
        .map_err(|err| Error::malformed(uri, format!("file path is not utf-8: {err}")))?;
    if decoded.is_empty() {
        return Err(Error::malformed(uri, "missing file path"));
    }
    Ok(PathBuf::from(decoded.into_owned()))
}

/// Resolves and fetches downloader URIs against one vault client.
pub struct RetrievalDispatcher<K>
where
    K: KmsClient,
{
    kms: K,
}

impl<K> RetrievalDispatcher<K>
where
    K: KmsClient,
{
    pub fn new(kms: K) -> Self {
        Self { kms }
    }

    pub fn resolve(&self, uri: &str) -> Result<Handler> {
        resolve(uri)
    }

    /// Text view of [`RetrievalDispatcher::fetch_bytes`]; non UTF-8 payloads
    /// are `InvalidEncoding`.
    pub fn fetch(&self, handler: &Handler) -> Result<String> {
        let bytes = self.fetch_bytes(handler)?;
        String::from_utf8(bytes)
            .map_err(|err| Error::InvalidEncoding(format!("payload is not utf-8: {err}")))
    }

    /// Payload exactly as stored, binary content included.
    pub fn fetch_bytes(&self, handler: &Handler) -> Result<Vec<u8>> {
        handler.fetch(&self.kms)
    }

    pub fn download(&self, uri: &str) -> Result<String> {
        let handler = self.resolve(uri)?;
        self.fetch(&handler)
    }

    pub fn download_bytes(&self, uri: &str) -> Result<Vec<u8>> {
        let handler = self.resolve(uri)?;
        self.fetch_bytes(&handler)
    }
}

/// One-shot downloader entry point for text payloads.
pub fn download<K: KmsClient>(kms: K, uri: &str) -> Result<String> {
    RetrievalDispatcher::new(kms).download(uri)
}

/// One-shot downloader entry point; the bytes are returned unchanged.
pub fn download_bytes<K: KmsClient>(kms: K, uri: &str) -> Result<Vec<u8>> {
    RetrievalDispatcher::new(kms).download_bytes(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_secret_uri() {
        let handler = resolve("keyvault+secret://mykv/secrets/db-password/42").unwrap();
        let Handler::Secret(secret) = handler else {
            panic!("expected secret handler");
        };
        assert_eq!(secret.id.vault(), "mykv");
        assert_eq!(secret.id.name(), "db-password");
        assert_eq!(secret.id.version(), Some("42"));
    }

    #[test]
    fn accepts_plural_and_upper_case_schemes() {
        assert!(matches!(
            resolve("keyvault+SECRETS://mykv/secrets/token").unwrap(),
            Handler::Secret(_)
        ));
        assert!(matches!(
            resolve("keyvault+files://charts/values.yaml.enc").unwrap(),
            Handler::File(_)
        ));
    }

    #[test]
    fn file_path_is_host_and_path() {
        let handler = resolve("keyvault+file://charts/values.yaml.enc").unwrap();
        assert_eq!(
            handler,
            Handler::File(FileHandler {
                path: PathBuf::from("charts/values.yaml.enc")
            })
        );
        let absolute = resolve("keyvault+file:///tmp/values.yaml.enc").unwrap();
        assert_eq!(
            absolute,
            Handler::File(FileHandler {
                path: PathBuf::from("/tmp/values.yaml.enc")
            })
        );
    }

    #[test]
    fn file_path_is_percent_decoded_without_query() {
        let handler =
            resolve("keyvault+file://my%20dir/values%2Bprod.yaml.enc?ref=main#top").unwrap();
        assert_eq!(
            handler,
            Handler::File(FileHandler {
                path: PathBuf::from("my dir/values+prod.yaml.enc")
            })
        );
    }

    #[test]
    fn empty_file_uri_is_malformed() {
        assert!(matches!(
            resolve("keyvault+file://"),
            Err(Error::MalformedIdentifier { .. })
        ));
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        for uri in [
            "keyvault+bogus://x",
            "secret://mykv/secrets/a",
            "keyvault+secret:mykv",
            "",
        ] {
            assert!(
                matches!(resolve(uri), Err(Error::UnknownScheme(_))),
                "{uri}"
            );
        }
    }

    #[test]
    fn secret_uri_must_point_at_secrets() {
        let err = resolve("keyvault+secret://mykv/keys/helm").unwrap_err();
        assert!(matches!(err, Error::MalformedIdentifier { .. }));
    }
}
