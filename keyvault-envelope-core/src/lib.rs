//! Chunked envelope encryption against an asymmetric key vault, and the
//! `keyvault+` retrieval scheme used by downloader plugins.

pub mod chunk;
pub mod dispatch;
pub mod envelope;
pub mod errors;
pub mod files;
pub mod id;
pub mod keys;
pub mod kms;
pub mod pipeline;
pub mod secrets;
pub mod timestamp;

pub use chunk::{DEFAULT_KEY_BITS, chunk_size};
pub use dispatch::{
    FileHandler, Handler, RetrievalDispatcher, SecretHandler, download, download_bytes, resolve,
};
pub use envelope::Envelope;
pub use errors::{Error, KmsError, KmsResult, Result};
pub use id::{DEFAULT_DNS_SUFFIX, ObjectType, ResourceIdentifier};
pub use keys::{Key, KeyList};
pub use kms::{KeyBundle, KeyLocator, KmsClient, SecretBundle, SecretItem};
pub use pipeline::{EncryptionPipeline, KeyHandle, KeyOverrides, PipelineState};
pub use secrets::{Secret, SecretList};
pub use timestamp::LastModified;
