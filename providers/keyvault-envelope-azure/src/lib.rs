//! Azure Key Vault client backed by the live REST APIs.
//!
//! Every call is addressed by vault name; the vault URL is derived from the
//! configured DNS suffix or from an explicit base URL template. Chunk
//! encryption uses the vault's `encrypt`/`decrypt` key operations with
//! `RSA1_5`, and secrets are written with content type `base64`.

mod auth;

pub use auth::{AccessToken, AuthError, CredentialSource, KvAuthConfig};

use anyhow::{Context, Result};
use auth::AzureAuth;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use keyvault_envelope_core::{
    DEFAULT_DNS_SUFFIX, KeyBundle, KeyLocator, KmsClient, KmsError, KmsResult, ObjectType,
    ResourceIdentifier, SecretBundle, SecretItem,
};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::env;
use std::time::Duration;

const API_VERSION: &str = "7.4";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_KEY_ALGORITHM: &str = "RSA1_5";
const DEFAULT_KEY_TYPE: &str = "RSA";
const DEFAULT_KEY_SIZE: u32 = 4096;
const SECRET_CONTENT_TYPE: &str = "base64";
const VAULT_PLACEHOLDER: &str = "{vault}";

/// Connection settings for [`AzureKeyVaultClient`].
#[derive(Clone, Debug)]
pub struct AzureConfig {
    dns_suffix: String,
    base_url: Option<String>,
    timeout: Duration,
    key_algorithm: String,
    key_type: String,
    key_size: u32,
    insecure_skip_verify: bool,
    credential: CredentialSource,
}

impl AzureConfig {
    /// Public-cloud defaults with an explicit credential.
    pub fn new(credential: CredentialSource) -> Self {
        Self {
            dns_suffix: DEFAULT_DNS_SUFFIX.to_string(),
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            key_algorithm: DEFAULT_KEY_ALGORITHM.to_string(),
            key_type: DEFAULT_KEY_TYPE.to_string(),
            key_size: DEFAULT_KEY_SIZE,
            insecure_skip_verify: false,
            credential,
        }
    }

    /// Reads `KEYVAULT_ENVELOPE_AZURE_*` overrides and the credential chain.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(CredentialSource::from_env());

        if let Some(suffix) = non_empty_env("KEYVAULT_ENVELOPE_AZURE_DNS_SUFFIX") {
            config = config.with_dns_suffix(suffix);
        }
        if let Some(base_url) = non_empty_env("KEYVAULT_ENVELOPE_AZURE_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        if let Some(raw) = non_empty_env("KEYVAULT_ENVELOPE_AZURE_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid KEYVAULT_ENVELOPE_AZURE_TIMEOUT_SECS `{raw}`"))?;
            if secs > 0 {
                config = config.with_timeout(Duration::from_secs(secs));
            }
        }
        if let Some(algorithm) = non_empty_env("KEYVAULT_ENVELOPE_AZURE_KEY_ALGORITHM") {
            config = config.with_key_algorithm(algorithm);
        }
        if let Some(raw) = non_empty_env("AZURE_KEYVAULT_INSECURE_SKIP_VERIFY") {
            config.insecure_skip_verify = matches!(raw.as_str(), "1" | "true" | "TRUE" | "True");
        }
        Ok(config)
    }

    pub fn with_dns_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dns_suffix = suffix.into();
        self
    }

    /// URL template for emulators, e.g. `http://127.0.0.1:8443/{vault}`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_key_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.key_algorithm = algorithm.into();
        self
    }

    pub fn with_key_size(mut self, key_size: u32) -> Self {
        self.key_size = key_size;
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    /// Base URL of `vault`, without a trailing slash.
    pub fn vault_url(&self, vault: &str) -> String {
        match &self.base_url {
            Some(template) => template
                .replace(VAULT_PLACEHOLDER, vault)
                .trim_end_matches('/')
                .to_string(),
            None => format!("https://{vault}.{}", self.dns_suffix),
        }
    }

    fn endpoint(&self, vault: &str, path: &str) -> String {
        format!(
            "{}/{path}?api-version={API_VERSION}",
            self.vault_url(vault)
        )
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Blocking Key Vault client implementing [`KmsClient`].
pub struct AzureKeyVaultClient {
    config: AzureConfig,
    http: Client,
    auth: AzureAuth,
}

impl AzureKeyVaultClient {
    pub fn new(config: AzureConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .context("failed to build reqwest client for azure key vault")?;
        let auth = AzureAuth::new(config.credential.clone());
        Ok(Self { config, http, auth })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(AzureConfig::from_env()?)
    }

    pub fn config(&self) -> &AzureConfig {
        &self.config
    }

    fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        entity: &str,
    ) -> KmsResult<T> {
        let text = self.send(method, url, body, entity)?;
        serde_json::from_str(&text).map_err(|err| {
            KmsError::Response(format!("failed to parse response for {entity}: {err}; body={text}"))
        })
    }

    fn send(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        entity: &str,
    ) -> KmsResult<String> {
        tracing::debug!(%method, %url, "azure key vault request");
        let header = self.auth.bearer_header(&self.http)?;
        let builder = self
            .http
            .request(method, url)
            .header("Authorization", header);
        let builder = match body {
            Some(payload) => builder.json(&payload),
            None => builder,
        };

        let response = builder
            .send()
            .map_err(|err| KmsError::Request(format!("azure request failed: {err}")))?;
        let status = response.status();
        let text = response.text().unwrap_or_default();
        if status.is_success() {
            Ok(text)
        } else {
            Err(status_error(status, text, entity, self.auth.hint()))
        }
    }

    fn list_pages<T: DeserializeOwned>(&self, vault: &str, path: &str) -> KmsResult<Vec<T>> {
        let mut url = self.config.endpoint(vault, path);
        let mut collected = Vec::new();
        loop {
            let page: ListPage<T> = self.call(Method::GET, url, None, path)?;
            collected.extend(page.value.unwrap_or_default());
            match page.next_link.filter(|next| !next.is_empty()) {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(collected)
    }

    fn key_operation(&self, key: &KeyLocator, operation: &str, value: &str) -> KmsResult<String> {
        let path = match key.version() {
            Some(version) => format!("keys/{}/{version}/{operation}", key.name),
            None => format!("keys/{}/{operation}", key.name),
        };
        let url = self.config.endpoint(&key.vault, &path);
        let body = json!({
            "alg": self.config.key_algorithm,
            "value": value,
        });
        let result: KeyOperationResult =
            self.call(Method::POST, url, Some(body), &format!("key {key}"))?;
        Ok(result.value)
    }
}

/// Maps a failed vault response onto [`KmsError`].
fn status_error(status: StatusCode, body: String, entity: &str, hint: &str) -> KmsError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => KmsError::Unauthorized(format!(
            "Azure Key Vault returned {status} for {entity}. Hint: {hint}. Response body: {body}"
        )),
        StatusCode::NOT_FOUND => KmsError::not_found(entity),
        StatusCode::CONFLICT => KmsError::Conflict(format!("{entity}: {body}")),
        _ => KmsError::Response(format!("{entity}: {status} {body}")),
    }
}

fn parse_id(raw: &str, expected: ObjectType) -> KmsResult<ResourceIdentifier> {
    let id = ResourceIdentifier::parse(raw)
        .map_err(|err| KmsError::Response(format!("vault returned an invalid id: {err}")))?;
    if id.object_type() != expected {
        return Err(KmsError::Response(format!(
            "vault returned `{raw}` where {expected} were expected"
        )));
    }
    Ok(id)
}

fn secret_path(name: &str, version: Option<&str>) -> String {
    match version.filter(|value| !value.is_empty()) {
        Some(version) => format!("secrets/{name}/{version}"),
        None => format!("secrets/{name}"),
    }
}

fn key_path(name: &str, version: Option<&str>) -> String {
    match version.filter(|value| !value.is_empty()) {
        Some(version) => format!("keys/{name}/{version}"),
        None => format!("keys/{name}"),
    }
}

impl KmsClient for AzureKeyVaultClient {
    fn get_secret(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<SecretBundle> {
        let url = self.config.endpoint(vault, &secret_path(name, version));
        let bundle: SecretBundleWire =
            self.call(Method::GET, url, None, &format!("secret {vault}/{name}"))?;
        bundle.into_bundle()
    }

    fn put_secret(&self, vault: &str, name: &str, value: &str) -> KmsResult<SecretBundle> {
        let url = self.config.endpoint(vault, &secret_path(name, None));
        let body = json!({
            "value": value,
            "contentType": SECRET_CONTENT_TYPE,
        });
        let bundle: SecretBundleWire =
            self.call(Method::PUT, url, Some(body), &format!("secret {vault}/{name}"))?;
        bundle.into_bundle()
    }

    fn list_secrets(&self, vault: &str) -> KmsResult<Vec<SecretItem>> {
        self.list_pages::<IdWire>(vault, "secrets")?
            .into_iter()
            .map(|item| {
                Ok(SecretItem {
                    id: parse_id(&item.id, ObjectType::Secret)?,
                })
            })
            .collect()
    }

    fn encrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
        self.key_operation(key, "encrypt", chunk)
    }

    fn decrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
        self.key_operation(key, "decrypt", chunk)
    }

    fn get_key(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<KeyBundle> {
        let url = self.config.endpoint(vault, &key_path(name, version));
        let bundle: KeyBundleWire =
            self.call(Method::GET, url, None, &format!("key {vault}/{name}"))?;
        bundle.into_bundle()
    }

    fn create_key(&self, vault: &str, name: &str) -> KmsResult<KeyBundle> {
        let url = self.config.endpoint(vault, &format!("keys/{name}/create"));
        let body = json!({
            "kty": self.config.key_type,
            "key_size": self.config.key_size,
        });
        let bundle: KeyBundleWire =
            self.call(Method::POST, url, Some(body), &format!("key {vault}/{name}"))?;
        bundle.into_bundle()
    }

    fn backup_key(&self, vault: &str, name: &str) -> KmsResult<Vec<u8>> {
        let url = self.config.endpoint(vault, &format!("keys/{name}/backup"));
        let result: BackupWire =
            self.call(Method::POST, url, None, &format!("key {vault}/{name}"))?;
        URL_SAFE_NO_PAD
            .decode(result.value.trim_end_matches('='))
            .map_err(|err| KmsError::Response(format!("backup blob is not base64url: {err}")))
    }

    /// Listing only returns unversioned ids, so every key is fetched again to
    /// resolve its current version.
    fn list_keys(&self, vault: &str) -> KmsResult<Vec<KeyBundle>> {
        let items = self.list_pages::<KidWire>(vault, "keys")?;
        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            let id = parse_id(&item.kid, ObjectType::Key)?;
            keys.push(self.get_key(vault, id.name(), None)?);
        }
        Ok(keys)
    }
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ListPage<T> {
    #[serde(default)]
    value: Option<Vec<T>>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct IdWire {
    id: String,
}

#[derive(Deserialize)]
struct KidWire {
    kid: String,
}

#[derive(Deserialize)]
struct SecretBundleWire {
    id: String,
    #[serde(default)]
    value: Option<String>,
}

impl SecretBundleWire {
    fn into_bundle(self) -> KmsResult<SecretBundle> {
        Ok(SecretBundle {
            id: parse_id(&self.id, ObjectType::Secret)?,
            value: self.value.unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
struct KeyBundleWire {
    key: KidWire,
}

impl KeyBundleWire {
    fn into_bundle(self) -> KmsResult<KeyBundle> {
        Ok(KeyBundle {
            kid: parse_id(&self.key.kid, ObjectType::Key)?,
        })
    }
}

#[derive(Deserialize)]
struct KeyOperationResult {
    value: String,
}

#[derive(Deserialize)]
struct BackupWire {
    value: String,
}
