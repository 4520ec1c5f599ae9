use anyhow::{Context, Result};
use keyvault_envelope_core::{KmsError, KmsResult};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const TOKEN_ENDPOINT_TEMPLATE: &str =
    "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";
const VAULT_RESOURCE: &str = "https://vault.azure.net";
const DEFAULT_SCOPE: &str = "https://vault.azure.net/.default";
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: u64 = 60;
const MIN_LIFETIME_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct KvAuthConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

impl KvAuthConfig {
    pub fn from_env() -> Result<Self> {
        let tenant_id =
            std::env::var("AZURE_TENANT_ID").context("missing AZURE_TENANT_ID for Azure auth")?;
        let client_id =
            std::env::var("AZURE_CLIENT_ID").context("missing AZURE_CLIENT_ID for Azure auth")?;
        let client_secret = std::env::var("AZURE_CLIENT_SECRET")
            .context("missing AZURE_CLIENT_SECRET for Azure auth")?;

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            scope: scope_from_env(),
        })
    }

    /// Service principal from an SDK auth file, as written by
    /// `az ad sp create-for-rbac --sdk-auth`.
    pub fn from_auth_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read auth file {}", path.display()))?;
        let file: AuthFile = serde_json::from_slice(&raw)
            .with_context(|| format!("invalid auth file {}", path.display()))?;

        Ok(Self {
            tenant_id: file.tenant_id,
            client_id: file.client_id,
            client_secret: file.client_secret,
            scope: scope_from_env(),
        })
    }
}

fn scope_from_env() -> String {
    std::env::var("AZURE_KEYVAULT_SCOPE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SCOPE.to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthFile {
    client_id: String,
    client_secret: String,
    tenant_id: String,
}

/// Where bearer tokens come from, in the order [`CredentialSource::from_env`]
/// tries them.
#[derive(Clone, Debug)]
pub enum CredentialSource {
    /// Fixed token from `AZURE_KEYVAULT_BEARER_TOKEN`.
    StaticToken(String),
    /// OAuth2 client credentials flow, from `AZURE_AUTH_LOCATION` or the
    /// `AZURE_TENANT_ID`/`AZURE_CLIENT_ID`/`AZURE_CLIENT_SECRET` variables.
    ClientCredentials(KvAuthConfig),
    /// `az account get-access-token` of the logged-in Azure CLI user.
    AzureCli,
}

impl CredentialSource {
    pub fn from_env() -> Self {
        if let Some(token) = std::env::var("AZURE_KEYVAULT_BEARER_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            return CredentialSource::StaticToken(token);
        }

        if let Some(location) = std::env::var_os("AZURE_AUTH_LOCATION")
            .filter(|value| !value.is_empty())
        {
            match KvAuthConfig::from_auth_file(Path::new(&location)) {
                Ok(config) => return CredentialSource::ClientCredentials(config),
                Err(err) => tracing::warn!("ignoring AZURE_AUTH_LOCATION: {err:#}"),
            }
        }

        match KvAuthConfig::from_env() {
            Ok(config) => CredentialSource::ClientCredentials(config),
            Err(err) => {
                tracing::warn!("falling back to azure cli credentials: {err:#}");
                CredentialSource::AzureCli
            }
        }
    }
}

#[derive(Debug)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: Duration,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("token endpoint rejected the request: {status} {body}")]
    Unauthorized {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to request token: {0}")]
    Request(String),
    #[error("failed to parse token response: {0}")]
    Parse(String),
    #[error("azure cli failed: {0}")]
    Cli(String),
}

pub fn request_access_token(
    client: &reqwest::blocking::Client,
    cfg: &KvAuthConfig,
) -> Result<AccessToken, AuthError> {
    let url = TOKEN_ENDPOINT_TEMPLATE.replace("{tenant}", &cfg.tenant_id);
    let params = [
        ("client_id", cfg.client_id.as_str()),
        ("client_secret", cfg.client_secret.as_str()),
        ("scope", cfg.scope.as_str()),
        ("grant_type", "client_credentials"),
    ];

    let response = client
        .post(url)
        .form(&params)
        .send()
        .map_err(|err| AuthError::Request(err.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(AuthError::Unauthorized { status, body });
    }

    let payload: TokenResponse = response
        .json()
        .map_err(|err| AuthError::Parse(err.to_string()))?;

    Ok(AccessToken {
        token: payload.access_token,
        expires_in: lifetime(u64::from(payload.expires_in.unwrap_or(3600))),
    })
}

/// Asks the Azure CLI for a Key Vault token of the logged-in account.
pub fn azure_cli_token() -> Result<AccessToken, AuthError> {
    let output = Command::new("az")
        .args([
            "account",
            "get-access-token",
            "--resource",
            VAULT_RESOURCE,
            "--output",
            "json",
        ])
        .output()
        .map_err(|err| AuthError::Cli(format!("failed to run az: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AuthError::Cli(stderr.trim().to_string()));
    }
    parse_cli_token(&output.stdout, now_unix())
}

fn parse_cli_token(stdout: &[u8], now: u64) -> Result<AccessToken, AuthError> {
    let payload: CliTokenResponse =
        serde_json::from_slice(stdout).map_err(|err| AuthError::Parse(err.to_string()))?;
    // Older CLI releases only print a local `expiresOn` string; assume an hour.
    let remaining = payload
        .expires_on
        .map(|expires_on| expires_on.saturating_sub(now))
        .unwrap_or(3600);
    Ok(AccessToken {
        token: payload.access_token,
        expires_in: lifetime(remaining),
    })
}

fn lifetime(seconds: u64) -> Duration {
    Duration::from_secs(
        seconds
            .saturating_sub(EXPIRY_MARGIN_SECS)
            .max(MIN_LIFETIME_SECS),
    )
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u32>,
}

#[derive(Deserialize)]
struct CliTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(default)]
    expires_on: Option<u64>,
}

struct TokenCache {
    token: String,
    expires_at: Instant,
}

/// Bearer header source shared by every request of one client.
pub(crate) struct AzureAuth {
    source: CredentialSource,
    cache: Mutex<Option<TokenCache>>,
}

impl AzureAuth {
    pub(crate) fn new(source: CredentialSource) -> Self {
        match &source {
            CredentialSource::StaticToken(_) => {
                tracing::info!("azure credential: static bearer token");
            }
            CredentialSource::ClientCredentials(config) => {
                tracing::info!(
                    "azure credential: ClientSecretCredential (tenant_id={}, scope={})",
                    config.tenant_id,
                    config.scope
                );
            }
            CredentialSource::AzureCli => tracing::info!("azure credential: azure cli"),
        }
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    pub(crate) fn bearer_header(&self, http: &reqwest::blocking::Client) -> KmsResult<String> {
        let client_credentials = match &self.source {
            CredentialSource::StaticToken(token) => return Ok(bearer(token)),
            CredentialSource::ClientCredentials(config) => Some(config),
            CredentialSource::AzureCli => None,
        };

        let mut guard = self.cache.lock();
        if let Some(cache) = guard.as_ref()
            && Instant::now() < cache.expires_at
        {
            return Ok(bearer(&cache.token));
        }

        let fetched = match client_credentials {
            Some(config) => request_access_token(http, config),
            None => azure_cli_token(),
        };
        let token = fetched.map_err(|err| match err {
            AuthError::Unauthorized { status, body } => KmsError::Unauthorized(format!(
                "Azure AD rejected client credentials ({status}). body={body}"
            )),
            other => KmsError::Unauthorized(other.to_string()),
        })?;
        let header = bearer(&token.token);
        *guard = Some(TokenCache {
            token: token.token,
            expires_at: Instant::now() + token.expires_in,
        });
        Ok(header)
    }

    pub(crate) fn hint(&self) -> &'static str {
        match &self.source {
            CredentialSource::StaticToken(_) => "check AZURE_KEYVAULT_BEARER_TOKEN is current",
            CredentialSource::ClientCredentials(_) => {
                "ensure AZURE_AUTH_LOCATION or AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET name a principal with key and secret permissions"
            }
            CredentialSource::AzureCli => {
                "run `az login`, set AZURE_AUTH_LOCATION, or set AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET"
            }
        }
    }
}

fn bearer(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.to_ascii_lowercase().starts_with("bearer ") {
        trimmed.to_string()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_added_once() {
        assert_eq!(bearer("abc"), "Bearer abc");
        assert_eq!(bearer(" Bearer abc "), "Bearer abc");
        assert_eq!(bearer("bearer abc"), "bearer abc");
    }

    #[test]
    fn lifetime_keeps_a_margin() {
        assert_eq!(lifetime(3600), Duration::from_secs(3540));
        assert_eq!(lifetime(30), Duration::from_secs(60));
    }

    #[test]
    fn cli_output_with_unix_expiry() {
        let stdout = br#"{
            "accessToken": "eyJ0eXAi",
            "expiresOn": "2024-05-01 12:00:00.000000",
            "expires_on": 1714564800,
            "tokenType": "Bearer"
        }"#;
        let token = parse_cli_token(stdout, 1714564800 - 1800).unwrap();
        assert_eq!(token.token, "eyJ0eXAi");
        assert_eq!(token.expires_in, Duration::from_secs(1740));
    }

    #[test]
    fn cli_output_without_unix_expiry() {
        let stdout = br#"{"accessToken": "t", "expiresOn": "2024-05-01 12:00:00.000000"}"#;
        let token = parse_cli_token(stdout, 0).unwrap();
        assert_eq!(token.expires_in, Duration::from_secs(3540));
        assert!(matches!(
            parse_cli_token(b"not json", 0),
            Err(AuthError::Parse(_))
        ));
    }

    #[test]
    fn sdk_auth_file_supplies_client_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("azure.auth");
        std::fs::write(
            &path,
            r#"{
                "clientId": "b52dd125-9272-4b21-9862-0be667bdf6dc",
                "clientSecret": "s3cret",
                "subscriptionId": "0d5b3f10-aaaa-bbbb-cccc-000000000000",
                "tenantId": "72f988bf-86f1-41af-91ab-2d7cd011db47",
                "activeDirectoryEndpointUrl": "https://login.microsoftonline.com",
                "resourceManagerEndpointUrl": "https://management.azure.com/"
            }"#,
        )
        .unwrap();

        let config = KvAuthConfig::from_auth_file(&path).unwrap();
        assert_eq!(config.tenant_id, "72f988bf-86f1-41af-91ab-2d7cd011db47");
        assert_eq!(config.client_id, "b52dd125-9272-4b21-9862-0be667bdf6dc");
        assert_eq!(config.client_secret, "s3cret");
    }

    #[test]
    fn incomplete_auth_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("azure.auth");
        std::fs::write(&path, r#"{"clientId": "only-this"}"#).unwrap();
        assert!(KvAuthConfig::from_auth_file(&path).is_err());
        assert!(KvAuthConfig::from_auth_file(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn static_token_skips_the_cache() {
        let auth = AzureAuth::new(CredentialSource::StaticToken("abc".into()));
        let http = reqwest::blocking::Client::new();
        assert_eq!(auth.bearer_header(&http).unwrap(), "Bearer abc");
        assert!(auth.cache.lock().is_none());
    }
}
