//! Development key vault: in-memory state with optional `.env`-style file
//! persistence. The "encryption" is a reversible XOR keyed by the key
//! version, so it is only fit for demos and tests.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use fs2::FileExt;
use keyvault_envelope_core::{
    KeyBundle, KeyLocator, KmsClient, KmsError, KmsResult, ObjectType, ResourceIdentifier,
    SecretBundle, SecretItem,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PERSIST_ENV: &str = "KEYVAULT_ENVELOPE_DEV_STORE";
const STATE_KEY: &str = "KEYVAULT_ENVELOPE_DEV_STATE";

#[derive(Clone, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    counter: u64,
    #[serde(default)]
    vaults: BTreeMap<String, VaultState>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct VaultState {
    #[serde(default)]
    secrets: BTreeMap<String, Vec<SecretEntry>>,
    /// Key versions, oldest first.
    #[serde(default)]
    keys: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Serialize, Deserialize)]
struct SecretEntry {
    version: String,
    value: String,
}

#[derive(Serialize)]
struct KeyBackup<'a> {
    vault: &'a str,
    name: &'a str,
    versions: &'a [String],
}

impl State {
    /// 32 lowercase hex characters, unique per store.
    fn next_version(&mut self, vault: &str, name: &str) -> String {
        self.counter += 1;
        let digest = Sha256::digest(format!("{vault}/{name}/{}", self.counter).as_bytes());
        digest[..16].iter().map(|byte| format!("{byte:02x}")).collect()
    }

    fn key_versions(&self, vault: &str, name: &str) -> KmsResult<&Vec<String>> {
        self.vaults
            .get(vault)
            .and_then(|state| state.keys.get(name))
            .filter(|versions| !versions.is_empty())
            .ok_or_else(|| KmsError::not_found(format!("key {vault}/{name}")))
    }

    fn key_version(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<String> {
        let versions = self.key_versions(vault, name)?;
        let found = match version {
            Some(wanted) => versions.iter().find(|candidate| *candidate == wanted),
            None => versions.last(),
        };
        found.cloned().ok_or_else(|| {
            KmsError::not_found(format!(
                "key {vault}/{name}/{}",
                version.unwrap_or_default()
            ))
        })
    }

    fn secret_versions(&self, vault: &str, name: &str) -> KmsResult<&Vec<SecretEntry>> {
        self.vaults
            .get(vault)
            .and_then(|state| state.secrets.get(name))
            .filter(|versions| !versions.is_empty())
            .ok_or_else(|| KmsError::not_found(format!("secret {vault}/{name}")))
    }
}

fn key_id(vault: &str, name: &str, version: &str) -> ResourceIdentifier {
    ResourceIdentifier::new(vault, ObjectType::Key, name, Some(version))
}

fn secret_id(vault: &str, name: &str, version: Option<&str>) -> ResourceIdentifier {
    ResourceIdentifier::new(vault, ObjectType::Secret, name, version)
}

fn xor_with_key(input: &[u8], key: &[u8]) -> Vec<u8> {
    input
        .iter()
        .enumerate()
        .map(|(idx, byte)| byte ^ key[idx % key.len()])
        .collect()
}

fn key_material(vault: &str, name: &str, version: &str) -> Vec<u8> {
    Sha256::digest(format!("{vault}/{name}/{version}").as_bytes()).to_vec()
}

fn store_error(path: &Path, err: impl fmt::Display) -> KmsError {
    KmsError::Request(format!("dev store {}: {err}", path.display()))
}

#[derive(Clone)]
struct Persistence {
    path: PathBuf,
}

impl Persistence {
    fn load(path: PathBuf) -> KmsResult<(State, Self)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| store_error(&path, err))?;

        file.lock_exclusive().map_err(|err| store_error(&path, err))?;

        let result = (|| -> KmsResult<State> {
            let reader = BufReader::new(&file);
            for line in reader.lines() {
                let line = line.map_err(|err| store_error(&path, err))?;
                if line.trim().is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = line.split_once('=')
                    && key.trim() == STATE_KEY
                {
                    let decoded = STANDARD_NO_PAD
                        .decode(value.trim())
                        .map_err(|err| store_error(&path, err))?;
                    return serde_json::from_slice(&decoded).map_err(|err| store_error(&path, err));
                }
            }
            Ok(State::default())
        })();

        let _ = FileExt::unlock(&file);
        result.map(|state| (state, Self { path }))
    }

    fn persist(&self, state: &State) -> KmsResult<()> {
        let path = &self.path;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|err| store_error(path, err))?;

        file.lock_exclusive().map_err(|err| store_error(path, err))?;

        let json = serde_json::to_vec(state).map_err(|err| store_error(path, err))?;
        let encoded = STANDARD_NO_PAD.encode(json);

        let mut writer = BufWriter::new(&file);
        writer
            .write_all(format!("{STATE_KEY}={encoded}\n").as_bytes())
            .map_err(|err| store_error(path, err))?;
        writer.flush().map_err(|err| store_error(path, err))?;

        let _ = FileExt::unlock(&file);
        Ok(())
    }
}

/// Local [`KmsClient`] for demos and end-to-end tests.
#[derive(Clone)]
pub struct DevKms {
    state: Arc<RwLock<State>>,
    persistence: Option<Persistence>,
}

impl Default for DevKms {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl DevKms {
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            persistence: None,
        }
    }

    /// Loads (or creates) the store file and persists every change to it.
    pub fn with_path<P: Into<PathBuf>>(path: P) -> KmsResult<Self> {
        let (state, persistence) = Persistence::load(path.into())?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            persistence: Some(persistence),
        })
    }

    /// Uses `KEYVAULT_ENVELOPE_DEV_STORE` when set, memory otherwise.
    pub fn from_env() -> KmsResult<Self> {
        match std::env::var(PERSIST_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::with_path(path.trim()),
            _ => Ok(Self::in_memory()),
        }
    }

    fn mutate<T>(&self, change: impl FnOnce(&mut State) -> KmsResult<T>) -> KmsResult<T> {
        let mut guard = self.state.write();
        let value = change(&mut guard)?;
        let snapshot = self.persistence.as_ref().map(|_| guard.clone());
        drop(guard);

        if let (Some(persistence), Some(state)) = (&self.persistence, snapshot) {
            persistence.persist(&state)?;
        }
        Ok(value)
    }

    fn transform(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
        let version = self
            .state
            .read()
            .key_version(&key.vault, &key.name, key.version())?;
        let bytes = URL_SAFE_NO_PAD
            .decode(chunk)
            .map_err(|err| KmsError::Request(format!("payload is not base64url: {err}")))?;
        let material = key_material(&key.vault, &key.name, &version);
        Ok(URL_SAFE_NO_PAD.encode(xor_with_key(&bytes, &material)))
    }
}

impl KmsClient for DevKms {
    fn get_secret(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<SecretBundle> {
        let state = self.state.read();
        let versions = state.secret_versions(vault, name)?;
        let entry = match version {
            Some(wanted) => versions.iter().find(|entry| entry.version == wanted),
            None => versions.last(),
        }
        .ok_or_else(|| KmsError::not_found(format!("secret {vault}/{name}")))?;
        Ok(SecretBundle {
            id: secret_id(vault, name, Some(&entry.version)),
            value: entry.value.clone(),
        })
    }

    fn put_secret(&self, vault: &str, name: &str, value: &str) -> KmsResult<SecretBundle> {
        let version = self.mutate(|state| {
            let version = state.next_version(vault, name);
            state
                .vaults
                .entry(vault.to_string())
                .or_default()
                .secrets
                .entry(name.to_string())
                .or_default()
                .push(SecretEntry {
                    version: version.clone(),
                    value: value.to_string(),
                });
            Ok(version)
        })?;
        tracing::debug!(vault, secret = name, %version, "stored dev secret");
        Ok(SecretBundle {
            id: secret_id(vault, name, Some(&version)),
            value: value.to_string(),
        })
    }

    fn list_secrets(&self, vault: &str) -> KmsResult<Vec<SecretItem>> {
        let state = self.state.read();
        Ok(state
            .vaults
            .get(vault)
            .map(|vault_state| {
                vault_state
                    .secrets
                    .keys()
                    .map(|name| SecretItem {
                        id: secret_id(vault, name, None),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn encrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
        self.transform(key, chunk)
    }

    fn decrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
        self.transform(key, chunk)
    }

    fn get_key(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<KeyBundle> {
        let version = self.state.read().key_version(vault, name, version)?;
        Ok(KeyBundle {
            kid: key_id(vault, name, &version),
        })
    }

    /// Adds a new current version, keeping older ones for decryption.
    fn create_key(&self, vault: &str, name: &str) -> KmsResult<KeyBundle> {
        let version = self.mutate(|state| {
            let version = state.next_version(vault, name);
            state
                .vaults
                .entry(vault.to_string())
                .or_default()
                .keys
                .entry(name.to_string())
                .or_default()
                .push(version.clone());
            Ok(version)
        })?;
        tracing::debug!(vault, key = name, %version, "created dev key version");
        Ok(KeyBundle {
            kid: key_id(vault, name, &version),
        })
    }

    fn backup_key(&self, vault: &str, name: &str) -> KmsResult<Vec<u8>> {
        let state = self.state.read();
        let versions = state.key_versions(vault, name)?;
        serde_json::to_vec(&KeyBackup {
            vault,
            name,
            versions,
        })
        .map_err(|err| KmsError::Response(err.to_string()))
    }

    fn list_keys(&self, vault: &str) -> KmsResult<Vec<KeyBundle>> {
        let state = self.state.read();
        let Some(vault_state) = state.vaults.get(vault) else {
            return Ok(Vec::new());
        };
        Ok(vault_state
            .keys
            .iter()
            .filter_map(|(name, versions)| {
                versions.last().map(|version| KeyBundle {
                    kid: key_id(vault, name, version),
                })
            })
            .collect())
    }
}
