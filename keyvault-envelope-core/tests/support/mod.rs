#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use keyvault_envelope_core::{
    KeyBundle, KeyLocator, KmsClient, KmsError, KmsResult, ObjectType, ResourceIdentifier,
    SecretBundle, SecretItem,
};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Copy)]
pub enum Transform {
    /// Ciphertext equals plaintext.
    Identity,
    /// Every byte of call `n` is XORed with `n + 1`, so chunks only decrypt
    /// when replayed in the order they were encrypted.
    XorCallIndex,
}

pub struct MockKms {
    transform: Transform,
    fail_on_call: Option<usize>,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
    pub log: Mutex<Vec<String>>,
    secrets: Mutex<BTreeMap<(String, String), Vec<String>>>,
    keys: Mutex<BTreeMap<(String, String), String>>,
}

impl MockKms {
    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            fail_on_call: None,
            encrypt_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            secrets: Mutex::new(BTreeMap::new()),
            keys: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fails the zero-based `call`-th encrypt or decrypt request.
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn with_key(self, vault: &str, name: &str, version: &str) -> Self {
        self.keys
            .lock()
            .unwrap()
            .insert((vault.into(), name.into()), version.into());
        self
    }

    pub fn with_secret(self, vault: &str, name: &str, value: &str) -> Self {
        self.secrets
            .lock()
            .unwrap()
            .entry((vault.into(), name.into()))
            .or_default()
            .push(value.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn reset_counters(&self) {
        self.encrypt_calls.store(0, Ordering::SeqCst);
        self.decrypt_calls.store(0, Ordering::SeqCst);
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn transform(&self, counter: &AtomicUsize, chunk: &str) -> KmsResult<String> {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(KmsError::Request(format!("injected failure on call {call}")));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(chunk)
            .map_err(|err| KmsError::Response(err.to_string()))?;
        let out: Vec<u8> = match self.transform {
            Transform::Identity => bytes,
            Transform::XorCallIndex => {
                let mask = (call as u8).wrapping_add(1);
                bytes.iter().map(|byte| byte ^ mask).collect()
            }
        };
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    fn secret_id(vault: &str, name: &str, index: usize) -> ResourceIdentifier {
        let version = (index + 1).to_string();
        ResourceIdentifier::new(vault, ObjectType::Secret, name, Some(version.as_str()))
    }
}

impl KmsClient for MockKms {
    fn get_secret(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<SecretBundle> {
        self.record(format!("get_secret {vault}/{name}"));
        let secrets = self.secrets.lock().unwrap();
        let versions = secrets
            .get(&(vault.to_string(), name.to_string()))
            .ok_or_else(|| KmsError::not_found(format!("secret {vault}/{name}")))?;
        let index = match version {
            Some(version) => version
                .parse::<usize>()
                .ok()
                .and_then(|v| v.checked_sub(1))
                .filter(|index| *index < versions.len())
                .ok_or_else(|| KmsError::not_found(format!("secret {vault}/{name}/{version}")))?,
            None => versions.len() - 1,
        };
        Ok(SecretBundle {
            id: Self::secret_id(vault, name, index),
            value: versions[index].clone(),
        })
    }

    fn put_secret(&self, vault: &str, name: &str, value: &str) -> KmsResult<SecretBundle> {
        self.record(format!("put_secret {vault}/{name}"));
        let mut secrets = self.secrets.lock().unwrap();
        let versions = secrets
            .entry((vault.to_string(), name.to_string()))
            .or_default();
        versions.push(value.to_string());
        Ok(SecretBundle {
            id: Self::secret_id(vault, name, versions.len() - 1),
            value: value.to_string(),
        })
    }

    fn list_secrets(&self, vault: &str) -> KmsResult<Vec<SecretItem>> {
        self.record(format!("list_secrets {vault}"));
        let secrets = self.secrets.lock().unwrap();
        Ok(secrets
            .iter()
            .filter(|((v, _), _)| v == vault)
            .map(|((v, name), versions)| SecretItem {
                id: Self::secret_id(v, name, versions.len() - 1),
            })
            .collect())
    }

    fn encrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
        self.record(format!("encrypt {key}"));
        self.transform(&self.encrypt_calls, chunk)
    }

    fn decrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
        self.record(format!("decrypt {key}"));
        self.transform(&self.decrypt_calls, chunk)
    }

    fn get_key(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<KeyBundle> {
        self.record(format!("get_key {vault}/{name}"));
        let keys = self.keys.lock().unwrap();
        let current = keys
            .get(&(vault.to_string(), name.to_string()))
            .ok_or_else(|| KmsError::not_found(format!("key {vault}/{name}")))?;
        let version = version.unwrap_or(current.as_str());
        Ok(KeyBundle {
            kid: ResourceIdentifier::new(vault, ObjectType::Key, name, Some(version)),
        })
    }

    fn create_key(&self, vault: &str, name: &str) -> KmsResult<KeyBundle> {
        self.record(format!("create_key {vault}/{name}"));
        self.keys
            .lock()
            .unwrap()
            .insert((vault.to_string(), name.to_string()), "created".into());
        Ok(KeyBundle {
            kid: ResourceIdentifier::new(vault, ObjectType::Key, name, Some("created")),
        })
    }

    fn backup_key(&self, vault: &str, name: &str) -> KmsResult<Vec<u8>> {
        self.record(format!("backup_key {vault}/{name}"));
        if self
            .keys
            .lock()
            .unwrap()
            .contains_key(&(vault.to_string(), name.to_string()))
        {
            Ok(format!("backup:{vault}/{name}").into_bytes())
        } else {
            Err(KmsError::not_found(format!("key {vault}/{name}")))
        }
    }

    fn list_keys(&self, vault: &str) -> KmsResult<Vec<KeyBundle>> {
        self.record(format!("list_keys {vault}"));
        let keys = self.keys.lock().unwrap();
        Ok(keys
            .iter()
            .filter(|((v, _), _)| v == vault)
            .map(|((v, name), version)| KeyBundle {
                kid: ResourceIdentifier::new(v.as_str(), ObjectType::Key, name.as_str(), Some(version.as_str())),
            })
            .collect())
    }
}
