use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DNS suffix of vaults in the public Azure cloud.
pub const DEFAULT_DNS_SUFFIX: &str = "vault.azure.net";

const SCHEME: &str = "https://";
const MIN_PATH_SEGMENTS: usize = 3;
const MAX_PATH_SEGMENTS: usize = 4;

/// Kind of vault object an identifier points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Key,
    Secret,
}

impl ObjectType {
    /// Path segment used by the vault REST surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Key => "keys",
            ObjectType::Secret => "secrets",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "keys" => Ok(ObjectType::Key),
            "secrets" => Ok(ObjectType::Secret),
            other => Err(Error::malformed(
                other,
                "object type must be `keys` or `secrets`",
            )),
        }
    }
}

/// Canonical `https://<vault>.<suffix>/<type>/<name>[/<version>]` identifier.
///
/// The host is kept verbatim so that any identifier produced by
/// [`ResourceIdentifier::parse`] formats back to the exact input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    vault: String,
    dns_suffix: String,
    object_type: ObjectType,
    name: String,
    version: Option<String>,
}

impl ResourceIdentifier {
    /// Builds an identifier in the public cloud. An empty version means "latest".
    pub fn new(
        vault: impl Into<String>,
        object_type: ObjectType,
        name: impl Into<String>,
        version: Option<&str>,
    ) -> Self {
        Self {
            vault: vault.into(),
            dns_suffix: DEFAULT_DNS_SUFFIX.to_string(),
            object_type,
            name: name.into(),
            version: version
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        }
    }

    /// Replaces the DNS suffix (sovereign clouds, emulators).
    pub fn with_dns_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dns_suffix = suffix.into();
        self
    }

    /// Attach or clear the version component.
    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = version
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        self
    }

    /// Parses an identifier string.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let rest = raw
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::malformed(raw, "identifier must start with https://"))?;

        let (host, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(Error::malformed(raw, "missing vault host"));
        }
        let (vault, dns_suffix) = host.split_once('.').unwrap_or((host, ""));

        // "/keys/name/version" splits into ["", "keys", "name", "version"].
        let segments: Vec<&str> = path.split('/').collect();
        if !(MIN_PATH_SEGMENTS..=MAX_PATH_SEGMENTS).contains(&segments.len()) {
            return Err(Error::malformed(
                raw,
                format!(
                    "expected 3 or 4 path segments, found {}",
                    segments.len()
                ),
            ));
        }

        let object_type = segments[1]
            .parse::<ObjectType>()
            .map_err(|_| Error::malformed(raw, "object type must be `keys` or `secrets`"))?;
        let name = segments[2];
        if name.is_empty() {
            return Err(Error::malformed(raw, "object name must not be empty"));
        }
        let version = segments.get(3).copied().filter(|value| !value.is_empty());

        Ok(Self {
            vault: vault.to_string(),
            dns_suffix: dns_suffix.to_string(),
            object_type,
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }

    /// Vault name (first DNS label of the host).
    pub fn vault(&self) -> &str {
        &self.vault
    }

    /// Host without the vault label; empty for bare vault hosts.
    pub fn dns_suffix(&self) -> &str {
        &self.dns_suffix
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pinned version, `None` when the identifier means "latest".
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Full host, e.g. `myvault.vault.azure.net`.
    pub fn host(&self) -> String {
        if self.dns_suffix.is_empty() {
            self.vault.clone()
        } else {
            format!("{}.{}", self.vault, self.dns_suffix)
        }
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}{}/{}/{}",
            self.host(),
            self.object_type,
            self.name
        )?;
        if let Some(version) = &self.version {
            write!(f, "/{version}")?;
        }
        Ok(())
    }
}

impl FromStr for ResourceIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ResourceIdentifier::parse(s)
    }
}

impl TryFrom<&str> for ResourceIdentifier {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        ResourceIdentifier::parse(value)
    }
}

impl TryFrom<String> for ResourceIdentifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        ResourceIdentifier::parse(&value)
    }
}

impl Serialize for ResourceIdentifier {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceIdentifier {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        ResourceIdentifier::parse(&value).map_err(serde::de::Error::custom)
    }
}
