use anyhow::{Context, Result};
use clap::ValueEnum;
use keyvault_envelope_azure::AzureKeyVaultClient;
use keyvault_envelope_core::KmsClient;
use keyvault_envelope_dev::DevKms;
use std::path::Path;

/// Vault implementation behind every command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Azure,
    Dev,
}

pub fn open_kms(backend: Backend, dev_store: Option<&Path>) -> Result<Box<dyn KmsClient>> {
    match backend {
        Backend::Azure => {
            let client =
                AzureKeyVaultClient::from_env().context("failed to configure azure key vault")?;
            Ok(Box::new(client))
        }
        Backend::Dev => match dev_store {
            Some(path) => {
                let kms = DevKms::with_path(path)
                    .with_context(|| format!("failed to open dev store {}", path.display()))?;
                Ok(Box::new(kms))
            }
            None => {
                tracing::warn!("dev backend without --dev-store; state is discarded on exit");
                Ok(Box::new(DevKms::in_memory()))
            }
        },
    }
}
