mod config;
mod telemetry;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use config::{Backend, open_kms};
use keyvault_envelope_core::files::{decrypt_file, encrypt_file};
use keyvault_envelope_core::{
    KeyHandle, KeyOverrides, KmsClient, ObjectType, ResourceIdentifier, download_bytes, keys,
    secrets,
};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "keyvault-envelope",
    version,
    about = "Key vault envelope encryption and helm downloader"
)]
struct Cli {
    /// Vault implementation to talk to.
    #[arg(
        long,
        global = true,
        value_enum,
        env = "KEYVAULT_ENVELOPE_BACKEND",
        default_value_t = Backend::Azure
    )]
    backend: Backend,
    /// State file of the dev backend.
    #[arg(long, global = true, env = "KEYVAULT_ENVELOPE_DEV_STORE")]
    dev_store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the plaintext behind a keyvault+secret:// or keyvault+file:// URI
    /// (helm downloader plugin convention).
    Download {
        cert_file: String,
        key_file: String,
        ca_file: String,
        url: String,
    },
    #[command(subcommand, visible_aliases = ["s", "secret"])]
    Secrets(SecretsCmd),
    #[command(subcommand, visible_aliases = ["k", "key"])]
    Keys(KeysCmd),
    #[command(subcommand, visible_aliases = ["f", "file"])]
    Files(FilesCmd),
}

#[derive(Subcommand)]
enum SecretsCmd {
    /// Fetch a secret and print it as JSON.
    Get(SecretGetArgs),
    /// List the secrets of a vault without their values.
    List(VaultArgs),
    /// Base64 encode a file and store it as a new secret version.
    Put(SecretPutArgs),
}

#[derive(Subcommand)]
enum KeysCmd {
    /// Create a key usable for file encryption.
    Create(KeyArgs),
    /// Write the vault's backup blob of a key.
    Backup(KeyBackupArgs),
    /// List the keys of a vault.
    List(VaultArgs),
}

#[derive(Subcommand)]
enum FilesCmd {
    /// Encrypt FILE into FILE.enc.
    Encrypt(EncryptArgs),
    /// Decrypt FILE.enc back into FILE.
    Decrypt(DecryptArgs),
}

#[derive(Args)]
struct VaultArgs {
    #[arg(long = "keyvault", visible_alias = "kv")]
    keyvault: String,
}

#[derive(Args)]
struct SecretGetArgs {
    /// Full secret identifier instead of --keyvault/--secret/--version.
    #[arg(long, conflicts_with_all = ["keyvault", "secret", "version"])]
    id: Option<String>,
    #[arg(long = "keyvault", visible_alias = "kv", required_unless_present = "id")]
    keyvault: Option<String>,
    #[arg(long, short = 's', required_unless_present = "id")]
    secret: Option<String>,
    #[arg(long, short = 'v')]
    version: Option<String>,
    /// Print the decoded value instead of JSON.
    #[arg(long)]
    decode: bool,
}

#[derive(Args)]
struct SecretPutArgs {
    #[arg(long = "keyvault", visible_alias = "kv")]
    keyvault: String,
    #[arg(long, short = 's')]
    secret: String,
    #[arg(long, short = 'f')]
    file: PathBuf,
}

#[derive(Args)]
struct KeyArgs {
    #[arg(long = "keyvault", visible_alias = "kv")]
    keyvault: String,
    #[arg(long, short = 'k')]
    key: String,
}

#[derive(Args)]
struct KeyBackupArgs {
    #[arg(long = "keyvault", visible_alias = "kv")]
    keyvault: String,
    #[arg(long, short = 'k')]
    key: String,
    /// Defaults to <KEY>.pem in upper case.
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct EncryptArgs {
    #[arg(long = "keyvault", visible_alias = "kv")]
    keyvault: String,
    #[arg(long, short = 'k')]
    key: String,
    /// Key version; the current version when omitted.
    #[arg(long, short = 'v')]
    version: Option<String>,
    #[arg(long, short = 'f')]
    file: PathBuf,
}

#[derive(Args)]
struct DecryptArgs {
    /// Use an alternate vault for decryption.
    #[arg(long = "keyvault", visible_alias = "kv", env = "KEYVAULT")]
    keyvault: Option<String>,
    /// Use an alternate key for decryption.
    #[arg(long, short = 'k', env = "KEY")]
    key: Option<String>,
    /// Use an alternate key version for decryption.
    #[arg(long, short = 'v', env = "VERSION")]
    version: Option<String>,
    #[arg(long, short = 'f')]
    file: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init()?;
    let kms = open_kms(cli.backend, cli.dev_store.as_deref())?;
    let kms: &dyn KmsClient = kms.as_ref();

    match cli.command {
        Command::Download {
            cert_file,
            key_file,
            ca_file,
            url,
        } => {
            tracing::debug!(cert_file, key_file, ca_file, "downloader tls arguments are unused");
            handle_download(kms, &url)
        }
        Command::Secrets(cmd) => handle_secrets(kms, cmd),
        Command::Keys(cmd) => handle_keys(kms, cmd),
        Command::Files(cmd) => handle_files(kms, cmd),
    }
}

fn handle_download(kms: &dyn KmsClient, url: &str) -> Result<()> {
    if url.trim().is_empty() {
        bail!("full-URL argument missing");
    }
    let plaintext =
        download_bytes(kms, url).with_context(|| format!("failed to download {url}"))?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&plaintext)?;
    stdout.flush()?;
    Ok(())
}

fn handle_secrets(kms: &dyn KmsClient, cmd: SecretsCmd) -> Result<()> {
    match cmd {
        SecretsCmd::Get(args) => {
            let secret = match args.id.as_deref() {
                Some(raw) => {
                    let id = ResourceIdentifier::parse(raw)?;
                    if id.object_type() != ObjectType::Secret {
                        bail!("{raw} is not a secret identifier");
                    }
                    secrets::get(kms, id.vault(), id.name(), id.version())?
                }
                None => {
                    let vault = args.keyvault.context("--keyvault is required")?;
                    let name = args.secret.context("--secret is required")?;
                    secrets::get(kms, &vault, &name, args.version.as_deref())?
                }
            };
            if args.decode {
                let mut stdout = io::stdout().lock();
                stdout.write_all(&secret.decode()?)?;
                stdout.flush()?;
                Ok(())
            } else {
                print_json(&secret)
            }
        }
        SecretsCmd::List(args) => print_json(&secrets::list(kms, &args.keyvault)?),
        SecretsCmd::Put(args) => {
            let contents = fs::read(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            print_json(&secrets::put(kms, &args.keyvault, &args.secret, &contents)?)
        }
    }
}

fn handle_keys(kms: &dyn KmsClient, cmd: KeysCmd) -> Result<()> {
    match cmd {
        KeysCmd::Create(args) => print_json(&keys::create(kms, &args.keyvault, &args.key)?),
        KeysCmd::Backup(args) => {
            let path = args
                .file
                .unwrap_or_else(|| keys::default_backup_path(&args.key));
            keys::backup(kms, &args.keyvault, &args.key, &path)?;
            println!("{}", path.display());
            Ok(())
        }
        KeysCmd::List(args) => print_json(&keys::list(kms, &args.keyvault)?),
    }
}

fn handle_files(kms: &dyn KmsClient, cmd: FilesCmd) -> Result<()> {
    match cmd {
        FilesCmd::Encrypt(args) => {
            let handle =
                KeyHandle::new(args.keyvault, args.key).with_version(args.version.as_deref());
            let target = encrypt_file(kms, &handle, &args.file)?;
            println!("{}", target.display());
        }
        FilesCmd::Decrypt(args) => {
            let overrides = KeyOverrides::none()
                .with_vault(args.keyvault.as_deref())
                .with_name(args.key.as_deref())
                .with_version(args.version.as_deref());
            let target = decrypt_file(kms, &overrides, &args.file)?;
            println!("{}", target.display());
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
