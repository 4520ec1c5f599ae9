use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const VALUES: &str = "example:\n  key1: secretvalue1\n  key2: secretvalue2\n";

fn cli_cmd(tmp: &TempDir) -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("keyvault-envelope");
    cmd.current_dir(tmp.path())
        .env("KEYVAULT_ENVELOPE_BACKEND", "dev")
        .env_remove("KEYVAULT")
        .env_remove("KEY")
        .env_remove("VERSION")
        .env_remove("RUST_LOG")
        .arg("--dev-store")
        .arg(tmp.path().join("dev-store.env"));
    cmd
}

fn create_key(tmp: &TempDir) {
    cli_cmd(tmp)
        .args(["keys", "create", "--kv", "kv", "-k", "helm"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""kid":"https://kv.vault.azure.net/keys/helm/"#));
}

#[test]
fn help_works() {
    let tmp = TempDir::new().unwrap();
    cli_cmd(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("helm downloader"));
}

#[test]
fn file_round_trip_and_download() {
    let tmp = TempDir::new().unwrap();
    create_key(&tmp);

    let source = tmp.path().join("values.yaml");
    let repeated = VALUES.repeat(30);
    fs::write(&source, &repeated).unwrap();

    cli_cmd(&tmp)
        .args(["files", "encrypt", "--kv", "kv", "-k", "helm", "-f", "values.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("values.yaml.enc"));

    let encrypted = tmp.path().join("values.yaml.enc");
    let envelope = fs::read_to_string(&encrypted).unwrap();
    assert!(envelope.contains("\"chunks\""));
    assert!(!envelope.contains("secretvalue1"));

    let uri = format!("keyvault+file://{}", encrypted.display());
    cli_cmd(&tmp)
        .args(["download", "", "", "", &uri])
        .assert()
        .success()
        .stdout(predicate::eq(repeated.as_str()));

    fs::remove_file(&source).unwrap();
    cli_cmd(&tmp)
        .args(["files", "decrypt", "-f", "values.yaml.enc"])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&source).unwrap(), repeated);
}

#[test]
fn download_passes_binary_payloads_through() {
    let tmp = TempDir::new().unwrap();
    create_key(&tmp);

    let payload: Vec<u8> = [0x1f, 0x8b, 0x08, 0x00, 0xff]
        .into_iter()
        .chain((0..=255u8).cycle().take(1200))
        .collect();
    fs::write(tmp.path().join("chart.tgz"), &payload).unwrap();

    cli_cmd(&tmp)
        .args(["files", "encrypt", "--kv", "kv", "-k", "helm", "-f", "chart.tgz"])
        .assert()
        .success();

    let uri = format!("keyvault+file://{}", tmp.path().join("chart.tgz.enc").display());
    let output = cli_cmd(&tmp)
        .args(["download", "", "", "", &uri])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(output, payload);
}

#[test]
fn decrypt_with_unknown_key_override_fails() {
    let tmp = TempDir::new().unwrap();
    create_key(&tmp);
    fs::write(tmp.path().join("values.yaml"), VALUES).unwrap();

    cli_cmd(&tmp)
        .args(["files", "encrypt", "--kv", "kv", "-k", "helm", "-f", "values.yaml"])
        .assert()
        .success();
    fs::write(tmp.path().join("values.yaml"), "previous").unwrap();

    cli_cmd(&tmp)
        .env("KEY", "other")
        .args(["files", "decrypt", "-f", "values.yaml.enc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
    assert_eq!(
        fs::read_to_string(tmp.path().join("values.yaml")).unwrap(),
        "previous"
    );
}

#[test]
fn secret_put_get_and_download() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("registry.yaml"), "registry: ghcr.io\n").unwrap();

    cli_cmd(&tmp)
        .args(["secrets", "put", "--kv", "kv", "-s", "registry", "-f", "registry.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""value":"cmVnaXN0cnk6IGdoY3IuaW8K""#));

    cli_cmd(&tmp)
        .args(["secrets", "get", "--kv", "kv", "-s", "registry", "--decode"])
        .assert()
        .success()
        .stdout(predicate::eq("registry: ghcr.io\n"));

    cli_cmd(&tmp)
        .args(["secrets", "list", "--kv", "kv"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name":"registry""#))
        .stdout(predicate::str::contains("value").not());

    cli_cmd(&tmp)
        .args(["download", "", "", "", "keyvault+secret://kv/secrets/registry"])
        .assert()
        .success()
        .stdout(predicate::eq("registry: ghcr.io\n"));
}

#[test]
fn existing_key_is_not_recreated() {
    let tmp = TempDir::new().unwrap();
    create_key(&tmp);

    cli_cmd(&tmp)
        .args(["keys", "create", "--kv", "kv", "-k", "helm"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key already exists"));
}

#[test]
fn backup_defaults_to_upper_case_pem() {
    let tmp = TempDir::new().unwrap();
    create_key(&tmp);

    cli_cmd(&tmp)
        .args(["keys", "backup", "--kv", "kv", "-k", "helm"])
        .assert()
        .success();
    assert!(tmp.path().join("HELM.pem").exists());
}

#[test]
fn download_rejects_unknown_scheme() {
    let tmp = TempDir::new().unwrap();
    cli_cmd(&tmp)
        .args(["download", "", "", "", "https://example.com/values.yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("unknown download uri"));
}
