//! CLI integration tests for Kiln.
//!
//! These tests drive the `kiln` binary against recipes whose artifacts are
//! served from `file://` URLs, with `KILN_HOME` pointing at a scratch
//! directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// Get the kiln binary command, isolated in `home`.
fn kiln(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.env("KILN_HOME", home)
        .env_remove("MAKE")
        .current_dir(home)
        .arg("--color=never");
    cmd
}

fn samba_recipe() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("recipes/samba.toml")
}

fn hello_tarball() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in [
        ("hello-1.0/README", &b"hello\n"[..]),
        ("hello-1.0/configure", &b"#!/bin/sh\nexit 0\n"[..]),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Write the source tarball and a recipe that installs `{prefix}/out`.
///
/// Returns the recipe path.
fn write_hello_recipe(dir: &Path, sha256: Option<&str>) -> PathBuf {
    let tarball = hello_tarball();
    let tarball_path = dir.join("hello-1.0.tar.gz");
    fs::write(&tarball_path, &tarball).unwrap();

    let sha = sha256
        .map(str::to_string)
        .unwrap_or_else(|| sha256_hex(&tarball));
    let url = url::Url::from_file_path(&tarball_path).unwrap();

    let recipe = format!(
        r#"name = "hello"
version = "1.0"
desc = "Test package"

[source]
url = "{url}"
sha256 = "{sha}"

[[steps]]
kind = "configure"
flags = ["--prefix={{prefix}}"]

[[steps]]
kind = "custom"
program = "sh"
args = ["-c", "printf ok > {{prefix}}/out"]
"#
    );
    let path = dir.join("hello.toml");
    fs::write(&path, recipe).unwrap();
    path
}

// ============================================================================
// kiln --help / completions
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let tmp = TempDir::new().unwrap();

    kiln(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("livecheck"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_completions_bash() {
    let tmp = TempDir::new().unwrap();

    kiln(tmp.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kiln"));
}

// ============================================================================
// kiln info
// ============================================================================

#[test]
fn test_info_on_old_macos_shows_resource_and_relocations() {
    let tmp = TempDir::new().unwrap();

    kiln(tmp.path())
        .arg("info")
        .arg(samba_recipe())
        .args(["--os", "macos", "--os-version", "10.15.7", "--arch", "x86_64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("samba 4.14.7_1"))
        .stdout(predicate::str::contains("Parse::Yapp"))
        .stdout(predicate::str::contains("sbin/samba-dot-org-smbd"))
        .stdout(predicate::str::contains("Bottle: catalina"));
}

#[test]
fn test_info_on_linux_has_no_resources() {
    let tmp = TempDir::new().unwrap();

    kiln(tmp.path())
        .arg("info")
        .arg(samba_recipe())
        .args(["--os", "linux", "--arch", "x86_64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resources: none"))
        .stdout(predicate::str::contains("Bottle: x86_64_linux"))
        .stdout(predicate::str::contains("samba-dot-org-").not());
}

#[test]
fn test_info_rejects_invalid_recipe() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.toml");
    fs::write(&path, "name = \"x\"\n").unwrap();

    kiln(tmp.path())
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid recipe"));
}

// ============================================================================
// kiln fetch / cache
// ============================================================================

#[test]
fn test_fetch_then_cache_list_and_clean() {
    let tmp = TempDir::new().unwrap();
    let recipe = write_hello_recipe(tmp.path(), None);

    kiln(tmp.path())
        .arg("fetch")
        .arg(&recipe)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello-1.0.tar.gz"));

    // Second fetch is served from the cache.
    kiln(tmp.path()).arg("fetch").arg(&recipe).assert().success();

    kiln(tmp.path())
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello-1.0.tar.gz"))
        .stdout(predicate::str::contains("1 file(s)"));

    kiln(tmp.path()).args(["cache", "clean"]).assert().success();

    kiln(tmp.path())
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(empty)"));
}

#[test]
fn test_cache_path() {
    let tmp = TempDir::new().unwrap();

    kiln(tmp.path())
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("downloads"));
}

// ============================================================================
// kiln install
// ============================================================================

#[cfg(unix)]
#[test]
fn test_install_minimal_recipe() {
    let tmp = TempDir::new().unwrap();
    let recipe = write_hello_recipe(tmp.path(), None);
    let prefix = tmp.path().join("prefix");

    kiln(tmp.path())
        .arg("install")
        .arg(&recipe)
        .arg("--prefix")
        .arg(&prefix)
        .assert()
        .success()
        .stderr(predicate::str::contains("Installed"));

    assert_eq!(fs::read_to_string(prefix.join("out")).unwrap(), "ok");
    assert!(prefix.join(".kiln/receipt.json").is_file());
}

#[cfg(unix)]
#[test]
fn test_install_json_messages() {
    let tmp = TempDir::new().unwrap();
    let recipe = write_hello_recipe(tmp.path(), None);

    kiln(tmp.path())
        .args(["--message-format", "json", "install"])
        .arg(&recipe)
        .arg("--prefix")
        .arg(tmp.path().join("prefix"))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""reason":"step-started""#))
        .stdout(predicate::str::contains(r#""reason":"install-report""#));
}

#[test]
fn test_install_checksum_mismatch_fails() {
    let tmp = TempDir::new().unwrap();
    let recipe = write_hello_recipe(tmp.path(), Some(&"0".repeat(64)));
    let prefix = tmp.path().join("prefix");

    kiln(tmp.path())
        .arg("install")
        .arg(&recipe)
        .arg("--prefix")
        .arg(&prefix)
        .assert()
        .failure()
        .stderr(predicate::str::contains("checksum mismatch"));

    assert!(!prefix.exists());
}

#[test]
fn test_test_requires_install() {
    let tmp = TempDir::new().unwrap();

    kiln(tmp.path())
        .arg("test")
        .arg(samba_recipe())
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not installed"));
}
