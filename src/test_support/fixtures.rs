//! Test fixtures: in-memory archives and small recipes.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::util::hash::sha256_bytes;

/// A well-formed checksum for recipes whose artifacts are never fetched
/// (sha256 of `hello\n`).
pub const SHA_A: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

/// Build an uncompressed tar archive. Every file is mode 0755.
pub fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *content)
            .expect("append tar entry");
    }

    builder.into_inner().expect("finish tar")
}

/// Build a gzip-compressed tar archive.
pub fn build_tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&build_tar(files)).expect("gzip tar");
    encoder.finish().expect("finish gzip")
}

/// A `hello-1.0/` source tarball and its checksum.
pub fn hello_tarball() -> (Vec<u8>, String) {
    let bytes = build_tar_gz(&[
        ("hello-1.0/README", b"hello\n"),
        ("hello-1.0/configure", b"#!/bin/sh\nexit 0\n"),
    ]);
    let sha = sha256_bytes(&bytes);
    (bytes, sha)
}

/// `file://` URL for a local path.
pub fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path)
        .expect("absolute path")
        .to_string()
}

/// A recipe with one custom step that writes `ok` into `{prefix}/out`.
pub fn minimal_recipe_toml(url: &str, sha256: &str) -> String {
    format!(
        r#"name = "hello"
version = "1.0"
desc = "Test package"

[source]
url = "{url}"
sha256 = "{sha256}"

[[steps]]
kind = "custom"
program = "sh"
args = ["-c", "printf ok > {{prefix}}/out"]
"#
    )
}
