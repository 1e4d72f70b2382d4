use std::path::Path;

use config::RegistryConfig;

use super::*;
use crate::ErrorKind;

fn parse(content: &str) -> crate::Result<Manifest> {
    Manifest::parse(content, Path::new("kcl.mod"), &RegistryConfig::default())
}

fn reason(content: &str) -> String {
    match parse(content) {
        Err(Error::Validation { reason, .. }) => reason,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn parse_all_kinds() -> anyhow::Result<()> {
    let manifest = parse(
        r#"
        [package]
        name = "app"
        edition = "v0.9.0"
        version = "0.1.0"

        [dependencies]
        k8s = "1.28"
        helper = { path = "../helper" }
        konfig = { git = "https://github.com/kcl-lang/konfig.git", tag = "v0.4.0" }
        pinned = { git = "https://example.com/x.git", commit = "0123abcd" }
        hello = { oci = "oci://ghcr.io/kcl-lang/helloworld", tag = "0.1.0" }
        bundled = { tar = "./deps/bundled.tar" }
        remote = { tar = "https://example.com/lib.tar.gz" }

        [profile]
        entries = ["main.k", "base/base.k"]
        "#,
    )?;

    assert_eq!(manifest.package.name.to_string(), "app");
    assert_eq!(manifest.package.version.as_deref(), Some("0.1.0"));
    assert_eq!(manifest.profile.entries.len(), 2);

    let kinds: Vec<_> = manifest
        .dependencies
        .iter()
        .map(|(k, v)| format!("{k}: {} {v}", v.kind()))
        .collect();
    insta::assert_snapshot!(kinds.join("\n"), @r"
    bundled: tar ./deps/bundled.tar
    hello: oci oci://ghcr.io/kcl-lang/helloworld:0.1.0
    helper: local ../helper
    k8s: oci oci://ghcr.io/kcl-lang/k8s:1.28
    konfig: git https://github.com/kcl-lang/konfig.git@v0.4.0
    pinned: git https://example.com/x.git#0123abcd
    remote: tar https://example.com/lib.tar.gz
    ");
    Ok(())
}

#[test]
fn version_table_uses_registry() -> anyhow::Result<()> {
    let registry = RegistryConfig {
        host: "localhost:5000".into(),
        repo: "mirror".into(),
        ..Default::default()
    };
    let manifest = Manifest::parse(
        "[package]\nname = \"a\"\n[dependencies]\nk8s = { version = \"1.29\" }\n",
        Path::new("kcl.mod"),
        &registry,
    )?;
    let dep = manifest.dependencies.get("k8s");
    assert_eq!(
        dep.map(ToString::to_string).as_deref(),
        Some("oci://localhost:5000/mirror/k8s:1.29")
    );
    Ok(())
}

#[test]
fn rejects_ill_formed_declarations() {
    let header = "[package]\nname = \"a\"\n[dependencies]\n";

    assert_eq!(
        reason(&format!("{header}x = {{ path = \"./x\", git = \"https://a/b.git\" }}")),
        "dependency 'x': exactly one source is allowed, found path, git"
    );
    assert_eq!(
        reason(&format!("{header}x = {{ git = \"https://a/b.git\" }}")),
        "dependency 'x': git dependencies need exactly one of 'commit' or 'tag'"
    );
    assert_eq!(
        reason(&format!("{header}x = {{ git = \"https://a/b.git\", commit = \"main\" }}")),
        "dependency 'x': 'main' is not a commit hash"
    );
    assert_eq!(
        reason(&format!("{header}x = {{ path = \"./x\", branch = \"main\" }}")),
        "dependency 'x': unknown key 'branch'"
    );
    assert_eq!(
        reason(&format!("{header}x = {{ path = \"./x\", tag = \"v1\" }}")),
        "dependency 'x': 'tag' is only valid for git and oci dependencies"
    );
    assert_eq!(
        reason(&format!("{header}x = {{ oci = \"oci://ghcr.io/a/x\" }}")),
        "dependency 'x': OCI reference 'oci://ghcr.io/a/x' needs a tag or digest"
    );
    assert_eq!(
        reason(&format!("{header}x = {{}}")),
        "dependency 'x': no source given"
    );
}

#[test]
fn rejects_colliding_import_names() {
    let content = r#"
    [package]
    name = "a"
    [dependencies]
    my-lib = { path = "./one" }
    my_lib = { path = "./two" }
    "#;
    assert_eq!(
        reason(content),
        "dependencies 'my-lib' and 'my_lib' import under the same name"
    );
}

#[test]
fn parse_and_missing_errors() -> anyhow::Result<()> {
    let err = parse("[package\nname = ").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);

    let err = parse("[package]\nname = \"9bad\"\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);

    let dir = tempfile::tempdir()?;
    let err = Manifest::load(dir.path(), &RegistryConfig::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("could not load 'kcl.mod' in '{}'", dir.path().display())
    );
    Ok(())
}

#[test]
fn checksum_tracks_text() -> anyhow::Result<()> {
    let a = parse("[package]\nname = \"a\"\n")?;
    let b = parse("[package]\nname = \"a\"\n")?;
    let c = parse("[package]\nname = \"a\"\nversion = \"0.1.0\"\n")?;
    assert_eq!(a.checksum(), b.checksum());
    assert_ne!(a.checksum(), c.checksum());
    Ok(())
}
