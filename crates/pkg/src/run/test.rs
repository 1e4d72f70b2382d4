use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use config::Config;
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use super::*;
use crate::checksum::Sum;
use crate::log::LogWriter;
use crate::source::FetchCache;
use crate::{ErrorKind, LOCK_NAME};

/// Evaluates a package by reporting its entry files and dependency checksums, which is
/// enough to tell two resolutions apart without a real compiler.
#[derive(Default)]
struct Stub {
    calls: AtomicUsize,
}

impl Compiler for Stub {
    async fn compile(&self, invocation: &Invocation) -> crate::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut entries = Map::new();
        for entry in &invocation.entries {
            let key = entry
                .strip_prefix(&invocation.package)
                .unwrap_or(entry)
                .display()
                .to_string();
            let body = if entry.is_file() {
                fs::read_to_string(entry).map_err(Error::io(entry))?
            } else {
                String::from("<dir>")
            };
            entries.insert(key, Value::String(body));
        }
        let mut deps = Map::new();
        for (name, path) in &invocation.externals {
            let sum = Sum::of_dir(path).map_err(Error::io(path))?;
            deps.insert(name.to_string(), Value::String(sum.to_string()));
        }
        Ok(json!({ "entries": entries, "deps": deps }))
    }
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> anyhow::Result<Self> {
        let fx = Fixture {
            dir: tempfile::tempdir()?,
        };
        fx.write(
            "app/kcl.mod",
            "[package]\nname = \"app\"\n\n[dependencies]\nhelper = { path = \"../helper\" }\nlib = { tar = \"../lib.tar\" }\n\n[profile]\nentries = [\"main.k\"]\n",
        )?;
        fx.write("app/main.k", "import helper\nimport lib\n")?;
        fx.write("app/other.k", "other = 1")?;
        fx.write("helper/kcl.mod", "[package]\nname = \"helper\"\n")?;
        fx.write("helper/helper.k", "h = 1")?;
        fx.write("lib/kcl.mod", "[package]\nname = \"lib\"\n")?;
        fx.write("lib/lib.k", "l = 1")?;
        archive::pack(&fx.path("lib"), &fx.path("lib.tar"), false)?;
        Ok(fx)
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn write(&self, rel: &str, content: &str) -> anyhow::Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn options(&self) -> CompileOptionsBuilder {
        CompileOptions::builder()
            .package(self.path("app"))
            .cache(Arc::new(FetchCache::new(self.path("cache"))))
            .config(Config::default())
            .log(LogWriter::Silent)
    }
}

#[tokio::test]
async fn disabled_sum_check_leaves_no_lock() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let stub = Stub::default();
    let result = run_with(&fx.options().no_sum_check(true).build(), &stub).await?;
    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    assert!(result.value()["deps"]["lib"].is_string());
    assert!(!fx.path("app").join(LOCK_NAME.as_str()).exists());
    Ok(())
}

#[tokio::test]
async fn repeated_runs_keep_the_lock() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let stub = Stub::default();
    let opts = fx.options().build();
    let lock = fx.path("app").join(LOCK_NAME.as_str());

    let first = run_with(&opts, &stub).await?;
    let written = fs::read_to_string(&lock)?;
    let second = run_with(&opts, &stub).await?;
    assert_eq!(fs::read_to_string(&lock)?, written);
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn entries_default_to_the_profile() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let stub = Stub::default();

    let result = run_with(&fx.options().build(), &stub).await?;
    let entries = result.value()["entries"]
        .as_object()
        .map(|m| m.keys().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    assert_eq!(entries, ["main.k"]);

    let result = run_with(&fx.options().entry("other.k").build(), &stub).await?;
    assert_eq!(result.value()["entries"]["other.k"], "other = 1");
    assert!(result.value()["entries"].get("main.k").is_none());
    Ok(())
}

#[tokio::test]
async fn missing_entry_stops_before_anything_runs() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let stub = Stub::default();
    let opts = fx
        .options()
        .entries(["main.k", "does-not-exist.k"])
        .build();

    let err = run_with(&opts, &stub).await.expect_err("an entry is missing");
    assert_eq!(err.kind(), ErrorKind::PathNotFound);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    assert!(!fx.path("app").join(LOCK_NAME.as_str()).exists());
    assert!(!fx.path("cache").exists());
    Ok(())
}

#[tokio::test]
async fn failed_fetch_stops_before_compiling() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    fs::remove_file(fx.path("lib.tar"))?;
    let stub = Stub::default();

    let err = run_with(&fx.options().build(), &stub)
        .await
        .expect_err("lib.tar is gone");
    let crate::Error::SourceUnavailable { name, kind, .. } = &err else {
        anyhow::bail!("unexpected error: {err}");
    };
    assert_eq!(&**name, "lib");
    assert_eq!(kind.to_string(), "tar");
    assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn compile_errors_pass_through() -> anyhow::Result<()> {
    struct Failing;
    impl Compiler for Failing {
        async fn compile(&self, invocation: &Invocation) -> crate::Result<Value> {
            Err(Error::Compile {
                package: invocation.package.clone(),
                message: "error[E2G22]: expected int, got str".into(),
            })
        }
    }

    let fx = Fixture::new()?;
    let err = run_with(&fx.options().build(), &Failing)
        .await
        .expect_err("compiler fails");
    let root = fx.path("app").canonicalize()?;
    assert_eq!(
        err.to_string(),
        format!(
            "failed to compile the kcl package '{}'\nerror[E2G22]: expected int, got str",
            root.display()
        )
    );
    Ok(())
}

#[tokio::test]
async fn vendored_archive_runs_offline() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let stub = Stub::default();
    let original = run_with(&fx.options().vendor(true).build(), &stub).await?;

    let archive = fx.path("dist/app.tar");
    fs::create_dir_all(fx.path("dist"))?;
    archive::pack(&fx.path("app"), &archive, true)?;

    // nothing but the archive survives: no sources, no cache
    for gone in ["app", "helper", "lib", "cache"] {
        fs::remove_dir_all(fx.path(gone))?;
    }
    fs::remove_file(fx.path("lib.tar"))?;

    let unpacked = run_with(
        &CompileOptions::builder()
            .package(&archive)
            .cache(Arc::new(FetchCache::new(fx.path("fresh-cache"))))
            .config(Config::default())
            .log(LogWriter::Silent)
            .build(),
        &stub,
    )
    .await?;
    assert_eq!(unpacked, original);
    assert!(fx.path("dist/app/vendor/lib/lib.k").exists());

    // unpacking again converges on the same tree
    let again = run_tar_with(&archive, &fx.options().build(), &stub).await?;
    assert_eq!(again, original);
    Ok(())
}

#[tokio::test]
async fn log_writer_receives_progress() -> anyhow::Result<()> {
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| std::io::Error::other("poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let fx = Fixture::new()?;
    let sink = Shared::default();
    let opts = fx.options().log_writer(sink.clone()).build();
    run_with(&opts, &Stub::default()).await?;

    let log = String::from_utf8(sink.0.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.clone())?;
    assert_eq!(log, "downloading 'lib' from '../lib.tar'\n");
    Ok(())
}

#[test]
fn result_views_agree() -> anyhow::Result<()> {
    let result = CompileResult::new(json!({
        "name": "app",
        "replicas": 3,
        "labels": { "tier": "web", "zone": null },
        "ports": [80, 443],
    }));

    let from_json: Value = serde_json::from_str(&result.json())?;
    let from_yaml: Value = serde_yaml::from_str(&result.yaml()?)?;
    assert_eq!(from_json, from_yaml);
    assert_eq!(&from_json, result.value());
    insta::assert_snapshot!(result.yaml()?, @r"
    name: app
    replicas: 3
    labels:
      tier: web
      zone: null
    ports:
    - 80
    - 443
    ");
    Ok(())
}
