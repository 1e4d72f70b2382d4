use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;

use serde_json::Value;

use crate::{Error, Name};

//================================================================================================
// Types
//================================================================================================

/// The external compiler a resolved package is handed to.
pub trait Compiler: Send + Sync {
    /// Compile `invocation`, returning the evaluated value.
    ///
    /// Failures are reported as [`Error::Compile`] with the compiler's diagnostics
    /// verbatim.
    fn compile(&self, invocation: &Invocation) -> impl Future<Output = crate::Result<Value>> + Send;
}

/// Everything the compiler needs to evaluate a resolved package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The package root.
    pub package: PathBuf,
    /// Resolved, existing entry files.
    pub entries: Vec<PathBuf>,
    /// Dependency import names and their directories.
    pub externals: Vec<(Name, PathBuf)>,
    /// Settings file, if any.
    pub settings: Option<PathBuf>,
    /// Raw extra arguments.
    pub args: Vec<String>,
    /// Where the compiler runs.
    pub work_dir: PathBuf,
}

/// Runs the `kcl` executable.
#[derive(Debug, Clone)]
pub struct KclCompiler {
    program: PathBuf,
}

//================================================================================================
// Impls
//================================================================================================

impl Invocation {
    /// The command line passed to the compiler, without the program name.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec!["run".into()];
        argv.extend(self.entries.iter().map(|e| e.clone().into_os_string()));
        for (name, path) in &self.externals {
            argv.push("-E".into());
            let mut external = OsString::from(format!("{}=", name.import_name()));
            external.push(path);
            argv.push(external);
        }
        if let Some(settings) = &self.settings {
            argv.push("-Y".into());
            argv.push(settings.clone().into_os_string());
        }
        argv.extend(["--format".into(), "json".into()]);
        argv.extend(self.args.iter().map(OsString::from));
        argv
    }
}

impl KclCompiler {
    /// Run `program` as the compiler.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The compiler named by `compiler.program` in `config`.
    pub fn from_config(config: &config::Config) -> Self {
        Self::new(&config.compiler.program)
    }
}

impl Compiler for KclCompiler {
    async fn compile(&self, invocation: &Invocation) -> crate::Result<Value> {
        let argv = invocation.argv();
        tracing::debug!(program = %self.program.display(), ?argv, "invoking compiler");

        let output = tokio::process::Command::new(&self.program)
            .args(&argv)
            .current_dir(&invocation.work_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(Error::io(&self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).into_owned()
            } else {
                stderr.into_owned()
            };
            return Err(Error::Compile {
                package: invocation.package.clone(),
                message,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&stdout).map_err(|e| Error::Compile {
            package: invocation.package.clone(),
            message: format!("compiler output is not valid JSON: {e}\n{stdout}"),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_line_layout() -> anyhow::Result<()> {
        let invocation = Invocation {
            package: "/pkg".into(),
            entries: vec!["/pkg/main.k".into(), "/pkg/extra.k".into()],
            externals: vec![("my-lib".parse()?, "/cache/my-lib".into())],
            settings: Some("/pkg/kcl.yaml".into()),
            args: vec!["--strict-range-check".into()],
            work_dir: "/pkg".into(),
        };
        let argv: Vec<_> = invocation
            .argv()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        insta::assert_snapshot!(argv.join(" "), @"run /pkg/main.k /pkg/extra.k -E my_lib=/cache/my-lib -Y /pkg/kcl.yaml --format json --strict-range-check");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failures_are_reported_verbatim() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let invocation = Invocation {
            package: dir.path().into(),
            entries: vec![],
            externals: vec![],
            settings: None,
            args: vec![],
            work_dir: dir.path().into(),
        };
        // `false` ignores its arguments and exits non-zero without output
        let err = KclCompiler::new("false")
            .compile(&invocation)
            .await
            .expect_err("false always fails");
        assert!(matches!(err, Error::Compile { ref package, .. } if package == dir.path()));

        let err = KclCompiler::new(dir.path().join("no-such-compiler"))
            .compile(&invocation)
            .await
            .expect_err("program does not exist");
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        Ok(())
    }
}
