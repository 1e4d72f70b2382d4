use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::Config;

use crate::log::LogWriter;
use crate::source::FetchCache;
use crate::{Error, source};

//================================================================================================
// Types
//================================================================================================

/// The configuration of a single run, immutable once built.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    entries: Vec<PathBuf>,
    package: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    vendor: bool,
    no_sum_check: bool,
    settings: Option<PathBuf>,
    log: LogWriter,
    args: Vec<String>,
    cache: Option<Arc<FetchCache>>,
    config: Config,
}

/// Builds [`CompileOptions`].
#[derive(Debug, Default)]
pub struct CompileOptionsBuilder {
    entries: Vec<PathBuf>,
    package: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    vendor: bool,
    no_sum_check: bool,
    settings: Option<PathBuf>,
    log: LogWriter,
    args: Vec<String>,
    cache: Option<Arc<FetchCache>>,
    config: Option<Config>,
}

//================================================================================================
// Impls
//================================================================================================

impl CompileOptionsBuilder {
    /// Add an entry file.
    pub fn entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.entries.push(entry.into());
        self
    }

    /// Add several entry files.
    pub fn entries<P: Into<PathBuf>>(mut self, entries: impl IntoIterator<Item = P>) -> Self {
        self.entries.extend(entries.into_iter().map(Into::into));
        self
    }

    /// The package to run: a directory or a tar archive.
    pub fn package(mut self, package: impl Into<PathBuf>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// The directory the compiler runs in.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Materialize dependencies into the package's vendor directory.
    pub fn vendor(mut self, vendor: bool) -> Self {
        self.vendor = vendor;
        self
    }

    /// Skip the sum-check; the lock file is then neither read nor written.
    pub fn no_sum_check(mut self, no_sum_check: bool) -> Self {
        self.no_sum_check = no_sum_check;
        self
    }

    /// A settings file passed through to the compiler.
    pub fn settings(mut self, settings: impl Into<PathBuf>) -> Self {
        self.settings = Some(settings.into());
        self
    }

    /// Where the run's progress log goes; [`LogWriter::Silent`] disables it.
    pub fn log(mut self, log: LogWriter) -> Self {
        self.log = log;
        self
    }

    /// Send the run's progress log to `writer`.
    pub fn log_writer(self, writer: impl Write + Send + 'static) -> Self {
        self.log(LogWriter::sink(writer))
    }

    /// Append a raw compiler argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append raw compiler arguments.
    pub fn args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Fetch through `cache` instead of the configured one.
    pub fn cache(mut self, cache: Arc<FetchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use `config` instead of the process configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Finish building.
    pub fn build(self) -> CompileOptions {
        CompileOptions {
            entries: self.entries,
            package: self.package,
            work_dir: self.work_dir,
            vendor: self.vendor,
            no_sum_check: self.no_sum_check,
            settings: self.settings,
            log: self.log,
            args: self.args,
            cache: self.cache,
            config: self.config.unwrap_or_else(|| config::CONFIG.clone()),
        }
    }
}

impl CompileOptions {
    /// Start building options.
    pub fn builder() -> CompileOptionsBuilder {
        CompileOptionsBuilder::default()
    }

    /// The requested entries, possibly empty.
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// The package to run.
    ///
    /// Falls back to the work dir, then the settings file's directory, then the current
    /// directory.
    pub fn package_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = self.package.as_ref().or(self.work_dir.as_ref()) {
            return Ok(path.clone());
        }
        if let Some(parent) = self.settings.as_deref().and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            return Ok(parent.to_path_buf());
        }
        std::env::current_dir().map_err(Error::io("."))
    }

    /// The directory the compiler runs in, if set.
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Whether dependencies are vendored.
    pub fn vendor(&self) -> bool {
        self.vendor
    }

    /// Whether the sum-check is enabled.
    pub fn sum_check(&self) -> bool {
        !self.no_sum_check
    }

    /// The settings file, if any.
    pub fn settings(&self) -> Option<&Path> {
        self.settings.as_deref()
    }

    /// The progress log.
    pub fn log(&self) -> &LogWriter {
        &self.log
    }

    /// Raw compiler arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A copy with vendoring forced on, as archives are run.
    pub(crate) fn vendored(&self) -> Self {
        Self {
            vendor: true,
            ..self.clone()
        }
    }

    pub(crate) fn fetcher(&self) -> crate::Result<source::Fetcher> {
        let cache = self
            .cache
            .clone()
            .unwrap_or_else(|| Arc::new(FetchCache::new(self.config.cache.root.clone())));
        source::Fetcher::new(cache, &self.config).map_err(|e| Error::Io {
            path: self.config.cache.root.clone(),
            source: std::io::Error::other(e),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn package_path_precedence() -> anyhow::Result<()> {
        let opts = CompileOptions::builder()
            .package("pkg")
            .work_dir("work")
            .settings("conf/settings.yaml")
            .config(Config::default())
            .build();
        assert_eq!(opts.package_path()?, Path::new("pkg"));

        let opts = CompileOptions::builder()
            .work_dir("work")
            .settings("conf/settings.yaml")
            .config(Config::default())
            .build();
        assert_eq!(opts.package_path()?, Path::new("work"));

        let opts = CompileOptions::builder()
            .settings("conf/settings.yaml")
            .config(Config::default())
            .build();
        assert_eq!(opts.package_path()?, Path::new("conf"));

        let opts = CompileOptions::builder()
            .settings("settings.yaml")
            .config(Config::default())
            .build();
        assert_eq!(opts.package_path()?, std::env::current_dir()?);
        Ok(())
    }

    #[test]
    fn options_are_collected() {
        let opts = CompileOptions::builder()
            .entry("a.k")
            .entries(["b.k", "c.k"])
            .no_sum_check(true)
            .args(["--strict"])
            .log(LogWriter::Silent)
            .config(Config::default())
            .build();
        assert_eq!(opts.entries().len(), 3);
        assert!(!opts.sum_check());
        assert!(opts.vendored().vendor());
        assert_eq!(opts.args(), ["--strict"]);
        assert!(matches!(opts.log(), LogWriter::Silent));
    }
}
