//! Instance configuration.
//!
//! Builder-style, consumed by [`Prolog::new`](crate::Prolog::new). Clones of
//! an instance inherit the configuration of their source.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::module::GuestModule;

/// Receiver for one chunk of guest text output.
pub type Sink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Config {
    pub(crate) module: Option<GuestModule>,
    pub(crate) library_path: Option<String>,
    pub(crate) preopen_dir: Option<PathBuf>,
    pub(crate) dirs: BTreeMap<String, PathBuf>,
    pub(crate) trace: bool,
    pub(crate) quiet: bool,
    pub(crate) stdout: Option<Sink>,
    pub(crate) stderr: Option<Sink>,
    pub(crate) debug: Option<Sink>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled guest to instantiate. Defaults to [`GuestModule::shared`].
    pub fn module(mut self, module: GuestModule) -> Self {
        self.module = Some(module);
        self
    }

    /// Guest-side path of the engine's library directory (`--library`).
    pub fn library_path(mut self, path: impl Into<String>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// Host directory exposed to the guest as `/`.
    pub fn preopen_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.preopen_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Expose host directory `dir` to the guest under `alias`. Mapping the
    /// same alias twice keeps the last directory.
    pub fn map_dir(mut self, alias: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        self.dirs.insert(alias.into(), dir.as_ref().to_path_buf());
        self
    }

    /// Run the engine with tracing enabled (`-t`).
    pub fn trace(mut self, on: bool) -> Self {
        self.trace = on;
        self
    }

    /// Suppress engine warnings (`-q`).
    pub fn quiet(mut self, on: bool) -> Self {
        self.quiet = on;
        self
    }

    pub fn stdout_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.stdout = Some(Arc::new(sink));
        self
    }

    pub fn stderr_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.stderr = Some(Arc::new(sink));
        self
    }

    pub fn debug_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug = Some(Arc::new(sink));
        self
    }

    /// Command line handed to the guest's `_start`.
    pub(crate) fn argv(&self) -> Vec<String> {
        let mut args: Vec<String> = ["tpl", "-g", "halt", "--ns"]
            .into_iter()
            .map(String::from)
            .collect();
        if let Some(lib) = &self.library_path {
            args.push("--library".to_string());
            args.push(lib.clone());
        }
        if self.trace {
            args.push("-t".to_string());
        }
        if self.quiet {
            args.push("-q".to_string());
        }
        args
    }

    pub(crate) fn emit_stdout(&self, text: &str) {
        if let Some(sink) = self.stdout.as_ref().filter(|_| !text.is_empty()) {
            sink(text);
        }
    }

    pub(crate) fn emit_stderr(&self, text: &str) {
        if let Some(sink) = self.stderr.as_ref().filter(|_| !text.is_empty()) {
            sink(text);
        }
    }

    pub(crate) fn emit_debug(&self, text: &str) {
        tracing::debug!(target: "wasmpl", "{}", text);
        if let Some(sink) = &self.debug {
            sink(text);
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("module", &self.module.is_some())
            .field("library_path", &self.library_path)
            .field("preopen_dir", &self.preopen_dir)
            .field("dirs", &self.dirs)
            .field("trace", &self.trace)
            .field("quiet", &self.quiet)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("debug", &self.debug.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn default_argv() {
        assert_eq!(Config::new().argv(), vec!["tpl", "-g", "halt", "--ns"]);
    }

    #[test]
    fn argv_carries_flags_in_order() {
        let cfg = Config::new().library_path("/lib").trace(true).quiet(true);
        assert_eq!(
            cfg.argv(),
            vec!["tpl", "-g", "halt", "--ns", "--library", "/lib", "-t", "-q"]
        );
    }

    #[test]
    fn map_dir_last_write_wins() {
        let cfg = Config::new().map_dir("data", "/a").map_dir("data", "/b");
        assert_eq!(cfg.dirs.len(), 1);
        assert_eq!(cfg.dirs["data"], PathBuf::from("/b"));
    }

    #[test]
    fn sinks_skip_empty_output() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cfg = Config::new().stdout_sink(move |s| seen2.lock().unwrap().push(s.to_string()));
        cfg.emit_stdout("");
        cfg.emit_stdout("hi");
        assert_eq!(*seen.lock().unwrap(), vec!["hi".to_string()]);
    }
}
