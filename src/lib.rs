//! Core translation engine for a document-database wire proxy.
//!
//! A [`Proxy`] takes decoded command documents, runs them through the filter,
//! update, and aggregation engines against a pluggable storage backend, and
//! returns bit-exact response documents. Transports own sockets and BSON
//! framing; backends own persistence.

pub mod aggregation;
pub mod auth;
pub mod backend;
pub mod compare;
pub mod config;
pub mod cursor;
pub mod document;
pub mod errors;
pub mod handler;
pub mod logger;
pub mod pushdown;
pub mod query;
pub mod session;

use bson::Document;

use crate::auth::{AuthRegistry, SaslMechanism};
use crate::backend::{MemoryBackend, NativeQueryExecutor};
use crate::config::ProxyConfig;
use crate::cursor::CursorManager;
use crate::query::{REGEX_CACHE_CAP, RegexCache};

/// One proxy instance: configuration, a storage backend, the cursor
/// registry, and the shared caches. Safe to share across request tasks.
pub struct Proxy {
    pub(crate) config: ProxyConfig,
    pub(crate) backend: Box<dyn NativeQueryExecutor>,
    pub(crate) cursors: CursorManager,
    pub(crate) regexes: RegexCache,
    pub(crate) auth: AuthRegistry,
}

impl Proxy {
    /// An in-memory proxy with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ProxyConfig::default())
    }

    /// A proxy over the in-memory backend.
    #[must_use]
    pub fn with_config(config: ProxyConfig) -> Self {
        Self::with_backend(config, Box::new(MemoryBackend::new()))
    }

    /// A proxy over the given backend. Logging is configured here when the
    /// config names a log directory; it is process-global and installs once.
    #[must_use]
    pub fn with_backend(config: ProxyConfig, backend: Box<dyn NativeQueryExecutor>) -> Self {
        if let Some(dir) = &config.log_dir {
            logger::configure_logging(Some(dir), config.log_level.as_deref(), None);
        }
        let cursors = CursorManager::new(&config);
        Self {
            config,
            backend,
            cursors,
            regexes: RegexCache::new(REGEX_CACHE_CAP),
            auth: AuthRegistry::new(),
        }
    }

    /// Handles one command document and always produces a reply document;
    /// failures come back as error documents, never panics.
    #[must_use]
    pub fn handle_command(&self, cmd: &Document) -> Document {
        handler::dispatch(self, cmd)
    }

    /// Installs a SASL mechanism under its wire name (`PLAIN` is
    /// preinstalled).
    pub fn install_mechanism<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn SaslMechanism> + Send + Sync + 'static,
    {
        self.auth.install(name, factory);
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("config", &self.config)
            .field("open_cursors", &self.cursors.open_cursors())
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}
