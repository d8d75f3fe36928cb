//! Process-wide plugin registry.
//!
//! One name→constructor table per plugin kind, in separate namespaces.
//! Registration is declarative at startup; a duplicate name overwrites the
//! previous entry (last wins, logged). Lookup of a missing name is a
//! configuration error for the caller, never a runtime panic here.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::error::PluginError;
use crate::exporter::Exporter;
use crate::fetcher::Fetcher;
use crate::middleware::Middleware;
use crate::parser::Parser;
use crate::postprocessor::PostProcessor;
use crate::routing::RoutingPlugin;
use crate::validator::{ParsedValidator, RawValidator};

pub type FetcherCtor = fn(&Value) -> Result<Box<dyn Fetcher>, PluginError>;
pub type ParserCtor = fn(&Value) -> Result<Box<dyn Parser>, PluginError>;
pub type RawValidatorCtor = fn(&Value) -> Result<Box<dyn RawValidator>, PluginError>;
pub type ParsedValidatorCtor = fn(&Value) -> Result<Box<dyn ParsedValidator>, PluginError>;
pub type MiddlewareCtor = fn(&Value) -> Result<Box<dyn Middleware>, PluginError>;
pub type PostProcessorCtor = fn(&Value) -> Result<Box<dyn PostProcessor>, PluginError>;
pub type ExporterCtor = fn(&Value) -> Result<Box<dyn Exporter>, PluginError>;
pub type RoutingCtor = fn(&Value) -> Result<Box<dyn RoutingPlugin>, PluginError>;

struct Namespace<C> {
    kind: &'static str,
    entries: RwLock<HashMap<String, C>>,
}

impl<C: Copy> Namespace<C> {
    fn new(kind: &'static str) -> Self {
        Self { kind, entries: RwLock::new(HashMap::new()) }
    }

    fn register(&self, name: &str, ctor: C) {
        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(kind = self.kind, "registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if guard.insert(name.to_string(), ctor).is_some() {
            tracing::warn!(kind = self.kind, plugin = %name, "plugin name re-registered, last wins");
        }
    }

    fn get(&self, name: &str) -> Option<C> {
        let guard = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(kind = self.kind, "registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.get(name).copied()
    }

    fn names(&self) -> Vec<String> {
        let guard = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Registry of all plugin constructors, read-only after initialization.
pub struct Registry {
    fetchers: Namespace<FetcherCtor>,
    parsers: Namespace<ParserCtor>,
    raw_validators: Namespace<RawValidatorCtor>,
    parsed_validators: Namespace<ParsedValidatorCtor>,
    middleware: Namespace<MiddlewareCtor>,
    postprocessors: Namespace<PostProcessorCtor>,
    exporters: Namespace<ExporterCtor>,
    routing: Namespace<RoutingCtor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            fetchers: Namespace::new("fetcher"),
            parsers: Namespace::new("parser"),
            raw_validators: Namespace::new("raw_validator"),
            parsed_validators: Namespace::new("parsed_validator"),
            middleware: Namespace::new("middleware"),
            postprocessors: Namespace::new("postprocessor"),
            exporters: Namespace::new("exporter"),
            routing: Namespace::new("routing"),
        }
    }

    pub fn register_fetcher(&self, name: &str, ctor: FetcherCtor) {
        self.fetchers.register(name, ctor);
    }

    pub fn register_parser(&self, name: &str, ctor: ParserCtor) {
        self.parsers.register(name, ctor);
    }

    pub fn register_raw_validator(&self, name: &str, ctor: RawValidatorCtor) {
        self.raw_validators.register(name, ctor);
    }

    pub fn register_parsed_validator(&self, name: &str, ctor: ParsedValidatorCtor) {
        self.parsed_validators.register(name, ctor);
    }

    pub fn register_middleware(&self, name: &str, ctor: MiddlewareCtor) {
        self.middleware.register(name, ctor);
    }

    pub fn register_postprocessor(&self, name: &str, ctor: PostProcessorCtor) {
        self.postprocessors.register(name, ctor);
    }

    pub fn register_exporter(&self, name: &str, ctor: ExporterCtor) {
        self.exporters.register(name, ctor);
    }

    pub fn register_routing(&self, name: &str, ctor: RoutingCtor) {
        self.routing.register(name, ctor);
    }

    pub fn fetcher(&self, name: &str) -> Option<FetcherCtor> {
        self.fetchers.get(name)
    }

    pub fn parser(&self, name: &str) -> Option<ParserCtor> {
        self.parsers.get(name)
    }

    pub fn raw_validator(&self, name: &str) -> Option<RawValidatorCtor> {
        self.raw_validators.get(name)
    }

    pub fn parsed_validator(&self, name: &str) -> Option<ParsedValidatorCtor> {
        self.parsed_validators.get(name)
    }

    pub fn middleware(&self, name: &str) -> Option<MiddlewareCtor> {
        self.middleware.get(name)
    }

    pub fn postprocessor(&self, name: &str) -> Option<PostProcessorCtor> {
        self.postprocessors.get(name)
    }

    pub fn exporter(&self, name: &str) -> Option<ExporterCtor> {
        self.exporters.get(name)
    }

    pub fn routing(&self, name: &str) -> Option<RoutingCtor> {
        self.routing.get(name)
    }

    pub fn parser_names(&self) -> Vec<String> {
        self.parsers.names()
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.middleware.names()
    }

    pub fn postprocessor_names(&self) -> Vec<String> {
        self.postprocessors.names()
    }

    pub fn exporter_names(&self) -> Vec<String> {
        self.exporters.names()
    }
}
