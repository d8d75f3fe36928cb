use std::fmt;

/// Error kind for plugin and pipeline errors.
///
/// Matches the structured error records accumulated in
/// `PipelineContext.metadata["errors"]`, so plugin failures map 1:1 onto
/// the records surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    Parse,
    RawValidate,
    ParsedValidate,
    Middleware,
    Postprocessor,
    Export,
    Internal,
    AgentUnavailable,
    AgentProtocol,
    Timeout,
}

/// Plugin error — returned by all plugin trait methods.
#[derive(Debug, Clone)]
pub struct PluginError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PluginError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fetch, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, msg)
    }

    pub fn raw_validate(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RawValidate, msg)
    }

    pub fn parsed_validate(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParsedValidate, msg)
    }

    pub fn middleware(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Middleware, msg)
    }

    pub fn postprocessor(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Postprocessor, msg)
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Export, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn agent_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AgentUnavailable, msg)
    }

    pub fn agent_protocol(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AgentProtocol, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for PluginError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → PluginError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(e.to_string())
    }
}

impl From<std::str::Utf8Error> for PluginError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::parse(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for PluginError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::parse(e.to_string())
    }
}
