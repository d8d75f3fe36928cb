use boxflow_api::error::PluginError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("unknown {kind} plugin: '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn unknown_plugin(kind: &'static str, name: impl Into<String>) -> Self {
        EngineError::UnknownPlugin { kind, name: name.into() }
    }

    /// Add context to the error.
    ///
    /// For `Plugin` variants, context is added to the inner `PluginError`;
    /// otherwise it is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Plugin(e) => EngineError::Plugin(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
