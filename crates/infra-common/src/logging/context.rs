use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, Span};

/// Context information for logging: which component, and for which call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    /// Component that is generating the log
    pub component: String,
    /// Call the work belongs to
    pub call_id: Option<String>,
    /// Additional contextual fields, rendered into the span's `extra` field
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context with just the component name
    pub fn new<S: Into<String>>(component: S) -> Self {
        LogContext {
            component: component.into(),
            ..Default::default()
        }
    }

    /// Create a context for work done on behalf of one call
    pub fn for_call<S: Into<String>, T: Into<String>>(component: S, call_id: T) -> Self {
        LogContext {
            component: component.into(),
            call_id: Some(call_id.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field to the context
    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    fn extra(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Create a span with this context's information
    pub fn span(&self, level: Level) -> Span {
        let call_id = self.call_id.as_deref().unwrap_or("-");
        let extra = self.extra();
        // Span macros need a constant level
        match level {
            Level::TRACE => tracing::trace_span!("callbridge", component = %self.component, call_id = %call_id, extra = %extra),
            Level::DEBUG => tracing::debug_span!("callbridge", component = %self.component, call_id = %call_id, extra = %extra),
            Level::INFO => tracing::info_span!("callbridge", component = %self.component, call_id = %call_id, extra = %extra),
            Level::WARN => tracing::warn_span!("callbridge", component = %self.component, call_id = %call_id, extra = %extra),
            Level::ERROR => tracing::error_span!("callbridge", component = %self.component, call_id = %call_id, extra = %extra),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;
        if let Some(call_id) = &self.call_id {
            write!(f, " call={}", call_id)?;
        }
        if !self.fields.is_empty() {
            write!(f, " {}", self.extra())?;
        }
        Ok(())
    }
}
