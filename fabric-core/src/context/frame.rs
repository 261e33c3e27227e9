use std::fmt;

/// One hop of a bidirectional invocation.
///
/// The frame records where the caller can be reached for a callback and,
/// for stateful callers, the key correlating the callback with the calling
/// instance. Frames are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallFrame {
    callback_uri: String,
    correlation_id: Option<String>,
}

impl CallFrame {
    /// An empty correlation id is stored as `None`; both frame encodings
    /// represent it as null.
    pub fn new(callback_uri: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            callback_uri: callback_uri.into(),
            correlation_id: correlation_id.filter(|id| !id.is_empty()),
        }
    }

    /// Frame for a stateless caller.
    pub fn stateless(callback_uri: impl Into<String>) -> Self {
        Self::new(callback_uri, None)
    }

    #[inline]
    pub fn callback_uri(&self) -> &str {
        &self.callback_uri
    }

    #[inline]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.correlation_id {
            Some(id) => write!(f, "{}#{}", self.callback_uri, id),
            None => f.write_str(&self.callback_uri),
        }
    }
}
