//! Per-request ambient state carried along an invocation.
//!
//! A [`WorkContext`] holds the security subject of the request, the stack of
//! [`CallFrame`]s pushed by bidirectional invocations and an open header bag.
//! It travels attached to every [`Message`](crate::message::Message) and is
//! reset at request boundaries by the [`AffinityCache`](crate::affinity::AffinityCache).
//!
//! A context is owned by exactly one logical request at a time; it performs no
//! internal locking and every mutation goes through `&mut self`.
use std::{
    any::{type_name, Any},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use thiserror::Error;

pub use self::frame::CallFrame;

pub mod codec;
mod frame;

/// Header carrying the media type of an inbound payload.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

pub type HeaderValue = Arc<dyn Any + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("header {name} is not of type {expected}")]
    HeaderType {
        name: String,
        expected: &'static str,
    },
}

/// The authenticated principal of a request.
///
/// Subjects are process-local: frame encodings never carry them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subject {
    pub principal: String,
    pub roles: Vec<String>,
}

impl Subject {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Clone, Default)]
pub struct WorkContext {
    subject: Option<Subject>,
    call_stack: Vec<CallFrame>,
    headers: Option<HashMap<String, HeaderValue>>,
}

impl WorkContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn set_subject(&mut self, subject: Subject) {
        self.subject = Some(subject);
    }

    pub fn add_call_frame(&mut self, frame: CallFrame) {
        self.call_stack.push(frame);
    }

    /// Pushes frames in order, the last one ending on top.
    pub fn add_call_frames(&mut self, frames: impl IntoIterator<Item = CallFrame>) {
        self.call_stack.extend(frames);
    }

    pub fn pop_call_frame(&mut self) -> Option<CallFrame> {
        self.call_stack.pop()
    }

    pub fn peek_call_frame(&self) -> Option<&CallFrame> {
        self.call_stack.last()
    }

    /// Frames from the bottom of the stack to the top.
    pub fn call_stack(&self) -> &[CallFrame] {
        &self.call_stack
    }

    pub fn set_header<T>(&mut self, name: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), Arc::new(value));
    }

    /// Typed header lookup.
    ///
    /// A missing header is `Ok(None)`; a header stored with a different type
    /// is an error.
    pub fn header<T: Any>(&self, name: &str) -> Result<Option<&T>, ContextError> {
        let Some(value) = self.headers.as_ref().and_then(|h| h.get(name)) else {
            return Ok(None);
        };
        (**value)
            .downcast_ref::<T>()
            .map(Some)
            .ok_or_else(|| ContextError::HeaderType {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn remove_header(&mut self, name: &str) -> Option<HeaderValue> {
        self.headers.as_mut().and_then(|h| h.remove(name))
    }

    pub fn has_headers(&self) -> bool {
        self.headers.as_ref().is_some_and(|h| !h.is_empty())
    }

    pub fn reset(&mut self) {
        self.subject = None;
        self.call_stack.clear();
        self.headers = None;
    }

    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.call_stack.is_empty() && !self.has_headers()
    }
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&String> = self
            .headers
            .as_ref()
            .map(|h| h.keys().collect())
            .unwrap_or_default();
        f.debug_struct("WorkContext")
            .field("subject", &self.subject)
            .field("call_stack", &self.call_stack)
            .field("headers", &headers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_stack_is_lifo() {
        let mut ctx = WorkContext::new();
        assert!(ctx.pop_call_frame().is_none());
        assert!(ctx.peek_call_frame().is_none());

        ctx.add_call_frame(CallFrame::stateless("fabric://a"));
        ctx.add_call_frame(CallFrame::new("fabric://b", Some("7".to_string())));
        assert_eq!("fabric://b", ctx.peek_call_frame().unwrap().callback_uri());
        assert_eq!(Some("7"), ctx.pop_call_frame().unwrap().correlation_id());
        assert_eq!("fabric://a", ctx.pop_call_frame().unwrap().callback_uri());
        assert!(ctx.pop_call_frame().is_none());
    }

    #[test]
    fn test_typed_headers() {
        let mut ctx = WorkContext::new();
        assert_eq!(Ok(None), ctx.header::<String>("missing"));

        ctx.set_header(CONTENT_TYPE_HEADER, "text/plain".to_string());
        ctx.set_header("retries", 3u32);
        assert_eq!(
            Some(&"text/plain".to_string()),
            ctx.header::<String>(CONTENT_TYPE_HEADER).unwrap()
        );
        assert_eq!(Some(&3), ctx.header::<u32>("retries").unwrap());

        let err = ctx.header::<u64>("retries").unwrap_err();
        assert!(matches!(err, ContextError::HeaderType { ref name, .. } if name == "retries"));

        assert!(ctx.remove_header("retries").is_some());
        assert_eq!(Ok(None), ctx.header::<u32>("retries"));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut ctx = WorkContext::new();
        ctx.reset();
        assert!(ctx.is_empty());

        ctx.set_subject(Subject::new("alice").with_role("uploader"));
        ctx.set_header("k", 1i32);
        ctx.add_call_frame(CallFrame::stateless("fabric://a"));
        assert!(!ctx.is_empty());
        assert!(ctx.subject().unwrap().has_role("uploader"));

        ctx.reset();
        ctx.reset();
        assert!(ctx.is_empty());
        assert!(ctx.subject().is_none());
        assert!(ctx.call_stack().is_empty());
        assert_eq!(Ok(None), ctx.header::<i32>("k"));
    }
}
