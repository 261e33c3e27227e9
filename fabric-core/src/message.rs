use std::{any::Any, fmt};

use crate::{context::WorkContext, AnyError};

/// Argument tuple or return value carried by a message.
pub type Payload = Box<dyn Any + Send>;

#[derive(Default)]
enum Body {
    #[default]
    Empty,
    Payload(Payload),
    Fault(AnyError),
}

/// The envelope travelling through an invocation chain.
///
/// A message holds either nothing, a payload (the argument tuple on the way in, the return
/// value on the way out) or a fault. The fault state can only be entered through
/// [`Message::set_body_with_fault`], and is left again by [`Message::set_body`],
/// [`Message::clear_body`] or [`Message::reset`].
#[derive(Default)]
pub struct Message {
    body: Body,
    work_context: Option<WorkContext>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body<T: Any + Send>(body: T) -> Self {
        let mut msg = Self::new();
        msg.set_body(body);
        msg
    }

    pub fn set_body<T: Any + Send>(&mut self, body: T) {
        self.body = Body::Payload(Box::new(body));
    }

    pub fn set_payload(&mut self, payload: Payload) {
        self.body = Body::Payload(payload);
    }

    pub fn set_body_with_fault(&mut self, fault: impl Into<AnyError>) {
        self.body = Body::Fault(fault.into());
    }

    /// Turns the message into an empty success response.
    pub fn clear_body(&mut self) {
        self.body = Body::Empty;
    }

    #[inline]
    pub fn is_fault(&self) -> bool {
        matches!(self.body, Body::Fault(_))
    }

    #[inline]
    pub fn has_body(&self) -> bool {
        !matches!(self.body, Body::Empty)
    }

    pub fn body<T: Any>(&self) -> Option<&T> {
        match &self.body {
            Body::Payload(p) => p.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn body_mut<T: Any>(&mut self) -> Option<&mut T> {
        match &mut self.body {
            Body::Payload(p) => p.downcast_mut::<T>(),
            _ => None,
        }
    }

    /// Moves the payload out if it is a `T`; any other body is left in place.
    pub fn take_body<T: Any>(&mut self) -> Option<T> {
        match std::mem::take(&mut self.body) {
            Body::Payload(p) => match p.downcast::<T>() {
                Ok(v) => Some(*v),
                Err(p) => {
                    self.body = Body::Payload(p);
                    None
                }
            },
            other => {
                self.body = other;
                None
            }
        }
    }

    pub fn take_payload(&mut self) -> Option<Payload> {
        match std::mem::take(&mut self.body) {
            Body::Payload(p) => Some(p),
            other => {
                self.body = other;
                None
            }
        }
    }

    pub fn fault(&self) -> Option<&AnyError> {
        match &self.body {
            Body::Fault(e) => Some(e),
            _ => None,
        }
    }

    pub fn take_fault(&mut self) -> Option<AnyError> {
        match std::mem::take(&mut self.body) {
            Body::Fault(e) => Some(e),
            other => {
                self.body = other;
                None
            }
        }
    }

    /// Splits the body into a result: `Ok(None)` for an empty response.
    pub fn into_result(self) -> Result<Option<Payload>, AnyError> {
        match self.body {
            Body::Empty => Ok(None),
            Body::Payload(p) => Ok(Some(p)),
            Body::Fault(e) => Err(e),
        }
    }

    pub fn work_context(&self) -> Option<&WorkContext> {
        self.work_context.as_ref()
    }

    pub fn work_context_mut(&mut self) -> Option<&mut WorkContext> {
        self.work_context.as_mut()
    }

    pub fn set_work_context(&mut self, ctx: WorkContext) {
        self.work_context = Some(ctx);
    }

    pub fn take_work_context(&mut self) -> Option<WorkContext> {
        self.work_context.take()
    }

    /// Clears body, fault flag and work context so the instance can be reused.
    pub fn reset(&mut self) {
        self.body = Body::Empty;
        self.work_context = None;
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            Body::Empty => "empty".to_string(),
            Body::Payload(_) => "payload".to_string(),
            Body::Fault(e) => format!("fault({e})"),
        };
        f.debug_struct("Message")
            .field("body", &body)
            .field("work_context", &self.work_context)
            .finish()
    }
}
