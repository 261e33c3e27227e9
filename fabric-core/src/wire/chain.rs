use std::{
    convert::Infallible,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use service_async::Service;
use tracing::{debug, error};

use super::{
    interceptor::{Next, SharedInterceptor},
    Interceptor, Operation,
};
use crate::{error::WireError, message::Message};

/// The interceptor pipeline of one operation.
///
/// A chain is assembled once by [`ChainBuilder`], invoked any number of times concurrently
/// (it is immutable and cheap to clone), and finally detached together with its wire.
#[derive(Clone)]
pub struct InvocationChain {
    inner: Arc<ChainInner>,
}

struct ChainInner {
    operation: Operation,
    interceptors: Box<[SharedInterceptor]>,
    attached: AtomicBool,
}

impl InvocationChain {
    pub fn builder(operation: Operation) -> ChainBuilder {
        ChainBuilder {
            operation,
            interceptors: Vec::new(),
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.inner.operation
    }

    pub fn len(&self) -> usize {
        self.inner.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.interceptors.is_empty()
    }

    /// Interceptor names from head to tail.
    pub fn interceptor_names(&self) -> Vec<&str> {
        self.inner.interceptors.iter().map(|i| i.name_dyn()).collect()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire)
    }

    /// Returns `true` if this call detached the chain.
    pub(crate) fn detach(&self) -> bool {
        self.inner.attached.swap(false, Ordering::AcqRel)
    }

    /// Sends `msg` through the chain head; the returned message is authoritative.
    pub async fn invoke(&self, mut msg: Message) -> Message {
        let operation = self.inner.operation.name();
        if !self.is_attached() {
            error!(operation, "invoking a detached invocation chain");
            msg.set_body_with_fault(WireError::ChainDetached(operation.to_string()));
            return msg;
        }
        Next::new(operation, &self.inner.interceptors)
            .invoke(msg)
            .await
    }
}

impl Service<Message> for InvocationChain {
    type Response = Message;
    type Error = Infallible;

    async fn call(&self, req: Message) -> Result<Self::Response, Self::Error> {
        Ok(self.invoke(req).await)
    }
}

impl fmt::Debug for InvocationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationChain")
            .field("operation", &self.inner.operation)
            .field("interceptors", &self.interceptor_names())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Collects interceptors in invocation order.
pub struct ChainBuilder {
    operation: Operation,
    interceptors: Vec<SharedInterceptor>,
}

impl ChainBuilder {
    /// Appends an interceptor; it runs after every interceptor added before it.
    pub fn add<I: Interceptor>(self, interceptor: I) -> Self {
        self.add_shared(Arc::new(interceptor))
    }

    /// Appends an interceptor instance shared with other chains.
    pub fn add_shared<I: Interceptor>(mut self, interceptor: Arc<I>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Validates and freezes the chain.
    ///
    /// A chain must be non-empty and end in a terminal interceptor.
    pub fn build(self) -> Result<InvocationChain, WireError> {
        let Some(tail) = self.interceptors.last() else {
            return Err(WireError::EmptyChain(self.operation.to_string()));
        };
        if !tail.is_terminal_dyn() {
            return Err(WireError::UnterminatedChain {
                operation: self.operation.to_string(),
                interceptor: tail.name_dyn().to_string(),
            });
        }
        debug!(
            operation = %self.operation,
            interceptors = self.interceptors.len(),
            "invocation chain built"
        );
        Ok(InvocationChain {
            inner: Arc::new(ChainInner {
                operation: self.operation,
                interceptors: self.interceptors.into_boxed_slice(),
                attached: AtomicBool::new(true),
            }),
        })
    }
}
