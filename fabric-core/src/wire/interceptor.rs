use std::{future::Future, sync::Arc};

use futures::future::{ready, LocalBoxFuture};
use tracing::error;

use crate::{error::WireError, message::Message};

/// A link of an invocation chain.
///
/// An interceptor either does its work and hands the message to the rest of the chain through
/// [`Next::invoke`], returning whatever comes back, or short-circuits by returning a fault
/// message without delegating. Terminal interceptors (local dispatch or transport) never
/// delegate and must turn every failure into [`Message::set_body_with_fault`].
///
/// Interceptors are shared by every thread invoking the chain, so they are `Send + Sync` and
/// keep no per-request state.
pub trait Interceptor: Send + Sync + 'static {
    fn invoke(&self, msg: Message, next: Next<'_>) -> impl Future<Output = Message>;

    /// Whether this interceptor ends a chain.
    fn is_terminal(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Object-safe form of [`Interceptor`].
pub(crate) trait DynInterceptor: Send + Sync {
    fn invoke_dyn<'a>(&'a self, msg: Message, next: Next<'a>) -> LocalBoxFuture<'a, Message>;

    fn is_terminal_dyn(&self) -> bool;

    fn name_dyn(&self) -> &str;
}

impl<T: Interceptor> DynInterceptor for T {
    fn invoke_dyn<'a>(&'a self, msg: Message, next: Next<'a>) -> LocalBoxFuture<'a, Message> {
        Box::pin(self.invoke(msg, next))
    }

    fn is_terminal_dyn(&self) -> bool {
        self.is_terminal()
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

pub(crate) type SharedInterceptor = Arc<dyn DynInterceptor>;

/// Continuation over the interceptors following the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    operation: &'a str,
    rest: &'a [SharedInterceptor],
}

impl<'a> Next<'a> {
    pub(crate) fn new(operation: &'a str, rest: &'a [SharedInterceptor]) -> Self {
        Self { operation, rest }
    }

    /// Name of the operation the chain serves.
    pub fn operation(&self) -> &'a str {
        self.operation
    }

    /// Number of interceptors left after the current one.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    pub fn invoke(self, mut msg: Message) -> LocalBoxFuture<'a, Message> {
        match self.rest.split_first() {
            Some((head, rest)) => head.invoke_dyn(msg, Next::new(self.operation, rest)),
            None => {
                // build-time validation makes this unreachable for chains built by ChainBuilder
                error!(operation = self.operation, "invocation fell off the end of the chain");
                msg.set_body_with_fault(WireError::EndOfChain(self.operation.to_string()));
                Box::pin(ready(msg))
            }
        }
    }
}
