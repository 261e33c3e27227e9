use std::{
    any::{type_name, Any},
    future::Future,
    marker::PhantomData,
    panic::AssertUnwindSafe,
};

use fabric_core::{
    context::WorkContext,
    message::Message,
    wire::{Interceptor, Next},
    AnyResult,
};
use futures::FutureExt;
use tracing::error;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("operation {operation} expects arguments of type {expected}")]
    ArgumentType {
        operation: String,
        expected: &'static str,
    },
    // a String keeps the error Send + Sync, unlike the panic payload
    #[error("operation {operation} panicked: {message}")]
    Panic { operation: String, message: String },
}

/// Terminal link dispatching to a local component operation.
///
/// The handler receives the argument tuple `A` and the request's work context. Its error, as
/// well as any panic it raises, becomes the fault of the returned message.
pub struct InvokerInterceptor<A, R, H> {
    handler: H,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, H, Fut> InvokerInterceptor<A, R, H>
where
    H: Fn(A, WorkContext) -> Fut,
    Fut: Future<Output = AnyResult<R>>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<A, R, H, Fut> Interceptor for InvokerInterceptor<A, R, H>
where
    A: Any + Send,
    R: Any + Send,
    H: Fn(A, WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AnyResult<R>>,
{
    async fn invoke(&self, mut msg: Message, next: Next<'_>) -> Message {
        let operation = next.operation();
        let Some(args) = msg.take_body::<A>() else {
            msg.set_body_with_fault(DispatchError::ArgumentType {
                operation: operation.to_string(),
                expected: type_name::<A>(),
            });
            return msg;
        };
        let ctx = msg.work_context().cloned().unwrap_or_default();

        match AssertUnwindSafe(async { (self.handler)(args, ctx).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(ret)) => msg.set_body(ret),
            Ok(Err(e)) => msg.set_body_with_fault(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(operation, "component panicked: {message}");
                msg.set_body_with_fault(DispatchError::Panic {
                    operation: operation.to_string(),
                    message,
                });
            }
        }
        msg
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "invoker"
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{payload:?}")
    }
}

#[cfg(test)]
mod tests {
    use fabric_core::{
        context::CallFrame,
        wire::{InvocationChain, Operation},
    };
    use futures::executor::block_on;

    use super::*;
    use crate::common::LoggingInterceptor;

    fn chain() -> InvocationChain {
        InvocationChain::builder(Operation::new("divide", ["u32", "u32"]))
            .add(LoggingInterceptor::new("calculator"))
            .add(InvokerInterceptor::new(
                |(a, b): (u32, u32), ctx: WorkContext| async move {
                    if b == 0 {
                        anyhow::bail!("division by zero");
                    }
                    if b == 13 {
                        panic!("unlucky divisor");
                    }
                    Ok((a / b, ctx.call_stack().len()))
                },
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_dispatch_result() {
        let mut ctx = WorkContext::new();
        ctx.add_call_frame(CallFrame::stateless("fabric://domain/client"));
        let mut msg = Message::with_body((10u32, 3u32));
        msg.set_work_context(ctx);

        let mut ret = block_on(chain().invoke(msg));
        assert_eq!(Some((3u32, 1usize)), ret.take_body::<(u32, usize)>());
    }

    #[test]
    fn test_business_error_becomes_fault() {
        let ret = block_on(chain().invoke(Message::with_body((1u32, 0u32))));
        assert_eq!("division by zero", ret.fault().unwrap().to_string());
    }

    #[test]
    fn test_panic_becomes_fault() {
        let ret = block_on(chain().invoke(Message::with_body((1u32, 13u32))));
        let fault = ret.fault().unwrap().downcast_ref::<DispatchError>().unwrap();
        assert!(
            matches!(fault, DispatchError::Panic { message, .. } if message == "unlucky divisor")
        );
    }

    #[test]
    fn test_argument_type_mismatch() {
        let ret = block_on(chain().invoke(Message::with_body("ten")));
        assert!(matches!(
            ret.fault().unwrap().downcast_ref::<DispatchError>(),
            Some(DispatchError::ArgumentType { .. })
        ));
    }
}
