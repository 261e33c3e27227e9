//! Client-side proxies driving the chains of a wire.
//!
//! Rust has no runtime interface proxies, so a proxy here is a dispatch table from method name
//! to [`InvocationChain`], built and validated when its factory is created. Typed client facades
//! wrap a [`Proxy`] and forward each of their methods to [`Proxy::invoke`].
//!
//! Every operation of the wire must match a method of the [`ServiceContract`] by name and
//! parameter types, otherwise factory creation fails with
//! [`WireError::NoMethodForOperation`]; a misconfigured wire never reaches its first call.
//!
//! Faults travel through the chains as data. The proxy is the single place where they turn
//! back into errors: [`InvocationError::Fault`] carries the fault set by whichever interceptor
//! failed, local or remote alike.
use std::{any::Any, collections::HashMap, sync::Arc};

use tracing::debug;

pub use self::{
    callback::{CallbackProxy, CallbackProxyFactory},
    contract::{Method, ServiceContract},
};
use crate::{
    context::{CallFrame, WorkContext},
    error::{InvocationError, WireError},
    message::Message,
    wire::{InvocationChain, Wire},
};

mod callback;
mod contract;

type ChainMap = HashMap<String, InvocationChain>;

/// Builds the method-to-chain table of `wire` against `contract`.
fn map_operations(contract: &ServiceContract, wire: &Wire) -> Result<ChainMap, WireError> {
    let mut mappings = HashMap::with_capacity(wire.chains().len());
    for chain in wire.chains() {
        let operation = chain.operation();
        let method =
            contract
                .find(operation)
                .ok_or_else(|| WireError::NoMethodForOperation {
                    contract: contract.name().to_string(),
                    operation: operation.to_string(),
                })?;
        mappings.insert(method.name().to_string(), chain.clone());
    }
    Ok(mappings)
}

/// Turns the message returned by a chain into the caller-visible result.
fn unwrap_response<R: Any>(method: &str, mut ret: Message) -> Result<R, InvocationError> {
    if let Some(fault) = ret.take_fault() {
        return Err(InvocationError::Fault(fault));
    }
    if !ret.has_body() {
        // an empty response is only a valid `()`
        let unit: Box<dyn Any> = Box::new(());
        return unit
            .downcast::<R>()
            .map(|r| *r)
            .map_err(|_| InvocationError::UnexpectedReturn(method.to_string()));
    }
    ret.take_body::<R>()
        .ok_or_else(|| InvocationError::UnexpectedReturn(method.to_string()))
}

async fn dispatch<A, R>(
    chain: &InvocationChain,
    method: &str,
    ctx: WorkContext,
    args: A,
) -> Result<R, InvocationError>
where
    A: Any + Send,
    R: Any,
{
    let mut msg = Message::with_body(args);
    msg.set_work_context(ctx);
    let ret = chain.invoke(msg).await;
    unwrap_response(method, ret)
}

pub struct ProxyFactory {
    contract: Arc<ServiceContract>,
    mappings: Arc<ChainMap>,
    callback_uri: Option<Arc<str>>,
}

impl ProxyFactory {
    pub fn new(contract: ServiceContract, wire: &Wire) -> Result<Self, WireError> {
        let mappings = map_operations(&contract, wire)?;
        debug!(
            contract = contract.name(),
            wire = wire.name(),
            methods = mappings.len(),
            "proxy factory created"
        );
        Ok(Self {
            contract: Arc::new(contract),
            mappings: Arc::new(mappings),
            callback_uri: None,
        })
    }

    /// Address at which targets of a bidirectional contract call this client back.
    pub fn with_callback_uri(mut self, uri: impl Into<String>) -> Self {
        self.callback_uri = Some(Arc::from(uri.into()));
        self
    }

    pub fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    /// Proxy for a stateless client.
    ///
    /// Fails with [`WireError::MissingCallbackUri`] when the contract is bidirectional and no
    /// callback uri was configured.
    pub fn create_proxy(&self) -> Result<Proxy, WireError> {
        self.proxy(None)
    }

    /// Proxy whose callbacks are correlated to one client instance.
    pub fn create_stateful_proxy(
        &self,
        correlation_id: impl Into<String>,
    ) -> Result<Proxy, WireError> {
        self.proxy(Some(correlation_id.into()))
    }

    fn proxy(&self, correlation_id: Option<String>) -> Result<Proxy, WireError> {
        let callback_uri = match (&self.callback_uri, self.contract.is_bidirectional()) {
            (_, false) => None,
            (Some(uri), true) => Some(uri.clone()),
            (None, true) => {
                return Err(WireError::MissingCallbackUri(
                    self.contract.name().to_string(),
                ))
            }
        };
        Ok(Proxy {
            mappings: self.mappings.clone(),
            callback_uri,
            correlation_id,
        })
    }
}

#[derive(Clone)]
pub struct Proxy {
    mappings: Arc<ChainMap>,
    callback_uri: Option<Arc<str>>,
    correlation_id: Option<String>,
}

impl Proxy {
    /// Invokes `method` with the argument tuple `args` on behalf of the request owning `ctx`.
    ///
    /// The chain sees a copy of `ctx`; for bidirectional contracts a [`CallFrame`] addressing
    /// this client is pushed on that copy, so the caller's stack is left untouched whatever
    /// happens downstream.
    pub async fn invoke<A, R>(
        &self,
        ctx: &WorkContext,
        method: &str,
        args: A,
    ) -> Result<R, InvocationError>
    where
        A: Any + Send,
        R: Any,
    {
        let chain = self
            .mappings
            .get(method)
            .ok_or_else(|| InvocationError::UnknownMethod(method.to_string()))?;
        let mut ctx = ctx.clone();
        if let Some(uri) = &self.callback_uri {
            ctx.add_call_frame(CallFrame::new(uri.as_ref(), self.correlation_id.clone()));
        }
        dispatch(chain, method, ctx, args).await
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::executor::block_on;

    use super::*;
    use crate::wire::{Interceptor, Next, Operation};

    /// Terminal link answering with the number of frames on the incoming stack,
    /// or faulting on an empty name.
    struct Upload {
        seen: Arc<Mutex<Vec<WorkContext>>>,
    }

    impl Interceptor for Upload {
        async fn invoke(&self, mut msg: Message, _next: Next<'_>) -> Message {
            let ctx = msg.work_context().cloned().unwrap_or_default();
            let frames = ctx.call_stack().len();
            self.seen.lock().unwrap().push(ctx);
            match msg.take_body::<(String, Vec<u8>)>() {
                Some((name, _)) if name.is_empty() => {
                    msg.set_body_with_fault(anyhow::anyhow!("empty file name"))
                }
                Some(_) => msg.set_body(frames),
                None => msg.set_body_with_fault(anyhow::anyhow!("bad arguments")),
            }
            msg
        }

        fn is_terminal(&self) -> bool {
            true
        }
    }

    fn uploader() -> ServiceContract {
        ServiceContract::new("Uploader").method(Method::new("upload", ["String", "Vec<u8>"]))
    }

    fn wire(seen: &Arc<Mutex<Vec<WorkContext>>>, params: &[&str]) -> Wire {
        let chain = InvocationChain::builder(Operation::new("upload", params.iter().copied()))
            .add(Upload { seen: seen.clone() })
            .build()
            .unwrap();
        Wire::builder("client->uploader").chain(chain).build().unwrap()
    }

    #[test]
    fn test_missing_method_fails_at_creation() {
        let seen = Default::default();
        let err = ProxyFactory::new(uploader(), &wire(&seen, &["String"]))
            .err()
            .unwrap();
        assert_eq!(
            WireError::NoMethodForOperation {
                contract: "Uploader".to_string(),
                operation: "upload(String)".to_string(),
            },
            err
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invoke_returns_body_or_fault() {
        let seen = Default::default();
        let factory = ProxyFactory::new(uploader(), &wire(&seen, &["String", "Vec<u8>"])).unwrap();
        let proxy = factory.create_proxy().unwrap();
        assert_eq!(vec!["upload"], proxy.methods().collect::<Vec<_>>());

        let mut ctx = WorkContext::new();
        ctx.set_header("tenant", "acme".to_string());
        let frames: usize = block_on(proxy.invoke(
            &ctx,
            "upload",
            ("report.csv".to_string(), b"a,b".to_vec()),
        ))
        .unwrap();
        assert_eq!(0, frames);
        assert_eq!(
            Some(&"acme".to_string()),
            seen.lock().unwrap()[0].header::<String>("tenant").unwrap()
        );

        let args = (String::new(), Vec::<u8>::new());
        let err = block_on(proxy.invoke::<_, usize>(&ctx, "upload", args)).unwrap_err();
        assert_eq!("empty file name", err.fault().unwrap().to_string());

        let err = block_on(proxy.invoke::<_, usize>(&ctx, "download", ())).unwrap_err();
        assert!(matches!(err, InvocationError::UnknownMethod(m) if m == "download"));

        let args = ("a".to_string(), Vec::<u8>::new());
        let err = block_on(proxy.invoke::<_, String>(&ctx, "upload", args)).unwrap_err();
        assert!(matches!(err, InvocationError::UnexpectedReturn(_)));
    }

    #[test]
    fn test_bidirectional_proxy_pushes_frame_on_copy() {
        let seen: Arc<Mutex<Vec<WorkContext>>> = Default::default();
        let contract = uploader().with_callback(
            ServiceContract::new("UploadListener").method(Method::new("on_stored", ["String"])),
        );
        let factory = ProxyFactory::new(contract, &wire(&seen, &["String", "Vec<u8>"]))
            .unwrap()
            .with_callback_uri("fabric://domain/client");
        let proxy = factory.create_stateful_proxy("instance-9").unwrap();

        let mut ctx = WorkContext::new();
        ctx.add_call_frame(CallFrame::stateless("fabric://domain/upstream"));
        let frames: usize = block_on(proxy.invoke(&ctx, "upload", ("a".to_string(), vec![1u8])))
            .unwrap();
        assert_eq!(2, frames);
        // the caller's stack is unchanged
        assert_eq!(1, ctx.call_stack().len());

        let seen = seen.lock().unwrap();
        let top = seen[0].peek_call_frame().unwrap();
        assert_eq!("fabric://domain/client", top.callback_uri());
        assert_eq!(Some("instance-9"), top.correlation_id());
    }

    #[test]
    fn test_bidirectional_proxy_requires_callback_uri() {
        let seen: Arc<Mutex<Vec<WorkContext>>> = Default::default();
        let contract = uploader().with_callback(
            ServiceContract::new("UploadListener").method(Method::new("on_stored", ["String"])),
        );
        let factory = ProxyFactory::new(contract, &wire(&seen, &["String", "Vec<u8>"])).unwrap();
        assert_eq!(
            Some(WireError::MissingCallbackUri("Uploader".to_string())),
            factory.create_proxy().err()
        );
        assert!(factory.create_stateful_proxy("instance-9").is_err());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unidirectional_proxy_ignores_callback_uri() {
        let seen: Arc<Mutex<Vec<WorkContext>>> = Default::default();
        let factory = ProxyFactory::new(uploader(), &wire(&seen, &["String", "Vec<u8>"]))
            .unwrap()
            .with_callback_uri("fabric://domain/client");
        let frames: usize = block_on(factory.create_proxy().unwrap().invoke(
            &WorkContext::new(),
            "upload",
            ("a".to_string(), Vec::<u8>::new()),
        ))
        .unwrap();
        assert_eq!(0, frames);
    }

    #[test]
    fn test_unit_return_for_empty_response() {
        let mut ret = Message::new();
        ret.clear_body();
        assert!(unwrap_response::<()>("noop", ret).is_ok());
        assert!(matches!(
            unwrap_response::<u8>("noop", Message::new()),
            Err(InvocationError::UnexpectedReturn(_))
        ));
    }
}
