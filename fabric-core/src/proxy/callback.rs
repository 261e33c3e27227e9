use std::{any::Any, collections::HashMap, sync::Arc};

use tracing::{debug, trace};

use super::{contract::ServiceContract, dispatch, map_operations, ChainMap};
use crate::{
    context::WorkContext,
    error::{InvocationError, WireError},
    wire::Wire,
};

/// Collects the callback wires of a service, one per client callback address.
pub struct CallbackProxyFactory {
    contract: ServiceContract,
    wires: HashMap<String, ChainMap>,
}

impl CallbackProxyFactory {
    pub fn new(contract: ServiceContract) -> Self {
        Self {
            contract,
            wires: HashMap::new(),
        }
    }

    /// Registers the wire leading back to the client reachable at `callback_uri`.
    ///
    /// Fails like [`ProxyFactory::new`](super::ProxyFactory::new) when an operation of the
    /// wire has no method in the callback contract. Registering an address twice replaces the
    /// earlier wire.
    pub fn add_wire(
        &mut self,
        callback_uri: impl Into<String>,
        wire: &Wire,
    ) -> Result<(), WireError> {
        let callback_uri = callback_uri.into();
        let mappings = map_operations(&self.contract, wire)?;
        debug!(
            contract = self.contract.name(),
            callback_uri = %callback_uri,
            "callback wire registered"
        );
        self.wires.insert(callback_uri, mappings);
        Ok(())
    }

    pub fn callback_uris(&self) -> impl Iterator<Item = &str> {
        self.wires.keys().map(String::as_str)
    }

    pub fn create_proxy(&self) -> CallbackProxy {
        CallbackProxy {
            wires: Arc::new(self.wires.clone()),
        }
    }
}

/// Proxy a service uses to call back whichever client invoked it.
///
/// The target is chosen per invocation from the top [`CallFrame`](crate::context::CallFrame)
/// of the request's work context, so one proxy serves every client of the service.
#[derive(Clone)]
pub struct CallbackProxy {
    wires: Arc<HashMap<String, ChainMap>>,
}

impl CallbackProxy {
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
        let frame = ctx
            .peek_call_frame()
            .ok_or_else(|| InvocationError::NoCallFrame(method.to_string()))?;
        let chains = self
            .wires
            .get(frame.callback_uri())
            .ok_or_else(|| InvocationError::NoCallbackWire(frame.callback_uri().to_string()))?;
        let chain = chains
            .get(method)
            .ok_or_else(|| InvocationError::UnknownMethod(method.to_string()))?;
        trace!(method, frame = %frame, "routing callback");

        // the frame is consumed by the hop back to the client
        let mut ctx = ctx.clone();
        ctx.pop_call_frame();
        dispatch(chain, method, ctx, args).await
    }
}
