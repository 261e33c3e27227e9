//! Wires and their per-operation interceptor chains.
//!
//! A [`Wire`] binds a client of a service contract to its implementation. It owns one
//! [`InvocationChain`] per contract operation; each chain is an ordered, immutable vector of
//! [`Interceptor`]s built once when the wire is attached.
//!
//! # Lifecycle
//!
//! 1. Build: interceptors are added in invocation order through [`ChainBuilder`], chains are
//!    collected by [`WireBuilder`]. Empty chains, chains not ending in a terminal interceptor
//!    and duplicate operations are rejected here.
//! 2. Invoke: chains are shared read-only between threads, no locking happens per call.
//! 3. Detach: [`Wire::detach`] marks every chain detached. Invoking a detached chain is a
//!    programming error; it answers with a [`WireError::ChainDetached`] fault.
use std::collections::HashSet;

use tracing::info;

pub use self::{
    chain::{ChainBuilder, InvocationChain},
    interceptor::{Interceptor, Next},
    operation::Operation,
};
use crate::error::WireError;

pub(crate) mod chain;
mod interceptor;
mod operation;

#[derive(Debug, Clone)]
pub struct Wire {
    name: String,
    chains: Vec<InvocationChain>,
}

impl Wire {
    pub fn builder(name: impl Into<String>) -> WireBuilder {
        WireBuilder {
            name: name.into(),
            chains: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chains(&self) -> &[InvocationChain] {
        &self.chains
    }

    /// Chain serving the operation called `name`.
    pub fn chain(&self, name: &str) -> Option<&InvocationChain> {
        self.chains.iter().find(|c| c.operation().name() == name)
    }

    pub fn is_attached(&self) -> bool {
        self.chains.iter().all(InvocationChain::is_attached)
    }

    /// Detaches every chain. Calling it again has no effect.
    pub fn detach(&self) {
        let detached = self.chains.iter().filter(|c| c.detach()).count();
        if detached > 0 {
            info!(wire = %self.name, chains = detached, "wire detached");
        }
    }
}

pub struct WireBuilder {
    name: String,
    chains: Vec<InvocationChain>,
}

impl WireBuilder {
    pub fn chain(mut self, chain: InvocationChain) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn build(self) -> Result<Wire, WireError> {
        let mut seen = HashSet::with_capacity(self.chains.len());
        for chain in self.chains.iter() {
            if !seen.insert(chain.operation().name()) {
                return Err(WireError::DuplicateOperation(
                    chain.operation().name().to_string(),
                ));
            }
        }
        info!(wire = %self.name, chains = self.chains.len(), "wire attached");
        Ok(Wire {
            name: self.name,
            chains: self.chains,
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::{chain::tests::Echo, *};
    use crate::message::Message;

    fn echo_chain(name: &str) -> InvocationChain {
        InvocationChain::builder(Operation::new(name, ["&str"]))
            .add(Echo)
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_and_detach() {
        let wire = Wire::builder("client->echo")
            .chain(echo_chain("echo"))
            .chain(echo_chain("shout"))
            .build()
            .unwrap();
        assert_eq!(2, wire.chains().len());
        assert!(wire.chain("shout").is_some());
        assert!(wire.chain("whisper").is_none());
        assert!(wire.is_attached());

        let chain = wire.chain("echo").unwrap().clone();
        assert!(!block_on(chain.invoke(Message::with_body("hi"))).is_fault());

        wire.detach();
        wire.detach();
        assert!(!wire.is_attached());
        assert!(block_on(chain.invoke(Message::with_body("hi"))).is_fault());
    }

    #[test]
    fn test_duplicate_operation() {
        let err = Wire::builder("dup")
            .chain(echo_chain("echo"))
            .chain(echo_chain("echo"))
            .build()
            .unwrap_err();
        assert_eq!(WireError::DuplicateOperation("echo".to_string()), err);
    }
}
