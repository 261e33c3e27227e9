use thiserror::Error;

pub type AnyError = anyhow::Error;
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Wiring errors. Raised while chains, wires and proxies are assembled, or carried
/// as a fault when a broken wire is invoked anyway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("no method found for operation {operation} on contract {contract}")]
    NoMethodForOperation { contract: String, operation: String },
    #[error("invocation chain for operation {0} is empty")]
    EmptyChain(String),
    #[error("invocation chain for operation {operation} ends with non-terminal interceptor {interceptor}")]
    UnterminatedChain {
        operation: String,
        interceptor: String,
    },
    #[error("duplicate chain for operation {0}")]
    DuplicateOperation(String),
    #[error("invocation chain for operation {0} is detached")]
    ChainDetached(String),
    #[error("invocation fell off the end of chain {0}")]
    EndOfChain(String),
    #[error("bidirectional contract {0} needs a callback uri")]
    MissingCallbackUri(String),
}

/// Errors surfaced to proxy clients.
#[derive(Error, Debug)]
pub enum InvocationError {
    /// The target (or the transport in front of it) answered with a fault.
    #[error("{0}")]
    Fault(AnyError),
    #[error("method {0} is not part of the proxied contract")]
    UnknownMethod(String),
    #[error("method {0} returned an unexpected body type")]
    UnexpectedReturn(String),
    #[error("no call frame on the current work context to route callback {0}")]
    NoCallFrame(String),
    #[error("no callback wire registered for {0}")]
    NoCallbackWire(String),
}

impl InvocationError {
    /// Returns the fault carried back from the target, if any.
    pub fn fault(&self) -> Option<&AnyError> {
        match self {
            InvocationError::Fault(e) => Some(e),
            _ => None,
        }
    }
}

/// Raised by transport interceptors when the remote side refused the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("service unavailable: {0}")]
pub struct ServiceUnavailable(pub String);

/// Errors of the worker pool.
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("job rejected: work queue is full")]
    Rejected,
    #[error("job discarded before completion")]
    Discarded,
    #[error("worker pool is shut down")]
    Shutdown,
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}
