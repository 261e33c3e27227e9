//! Core of the fabric invocation runtime: work contexts and call frames, messages,
//! interceptor chains and wires, proxies, and the worker threads that run invocations.
mod error;
pub use error::{
    AnyError, AnyResult, ExecuteError, InvocationError, ServiceUnavailable, WireError,
};

pub mod affinity;
pub mod config;
pub mod context;
pub mod message;
pub mod orchestrator;
pub mod proxy;
pub mod wire;
