mod invoker;
mod logging;

pub use invoker::{DispatchError, InvokerInterceptor};
pub use logging::LoggingInterceptor;
