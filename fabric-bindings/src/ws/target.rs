use std::future::Future;

use bytes::Bytes;
use fabric_core::{
    config::TransportOptions,
    context::codec,
    message::Message,
    wire::{Interceptor, Next},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CALLFRAMES_HEADER;

/// An outbound SOAP call.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    pub operation: String,
    pub headers: Vec<(String, String)>,
    pub payload: Bytes,
}

impl SoapRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SoapError {
    /// The request may not have reached the service; retrying is safe.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// The service processed the request and answered with a fault.
    #[error("soap fault {code}: {reason}")]
    Fault { code: String, reason: String },
}

impl SoapError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SoapError::Transport(_))
    }
}

/// Sends SOAP envelopes to a remote endpoint.
pub trait SoapTransport: Send + Sync + 'static {
    fn send(
        &self,
        endpoint: &str,
        request: &SoapRequest,
        options: &TransportOptions,
    ) -> impl Future<Output = Result<Bytes, SoapError>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsTargetConfig {
    pub endpoint: String,
    /// Additional attempts after a failed transport call.
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub transport: TransportOptions,
}

#[derive(thiserror::Error, Debug)]
pub enum WsTargetError {
    #[error("web service operation {0} expects a serialized payload argument")]
    Arguments(String),
    #[error("web service {endpoint} unavailable after {attempts} attempts: {source}")]
    Unavailable {
        endpoint: String,
        attempts: u32,
        #[source]
        source: SoapError,
    },
}

/// Terminal link invoking a remote web service.
///
/// The body is a `(Bytes,)` tuple holding the serialized payload; the reply payload replaces
/// it. The caller's call frames travel in the [`CALLFRAMES_HEADER`] header. Transport errors
/// are retried up to `retries` more times; SOAP faults are returned at once.
pub struct WsTargetInterceptor<T> {
    config: WsTargetConfig,
    transport: T,
}

impl<T: SoapTransport> WsTargetInterceptor<T> {
    pub fn new(config: WsTargetConfig, transport: T) -> Self {
        Self { config, transport }
    }

    fn request(
        &self,
        operation: &str,
        msg: &Message,
        payload: Bytes,
    ) -> Result<SoapRequest, codec::FrameCodecError> {
        let mut headers = Vec::new();
        if let Some(ctx) = msg.work_context() {
            if !ctx.call_stack().is_empty() {
                headers.push((
                    CALLFRAMES_HEADER.to_string(),
                    codec::serialize_to_string(ctx.call_stack())?,
                ));
            }
        }
        Ok(SoapRequest {
            operation: operation.to_string(),
            headers,
            payload,
        })
    }
}

impl<T: SoapTransport> Interceptor for WsTargetInterceptor<T> {
    async fn invoke(&self, mut msg: Message, next: Next<'_>) -> Message {
        let operation = next.operation();
        let Some((payload,)) = msg.take_body::<(Bytes,)>() else {
            msg.set_body_with_fault(WsTargetError::Arguments(operation.to_string()));
            return msg;
        };
        let request = match self.request(operation, &msg, payload) {
            Ok(request) => request,
            Err(e) => {
                msg.set_body_with_fault(e);
                return msg;
            }
        };

        let endpoint = self.config.endpoint.as_str();
        let mut attempts = 0;
        let result: Result<Bytes, anyhow::Error> = loop {
            attempts += 1;
            match self
                .transport
                .send(endpoint, &request, &self.config.transport)
                .await
            {
                Err(e) if e.is_retryable() && attempts <= self.config.retries => {
                    warn!(
                        endpoint,
                        operation, attempts, "web service call failed, retrying: {e}"
                    );
                }
                Err(e) if e.is_retryable() => {
                    break Err(WsTargetError::Unavailable {
                        endpoint: endpoint.to_string(),
                        attempts,
                        source: e,
                    }
                    .into());
                }
                other => break other.map_err(anyhow::Error::from),
            }
        };
        match result {
            Ok(reply) => {
                debug!(endpoint, operation, attempts, "web service call complete");
                msg.set_body(reply);
            }
            Err(e) => msg.set_body_with_fault(e),
        }
        msg
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "ws-target"
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use fabric_core::{
        context::{CallFrame, WorkContext},
        wire::{InvocationChain, Operation},
    };
    use futures::executor::block_on;

    use super::*;
    use crate::ws::restore_call_frames;

    /// Fails the first `failures` calls with the given error kind, then echoes the payload.
    struct Flaky {
        failures: usize,
        fault: bool,
        requests: Arc<Mutex<Vec<SoapRequest>>>,
    }

    impl SoapTransport for Flaky {
        async fn send(
            &self,
            _endpoint: &str,
            request: &SoapRequest,
            _options: &TransportOptions,
        ) -> Result<Bytes, SoapError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            if self.fault {
                return Err(SoapError::Fault {
                    code: "soap:Server".to_string(),
                    reason: "quota exceeded".to_string(),
                });
            }
            if requests.len() <= self.failures {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
            }
            Ok(request.payload.clone())
        }
    }

    fn ws_chain(
        retries: u32,
        failures: usize,
        fault: bool,
    ) -> (InvocationChain, Arc<Mutex<Vec<SoapRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let config = WsTargetConfig {
            endpoint: "http://quotes.example/ws".to_string(),
            retries,
            transport: TransportOptions::default(),
        };
        let chain = InvocationChain::builder(Operation::new("quote", ["Bytes"]))
            .add(WsTargetInterceptor::new(
                config,
                Flaky {
                    failures,
                    fault,
                    requests: requests.clone(),
                },
            ))
            .build()
            .unwrap();
        (chain, requests)
    }

    fn request() -> Message {
        let mut ctx = WorkContext::new();
        ctx.add_call_frame(CallFrame::new("fabric://domain/a", Some("c1".to_string())));
        ctx.add_call_frame(CallFrame::stateless("fabric://domain/b"));
        let mut msg = Message::with_body((Bytes::from_static(b"<quote/>"),));
        msg.set_work_context(ctx);
        msg
    }

    #[test]
    fn test_retries_transport_failures() {
        let (chain, requests) = ws_chain(2, 2, false);
        let mut ret = block_on(chain.invoke(request()));
        assert_eq!(Some(Bytes::from_static(b"<quote/>")), ret.take_body::<Bytes>());
        assert_eq!(3, requests.lock().unwrap().len());

        let (chain, requests) = ws_chain(1, 2, false);
        let ret = block_on(chain.invoke(request()));
        assert!(matches!(
            ret.fault().unwrap().downcast_ref::<WsTargetError>(),
            Some(WsTargetError::Unavailable { attempts: 2, .. })
        ));
        assert_eq!(2, requests.lock().unwrap().len());
    }

    #[test]
    fn test_soap_fault_is_not_retried() {
        let (chain, requests) = ws_chain(3, 0, true);
        let ret = block_on(chain.invoke(request()));
        assert!(matches!(
            ret.fault().unwrap().downcast_ref::<SoapError>(),
            Some(SoapError::Fault { reason, .. }) if reason == "quota exceeded"
        ));
        assert_eq!(1, requests.lock().unwrap().len());
    }

    #[test]
    fn test_call_frames_cross_the_wire() {
        let (chain, requests) = ws_chain(0, 0, false);
        let sent = request().work_context().unwrap().call_stack().to_vec();
        assert!(!block_on(chain.invoke(request())).is_fault());

        let requests = requests.lock().unwrap();
        let header = requests[0].header(CALLFRAMES_HEADER).unwrap();
        assert_eq!("c1,fabric://domain/a,,fabric://domain/b,", header);

        let mut inbound = WorkContext::new();
        restore_call_frames(&mut inbound, header).unwrap();
        assert_eq!(sent, inbound.call_stack());
        assert_eq!(
            "fabric://domain/b",
            inbound.peek_call_frame().unwrap().callback_uri()
        );
    }
}
