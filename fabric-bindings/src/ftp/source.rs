use std::fmt;

use bytes::Bytes;
use fabric_core::{affinity::AffinityCache, context::CONTENT_TYPE_HEADER, message::Message, AnyError};
use service_async::Service;
use tracing::{debug, warn};

/// A file received by an FTP server, ready to be handed to a wire.
#[derive(Debug, Clone)]
pub struct FtpUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// The reply an FTP server sends once the upload has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    pub text: String,
}

impl FtpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

impl fmt::Display for FtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// Entry point of inbound FTP uploads.
///
/// Every upload starts a new request on the calling thread's [`AffinityCache`], so nothing of
/// a previous request is visible to it. The upload becomes a `(file name, data)` message with
/// the content type as a work context header and is sent to the wrapped service, usually the
/// head of an [`InvocationChain`](fabric_core::wire::InvocationChain). A fault (or service
/// error) is answered with `451`, success with `226`.
pub struct FtpUploadDispatcher<S> {
    inner: S,
    cache: AffinityCache,
}

impl<S> FtpUploadDispatcher<S> {
    pub fn new(inner: S, cache: AffinityCache) -> Self {
        Self { inner, cache }
    }
}

impl<S> Service<FtpUpload> for FtpUploadDispatcher<S>
where
    S: Service<Message, Response = Message>,
    S::Error: Into<AnyError>,
{
    type Response = FtpReply;
    type Error = std::convert::Infallible;

    async fn call(&self, upload: FtpUpload) -> Result<Self::Response, Self::Error> {
        let scope = self.cache.begin_request();
        let mut msg = scope.message();
        if let (Some(ctx), Some(content_type)) = (msg.work_context_mut(), upload.content_type) {
            ctx.set_header(CONTENT_TYPE_HEADER, content_type);
        }
        let file_name = upload.file_name;
        msg.set_body((file_name.clone(), upload.data));

        let fault = match self.inner.call(msg).await {
            Ok(mut ret) => {
                let fault = ret.take_fault();
                scope.finish(ret);
                fault
            }
            Err(e) => Some(e.into()),
        };
        Ok(match fault {
            None => {
                debug!(file_name, "upload dispatched");
                FtpReply {
                    code: 226,
                    text: "Transfer complete.".to_string(),
                }
            }
            Some(fault) => {
                warn!(file_name, "upload failed: {fault:#}");
                FtpReply {
                    code: 451,
                    text: format!("Requested action aborted: {fault}"),
                }
            }
        })
    }
}
