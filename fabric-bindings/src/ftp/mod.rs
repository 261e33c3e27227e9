//! FTP binding.
//!
//! The target side stores files on a remote FTP server: [`FtpTargetInterceptor`] is the terminal
//! link of the `upload(String, Bytes)` operation and talks to the server through an
//! [`FtpConnector`], normally [`TcpFtpConnector`]. The source side, [`FtpUploadDispatcher`],
//! turns files received by an FTP server into messages sent down a wire.
use bytes::Bytes;
use fabric_core::{
    context::WorkContext,
    proxy::{Method, Proxy, ProxyFactory, ServiceContract},
    wire::{InvocationChain, Operation, Wire},
    InvocationError, WireError,
};

pub use self::{
    client::{
        FileType, FtpConnector, FtpError, FtpSession, Reply, TcpFtpConnector, TcpFtpSession,
        TransferMode,
    },
    config::FtpTargetConfig,
    source::{FtpReply, FtpUpload, FtpUploadDispatcher},
    target::{FtpTargetError, FtpTargetInterceptor},
};
use crate::common::LoggingInterceptor;

mod client;
mod config;
mod source;
mod target;

pub const UPLOAD: &str = "upload";
const UPLOAD_PARAMS: [&str; 2] = ["String", "Bytes"];

pub fn upload_operation() -> Operation {
    Operation::new(UPLOAD, UPLOAD_PARAMS)
}

/// Contract implemented by FTP upload targets.
pub fn upload_contract() -> ServiceContract {
    ServiceContract::new("FtpUpload").method(Method::new(UPLOAD, UPLOAD_PARAMS))
}

/// A wire whose `upload` chain logs and then stores through `connector`.
pub fn target_wire<C: FtpConnector>(
    name: impl Into<String>,
    config: FtpTargetConfig,
    connector: C,
) -> Result<Wire, WireError> {
    let name = name.into();
    let chain = InvocationChain::builder(upload_operation())
        .add(LoggingInterceptor::new(name.clone()))
        .add(FtpTargetInterceptor::new(config, connector))
        .build()?;
    Wire::builder(name).chain(chain).build()
}

/// Typed client of the upload contract.
#[derive(Clone)]
pub struct FtpUploadClient {
    proxy: Proxy,
}

impl FtpUploadClient {
    pub fn new(wire: &Wire) -> Result<Self, WireError> {
        let factory = ProxyFactory::new(upload_contract(), wire)?;
        Ok(Self {
            proxy: factory.create_proxy()?,
        })
    }

    pub async fn upload(
        &self,
        ctx: &WorkContext,
        file_name: impl Into<String>,
        data: Bytes,
    ) -> Result<(), InvocationError> {
        self.proxy
            .invoke(ctx, UPLOAD, (file_name.into(), data))
            .await
    }
}
