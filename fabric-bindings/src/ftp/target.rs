use bytes::Bytes;
use fabric_core::{
    context::CONTENT_TYPE_HEADER,
    message::Message,
    wire::{Interceptor, Next},
    AnyError, ServiceUnavailable,
};
use tracing::{debug, info, warn};

use super::{
    client::{FileType, FtpConnector, FtpError, FtpSession, TransferMode},
    config::FtpTargetConfig,
};

#[derive(thiserror::Error, Debug)]
pub enum FtpTargetError {
    #[error("ftp upload expects a (file name, data) argument tuple")]
    Arguments,
    #[error("ftp {step} failed: {source}")]
    Transport {
        step: &'static str,
        #[source]
        source: FtpError,
    },
}

fn step(step: &'static str) -> impl FnOnce(FtpError) -> FtpTargetError {
    move |source| FtpTargetError::Transport { step, source }
}

/// Terminal link storing the uploaded file on an FTP server.
///
/// The message body must be a `(String, Bytes)` tuple of file name and content. Each
/// invocation opens its own control connection and closes it before returning; nothing is
/// retried. On success the body is cleared, on failure it carries the fault.
pub struct FtpTargetInterceptor<C> {
    config: FtpTargetConfig,
    connector: C,
}

impl<C: FtpConnector> FtpTargetInterceptor<C> {
    pub fn new(config: FtpTargetConfig, connector: C) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &FtpTargetConfig {
        &self.config
    }

    async fn upload(
        &self,
        file_name: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), AnyError> {
        let config = &self.config;
        let mut session = self
            .connector
            .connect(config.address, &config.transport)
            .await
            .map_err(step("connect"))?;
        let result = self.transfer(&mut session, file_name, data, content_type).await;
        if let Err(e) = session.quit().await {
            debug!("ftp quit failed: {e}");
        }
        result
    }

    async fn transfer(
        &self,
        session: &mut C::Session,
        file_name: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), AnyError> {
        let config = &self.config;
        if let Some(file_type) = content_type.and_then(FileType::from_content_type) {
            session
                .set_file_type(file_type)
                .await
                .map_err(step("type"))?;
        }

        let user = config.login_user();
        if !session
            .login(user, &config.password)
            .await
            .map_err(step("login"))?
        {
            let reply = session.last_reply().to_string();
            if config.strict_login {
                return Err(step("login")(FtpError::LoginRejected(reply)).into());
            }
            warn!(user, "ftp login rejected, continuing: {reply}");
        }

        session.set_transfer_mode(if config.active {
            TransferMode::Active
        } else {
            TransferMode::Passive
        });
        for command in config.commands.iter() {
            let reply = session
                .send_command(command)
                .await
                .map_err(step("command"))?;
            debug!(command, "ftp command: {}", reply.line());
        }

        let remote_file = config.remote_file(file_name);
        let (upload_file, rename) = config.upload_file(&remote_file);
        let size = data.len();
        if !session
            .store(&upload_file, data)
            .await
            .map_err(step("store"))?
        {
            return Err(ServiceUnavailable(format!(
                "unable to upload data, server replied: {}, remote file location: {remote_file}",
                session.last_reply()
            ))
            .into());
        }
        // not atomic: a crash here leaves the temporary file behind
        if rename
            && !session
                .rename(&upload_file, &remote_file)
                .await
                .map_err(step("rename"))?
        {
            return Err(ServiceUnavailable(format!(
                "unable to rename {upload_file} to {remote_file}, server replied: {}",
                session.last_reply()
            ))
            .into());
        }
        info!(remote_file, size, "ftp upload complete");
        Ok(())
    }
}

impl<C: FtpConnector> Interceptor for FtpTargetInterceptor<C> {
    async fn invoke(&self, mut msg: Message, _next: Next<'_>) -> Message {
        let Some((file_name, data)) = msg.take_body::<(String, Bytes)>() else {
            msg.set_body_with_fault(FtpTargetError::Arguments);
            return msg;
        };
        let content_type = msg
            .work_context()
            .map(|ctx| ctx.header::<String>(CONTENT_TYPE_HEADER).map(Option::<&String>::cloned))
            .transpose();
        let content_type = match content_type {
            Ok(content_type) => content_type.flatten(),
            Err(e) => {
                warn!(file_name, "ftp upload not attempted: {e}");
                msg.set_body_with_fault(e);
                return msg;
            }
        };

        match self
            .upload(&file_name, data, content_type.as_deref())
            .await
        {
            Ok(()) => msg.clear_body(),
            Err(e) => {
                warn!(file_name, "ftp upload failed: {e:#}");
                msg.set_body_with_fault(e);
            }
        }
        msg
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "ftp-target"
    }
}
