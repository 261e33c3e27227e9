//! Preconstructed wires and clients.

use std::path::Path;

use fabric_bindings::ftp::{target_wire, FtpTargetConfig, FtpUploadClient, TcpFtpConnector};
use tracing::debug;

/// Create an upload client for the named FTP target, wired through logging to the FTP link.
pub fn ftp_upload_client(name: &str, config: FtpTargetConfig) -> anyhow::Result<FtpUploadClient> {
    let address = config.address;
    let wire = target_wire(name, config, TcpFtpConnector)?;
    debug!(wire = name, %address, "ftp target wired");
    Ok(FtpUploadClient::new(&wire)?)
}

/// Content type announced for a local file, guessed from its extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("txt" | "log") => "text/plain",
        Some("csv") => "text/csv",
        Some("xml") => "text/xml",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
