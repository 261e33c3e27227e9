use std::net::SocketAddr;

use fabric_core::{config::TransportOptions, define_const};
use serde::{Deserialize, Serialize};

define_const!(default_user, String::new(), String);

/// Configuration of an FTP target binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpTargetConfig {
    pub address: SocketAddr,
    /// Directory uploads are stored under; the file name is appended to it.
    #[serde(default)]
    pub remote_path: Option<String>,
    /// When set, data is stored under `name + suffix` first and renamed once complete.
    #[serde(default)]
    pub tmp_file_suffix: Option<String>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub active: bool,
    /// Raw commands sent after login, in order.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Fault the invocation when the server rejects the login.
    #[serde(default)]
    pub strict_login: bool,
    #[serde(default)]
    pub transport: TransportOptions,
}

impl FtpTargetConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            remote_path: None,
            tmp_file_suffix: None,
            user: default_user(),
            password: String::new(),
            active: false,
            commands: Vec::new(),
            strict_login: false,
            transport: TransportOptions::default(),
        }
    }

    /// User name sent on login, `anonymous` when none is configured.
    pub fn login_user(&self) -> &str {
        if self.user.is_empty() {
            "anonymous"
        } else {
            &self.user
        }
    }

    /// Final location of `file_name` on the server.
    pub fn remote_file(&self, file_name: &str) -> String {
        match self.remote_path.as_deref() {
            Some(dir) if !dir.is_empty() => {
                if dir.ends_with('/') {
                    format!("{dir}{file_name}")
                } else {
                    format!("{dir}/{file_name}")
                }
            }
            _ => file_name.to_string(),
        }
    }

    /// Location data is written to during the transfer, and whether a rename must follow.
    pub fn upload_file(&self, remote_file: &str) -> (String, bool) {
        match self.tmp_file_suffix.as_deref() {
            Some(suffix) if !suffix.is_empty() => (format!("{remote_file}{suffix}"), true),
            _ => (remote_file.to_string(), false),
        }
    }
}
