use std::{num::NonZeroUsize, path::Path, time::Duration};

use anyhow::bail;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

// MAX configuration file size: 16 MB
const MAX_CONFIG_FILE_SIZE: usize = 16 * 1024 * 1024;
// Read buffer size: 8 KB
const READ_BUFFER_SIZE: usize = 8 * 1024;
// Default iouring/epoll entries: 32k
const DEFAULT_ENTRIES: u32 = 32768;
// Default pending jobs per worker
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
// Default data transfer chunk: 64 KB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub const FALLBACK_PARALLELISM: NonZeroUsize = match NonZeroUsize::new(1) {
    Some(n) => n,
    None => unreachable!(),
};

#[macro_export]
macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        const fn $name() -> $type {
            $val
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_workers")]
    pub worker_threads: usize,
    #[serde(default = "default_entries")]
    pub entries: u32,
    #[serde(default)]
    pub runtime_type: RuntimeType,
    #[serde(default = "default_cpu_affinity")]
    pub cpu_affinity: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub rejection_policy: RejectionPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: default_workers(),
            entries: default_entries(),
            runtime_type: Default::default(),
            cpu_affinity: default_cpu_affinity(),
            queue_capacity: default_queue_capacity(),
            rejection_policy: Default::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .unwrap_or(FALLBACK_PARALLELISM)
        .into()
}

define_const!(default_entries, DEFAULT_ENTRIES, u32);
define_const!(default_cpu_affinity, false, bool);
define_const!(default_queue_capacity, DEFAULT_QUEUE_CAPACITY, usize);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    #[cfg(target_os = "linux")]
    IoUring,
    Legacy,
}

impl Default for RuntimeType {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::IoUring
    }
    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Legacy
    }
}

/// What a worker pool does with a job submitted while its queue is full.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Run the job on the submitting thread.
    #[default]
    CallerRuns,
    /// Fail the submission.
    Abort,
    /// Silently drop the new job.
    Discard,
    /// Drop the oldest queued job and enqueue the new one.
    DiscardOldest,
}

/// Connection settings shared by transport bindings.
///
/// Every field is optional and independently settable. Timeouts are in milliseconds; absent or
/// `0` means no timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TransportOptions {
    #[serde(default, rename = "connect_timeout_ms")]
    connect_timeout: Option<u64>,
    #[serde(default, rename = "socket_timeout_ms")]
    socket_timeout: Option<u64>,
    #[serde(default)]
    chunk_size: Option<usize>,
}

impl TransportOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        millis(self.socket_timeout)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CHUNK_SIZE)
    }
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|&ms| ms > 0).map(Duration::from_millis)
}

/// Parses `content` as JSON when its first non-blank byte is `{`, as TOML otherwise.
pub fn from_slice<T: DeserializeOwned>(content: &[u8]) -> anyhow::Result<T> {
    // read first non-space u8
    let is_json = match content
        .iter()
        .find(|&&b| b != b' ' && b != b'\r' && b != b'\n' && b != b'\t')
    {
        Some(first) => *first == b'{',
        None => false,
    };
    match is_json {
        true => serde_json::from_slice::<T>(content).map_err(Into::into),
        false => toml::from_str::<T>(&String::from_utf8_lossy(content)).map_err(Into::into),
    }
}

pub async fn read_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<u8>> {
    read_to_end(path, MAX_CONFIG_FILE_SIZE).await
}

/// Reads the whole file at `path`, failing once it grows past `limit` bytes.
pub async fn read_to_end(path: impl AsRef<Path>, limit: usize) -> anyhow::Result<Vec<u8>> {
    let path = path.as_ref();
    let file = match monoio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => bail!("error open file {}: {:?}", path.display(), e),
    };

    let mut data = Vec::new();
    let mut buffer = Vec::with_capacity(READ_BUFFER_SIZE);

    loop {
        let (res, buf) = file.read_at(buffer, data.len() as u64).await;
        let n = res?;
        buffer = buf;
        if n == 0 {
            break;
        }

        if data.len() + n > limit {
            bail!("{}: max file size: {}", path.display(), limit);
        }
        data.extend_from_slice(&buffer[..n]);
        buffer.clear();
    }

    Ok(data)
}
