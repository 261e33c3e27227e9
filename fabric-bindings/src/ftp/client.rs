use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use bytes::Bytes;
use fabric_core::config::TransportOptions;
use monoio::{
    io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, trace};

// Control channel read size: 1 KB
const READ_CHUNK: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum FtpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("connection closed by server")]
    Closed,
    #[error("malformed reply: {0:?}")]
    MalformedReply(String),
    #[error("unexpected reply to {command}: {reply}")]
    Unexpected { command: String, reply: String },
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("{0}")]
    Unsupported(&'static str),
}

/// A complete, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, line: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![line.into()],
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// The final line, code included.
    pub fn line(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Ascii,
    Binary,
}

impl FileType {
    /// Maps a MIME content type: `text/*` is transferred as ASCII, octet streams as binary.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let content_type = content_type.trim().to_ascii_lowercase();
        if content_type.starts_with("text/") {
            Some(FileType::Ascii)
        } else if content_type == "application/octet-stream" || content_type == "binary" {
            Some(FileType::Binary)
        } else {
            None
        }
    }

    fn command(self) -> &'static str {
        match self {
            FileType::Ascii => "TYPE A",
            FileType::Binary => "TYPE I",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Passive,
    Active,
}

/// Opens FTP control connections.
pub trait FtpConnector: Send + Sync + 'static {
    type Session: FtpSession;

    fn connect(
        &self,
        addr: SocketAddr,
        options: &TransportOptions,
    ) -> impl Future<Output = Result<Self::Session, FtpError>>;
}

/// One logged-in (or not) FTP control connection.
pub trait FtpSession {
    /// File type of subsequent transfers.
    fn set_file_type(&mut self, file_type: FileType)
        -> impl Future<Output = Result<(), FtpError>>;

    /// Returns whether the server accepted the credentials.
    fn login(&mut self, user: &str, password: &str) -> impl Future<Output = Result<bool, FtpError>>;

    fn set_transfer_mode(&mut self, mode: TransferMode);

    fn send_command(&mut self, command: &str) -> impl Future<Output = Result<Reply, FtpError>>;

    /// Returns `false` when the server refused or aborted the transfer.
    fn store(&mut self, path: &str, data: Bytes) -> impl Future<Output = Result<bool, FtpError>>;

    fn rename(&mut self, from: &str, to: &str) -> impl Future<Output = Result<bool, FtpError>>;

    /// Last reply line received on the control connection.
    fn last_reply(&self) -> &str;

    fn quit(&mut self) -> impl Future<Output = Result<(), FtpError>>;
}

/// [`FtpConnector`] over monoio TCP streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFtpConnector;

impl FtpConnector for TcpFtpConnector {
    type Session = TcpFtpSession;

    async fn connect(
        &self,
        addr: SocketAddr,
        options: &TransportOptions,
    ) -> Result<TcpFtpSession, FtpError> {
        let control = timed(options.connect_timeout(), "connect", TcpStream::connect(addr)).await??;
        let mut session = TcpFtpSession {
            control,
            pending: Vec::new(),
            options: *options,
            mode: TransferMode::default(),
            file_type: None,
            last_reply: String::new(),
        };
        let mut greeting = session.read_reply().await?;
        while greeting.is_preliminary() {
            greeting = session.read_reply().await?;
        }
        if !greeting.is_completion() {
            return Err(FtpError::Unexpected {
                command: "connect".to_string(),
                reply: greeting.line().to_string(),
            });
        }
        debug!(%addr, "ftp connected: {}", greeting.line());
        Ok(session)
    }
}

pub struct TcpFtpSession {
    control: TcpStream,
    pending: Vec<u8>,
    options: TransportOptions,
    mode: TransferMode,
    file_type: Option<FileType>,
    last_reply: String,
}

enum DataChannel {
    Connected(TcpStream),
    Listening(TcpListener),
}

impl TcpFtpSession {
    async fn read_line(&mut self) -> Result<String, FtpError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                return Ok(line.trim_end_matches(['\r', '\n']).to_string());
            }
            let buf = Vec::with_capacity(READ_CHUNK);
            let (res, buf) =
                timed(self.options.socket_timeout(), "read", self.control.read(buf)).await?;
            if res? == 0 {
                return Err(FtpError::Closed);
            }
            self.pending.extend_from_slice(&buf);
        }
    }

    async fn read_reply(&mut self) -> Result<Reply, FtpError> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let multiline = first.as_bytes().get(3) == Some(&b'-');
        let mut lines = vec![first];
        if multiline {
            let prefix = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                let done = line.starts_with(&prefix);
                lines.push(line);
                if done {
                    break;
                }
            }
        }
        let reply = Reply { code, lines };
        trace!("<- {}", reply.line());
        self.last_reply = reply.line().to_string();
        Ok(reply)
    }

    async fn command(&mut self, command: &str) -> Result<Reply, FtpError> {
        if command.starts_with("PASS ") {
            trace!("-> PASS ****");
        } else {
            trace!("-> {command}");
        }
        let line = format!("{command}\r\n").into_bytes();
        let (res, _) = timed(
            self.options.socket_timeout(),
            "write",
            self.control.write_all(line),
        )
        .await?;
        res?;
        self.read_reply().await
    }

    async fn expect_completion(&mut self, command: &str) -> Result<Reply, FtpError> {
        let reply = self.command(command).await?;
        if !reply.is_completion() {
            return Err(FtpError::Unexpected {
                command: command.to_string(),
                reply: reply.line().to_string(),
            });
        }
        Ok(reply)
    }

    async fn open_data_channel(&mut self) -> Result<DataChannel, FtpError> {
        match self.mode {
            TransferMode::Passive => {
                let reply = self.command("PASV").await?;
                if reply.code() != 227 {
                    return Err(FtpError::Unexpected {
                        command: "PASV".to_string(),
                        reply: reply.line().to_string(),
                    });
                }
                let addr = parse_pasv(reply.line())?;
                let stream = timed(
                    self.options.connect_timeout(),
                    "data connect",
                    TcpStream::connect(addr),
                )
                .await??;
                Ok(DataChannel::Connected(stream))
            }
            TransferMode::Active => {
                let local = self.control.local_addr()?;
                let IpAddr::V4(ip) = local.ip() else {
                    return Err(FtpError::Unsupported(
                        "active mode requires an IPv4 control connection",
                    ));
                };
                let listener = TcpListener::bind(SocketAddr::new(local.ip(), 0))?;
                let port = listener.local_addr()?.port();
                self.expect_completion(&port_command(ip, port)).await?;
                Ok(DataChannel::Listening(listener))
            }
        }
    }
}

impl FtpSession for TcpFtpSession {
    async fn set_file_type(&mut self, file_type: FileType) -> Result<(), FtpError> {
        // sent with the next transfer, servers refuse TYPE before login
        self.file_type = Some(file_type);
        Ok(())
    }

    async fn login(&mut self, user: &str, password: &str) -> Result<bool, FtpError> {
        let reply = self.command(&format!("USER {user}")).await?;
        if reply.is_completion() {
            return Ok(true);
        }
        if !reply.is_intermediate() {
            return Ok(false);
        }
        let reply = self.command(&format!("PASS {password}")).await?;
        Ok(reply.is_completion())
    }

    fn set_transfer_mode(&mut self, mode: TransferMode) {
        self.mode = mode;
    }

    async fn send_command(&mut self, command: &str) -> Result<Reply, FtpError> {
        self.command(command).await
    }

    async fn store(&mut self, path: &str, data: Bytes) -> Result<bool, FtpError> {
        if let Some(file_type) = self.file_type.take() {
            self.expect_completion(file_type.command()).await?;
        }
        let channel = self.open_data_channel().await?;
        let reply = self.command(&format!("STOR {path}")).await?;
        if !reply.is_preliminary() {
            return Ok(reply.is_completion());
        }

        let mut stream = match channel {
            DataChannel::Connected(stream) => stream,
            DataChannel::Listening(listener) => {
                timed(self.options.connect_timeout(), "accept", listener.accept())
                    .await??
                    .0
            }
        };
        let chunk_size = self.options.chunk_size();
        let mut offset = 0;
        while offset < data.len() {
            let end = data.len().min(offset + chunk_size);
            let (res, _) = timed(
                self.options.socket_timeout(),
                "data write",
                stream.write_all(data.slice(offset..end)),
            )
            .await?;
            res?;
            offset = end;
        }
        stream.shutdown().await?;
        drop(stream);

        let done = self.read_reply().await?;
        debug!(path, bytes = data.len(), "ftp store: {}", done.line());
        Ok(done.is_completion())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<bool, FtpError> {
        let reply = self.command(&format!("RNFR {from}")).await?;
        if !reply.is_intermediate() {
            return Ok(false);
        }
        let reply = self.command(&format!("RNTO {to}")).await?;
        Ok(reply.is_completion())
    }

    fn last_reply(&self) -> &str {
        &self.last_reply
    }

    async fn quit(&mut self) -> Result<(), FtpError> {
        let reply = self.command("QUIT").await;
        let _ = self.control.shutdown().await;
        reply.map(|_| ())
    }
}

async fn timed<F: Future>(
    limit: Option<Duration>,
    what: &'static str,
    fut: F,
) -> Result<F::Output, FtpError> {
    match limit {
        Some(limit) => monoio::time::timeout(limit, fut)
            .await
            .map_err(|_| FtpError::Timeout(what)),
        None => Ok(fut.await),
    }
}

fn parse_code(line: &str) -> Result<u16, FtpError> {
    let malformed = || FtpError::MalformedReply(line.to_string());
    let code = line
        .get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(malformed)?;
    match line.as_bytes().get(3) {
        None | Some(b' ') | Some(b'-') => Ok(code),
        _ => Err(malformed()),
    }
}

/// Data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv(line: &str) -> Result<SocketAddr, FtpError> {
    let malformed = || FtpError::MalformedReply(line.to_string());
    let start = line.find('(').ok_or_else(malformed)?;
    let end = line[start..].find(')').ok_or_else(malformed)? + start;
    let fields = line[start + 1..end]
        .split(',')
        .map(|f| f.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| malformed())?;
    let [h1, h2, h3, h4, p1, p2] = fields[..] else {
        return Err(malformed());
    };
    Ok(SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(h1, h2, h3, h4)),
        u16::from(p1) << 8 | u16::from(p2),
    ))
}

fn port_command(ip: Ipv4Addr, port: u16) -> String {
    let [h1, h2, h3, h4] = ip.octets();
    format!("PORT {h1},{h2},{h3},{h4},{},{}", port >> 8, port & 0xff)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        io::{BufRead, BufReader, Read, Write},
        net::{TcpListener as StdListener, TcpStream as StdStream},
        sync::{Arc, Mutex},
        thread::{self, JoinHandle},
    };

    use super::*;

    /// In-process FTP server on std sockets serving a single control connection.
    pub(crate) struct FakeServer {
        pub addr: SocketAddr,
        pub commands: Arc<Mutex<Vec<String>>>,
        pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        handle: Option<JoinHandle<()>>,
    }

    #[derive(Clone, Copy, Default)]
    pub(crate) struct Behavior {
        pub reject_login: bool,
        pub reject_store: bool,
    }

    impl FakeServer {
        pub(crate) fn start(behavior: Behavior) -> Self {
            let listener = StdListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let commands = Arc::new(Mutex::new(Vec::new()));
            let files = Arc::new(Mutex::new(HashMap::new()));
            let handle = {
                let (commands, files) = (commands.clone(), files.clone());
                thread::spawn(move || {
                    let (control, _) = listener.accept().unwrap();
                    serve(control, behavior, &commands, &files);
                })
            };
            FakeServer {
                addr,
                commands,
                files,
                handle: Some(handle),
            }
        }

        /// Waits for the session to end.
        pub(crate) fn join(&mut self) {
            if let Some(handle) = self.handle.take() {
                handle.join().unwrap();
            }
        }

        pub(crate) fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    fn serve(
        control: StdStream,
        behavior: Behavior,
        commands: &Mutex<Vec<String>>,
        files: &Mutex<HashMap<String, Vec<u8>>>,
    ) {
        let mut out = control.try_clone().unwrap();
        let mut reply = |line: &str| out.write_all(format!("{line}\r\n").as_bytes()).unwrap();
        reply("220-fake ftp server");
        reply("220 ready");

        let mut passive: Option<StdListener> = None;
        let mut active: Option<SocketAddr> = None;
        let mut rename_from = None;
        for line in BufReader::new(control).lines() {
            let Ok(line) = line else { break };
            commands.lock().unwrap().push(line.clone());
            let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            match verb {
                "USER" => reply("331 password required"),
                "PASS" if behavior.reject_login => reply("530 login incorrect"),
                "PASS" => reply("230 logged in"),
                "TYPE" => reply("200 type set"),
                "PASV" => {
                    let data = StdListener::bind("127.0.0.1:0").unwrap();
                    let port = data.local_addr().unwrap().port();
                    passive = Some(data);
                    reply(&format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port >> 8,
                        port & 0xff
                    ));
                }
                "PORT" => {
                    let f: Vec<u16> = arg.split(',').map(|f| f.parse().unwrap()).collect();
                    let ip = Ipv4Addr::new(f[0] as u8, f[1] as u8, f[2] as u8, f[3] as u8);
                    active = Some(SocketAddr::new(IpAddr::V4(ip), f[4] << 8 | f[5]));
                    reply("200 PORT command successful");
                }
                "STOR" if behavior.reject_store => reply("553 Could not create file."),
                "STOR" => {
                    reply("150 opening data connection");
                    let mut data = match (passive.take(), active.take()) {
                        (Some(listener), _) => listener.accept().unwrap().0,
                        (None, Some(addr)) => StdStream::connect(addr).unwrap(),
                        (None, None) => panic!("no data channel"),
                    };
                    let mut content = Vec::new();
                    data.read_to_end(&mut content).unwrap();
                    files.lock().unwrap().insert(arg.to_string(), content);
                    reply("226 Transfer complete");
                }
                "RNFR" => {
                    rename_from = Some(arg.to_string());
                    reply("350 ready for destination name");
                }
                "RNTO" => {
                    let mut files = files.lock().unwrap();
                    match rename_from.take().and_then(|from| files.remove(&from)) {
                        Some(content) => {
                            files.insert(arg.to_string(), content);
                            reply("250 rename successful");
                        }
                        None => reply("550 rename failed"),
                    }
                }
                "QUIT" => {
                    reply("221 bye");
                    break;
                }
                _ => reply("200 ok"),
            }
        }
    }

    pub(crate) fn runtime() -> monoio::Runtime<monoio::time::TimeDriver<monoio::LegacyDriver>> {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .enable_timer()
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_replies() {
        assert_eq!(226, parse_code("226 Transfer complete").unwrap());
        assert_eq!(220, parse_code("220-welcome").unwrap());
        assert_eq!(200, parse_code("200").unwrap());
        assert!(parse_code("22").is_err());
        assert!(parse_code("abc ok").is_err());
        assert!(parse_code("2260 nope").is_err());

        assert_eq!(
            "192.168.1.20:5001".parse::<SocketAddr>().unwrap(),
            parse_pasv("227 Entering Passive Mode (192,168,1,20,19,137)").unwrap()
        );
        assert!(parse_pasv("227 Entering Passive Mode (192,168,1,20,19)").is_err());
        assert!(parse_pasv("227 Entering Passive Mode").is_err());
        assert_eq!(
            "PORT 10,0,0,1,19,137",
            port_command(Ipv4Addr::new(10, 0, 0, 1), 5001)
        );
    }

    #[test]
    fn test_file_type_from_content_type() {
        assert_eq!(Some(FileType::Ascii), FileType::from_content_type("text/plain"));
        assert_eq!(Some(FileType::Ascii), FileType::from_content_type("Text/CSV"));
        assert_eq!(
            Some(FileType::Binary),
            FileType::from_content_type("application/octet-stream")
        );
        assert_eq!(Some(FileType::Binary), FileType::from_content_type("binary"));
        assert_eq!(None, FileType::from_content_type("application/json"));
    }

    #[test]
    fn test_passive_store_and_rename() {
        let mut server = FakeServer::start(Behavior::default());
        let addr = server.addr;
        let options = TransportOptions::default()
            .with_connect_timeout(Duration::from_secs(5))
            .with_socket_timeout(Duration::from_secs(5))
            .with_chunk_size(4);
        runtime().block_on(async move {
            let mut session = TcpFtpConnector.connect(addr, &options).await.unwrap();
            session.set_file_type(FileType::Ascii).await.unwrap();
            assert!(session.login("svc", "secret").await.unwrap());
            let reply = session.send_command("SITE UMASK 022").await.unwrap();
            assert!(reply.is_completion());
            assert!(session
                .store("/in/a.csv.part", Bytes::from_static(b"a,b,c\n1,2,3\n"))
                .await
                .unwrap());
            assert_eq!("226 Transfer complete", session.last_reply());
            assert!(session.rename("/in/a.csv.part", "/in/a.csv").await.unwrap());
            session.quit().await.unwrap();
        });
        server.join();

        assert_eq!(
            vec![
                "USER svc",
                "PASS secret",
                "SITE UMASK 022",
                "TYPE A",
                "PASV",
                "STOR /in/a.csv.part",
                "RNFR /in/a.csv.part",
                "RNTO /in/a.csv",
                "QUIT",
            ],
            server.commands()
        );
        let files = server.files.lock().unwrap();
        assert_eq!(Some(&b"a,b,c\n1,2,3\n".to_vec()), files.get("/in/a.csv"));
        assert_eq!(1, files.len());
    }

    #[test]
    fn test_active_store() {
        let mut server = FakeServer::start(Behavior::default());
        let addr = server.addr;
        runtime().block_on(async move {
            let mut session = TcpFtpConnector
                .connect(addr, &TransportOptions::default())
                .await
                .unwrap();
            assert!(session.login("anonymous", "").await.unwrap());
            session.set_transfer_mode(TransferMode::Active);
            assert!(session.store("b.bin", Bytes::from_static(&[0, 1, 2])).await.unwrap());
            session.quit().await.unwrap();
        });
        server.join();
        assert!(server.commands()[2].starts_with("PORT 127,0,0,1,"));
        assert_eq!(
            Some(&vec![0u8, 1, 2]),
            server.files.lock().unwrap().get("b.bin")
        );
    }

    #[test]
    fn test_rejections() {
        let mut server = FakeServer::start(Behavior {
            reject_login: true,
            reject_store: true,
        });
        let addr = server.addr;
        runtime().block_on(async move {
            let mut session = TcpFtpConnector
                .connect(addr, &TransportOptions::default())
                .await
                .unwrap();
            assert!(!session.login("svc", "wrong").await.unwrap());
            assert_eq!("530 login incorrect", session.last_reply());
            assert!(!session.store("c.txt", Bytes::from_static(b"x")).await.unwrap());
            assert_eq!("553 Could not create file.", session.last_reply());
            session.quit().await.unwrap();
        });
        server.join();
    }

    #[test]
    fn test_connect_refused() {
        let addr = {
            let listener = StdListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = runtime()
            .block_on(TcpFtpConnector.connect(addr, &TransportOptions::default()))
            .err()
            .unwrap();
        assert!(matches!(err, FtpError::Io(_)));
    }
}
