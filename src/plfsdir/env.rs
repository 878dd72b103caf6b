//! Storage environments for the log directory
//!
//! [`LocalEnv`] writes through the local filesystem. [`RemoteEnv`] is the
//! binding to a remote object store reached over TCP: every file operation
//! becomes one frame on a shared connection.
//!
//! Frame layout (little endian):
//!
//! ```text
//! +--------+-------------+--------+-------------+---------+
//! | op: u8 | name_len:u16| name   | data_len:u32| data    |
//! +--------+-------------+--------+-------------+---------+
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::constants::{MAX_REMOTE_URI_LEN, REMOTE_ENV_NAME, REMOTE_ENV_TRANSPORT};
use crate::error::{BenchError, BenchResult};

/// Append-only file produced by an [`Env`]
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Flush and make the contents durable
    fn sync(&mut self) -> io::Result<()>;
}

/// Storage abstraction the log directory writes through
pub trait Env: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn create_dir(&self, path: &Path) -> io::Result<()>;

    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;
}

/// Local filesystem environment
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEnv;

struct LocalFile {
    writer: BufWriter<File>,
}

impl WritableFile for LocalFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

impl Env for LocalEnv {
    fn name(&self) -> &str {
        "posix"
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(LocalFile {
            writer: BufWriter::new(file),
        }))
    }
}

/// Remote frame operation codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    CreateDir = 1,
    OpenFile = 2,
    Append = 3,
    Sync = 4,
}

impl TryFrom<u8> for RemoteOp {
    type Error = io::Error;

    fn try_from(v: u8) -> io::Result<Self> {
        match v {
            1 => Ok(RemoteOp::CreateDir),
            2 => Ok(RemoteOp::OpenFile),
            3 => Ok(RemoteOp::Append),
            4 => Ok(RemoteOp::Sync),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown remote op {}", v),
            )),
        }
    }
}

/// Remote storage environment
pub struct RemoteEnv {
    local_uri: String,
    remote_uri: String,
    conn: Arc<Mutex<TcpStream>>,
}

impl fmt::Debug for RemoteEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEnv")
            .field("local_uri", &self.local_uri)
            .field("remote_uri", &self.remote_uri)
            .finish()
    }
}

impl RemoteEnv {
    /// Connection timeout: 10 seconds
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Bind to the remote backend at `host:port`
    pub fn init(host: &str, port: u16) -> BenchResult<Self> {
        let local_uri = REMOTE_ENV_TRANSPORT.to_string();
        let remote_uri = format!("{}://{}:{}", REMOTE_ENV_TRANSPORT, host, port);

        if host.is_empty() || port == 0 {
            return Err(env_error(format!("bad remote address {}", remote_uri)));
        }
        if remote_uri.len() >= MAX_REMOTE_URI_LEN {
            return Err(env_error(format!(
                "remote uri {} longer than {} bytes",
                remote_uri, MAX_REMOTE_URI_LEN
            )));
        }

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| env_error(format!("cannot resolve {}: {}", remote_uri, e)))?
            .next()
            .ok_or_else(|| env_error(format!("no address for {}", remote_uri)))?;

        let stream = TcpStream::connect_timeout(&addr, Self::CONNECT_TIMEOUT)
            .map_err(|e| env_error(format!("cannot connect to {}: {}", remote_uri, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| env_error(e.to_string()))?;

        tracing::info!("{} env bound to {} (local {})", REMOTE_ENV_NAME, remote_uri, local_uri);

        Ok(Self {
            local_uri,
            remote_uri,
            conn: Arc::new(Mutex::new(stream)),
        })
    }

    pub fn local_uri(&self) -> &str {
        &self.local_uri
    }

    pub fn remote_uri(&self) -> &str {
        &self.remote_uri
    }

    fn send(&self, op: RemoteOp, name: &Path, data: &[u8]) -> io::Result<()> {
        send_frame(&self.conn, op, &name.to_string_lossy(), data)
    }
}

fn env_error(reason: String) -> BenchError {
    BenchError::EnvInit {
        name: REMOTE_ENV_NAME.to_string(),
        reason,
    }
}

fn send_frame(conn: &Mutex<TcpStream>, op: RemoteOp, name: &str, data: &[u8]) -> io::Result<()> {
    let name_len = u16::try_from(name.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "remote file name too long"))?;
    let data_len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "remote frame too large"))?;

    let mut frame = Vec::with_capacity(1 + 2 + name.len() + 4 + data.len());
    frame.push(op as u8);
    frame.extend_from_slice(&name_len.to_le_bytes());
    frame.extend_from_slice(name.as_bytes());
    frame.extend_from_slice(&data_len.to_le_bytes());
    frame.extend_from_slice(data);

    let mut stream = conn
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "remote connection poisoned"))?;
    stream.write_all(&frame)
}

struct RemoteFile {
    name: String,
    conn: Arc<Mutex<TcpStream>>,
}

impl WritableFile for RemoteFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        send_frame(&self.conn, RemoteOp::Append, &self.name, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut stream = self
            .conn
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "remote connection poisoned"))?;
        stream.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        send_frame(&self.conn, RemoteOp::Sync, &self.name, &[])?;
        self.flush()
    }
}

impl Env for RemoteEnv {
    fn name(&self) -> &str {
        REMOTE_ENV_NAME
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.send(RemoteOp::CreateDir, path, &[])
    }

    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        self.send(RemoteOp::OpenFile, path, &[])?;
        Ok(Box::new(RemoteFile {
            name: path.to_string_lossy().into_owned(),
            conn: self.conn.clone(),
        }))
    }
}

/// Decode one frame from `reader`, returning `None` at a clean end of stream
pub fn read_frame<R: io::Read>(reader: &mut R) -> io::Result<Option<(RemoteOp, String, Vec<u8>)>> {
    let mut op = [0u8; 1];
    match reader.read_exact(&mut op) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let op = RemoteOp::try_from(op[0])?;

    let mut len = [0u8; 2];
    reader.read_exact(&mut len)?;
    let mut name = vec![0u8; u16::from_le_bytes(len) as usize];
    reader.read_exact(&mut name)?;
    let name = String::from_utf8(name)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let mut data = vec![0u8; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut data)?;

    Ok(Some((op, name, data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use tempfile::TempDir;

    #[test]
    fn test_local_env_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let env = LocalEnv;

        let dir = temp_dir.path().join("a/b");
        env.create_dir(&dir).unwrap();

        let path = dir.join("log");
        let mut file = env.new_writable_file(&path).unwrap();
        file.append(b"hello ").unwrap();
        file.append(b"world").unwrap();
        file.sync().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_remote_env_rejects_bad_address() {
        assert!(matches!(
            RemoteEnv::init("", 12345),
            Err(BenchError::EnvInit { .. })
        ));
        assert!(matches!(
            RemoteEnv::init("127.0.0.1", 0),
            Err(BenchError::EnvInit { .. })
        ));

        let long_host = "h".repeat(MAX_REMOTE_URI_LEN);
        assert!(matches!(
            RemoteEnv::init(&long_host, 1),
            Err(BenchError::EnvInit { ref reason, .. }) if reason.contains("longer than")
        ));
    }

    #[test]
    fn test_remote_env_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = RemoteEnv::init("127.0.0.1", port);
        assert!(matches!(result, Err(BenchError::EnvInit { .. })));
    }

    #[test]
    fn test_remote_env_streams_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut frames = Vec::new();
            while let Some(frame) = read_frame(&mut stream).unwrap() {
                frames.push(frame);
            }
            frames
        });

        {
            let env = RemoteEnv::init("127.0.0.1", port).unwrap();
            assert_eq!(env.local_uri(), "bmi+tcp");
            assert_eq!(env.remote_uri(), format!("bmi+tcp://127.0.0.1:{}", port));

            env.create_dir(Path::new("/plfs")).unwrap();
            let mut file = env.new_writable_file(Path::new("/plfs/L-0.dat")).unwrap();
            file.append(b"abc").unwrap();
            file.sync().unwrap();
        }

        let frames = server.join().unwrap();
        let ops: Vec<RemoteOp> = frames.iter().map(|(op, _, _)| *op).collect();
        assert_eq!(
            ops,
            vec![RemoteOp::CreateDir, RemoteOp::OpenFile, RemoteOp::Append, RemoteOp::Sync]
        );
        assert_eq!(frames[2].1, "/plfs/L-0.dat");
        assert_eq!(frames[2].2, b"abc");
    }
}
