//! Trait abstraction for serial port operations to enable testing

use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;
use tracing::warn;

/// An open, line-oriented serial connection
pub trait SerialLink: Send {
    /// Read up to and including the next `\n`.
    ///
    /// A read timeout is not an error: it returns an empty vec, and bytes
    /// of an unfinished line are held until the rest arrives.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;

    /// Write all data to the port and flush it
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Something that can (re)open a serial device
pub trait PortOpener: Send {
    type Link: SerialLink;

    /// Short label for log lines
    fn label(&self) -> String;

    /// Open the device
    fn open(&mut self) -> io::Result<Self::Link>;
}

/// Opens a real device through `tokio_serial`'s blocking builder (8N1)
#[derive(Debug, Clone)]
pub struct TokioSerialOpener {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    name: Option<String>,
}

impl TokioSerialOpener {
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            timeout,
            name: None,
        }
    }

    /// Use `name` instead of the device basename in log lines
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PortOpener for TokioSerialOpener {
    type Link = SystemSerialLink;

    fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        std::path::Path::new(&self.path)
            .file_name()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.path)
            .to_string()
    }

    fn open(&mut self) -> io::Result<SystemSerialLink> {
        let port = tokio_serial::new(self.path.as_str(), self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(io::Error::from)?;

        Ok(SystemSerialLink {
            reader: BufReader::new(port),
            partial: Vec::new(),
        })
    }
}

/// Wrapper around an open `tokio_serial` port that implements SerialLink
pub struct SystemSerialLink {
    reader: BufReader<Box<dyn tokio_serial::SerialPort>>,
    /// Bytes of a line cut off by a read timeout
    partial: Vec<u8>,
}

impl std::fmt::Debug for SystemSerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSerialLink")
            .field("port", &self.reader.get_ref().name())
            .finish_non_exhaustive()
    }
}

impl SerialLink for SystemSerialLink {
    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        read_framed(&mut self.reader, &mut self.partial)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let port = self.reader.get_mut();
        port.write_all(data)?;
        port.flush()
    }
}

/// Longest unterminated line kept across timeouts
const MAX_PARTIAL_LINE: usize = 4096;

/// Returns one complete `\n`-terminated line, or an empty vec when the
/// line is not finished yet. Unfinished bytes wait in `partial`.
fn read_framed<R: BufRead>(reader: &mut R, partial: &mut Vec<u8>) -> io::Result<Vec<u8>> {
    let result = reader.read_until(b'\n', partial);
    if partial.ends_with(b"\n") {
        return Ok(std::mem::take(partial));
    }
    if partial.len() > MAX_PARTIAL_LINE {
        warn!("Dropping {} bytes without a line ending", partial.len());
        partial.clear();
    }
    match result {
        Ok(_) => Ok(Vec::new()),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
        Err(e) => {
            partial.clear();
            Err(e)
        }
    }
}

/// Short error tag for logs: `errno=N` when the OS gave one, else the kind.
pub fn error_code(e: &io::Error) -> String {
    match e.raw_os_error() {
        Some(code) if code != 0 => format!("errno={}", code),
        _ => format!("{:?}", e.kind()),
    }
}
