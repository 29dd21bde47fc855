//! Standard output/error multiplexing.
//!
//! The engine only reads the handshake line from the plugin's inherited file
//! descriptors, so everything else written by handlers and by the logger goes
//! through a [`Sink`]. Each write reaches the channel's original destination
//! and every subscriber currently streaming that channel over gRPC.

use std::{
    io::{self, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use dashmap::DashMap;
use strum_macros::{Display, EnumString};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StdStream {
    Stdout,
    Stderr,
}

type Writer = Box<dyn Write + Send>;

/// Chunks buffered per subscriber. A subscriber that falls this far behind is
/// dropped.
pub const SUBSCRIBER_BUFFER: usize = 1024;

struct Channel {
    original: Mutex<Writer>,
    subscribers: DashMap<u64, Sender<Bytes>>,
    next_id: AtomicU64,
}

impl Channel {
    fn new(original: Writer) -> Self {
        Self {
            original: Mutex::new(original),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    fn write_original(&self, buf: &[u8]) -> io::Result<()> {
        let mut original = self.original.lock().unwrap_or_else(|e| e.into_inner());
        original.write_all(buf)?;
        original.flush()
    }

    fn publish(&self, buf: &[u8]) -> io::Result<()> {
        let chunk = Bytes::copy_from_slice(buf);
        let dead: Vec<u64> = self
            .subscribers
            .iter()
            .filter(|sub| sub.value().try_send(chunk.clone()).is_err())
            .map(|sub| *sub.key())
            .collect();
        for id in dead {
            self.subscribers.remove(&id);
        }
        self.write_original(buf)
    }

    fn subscribe(&self) -> Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, tx);
        rx
    }
}

/// The pair of multiplexed channels. Cloning shares the channels.
#[derive(Clone)]
pub struct StdioMux {
    stdout: Arc<Channel>,
    stderr: Arc<Channel>,
}

impl Default for StdioMux {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioMux {
    /// Channels whose originals are the process's stdout and stderr.
    pub fn new() -> Self {
        Self::with_originals(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn with_originals(stdout: Writer, stderr: Writer) -> Self {
        Self {
            stdout: Arc::new(Channel::new(stdout)),
            stderr: Arc::new(Channel::new(stderr)),
        }
    }

    fn channel(&self, stream: StdStream) -> &Arc<Channel> {
        match stream {
            StdStream::Stdout => &self.stdout,
            StdStream::Stderr => &self.stderr,
        }
    }

    pub fn stdout(&self) -> Sink {
        self.sink(StdStream::Stdout)
    }

    pub fn stderr(&self) -> Sink {
        self.sink(StdStream::Stderr)
    }

    pub fn sink(&self, stream: StdStream) -> Sink {
        Sink {
            channel: self.channel(stream).clone(),
        }
    }

    /// Swaps the original destination of a channel and returns the previous
    /// one, so it can be put back later.
    pub fn replace_original(&self, stream: StdStream, writer: Writer) -> Writer {
        let mut original = self
            .channel(stream)
            .original
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *original, writer)
    }

    /// Writes to the original destination only, skipping subscribers.
    pub fn write_original(&self, stream: StdStream, buf: &[u8]) -> io::Result<()> {
        self.channel(stream).write_original(buf)
    }

    /// Registers a subscriber. Dropping the receiver unsubscribes on the next
    /// write, as does letting its buffer fill up.
    pub fn subscribe(&self, stream: StdStream) -> Receiver<Bytes> {
        self.channel(stream).subscribe()
    }

    /// Drops every subscriber on both channels, ending their streams.
    pub fn close_subscribers(&self) {
        self.stdout.subscribers.clear();
        self.stderr.subscribers.clear();
    }

    pub fn subscriber_count(&self, stream: StdStream) -> usize {
        self.channel(stream).subscribers.len()
    }
}

/// Writable handle on one channel.
#[derive(Clone)]
pub struct Sink {
    channel: Arc<Channel>,
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.publish(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut original = self.channel.original.lock().unwrap_or_else(|e| e.into_inner());
        original.flush()
    }
}

impl<'a> MakeWriter<'a> for Sink {
    type Writer = Sink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
