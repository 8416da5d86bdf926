//! Half-duplex, prompt-delimited byte channel to the engine.
//!
//! Engine output (stdout and stderr alike) is pumped by background tasks into
//! one buffer, which is matched against a small fixed set of recognizers.
//! Every wait is bounded by a deadline so a hung engine
//! ([`ExpectError::Timeout`]) is told apart from a dead one
//! ([`ExpectError::Eof`]).

use std::io;
use std::time::Duration;

use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::syntax::{ERROR, PENDING, PROMPT};

pub(crate) type Reader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type Writer = Box<dyn AsyncWrite + Send + Unpin>;

const READ_CHUNK: usize = 4096;
const OUTPUT_CHANNEL_SIZE: usize = 64;

/// Recognizers checked on every expect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expected {
    Error,
    Prompt,
    Pending,
}

impl Expected {
    fn regex(self) -> &'static Regex {
        match self {
            Expected::Error => &ERROR,
            Expected::Prompt => &PROMPT,
            Expected::Pending => &PENDING,
        }
    }
}

/// Result of a successful expect: which recognizer fired, the output before
/// the match, and the matched text itself.
#[derive(Debug)]
pub(crate) struct Matched {
    pub kind: Expected,
    pub before: String,
    pub matched: String,
}

impl Matched {
    /// Everything consumed by this match.
    pub fn text(&self) -> String {
        format!("{}{}", self.before, self.matched)
    }
}

#[derive(Debug)]
pub(crate) enum ExpectError {
    Timeout,
    Eof,
    Io(io::Error),
}

pub(crate) struct Channel {
    output: mpsc::Receiver<io::Result<Vec<u8>>>,
    writer: Writer,
    buffer: Vec<u8>,
    pumps: Vec<JoinHandle<()>>,
}

impl Channel {
    /// Merge `readers` into one output stream and write commands to `writer`.
    pub fn new(readers: Vec<Reader>, writer: Writer) -> Self {
        let (tx, output) = mpsc::channel(OUTPUT_CHANNEL_SIZE);
        let pumps = readers
            .into_iter()
            .map(|reader| pump(reader, tx.clone()))
            .collect();
        Self {
            output,
            writer,
            buffer: Vec::new(),
            pumps,
        }
    }

    /// Write one line and flush it.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Consume one line of output, without its line terminator.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<String, ExpectError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                return Ok(line.trim_end_matches(['\r', '\n']).to_string());
            }
            self.fill(deadline).await?;
        }
    }

    /// Wait until one of `patterns` matches the buffered output.
    ///
    /// Patterns are tried in the given order on every cycle, so callers list
    /// [`Expected::Error`] first to give it precedence.
    pub async fn expect(
        &mut self,
        patterns: &[Expected],
        timeout: Duration,
    ) -> Result<Matched, ExpectError> {
        let deadline = Instant::now() + timeout;
        loop {
            for kind in patterns {
                if let Some(m) = kind.regex().find(&self.buffer) {
                    let (start, end) = (m.start(), m.end());
                    let before = String::from_utf8_lossy(&self.buffer[..start]).into_owned();
                    let matched = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                    self.buffer.drain(..end);
                    trace!(kind = ?kind, matched = %matched, "recognizer matched");
                    return Ok(Matched {
                        kind: *kind,
                        before,
                        matched,
                    });
                }
            }
            self.fill(deadline).await?;
        }
    }

    async fn fill(&mut self, deadline: Instant) -> Result<(), ExpectError> {
        match tokio::time::timeout_at(deadline, self.output.recv()).await {
            Ok(Some(Ok(bytes))) => {
                self.buffer.extend_from_slice(&bytes);
                Ok(())
            }
            Ok(Some(Err(e))) => Err(ExpectError::Io(e)),
            Ok(None) => Err(ExpectError::Eof),
            Err(_) => Err(ExpectError::Timeout),
        }
    }

    /// Take whatever output is buffered but unmatched.
    pub fn take_buffered(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        text
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Forward chunks from `reader` until EOF, a read error, or the channel closes.
fn pump(mut reader: Reader, tx: mpsc::Sender<io::Result<Vec<u8>>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("engine output reached EOF");
                    break;
                }
                Ok(n) => {
                    if tx.send(Ok(chunk[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    })
}
