//! Scripted stand-in for the engine, driven over an in-memory duplex pipe.
//!
//! The engine greets with a prompt and accepts the startup command. Then for
//! each scripted step it reads one line, records it, echoes it when echo is
//! enabled, and writes the step's reply, optionally after a delay. It hangs
//! up after the last step, like an engine that has exited.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use horn_session::syntax::ANSWER_OPTIONS;
use horn_session::{Session, SessionConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub const PROMPT: &str = "?- ";

/// A successful load or boolean query.
pub const TRUE: &str = "true.\r\n\r\n?- ";

/// A failed boolean query.
pub const FALSE: &str = "false.\r\n\r\n?- ";

/// Reply to the stop action.
pub const STOPPED: &str = "\r\n?- ";

/// One scripted exchange: the line the engine expects and its reply.
#[derive(Debug, Clone)]
pub struct Step {
    expected: String,
    reply: String,
    delay: Duration,
}

impl Step {
    pub fn new(expected: &str, reply: &str) -> Self {
        Self {
            expected: expected.to_string(),
            reply: reply.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// A reply the engine only writes after `delay`, like a slow goal.
    pub fn late(expected: &str, reply: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(expected, reply)
        }
    }
}

pub struct ScriptedEngine {
    startup: Arc<Mutex<Option<String>>>,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl ScriptedEngine {
    pub fn start(stream: DuplexStream, steps: Vec<Step>, echo: bool) -> Self {
        let startup = Arc::new(Mutex::new(None));
        let received = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&startup);
        let log = Arc::clone(&received);

        let task = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(stream);
            let mut lines = BufReader::new(read).lines();
            if write.write_all(PROMPT.as_bytes()).await.is_err() {
                return;
            }

            let Ok(Some(line)) = lines.next_line().await else {
                return;
            };
            *first.lock().unwrap() = Some(line.clone());
            let out = respond(&line, ANSWER_OPTIONS, TRUE, echo);
            if write.write_all(out.as_bytes()).await.is_err() {
                return;
            }

            for step in steps {
                let Ok(Some(line)) = lines.next_line().await else {
                    return;
                };
                log.lock().unwrap().push(line.clone());

                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                let out = respond(&line, &step.expected, &step.reply, echo);
                if write.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        });

        Self {
            startup,
            received,
            task,
        }
    }

    /// The first line sent after the greeting prompt.
    pub fn startup(&self) -> Option<String> {
        self.startup.lock().unwrap().clone()
    }

    /// Every scripted line the engine has read so far.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Wait for the engine to play its whole script, then return what it read.
    pub async fn finish(self) -> Vec<String> {
        let received = Arc::clone(&self.received);
        self.task.await.unwrap();
        received.lock().unwrap().clone()
    }
}

fn respond(line: &str, expected: &str, reply: &str, echo: bool) -> String {
    let mut out = String::new();
    if echo {
        out.push_str(line);
        out.push_str("\r\n");
    }
    if line == expected {
        out.push_str(reply);
    } else {
        out.push_str(&format!(
            "ERROR: scripted engine expected {expected:?}\r\n{PROMPT}"
        ));
    }
    out
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> SessionConfig {
    SessionConfig::builder()
        .startup_timeout_ms(1_000)
        .load_timeout_ms(1_000)
        .query_timeout_ms(1_000)
        .build()
}

pub async fn connect(script: &[(&str, &str)]) -> (Session, ScriptedEngine) {
    connect_with(test_config(), script).await
}

pub async fn connect_with(
    config: SessionConfig,
    script: &[(&str, &str)],
) -> (Session, ScriptedEngine) {
    let steps = script
        .iter()
        .map(|(expected, reply)| Step::new(expected, reply))
        .collect();
    connect_steps(config, steps).await
}

pub async fn connect_steps(config: SessionConfig, steps: Vec<Step>) -> (Session, ScriptedEngine) {
    init_tracing();
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let engine = ScriptedEngine::start(theirs, steps, config.echo);
    let (reader, writer) = tokio::io::split(ours);
    let session = Session::connect(reader, writer, config)
        .await
        .expect("scripted engine shows a prompt");
    (session, engine)
}
