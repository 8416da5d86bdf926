//! The engine session: lifecycle, clause loading, and the three query forms.
//!
//! A session owns one engine and is strictly sequential. Every operation
//! starts from the prompt and leaves the engine back at the prompt, except a
//! streaming [`Solutions`] cursor, which holds the engine mid-query until it
//! is exhausted or terminated. A cursor dropped before it finished is
//! settled by the next operation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use horn_clause::Clause;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ExpectError, Expected, Matched, Reader};
use crate::config::SessionConfig;
use crate::decode::{Row, decode_aggregate, decode_row};
use crate::error::SessionError;
use crate::syntax::{
    ANSWER_OPTIONS, CONTINUE, HALT, STOP, aggregate_command, aggregate_result_variable,
    assert_command, consult_command, free_variables, strip_terminator, terminate,
};

/// Where the engine is in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Spawned, first prompt not seen yet.
    Starting,
    /// At the prompt, ready for a command.
    Ready,
    /// Asserting buffered clauses.
    Loading,
    /// A query is running or waiting on a continue/stop action.
    Querying,
}

/// Result of [`Session::query`], which picks the form from the goal's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// The goal had no free variables.
    Proof(bool),
    /// Every solution of a goal with free variables.
    Rows(Vec<Row>),
}

/// A live conversation with one engine.
pub struct Session {
    channel: Channel,
    config: SessionConfig,
    pending: Vec<Clause>,
    state: SessionState,
    /// The engine owes output for the last line sent that has not been read.
    unread: bool,
    child: Option<Child>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("executable", &self.config.executable)
            .finish()
    }
}

impl Session {
    /// Spawn the configured engine and wait for its first prompt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ExecutableNotFound` if the executable cannot be
    /// started, exits early, or shows no prompt within the startup timeout.
    pub async fn spawn(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let path = config.executable.display().to_string();
        info!(executable = %path, args = ?config.args, "spawning engine");

        let mut child = Command::new(&config.executable)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::ExecutableNotFound {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let missing = |stream: &str| SessionError::ExecutableNotFound {
            path: path.clone(),
            reason: format!("engine {stream} is not piped"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let readers: Vec<Reader> = vec![Box::new(stdout), Box::new(stderr)];
        let channel = Channel::new(readers, Box::new(stdin));
        let mut session = Self::with_channel(channel, config);
        session.child = Some(child);
        session.await_first_prompt().await?;
        Ok(session)
    }

    /// Talk to an engine that is already running behind `reader`/`writer`.
    ///
    /// Waits for the first prompt like [`Session::spawn`].
    pub async fn connect<R, W>(reader: R, writer: W, config: SessionConfig) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;
        let readers: Vec<Reader> = vec![Box::new(reader)];
        let mut session = Self::with_channel(Channel::new(readers, Box::new(writer)), config);
        session.await_first_prompt().await?;
        Ok(session)
    }

    fn with_channel(channel: Channel, config: SessionConfig) -> Self {
        Self {
            channel,
            config,
            pending: Vec::new(),
            state: SessionState::Starting,
            unread: false,
            child: None,
        }
    }

    /// Wait for the first prompt, then switch off answer depth elision.
    async fn await_first_prompt(&mut self) -> Result<(), SessionError> {
        let timeout = self.config.startup_timeout();
        let m = self
            .channel
            .expect(&[Expected::Prompt], timeout)
            .await
            .map_err(|e| self.startup_failure(e))?;
        if !m.before.trim().is_empty() {
            debug!(banner = %m.before.trim(), "engine startup output");
        }

        self.send(ANSWER_OPTIONS, timeout)
            .await
            .map_err(|e| self.startup_failure(e))?;
        let m = self
            .receive(&[Expected::Error, Expected::Prompt], timeout)
            .await
            .map_err(|e| self.startup_failure(e))?;
        if m.kind == Expected::Error {
            return Err(self.query_error(m, ANSWER_OPTIONS).await);
        }

        self.state = SessionState::Ready;
        info!("engine ready");
        Ok(())
    }

    fn startup_failure(&self, e: ExpectError) -> SessionError {
        let reason = match e {
            ExpectError::Timeout => {
                format!("no prompt within {}ms", self.config.startup_timeout_ms)
            }
            ExpectError::Eof => "engine exited before showing its prompt".to_string(),
            ExpectError::Io(e) => e.to_string(),
        };
        SessionError::ExecutableNotFound {
            path: self.config.executable.display().to_string(),
            reason,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Buffer a clause for the next [`Session::load_declarations`].
    pub fn declare(&mut self, clause: Clause) {
        debug!(clause = %clause, "clause declared");
        self.pending.push(clause);
    }

    /// Clauses declared but not yet loaded, in declaration order.
    pub fn pending(&self) -> &[Clause] {
        &self.pending
    }

    /// Assert every buffered clause, in declaration order.
    ///
    /// The buffer is drained whether or not loading succeeds. When the engine
    /// rejects a clause, the clauses after it are put back in the buffer so
    /// they can be loaded once the offending one is fixed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Compile` with the engine's diagnostic for the
    /// first rejected clause; the session stays usable.
    pub async fn load_declarations(&mut self) -> Result<usize, SessionError> {
        self.ensure_ready().await?;
        let clauses = std::mem::take(&mut self.pending);
        let total = clauses.len();
        self.state = SessionState::Loading;

        for (index, clause) in clauses.iter().enumerate() {
            if let Err(e) = self.load(&assert_command(clause), clause.without_terminator()).await {
                self.pending = clauses[index + 1..].to_vec();
                return Err(e);
            }
        }
        self.state = SessionState::Ready;

        info!(clauses = total, "declarations loaded");
        Ok(total)
    }

    /// Assert one clause right away, bypassing the buffer.
    pub async fn assert_clause(&mut self, clause: &Clause) -> Result<(), SessionError> {
        self.ensure_ready().await?;
        self.state = SessionState::Loading;
        self.load(&assert_command(clause), clause.without_terminator())
            .await
    }

    /// Load a Prolog source file into the engine.
    pub async fn consult(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref().display().to_string();
        self.ensure_ready().await?;
        self.state = SessionState::Loading;
        self.load(&consult_command(&path), &path).await?;
        info!(path = %path, "file consulted");
        Ok(())
    }

    async fn load(&mut self, command: &str, subject: &str) -> Result<(), SessionError> {
        let timeout = self.config.load_timeout();
        self.send(command, timeout)
            .await
            .map_err(|e| self.failure(e, command, timeout, "load"))?;

        let m = self
            .receive(&[Expected::Error, Expected::Prompt], timeout)
            .await
            .map_err(|e| self.failure(e, command, timeout, "load"))?;

        if m.kind == Expected::Error {
            let diagnostic = self.error_diagnostic(m).await;
            warn!(clause = %subject, diagnostic = %diagnostic, "engine rejected clause");
            return Err(SessionError::Compile {
                clause: subject.to_string(),
                diagnostic,
            });
        }

        self.state = SessionState::Ready;
        debug!(clause = %subject, "clause accepted");
        Ok(())
    }

    /// Run a goal in boolean form: does it have at least one solution?
    ///
    /// Free variables are allowed; their bindings are discarded.
    pub async fn ask(&mut self, goal: &str) -> Result<bool, SessionError> {
        let command = terminate(goal);
        let timeout = self.config.query_timeout();
        self.ensure_ready().await?;
        self.state = SessionState::Querying;

        self.send(&command, timeout)
            .await
            .map_err(|e| self.failure(e, &command, timeout, "query"))?;
        let m = self
            .receive(&[Expected::Error, Expected::Prompt, Expected::Pending], timeout)
            .await
            .map_err(|e| self.failure(e, &command, timeout, "query"))?;

        let proven = match m.kind {
            Expected::Error => return Err(self.query_error(m, &command).await),
            Expected::Pending => {
                self.stop(&command).await?;
                true
            }
            Expected::Prompt => is_success(&m.before),
        };

        self.state = SessionState::Ready;
        debug!(query = %command, proven, "boolean query answered");
        Ok(proven)
    }

    /// Start a streaming query; solutions are pulled one at a time.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Shape` without contacting the engine if the
    /// goal has no free variables.
    pub async fn solutions(&mut self, goal: &str) -> Result<Solutions<'_>, SessionError> {
        let command = terminate(goal);
        let variables = free_variables(&command);
        if variables.is_empty() {
            return Err(SessionError::Shape(format!(
                "{command} has no free variables to stream; ask whether it holds instead"
            )));
        }

        let timeout = self.config.query_timeout();
        self.ensure_ready().await?;
        self.state = SessionState::Querying;
        self.send(&command, timeout)
            .await
            .map_err(|e| self.failure(e, &command, timeout, "query"))?;
        debug!(query = %command, variables = ?variables, "streaming query started");

        Ok(Solutions {
            session: self,
            command,
            variables,
            phase: Phase::Awaiting,
        })
    }

    /// Run a goal in aggregate form: every solution in one round trip.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Shape` without contacting the engine if the
    /// goal has no free variables.
    pub async fn collect(&mut self, goal: &str) -> Result<Vec<Row>, SessionError> {
        let goal = strip_terminator(goal);
        let variables = free_variables(goal);
        if variables.is_empty() {
            return Err(SessionError::Shape(format!(
                "{goal} has no free variables to collect"
            )));
        }

        let result = aggregate_result_variable(&variables);
        let command = aggregate_command(&variables, goal, &result);
        let timeout = self.config.query_timeout();
        self.ensure_ready().await?;
        self.state = SessionState::Querying;

        self.send(&command, timeout)
            .await
            .map_err(|e| self.failure(e, &command, timeout, "query"))?;
        let m = self
            .receive(&[Expected::Error, Expected::Prompt, Expected::Pending], timeout)
            .await
            .map_err(|e| self.failure(e, &command, timeout, "query"))?;

        let text = match m.kind {
            Expected::Error => return Err(self.query_error(m, &command).await),
            Expected::Pending => {
                let text = m.text();
                self.stop(&command).await?;
                text
            }
            Expected::Prompt => m.before,
        };
        self.state = SessionState::Ready;

        let rows = decode_aggregate(&text, &result, &variables)?;
        debug!(query = %command, rows = rows.len(), "aggregate query answered");
        Ok(rows)
    }

    /// Boolean form for goals without free variables, aggregate otherwise.
    pub async fn query(&mut self, goal: &str) -> Result<Answer, SessionError> {
        if free_variables(goal).is_empty() {
            Ok(Answer::Proof(self.ask(goal).await?))
        } else {
            Ok(Answer::Rows(self.collect(goal).await?))
        }
    }

    /// Terminate the engine. The session cannot be used afterwards.
    pub async fn halt(mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Querying
            && let Err(e) = self.ensure_ready().await
        {
            debug!(error = %e, "could not settle engine before halting");
        }

        debug!("sending halt");
        if let Err(e) = self.channel.send_line(HALT).await {
            debug!(error = %e, "engine input already closed");
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.config.startup_timeout(), child.wait()).await {
                Ok(Ok(status)) => info!(status = %status, "engine halted"),
                Ok(Err(e)) => return Err(SessionError::Io(e)),
                Err(_) => {
                    warn!("engine ignored halt, killing it");
                    child.kill().await?;
                }
            }
        } else {
            info!("engine halted");
        }
        Ok(())
    }

    /// Bring the engine back to the prompt after an unfinished query.
    ///
    /// Output the engine still owes is read first. The stop action is only
    /// sent when the engine is waiting on a pending answer.
    async fn ensure_ready(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Querying {
            return Ok(());
        }
        warn!(unread = self.unread, "previous query was left unfinished, settling it");
        let query = "unfinished query";
        let timeout = self.config.query_timeout();

        let pending = if self.unread {
            let m = self
                .receive(&[Expected::Error, Expected::Prompt, Expected::Pending], timeout)
                .await
                .map_err(|e| self.failure(e, query, timeout, "query"))?;
            match m.kind {
                Expected::Error => {
                    let rest = self
                        .drain_to_prompt(timeout)
                        .await
                        .map_err(|e| self.failure(e, query, timeout, "query"))?;
                    let diagnostic = format!("{}{}", m.matched, rest);
                    debug!(diagnostic = %diagnostic.trim(), "discarded error from unfinished query");
                    false
                }
                Expected::Prompt => false,
                Expected::Pending => true,
            }
        } else {
            true
        };

        if pending {
            self.stop(query).await?;
        }
        let stale = self.channel.take_buffered();
        if !stale.trim().is_empty() {
            debug!(output = %stale.trim(), "discarded stale engine output");
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Send the stop action and drain output up to the next prompt.
    async fn stop(&mut self, query: &str) -> Result<(), SessionError> {
        let timeout = self.config.query_timeout();
        self.send(STOP, timeout)
            .await
            .map_err(|e| self.failure(e, query, timeout, "query"))?;
        self.drain_to_prompt(timeout)
            .await
            .map_err(|e| self.failure(e, query, timeout, "query"))?;
        Ok(())
    }

    async fn send(&mut self, line: &str, timeout: Duration) -> Result<(), ExpectError> {
        debug!(line = %line, "sending");
        self.channel.send_line(line).await.map_err(ExpectError::Io)?;
        self.unread = true;
        if self.config.echo {
            self.channel.read_line(timeout).await?;
        }
        Ok(())
    }

    /// Expect one of `patterns`. Only a prompt or a pending answer settles
    /// what the engine owes; after an error it still owes a prompt.
    async fn receive(&mut self, patterns: &[Expected], timeout: Duration) -> Result<Matched, ExpectError> {
        let m = self.channel.expect(patterns, timeout).await?;
        self.unread = m.kind == Expected::Error;
        Ok(m)
    }

    async fn drain_to_prompt(&mut self, timeout: Duration) -> Result<String, ExpectError> {
        self.receive(&[Expected::Prompt], timeout)
            .await
            .map(|m| m.before)
    }

    /// Engine diagnostic for an error match; drains the rest up to the prompt.
    async fn error_diagnostic(&mut self, m: Matched) -> String {
        let mut diagnostic = m.matched;
        match self.drain_to_prompt(self.config.query_timeout()).await {
            Ok(rest) => {
                diagnostic.push_str(&rest);
                self.state = SessionState::Ready;
            }
            Err(e) => {
                debug!(error = ?e, "no prompt after engine error");
                self.state = SessionState::Querying;
            }
        }
        diagnostic.trim().to_string()
    }

    async fn query_error(&mut self, m: Matched, query: &str) -> SessionError {
        let diagnostic = self.error_diagnostic(m).await;
        warn!(query = %query, diagnostic = %diagnostic, "engine reported query error");
        SessionError::Query {
            query: query.to_string(),
            diagnostic,
        }
    }

    /// Map a channel failure to a session error.
    ///
    /// After a timeout the engine may still be busy, so the session is left in
    /// `Querying` and the next operation reads the late output first.
    fn failure(&mut self, e: ExpectError, query: &str, timeout: Duration, during: &str) -> SessionError {
        match e {
            ExpectError::Timeout => {
                self.state = SessionState::Querying;
                warn!(query = %query, timeout_ms = timeout.as_millis() as u64, "engine timed out");
                SessionError::QueryTimeout {
                    query: query.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            }
            ExpectError::Eof => SessionError::EngineExited {
                during: format!("{during} {query:?}"),
            },
            ExpectError::Io(e) => SessionError::Io(e),
        }
    }
}

/// Whether a final answer printed before the prompt is a success.
fn is_success(text: &str) -> bool {
    match decode_row(text, &[]) {
        Ok(None) => false,
        Ok(Some(_)) => text.contains("true") || text.contains(" = "),
        Err(_) => text.contains(" = "),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The goal or a continue action was sent; the answer is unread.
    Awaiting,
    /// An answer was read; the engine waits for continue or stop.
    Pending,
    Done,
}

/// Cursor over the solutions of a streaming query.
///
/// Holds the session exclusively until exhausted, terminated, or dropped.
#[derive(Debug)]
pub struct Solutions<'s> {
    session: &'s mut Session,
    command: String,
    variables: Vec<String>,
    phase: Phase,
}

impl Solutions<'_> {
    /// Free variables of the goal, in order of first appearance.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Pull the next solution; `Ok(None)` once the engine has no more.
    pub async fn next_row(&mut self) -> Result<Option<Row>, SessionError> {
        match self.phase {
            Phase::Done => return Ok(None),
            Phase::Pending => {
                self.phase = Phase::Done;
                let timeout = self.session.config.query_timeout();
                self.session
                    .send(CONTINUE, timeout)
                    .await
                    .map_err(|e| self.session.failure(e, &self.command, timeout, "query"))?;
                self.phase = Phase::Awaiting;
            }
            Phase::Awaiting => {}
        }

        // Any failure below ends the cursor.
        self.phase = Phase::Done;
        let m = self.read_answer().await?;
        match m.kind {
            Expected::Error => Err(self.session.query_error(m, &self.command).await),
            Expected::Prompt => {
                self.session.state = SessionState::Ready;
                decode_row(&m.before, &self.variables)
            }
            Expected::Pending => {
                self.phase = Phase::Pending;
                decode_row(&m.text(), &self.variables)
            }
        }
    }

    /// Stop the query and return the engine to the prompt.
    pub async fn terminate(mut self) -> Result<(), SessionError> {
        self.settle().await
    }

    async fn settle(&mut self) -> Result<(), SessionError> {
        let phase = std::mem::replace(&mut self.phase, Phase::Done);
        let pending = match phase {
            Phase::Done => return Ok(()),
            Phase::Pending => true,
            Phase::Awaiting => {
                let m = self.read_answer().await?;
                match m.kind {
                    Expected::Error => {
                        return Err(self.session.query_error(m, &self.command).await);
                    }
                    Expected::Prompt => false,
                    Expected::Pending => true,
                }
            }
        };

        if pending {
            self.session.stop(&self.command).await?;
        }
        self.session.state = SessionState::Ready;
        debug!(query = %self.command, "streaming query terminated");
        Ok(())
    }

    async fn read_answer(&mut self) -> Result<Matched, SessionError> {
        let timeout = self.session.config.query_timeout();
        self.session
            .receive(&[Expected::Error, Expected::Prompt, Expected::Pending], timeout)
            .await
            .map_err(|e| self.session.failure(e, &self.command, timeout, "query"))
    }
}
