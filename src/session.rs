//! Session: one connection, its reassembly buffer, and the reply state machine.
//!
//! A [`Session`] owns the stream and drives every command to completion
//! before returning:
//! 1. Encode the command (with a `.tag=<n>` word when tagging is on)
//! 2. Write it to the stream
//! 3. Read until a sentence for this command reaches a terminal state, or
//!    the per-command deadline passes
//!
//! Replies are matched to the in-flight command by tag. Sentences with a
//! different tag belong to a command that already finished (timed out,
//! trapped, or resolved early) and are dropped.
//!
//! All methods take `&mut self`, so a session never has more than one
//! command in flight. Use [`Client`](crate::Client) to share a session
//! between tasks.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::auth::{is_invalid_credentials, is_not_logged_in, legacy_response};
use crate::command::{Command, LOGIN_PATH};
use crate::config::{ClientConfig, Credentials};
use crate::error::{RouterError, Result};
use crate::protocol::{Record, Reply, ReplyKind, Sentence, SentenceBuffer};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Message used when a `!trap` has no `=message=`.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Empty parameter list for [`Session::run_query`].
pub const NO_PARAMS: [(&str, &str); 0] = [];

/// Session-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No command in flight.
    Idle,
    /// A command was written and its reply is being read.
    AwaitingReply,
    /// Logging in again before resubmitting a command.
    Retrying,
    /// Closed, or failed at the connection level. Every call fails.
    Terminal,
}

/// Progress of one in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Nothing received yet.
    AwaitingFirst,
    /// At least one `!re` received.
    Accumulating,
    /// Final sentence seen.
    Terminal,
}

/// What the session should do after feeding a sentence to a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Keep reading.
    Continue,
    /// Command succeeded.
    Resolve,
    /// `!trap`: this command failed.
    Trap { message: String, category: Option<u32> },
    /// `!fatal`: the connection failed.
    Fatal(String),
}

/// The in-flight command and the replies collected for it.
#[derive(Debug)]
pub(crate) struct Pending {
    tag: Option<String>,
    monitor: bool,
    collect_all: bool,
    phase: Phase,
    replies: Vec<Sentence>,
}

impl Pending {
    pub fn new(command: &Command, tag: Option<u64>) -> Self {
        Self {
            tag: tag.map(|t| t.to_string()),
            monitor: command.is_monitor(),
            collect_all: command.wants_all(),
            phase: Phase::AwaitingFirst,
            replies: Vec::new(),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True if `sentence` belongs to this command.
    ///
    /// Untagged sentences are always accepted; routers send `!fatal`
    /// without a tag.
    pub fn accepts(&self, sentence: &Sentence) -> bool {
        match (self.tag.as_deref(), sentence.request_tag()) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }

    /// Advance the state machine with one reply sentence.
    pub fn on_sentence(&mut self, sentence: Sentence) -> Step {
        match sentence.kind() {
            ReplyKind::Re => {
                self.replies.push(sentence);
                if self.monitor {
                    // `once` was requested: one snapshot is all we wait for.
                    self.phase = Phase::Terminal;
                    return Step::Resolve;
                }
                self.phase = Phase::Accumulating;
                Step::Continue
            }
            ReplyKind::Done => {
                self.phase = Phase::Terminal;
                if sentence.has_attributes() || self.collect_all {
                    self.replies.push(sentence);
                }
                Step::Resolve
            }
            ReplyKind::Trap => {
                self.phase = Phase::Terminal;
                Step::Trap {
                    message: sentence
                        .attribute("message")
                        .unwrap_or(UNKNOWN_ERROR)
                        .to_string(),
                    category: sentence.attribute("category").and_then(|c| c.parse().ok()),
                }
            }
            ReplyKind::Fatal => {
                self.phase = Phase::Terminal;
                let message = match sentence.attribute("message") {
                    Some(message) => message.to_string(),
                    None => sentence.text(),
                };
                Step::Fatal(message)
            }
            ReplyKind::Empty => Step::Continue,
            ReplyKind::Other => {
                tracing::warn!(tag = sentence.tag(), "ignoring sentence with unknown reply tag");
                Step::Continue
            }
        }
    }

    /// Collected sentences.
    pub fn into_reply(self) -> Reply {
        Reply {
            sentences: self.replies,
        }
    }
}

/// One authenticated (or not yet authenticated) router connection.
pub struct Session<S> {
    stream: S,
    config: ClientConfig,
    /// Bytes read but not yet decoded.
    buffer: SentenceBuffer,
    /// Sentences decoded but not yet dispatched.
    backlog: VecDeque<Sentence>,
    read_buf: Vec<u8>,
    credentials: Option<Credentials>,
    logged_in: bool,
    state: SessionState,
    next_tag: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream.
    pub fn new(stream: S, config: ClientConfig) -> Self {
        Self {
            stream,
            buffer: SentenceBuffer::with_max_word_size(config.max_word_size),
            config,
            backlog: VecDeque::new(),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            credentials: None,
            logged_in: false,
            state: SessionState::Idle,
            next_tag: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Terminal
    }

    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Username of the stored credentials.
    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }

    /// Log in, choosing the modern or legacy flow as the router requires.
    ///
    /// The credentials are kept for one automatic re-login if the router
    /// later reports the session as not logged in.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.ensure_open()?;

        let credentials = Credentials::new(username, password);
        self.credentials = Some(credentials.clone());

        let result = self.login_with(&credentials).await;
        self.settle(&result);
        result
    }

    /// Run a command and translate its `!re` rows into records.
    ///
    /// Returns an empty vector when the router sent no rows.
    pub async fn run_query<I, K, V>(&mut self, command: &str, params: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let reply = self.run_command(Command::new(command).params(params)).await?;
        Ok(reply.records())
    }

    /// Run a command and return every kept reply sentence.
    pub async fn run_command(&mut self, command: Command) -> Result<Reply> {
        self.ensure_open()?;

        let result = match self.dispatch(&command).await {
            Err(RouterError::Fatal(message)) if self.should_relogin(&command, &message) => {
                self.retry(&command).await
            }
            other => other,
        };

        self.settle(&result);
        result
    }

    /// Flush pending writes and half-close the connection.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Terminal {
            return Ok(());
        }
        self.state = SessionState::Terminal;
        self.logged_in = false;
        self.backlog.clear();
        self.buffer.clear();

        self.stream.flush().await?;
        self.stream.shutdown().await?;
        tracing::debug!(host = %self.config.host, "session closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Terminal {
            return Err(RouterError::ConnectionClosed);
        }
        Ok(())
    }

    /// Record the outcome of a top-level call in the session state.
    fn settle<T>(&mut self, result: &Result<T>) {
        match result {
            // Already torn down mid-call (stalled write).
            _ if self.state == SessionState::Terminal => self.logged_in = false,
            Err(e) if e.is_connection_error() => {
                tracing::warn!(error = %e, "connection unusable");
                self.state = SessionState::Terminal;
                self.logged_in = false;
            }
            _ => self.state = SessionState::Idle,
        }
    }

    fn should_relogin(&self, command: &Command, message: &str) -> bool {
        is_not_logged_in(message)
            && self.credentials.is_some()
            && !command.is_login()
            && command.retry_enabled()
    }

    /// Log in again, then resubmit `command` once with retry disabled.
    ///
    /// A failed re-login is reported as [`RouterError::Fatal`]: the router
    /// has already dropped the session. Errors from the resubmitted command
    /// pass through unchanged.
    async fn retry(&mut self, command: &Command) -> Result<Reply> {
        let Some(credentials) = self.credentials.clone() else {
            return Err(RouterError::Fatal("not logged in".to_string()));
        };

        tracing::warn!(
            command = command.path(),
            "router reports session not logged in, logging in again"
        );
        self.state = SessionState::Retrying;
        if let Err(e) = self.login_with(&credentials).await {
            tracing::warn!(error = %e, "re-login failed");
            return Err(RouterError::Fatal(format!("re-login failed: {}", e)));
        }

        tracing::debug!(command = command.path(), "resubmitting after re-login");
        self.dispatch(&command.without_retry()).await
    }

    async fn login_with(&mut self, credentials: &Credentials) -> Result<()> {
        self.logged_in = false;

        let modern = Command::new(LOGIN_PATH)
            .param("name", credentials.username.as_str())
            .param("password", credentials.password.as_str())
            .no_retry();

        match self.dispatch(&modern).await {
            Ok(reply) if reply.ret().is_none() => {
                tracing::debug!(user = %credentials.username, "logged in");
                self.logged_in = true;
                return Ok(());
            }
            Ok(_) => tracing::debug!("router answered with a challenge, using legacy login"),
            Err(RouterError::Trap { message, .. }) if is_invalid_credentials(&message) => {
                return Err(RouterError::Auth(message));
            }
            Err(RouterError::Trap { message, .. }) => {
                tracing::debug!(%message, "modern login refused, trying legacy login");
            }
            Err(e) => return Err(e),
        }

        let reply = self
            .dispatch(&Command::new(LOGIN_PATH).no_retry())
            .await
            .map_err(auth_error)?;
        let challenge = reply
            .ret()
            .ok_or_else(|| RouterError::Auth("no challenge received".to_string()))?;
        let response = legacy_response(&credentials.password, challenge)?;

        let legacy = Command::new(LOGIN_PATH)
            .param("name", credentials.username.as_str())
            .param("response", response)
            .no_retry();
        self.dispatch(&legacy).await.map_err(auth_error)?;

        tracing::debug!(user = %credentials.username, "logged in (legacy)");
        self.logged_in = true;
        Ok(())
    }

    /// Send one command and drive its reply state machine.
    async fn dispatch(&mut self, command: &Command) -> Result<Reply> {
        let tag = if self.config.tag_requests {
            Some(self.take_tag())
        } else {
            None
        };
        let sentence = command.to_sentence(tag)?;
        let timeout = self.config.timeout_for(command);
        let deadline = Instant::now() + timeout;

        if self.state == SessionState::AwaitingReply {
            tracing::debug!("previous command was abandoned before it finished");
        }
        if self.state != SessionState::Retrying {
            self.state = SessionState::AwaitingReply;
        }

        tracing::debug!(command = command.path(), tag, "sending command");
        match tokio::time::timeout_at(deadline, self.write_sentence(&sentence)).await {
            Ok(written) => written?,
            Err(_) => {
                // A partial sentence may be on the wire; the stream is no longer framed.
                tracing::warn!(command = command.path(), ?timeout, "write stalled, closing session");
                self.state = SessionState::Terminal;
                self.logged_in = false;
                return Err(RouterError::Timeout(timeout));
            }
        }

        let mut pending = Pending::new(command, tag);
        loop {
            let sentence = match self.next_sentence(deadline, timeout).await {
                Ok(sentence) => sentence,
                Err(e) => {
                    if matches!(e, RouterError::Timeout(_)) {
                        tracing::warn!(
                            command = command.path(),
                            ?timeout,
                            phase = ?pending.phase(),
                            "command timed out"
                        );
                    }
                    return Err(e);
                }
            };

            if !pending.accepts(&sentence) {
                tracing::debug!(
                    tag = sentence.request_tag(),
                    reply = sentence.tag(),
                    "dropping reply for a finished command"
                );
                continue;
            }

            match pending.on_sentence(sentence) {
                Step::Continue => continue,
                Step::Resolve => return Ok(pending.into_reply()),
                Step::Trap { message, category } => {
                    tracing::debug!(command = command.path(), %message, "command trapped");
                    return Err(RouterError::Trap { message, category });
                }
                Step::Fatal(message) => {
                    tracing::warn!(command = command.path(), %message, "fatal reply");
                    return Err(RouterError::Fatal(message));
                }
            }
        }
    }

    fn take_tag(&mut self) -> u64 {
        self.next_tag += 1;
        self.next_tag
    }

    async fn write_sentence(&mut self, sentence: &Sentence) -> Result<()> {
        let bytes = sentence.encode()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Next decoded sentence, reading from the stream as needed.
    async fn next_sentence(&mut self, deadline: Instant, timeout: Duration) -> Result<Sentence> {
        loop {
            if let Some(sentence) = self.backlog.pop_front() {
                return Ok(sentence);
            }

            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut self.read_buf));
            let n = match read.await {
                Err(_) => return Err(RouterError::Timeout(timeout)),
                Ok(Ok(0)) => return Err(RouterError::ConnectionClosed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(RouterError::Io(e)),
            };

            let sentences = self.buffer.push(&self.read_buf[..n])?;
            self.backlog.extend(sentences);
        }
    }
}

/// A trap during the legacy exchange means the login itself was refused.
fn auth_error(err: RouterError) -> RouterError {
    match err {
        RouterError::Trap { message, .. } => RouterError::Auth(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tokio::io::{duplex, DuplexStream};

    use crate::protocol::encode_sentence;

    /// Scripted router on the other end of a duplex pipe.
    struct Peer {
        stream: DuplexStream,
        buffer: SentenceBuffer,
        backlog: VecDeque<Sentence>,
    }

    impl Peer {
        async fn recv(&mut self) -> Sentence {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(sentence) = self.backlog.pop_front() {
                    return sentence;
                }
                let n = self.stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "session closed the stream");
                self.backlog.extend(self.buffer.push(&buf[..n]).unwrap());
            }
        }

        /// Send sentences, echoing the request's tag on each.
        async fn reply(&mut self, request: &Sentence, sentences: &[&[&str]]) {
            let tag = request.request_tag().map(|t| format!(".tag={}", t));
            let mut buf = BytesMut::new();
            for words in sentences {
                let mut words: Vec<String> = words.iter().map(|w| w.to_string()).collect();
                words.extend(tag.clone());
                encode_sentence(&words, &mut buf).unwrap();
            }
            self.stream.write_all(&buf).await.unwrap();
        }
    }

    fn pair() -> (Session<DuplexStream>, Peer) {
        pair_with(ClientConfig::default())
    }

    fn pair_with(config: ClientConfig) -> (Session<DuplexStream>, Peer) {
        let (client, server) = duplex(64 * 1024);
        let peer = Peer {
            stream: server,
            buffer: SentenceBuffer::new(),
            backlog: VecDeque::new(),
        };
        (Session::new(client, config), peer)
    }

    #[test]
    fn test_pending_accumulates_until_done() {
        let cmd = Command::new("/ppp/secret/print");
        let mut pending = Pending::new(&cmd, None);
        assert_eq!(pending.phase(), Phase::AwaitingFirst);

        let step = pending.on_sentence(Sentence::new(vec!["!re", "=name=x"]));
        assert_eq!(step, Step::Continue);
        assert_eq!(pending.phase(), Phase::Accumulating);

        let step = pending.on_sentence(Sentence::new(vec!["!done"]));
        assert_eq!(step, Step::Resolve);
        assert_eq!(pending.phase(), Phase::Terminal);
        assert_eq!(pending.into_reply().sentences.len(), 1);
    }

    #[test]
    fn test_pending_done_with_attributes_kept() {
        let cmd = Command::new("/ppp/secret/add");
        let mut pending = Pending::new(&cmd, None);
        pending.on_sentence(Sentence::new(vec!["!done", "=ret=*1F"]));
        assert_eq!(pending.into_reply().ret(), Some("*1F"));

        let cmd = Command::new("/ppp/secret/remove").collect_all();
        let mut pending = Pending::new(&cmd, None);
        pending.on_sentence(Sentence::new(vec!["!done"]));
        assert_eq!(pending.into_reply().sentences.len(), 1);
    }

    #[test]
    fn test_pending_monitor_resolves_on_first_row() {
        let cmd = Command::new("/interface/monitor-traffic").param("interface", "ether1");
        let mut pending = Pending::new(&cmd, None);
        let step = pending.on_sentence(Sentence::new(vec!["!re", "=rx-bits-per-second=100"]));
        assert_eq!(step, Step::Resolve);
    }

    #[test]
    fn test_pending_trap_and_fatal() {
        let cmd = Command::new("/ppp/secret/add");

        let mut pending = Pending::new(&cmd, None);
        let step = pending.on_sentence(Sentence::new(vec![
            "!trap",
            "=category=1",
            "=message=failure: secret with the same name already exists",
        ]));
        assert_eq!(
            step,
            Step::Trap {
                message: "failure: secret with the same name already exists".to_string(),
                category: Some(1),
            }
        );

        let mut pending = Pending::new(&cmd, None);
        let step = pending.on_sentence(Sentence::new(vec!["!trap"]));
        assert!(matches!(step, Step::Trap { message, category: None } if message == "Unknown error"));

        let mut pending = Pending::new(&cmd, None);
        let step = pending.on_sentence(Sentence::new(vec!["!fatal", "not", "logged", "in"]));
        assert_eq!(step, Step::Fatal("not logged in".to_string()));
    }

    #[test]
    fn test_pending_tag_matching() {
        let cmd = Command::new("/ip/address/print");
        let pending = Pending::new(&cmd, Some(4));
        assert!(pending.accepts(&Sentence::new(vec!["!done", ".tag=4"])));
        assert!(!pending.accepts(&Sentence::new(vec!["!done", ".tag=3"])));
        assert!(pending.accepts(&Sentence::new(vec!["!fatal", "session terminated"])));
    }

    #[tokio::test]
    async fn test_print_returns_one_record() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            assert_eq!(
                request.words,
                vec!["/ppp/secret/print", "?name=x", ".tag=1"]
            );
            peer.reply(&request, &[&["!re", "=name=x", "=profile=default"], &["!done"]])
                .await;
            peer
        });

        let records = session
            .run_query("/ppp/secret/print", [("name", "x")])
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "x");
        assert_eq!(records[0]["profile"], "default");
        assert_eq!(session.state(), SessionState::Idle);
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_add_uses_equals_prefix_and_empty_result() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            assert_eq!(
                request.words,
                vec!["/ppp/secret/add", "=name=x", "=password=y", ".tag=1"]
            );
            peer.reply(&request, &[&["!done"]]).await;
            peer
        });

        let records = session
            .run_query("ppp/secret/add", [("name", "x"), ("password", "y")])
            .await
            .unwrap();
        assert!(records.is_empty());
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_trap_fails_only_current_command() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            peer.reply(
                &request,
                &[&["!trap", "=message=no such item"], &["!done"]],
            )
            .await;

            let request = peer.recv().await;
            peer.reply(&request, &[&["!re", "=name=ok"], &["!done"]]).await;
            peer
        });

        let err = session
            .run_query("/ppp/secret/remove", [(".id", "*99")])
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Trap { ref message, .. } if message == "no such item"));
        assert!(!session.is_closed());

        // The trailing !done of the trapped command must not resolve this one.
        let records = session.run_query("/ppp/secret/print", NO_PARAMS).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "ok");
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_modern_login() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            assert_eq!(
                request.words,
                vec!["/login", "=name=admin", "=password=secret", ".tag=1"]
            );
            peer.reply(&request, &[&["!done"]]).await;
            peer
        });

        session.login("admin", "secret").await.unwrap();
        assert!(session.is_logged_in());
        assert_eq!(session.username(), Some("admin"));
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_credentials_no_fallback() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            peer.reply(
                &request,
                &[
                    &["!trap", "=message=invalid user name or password (6)"],
                    &["!done"],
                ],
            )
            .await;
            peer
        });

        let err = session.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, RouterError::Auth(ref m) if m.contains("invalid user name")));
        assert!(!session.is_logged_in());

        // Nothing else was sent after the rejection.
        let mut peer = router.await.unwrap();
        session.close().await.unwrap();
        let mut rest = Vec::new();
        peer.stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_legacy_login() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            // Pre-6.43 routers ignore the password and hand out a challenge.
            let request = peer.recv().await;
            peer.reply(&request, &[&["!done", "=ret=ec8a6d8bf64d0e3d7b4dd6f7c0e7a0a3"]])
                .await;

            let request = peer.recv().await;
            assert_eq!(request.words, vec!["/login", ".tag=2"]);
            peer.reply(&request, &[&["!done", "=ret=ec8a6d8bf64d0e3d7b4dd6f7c0e7a0a3"]])
                .await;

            let request = peer.recv().await;
            assert_eq!(
                request.words,
                vec![
                    "/login",
                    "=name=admin",
                    "=response=00ad65e7d217828a70566fac6943efb6ee",
                    ".tag=3"
                ]
            );
            peer.reply(&request, &[&["!done"]]).await;
            peer
        });

        session.login("admin", "secret").await.unwrap();
        assert!(session.is_logged_in());
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_legacy_login_without_challenge() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            peer.reply(&request, &[&["!trap", "=message=unknown parameter"], &["!done"]])
                .await;

            let request = peer.recv().await;
            peer.reply(&request, &[&["!done"]]).await;
            peer
        });

        let err = session.login("admin", "secret").await.unwrap_err();
        assert!(matches!(err, RouterError::Auth(ref m) if m == "no challenge received"));
        assert!(!session.is_closed());
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_not_logged_in_retries_once() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let login = peer.recv().await;
            peer.reply(&login, &[&["!done"]]).await;

            let first = peer.recv().await;
            assert_eq!(first.tag(), "/system/identity/print");
            peer.reply(&first, &[&["!fatal", "not logged in"]]).await;

            let relogin = peer.recv().await;
            assert_eq!(relogin.tag(), "/login");
            assert_eq!(relogin.attribute("password"), Some("secret"));
            peer.reply(&relogin, &[&["!done"]]).await;

            let resubmit = peer.recv().await;
            assert_eq!(resubmit.tag(), "/system/identity/print");
            peer.reply(&resubmit, &[&["!re", "=name=MikroTik"], &["!done"]])
                .await;
            peer
        });

        session.login("admin", "secret").await.unwrap();
        let records = session
            .run_query("/system/identity/print", NO_PARAMS)
            .await
            .unwrap();
        assert_eq!(records[0]["name"], "MikroTik");
        assert!(session.is_logged_in());
        assert_eq!(session.state(), SessionState::Idle);
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_not_logged_in_propagates() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let login = peer.recv().await;
            peer.reply(&login, &[&["!done"]]).await;

            let first = peer.recv().await;
            peer.reply(&first, &[&["!fatal", "not logged in"]]).await;
            let relogin = peer.recv().await;
            peer.reply(&relogin, &[&["!done"]]).await;
            let resubmit = peer.recv().await;
            peer.reply(&resubmit, &[&["!fatal", "not logged in"]]).await;
            peer
        });

        session.login("admin", "secret").await.unwrap();
        let err = session
            .run_query("/system/identity/print", NO_PARAMS)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Fatal(ref m) if m == "not logged in"));
        assert!(session.is_closed());

        // No third attempt reached the router.
        let mut peer = router.await.unwrap();
        drop(session);
        let mut rest = Vec::new();
        peer.stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_relogin_is_fatal() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let login = peer.recv().await;
            peer.reply(&login, &[&["!done"]]).await;

            let first = peer.recv().await;
            peer.reply(&first, &[&["!fatal", "not logged in"]]).await;

            let relogin = peer.recv().await;
            assert_eq!(relogin.tag(), "/login");
            peer.reply(
                &relogin,
                &[
                    &["!trap", "=message=invalid user name or password (6)"],
                    &["!done"],
                ],
            )
            .await;
            peer
        });

        session.login("admin", "secret").await.unwrap();
        let err = session.run_query("/interface/print", NO_PARAMS).await.unwrap_err();
        assert!(
            matches!(err, RouterError::Fatal(ref m) if m.contains("invalid user name or password"))
        );
        assert!(err.is_connection_error());
        assert!(session.is_closed());
        assert!(!session.is_logged_in());

        let err = session.run_query("/interface/print", NO_PARAMS).await.unwrap_err();
        assert!(matches!(err, RouterError::ConnectionClosed));
        router.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_timeout_is_fatal() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let login = peer.recv().await;
            peer.reply(&login, &[&["!done"]]).await;

            let first = peer.recv().await;
            peer.reply(&first, &[&["!fatal", "not logged in"]]).await;

            // Never answer the re-login.
            let _relogin = peer.recv().await;
            peer
        });

        session.login("admin", "secret").await.unwrap();
        let err = session
            .run_query("/system/identity/print", NO_PARAMS)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Fatal(ref m) if m.contains("timed out")));
        assert!(session.is_closed());
        let _peer = router.await.unwrap();
    }

    #[tokio::test]
    async fn test_trap_after_relogin_keeps_session() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let login = peer.recv().await;
            peer.reply(&login, &[&["!done"]]).await;

            let first = peer.recv().await;
            peer.reply(&first, &[&["!fatal", "not logged in"]]).await;
            let relogin = peer.recv().await;
            peer.reply(&relogin, &[&["!done"]]).await;

            let resubmit = peer.recv().await;
            assert_eq!(resubmit.tag(), "/ppp/secret/remove");
            peer.reply(&resubmit, &[&["!trap", "=message=no such item"], &["!done"]])
                .await;

            let next = peer.recv().await;
            peer.reply(&next, &[&["!re", "=name=x"], &["!done"]]).await;
            peer
        });

        session.login("admin", "secret").await.unwrap();
        let err = session
            .run_query("/ppp/secret/remove", [(".id", "*7")])
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Trap { ref message, .. } if message == "no such item"));
        assert!(!session.is_closed());
        assert!(session.is_logged_in());

        let records = session.run_query("/ppp/secret/print", NO_PARAMS).await.unwrap();
        assert_eq!(records.len(), 1);
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_not_logged_in_without_credentials_is_fatal() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            peer.reply(&request, &[&["!fatal", "not logged in"]]).await;
            peer
        });

        let err = session.run_query("/interface/print", NO_PARAMS).await.unwrap_err();
        assert!(matches!(err, RouterError::Fatal(_)));
        assert!(session.is_closed());

        let err = session.run_query("/interface/print", NO_PARAMS).await.unwrap_err();
        assert!(matches!(err, RouterError::ConnectionClosed));
        router.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_session_usable() {
        let mut config = ClientConfig::default();
        config.request_timeout = Duration::from_secs(2);
        let (mut session, mut peer) = pair_with(config);

        let router = tokio::spawn(async move {
            let slow = peer.recv().await;
            let next = peer.recv().await;
            // Late reply for the timed-out command, then the real one.
            peer.reply(&slow, &[&["!re", "=name=late"], &["!done"]]).await;
            peer.reply(&next, &[&["!re", "=name=fresh"], &["!done"]]).await;
            peer
        });

        let err = session.run_query("/tool/fetch", NO_PARAMS).await.unwrap_err();
        assert!(matches!(err, RouterError::Timeout(d) if d == Duration::from_secs(2)));
        assert!(!session.is_closed());

        let records = session.run_query("/interface/print", NO_PARAMS).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "fresh");
        router.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out() {
        let mut config = ClientConfig::default();
        config.request_timeout = Duration::from_secs(1);
        let (client, server) = duplex(16);
        let mut session = Session::new(client, config);

        // The router end stays open but never reads.
        let _server = server;

        let comment = "x".repeat(4096);
        let err = session
            .run_command(
                Command::new("/ppp/secret/add")
                    .param("name", "x")
                    .param("comment", comment),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Timeout(d) if d == Duration::from_secs(1)));

        // Part of the sentence may be on the wire, so the stream is unusable.
        assert!(session.is_closed());
        assert!(matches!(
            session.run_query("/interface/print", NO_PARAMS).await,
            Err(RouterError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_monitor_resolves_early() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let monitor = peer.recv().await;
            assert_eq!(
                monitor.words,
                vec![
                    "/interface/monitor-traffic",
                    "=interface=ether1",
                    "=once=",
                    ".tag=1"
                ]
            );
            peer.reply(&monitor, &[&["!re", "=rx-bits-per-second=1000"]])
                .await;

            let next = peer.recv().await;
            // The monitor's own !done only arrives now.
            peer.reply(&monitor, &[&["!done"]]).await;
            peer.reply(&next, &[&["!re", "=name=ether1"], &["!done"]])
                .await;
            peer
        });

        let records = session
            .run_query("/interface/monitor-traffic", [("name", "ether1")])
            .await
            .unwrap();
        assert_eq!(records[0]["rx-bits-per-second"], "1000");

        let records = session.run_query("/interface/print", NO_PARAMS).await.unwrap();
        assert_eq!(records.len(), 1);
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_untagged_mode() {
        let mut config = ClientConfig::default();
        config.tag_requests = false;
        let (mut session, mut peer) = pair_with(config);

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            assert_eq!(request.words, vec!["/ip/route/print"]);
            assert_eq!(request.request_tag(), None);
            peer.reply(&request, &[&["!re", "=dst-address=0.0.0.0/0"], &["!done"]])
                .await;
            peer
        });

        let records = session.run_query("/ip/route/print", NO_PARAMS).await.unwrap();
        assert_eq!(records[0]["dst-address"], "0.0.0.0/0");
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_command_returns_ret() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let request = peer.recv().await;
            peer.reply(&request, &[&["!done", "=ret=*2A"]]).await;
            peer
        });

        let reply = session
            .run_command(Command::new("/ip/address/add").param("address", "10.0.0.1/24"))
            .await
            .unwrap();
        assert_eq!(reply.ret(), Some("*2A"));
        assert!(reply.records().is_empty());
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_fails_command() {
        let (mut session, mut peer) = pair();

        let router = tokio::spawn(async move {
            let _ = peer.recv().await;
            drop(peer);
        });

        let err = session.run_query("/interface/print", NO_PARAMS).await.unwrap_err();
        assert!(matches!(err, RouterError::ConnectionClosed));
        assert!(err.is_connection_error());
        assert!(session.is_closed());
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut session, _peer) = pair();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(matches!(
            session.login("admin", "x").await,
            Err(RouterError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_invalid_command_keeps_session() {
        let (mut session, _peer) = pair();
        let err = session.run_query("", NO_PARAMS).await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidCommand(_)));
        assert!(!session.is_closed());
    }
}
