//! Client builder and shared handle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the
//! connection. The [`Client`] wraps one [`Session`] behind a
//! `tokio::sync::Mutex`, so clones can be used from many tasks while the
//! router still sees one command at a time. The mutex grants access in
//! FIFO order, which makes it the request queue.
//!
//! # Example
//!
//! ```ignore
//! use routeros_client::{Client, NO_PARAMS};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("192.168.88.1")
//!         .credentials("admin", "secret")
//!         .connect()
//!         .await?;
//!
//!     for row in client.run_query("/interface/print", NO_PARAMS).await? {
//!         println!("{}", row["name"]);
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::command::Command;
use crate::config::{ClientConfig, Credentials};
use crate::error::Result;
use crate::protocol::{Record, Reply};
use crate::session::Session;
use crate::transport::connect_tcp;

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    config: ClientConfig,
    credentials: Option<Credentials>,
}

impl ClientBuilder {
    /// Create a builder for `host` with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(host))
    }

    /// Start from an existing config.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            credentials: None,
        }
    }

    /// Set the API port.
    ///
    /// Default: 8728
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the TCP connect timeout.
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-command timeout.
    ///
    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the timeout for monitor-style commands.
    ///
    /// Default: 10 seconds
    pub fn monitor_timeout(mut self, timeout: Duration) -> Self {
        self.config.monitor_timeout = timeout;
        self
    }

    /// Enable or disable `.tag` request tagging.
    ///
    /// Default: enabled
    pub fn tag_requests(mut self, enabled: bool) -> Self {
        self.config.tag_requests = enabled;
        self
    }

    /// Set the largest word accepted from the router.
    pub fn max_word_size(mut self, bytes: u32) -> Self {
        self.config.max_word_size = bytes;
        self
    }

    /// Log in right after connecting.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Open the connection, and log in if credentials were given.
    pub async fn connect(self) -> Result<Client> {
        let client = Client::connect(self.config).await?;
        if let Some(credentials) = self.credentials {
            client
                .login(&credentials.username, &credentials.password)
                .await?;
        }
        Ok(client)
    }
}

/// Cloneable handle to one router session.
pub struct Client<S = TcpStream> {
    session: Arc<Mutex<Session<S>>>,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl Client<TcpStream> {
    /// Create a new client builder.
    pub fn builder(host: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(host)
    }

    /// Connect without logging in.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let stream = connect_tcp(&config).await?;
        Ok(Self::from_session(Session::new(stream, config)))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Share an existing session.
    pub fn from_session(session: Session<S>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Log in. See [`Session::login`].
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.session.lock().await.login(username, password).await
    }

    /// Run one command and return its rows. See [`Session::run_query`].
    pub async fn run_query<I, K, V>(&self, command: &str, params: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.session.lock().await.run_query(command, params).await
    }

    /// Run one command and return the raw reply. See [`Session::run_command`].
    pub async fn run_command(&self, command: impl Into<Command>) -> Result<Reply> {
        self.session.lock().await.run_command(command.into()).await
    }

    /// Close the connection. Later calls on any clone fail.
    pub async fn close(&self) -> Result<()> {
        self.session.lock().await.close().await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.lock().await.is_logged_in()
    }

    pub async fn is_closed(&self) -> bool {
        self.session.lock().await.is_closed()
    }
}
