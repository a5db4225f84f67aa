//! # routeros-client
//!
//! Async client for the RouterOS binary API.
//!
//! The API runs over a plain TCP connection. Requests and replies are
//! sentences: lists of length-prefixed UTF-8 words ending with an empty
//! word. Replies start with `!re` (a data row), `!done` (finished),
//! `!trap` (command failed) or `!fatal` (connection failed).
//!
//! ## Architecture
//!
//! - **Protocol**: length codec, sentence framing and reassembly, reply
//!   translation (no I/O)
//! - **Session**: one stream, one reassembly buffer, one command in flight;
//!   login (modern and legacy), retry after "not logged in", timeouts
//! - **Client**: cloneable handle that queues callers onto one session
//!
//! ## Example
//!
//! ```ignore
//! use routeros_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("192.168.88.1")
//!         .credentials("admin", "secret")
//!         .connect()
//!         .await?;
//!
//!     client
//!         .run_query("/ppp/secret/add", [("name", "alice"), ("password", "pw")])
//!         .await?;
//!     let secrets = client
//!         .run_query("/ppp/secret/print", [("name", "alice")])
//!         .await?;
//!     println!("{:?}", secrets);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;

pub use client::{Client, ClientBuilder};
pub use command::{Command, CommandKind};
pub use config::{ClientConfig, Credentials};
pub use error::{Result, RouterError};
pub use protocol::{Record, Reply};
pub use session::{Session, SessionState, NO_PARAMS};
