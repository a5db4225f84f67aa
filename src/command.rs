//! Outgoing command construction.
//!
//! A [`Command`] is a path plus ordered parameters and a few per-call
//! options. When it is encoded, each parameter becomes one word:
//!
//! ```text
//! /ppp/secret/print  {name: x}   ->  ?name=x     (query filter)
//! /ppp/secret/add    {name: x}   ->  =name=x     (attribute)
//! ```
//!
//! The router does not tell us which commands are queries. [`CommandKind`]
//! guesses from the path text: paths containing `print` or `getall` are
//! queries, paths containing `monitor` are monitors, everything else is an
//! action. This is a heuristic over the command name only, so callers that
//! need a specific word form can bypass it with [`Command::raw_word`].
//!
//! # Example
//!
//! ```
//! use routeros_client::Command;
//!
//! let cmd = Command::new("ppp/secret/print").param("name", "x");
//! assert_eq!(cmd.path(), "/ppp/secret/print");
//! assert_eq!(cmd.words(), vec!["/ppp/secret/print", "?name=x"]);
//! ```

use std::time::Duration;

use crate::error::{RouterError, Result};
use crate::protocol::{Sentence, REQUEST_TAG_PREFIX};

/// Path of the login command.
pub const LOGIN_PATH: &str = "/login";

/// Flag that makes monitor commands emit one snapshot instead of a stream.
pub const ONCE_PARAM: &str = "once";

/// API attribute selecting which properties the router returns.
pub const PROPLIST_PARAM: &str = ".proplist";

/// Rough command category derived from the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Listing commands (`print`, `getall`). Parameters are `?` filters.
    Query,
    /// Live snapshot commands (`monitor`, `monitor-traffic`).
    Monitor,
    /// Everything else (`add`, `set`, `remove`, `/login`, ...).
    Action,
}

impl CommandKind {
    /// Classify a command path.
    pub fn classify(path: &str) -> Self {
        if path.contains("print") || path.contains("getall") {
            CommandKind::Query
        } else if path.contains("monitor") {
            CommandKind::Monitor
        } else {
            CommandKind::Action
        }
    }

    /// Parameter word prefix for this kind.
    #[inline]
    pub fn param_prefix(self) -> char {
        match self {
            CommandKind::Query => '?',
            CommandKind::Monitor | CommandKind::Action => '=',
        }
    }
}

/// One word of the outgoing sentence after the path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    /// `key`/`value` pair, prefixed according to the command kind.
    Param(String, String),
    /// Sent verbatim.
    Raw(String),
}

/// A command ready to be sent to the router.
#[derive(Debug, Clone)]
pub struct Command {
    path: String,
    args: Vec<Arg>,
    collect_all: bool,
    retry: bool,
    timeout: Option<Duration>,
}

impl Command {
    /// Create a command, normalizing the path to start with `/`.
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path.as_ref().trim();
        let path = if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Self {
            path,
            args: Vec::new(),
            collect_all: false,
            retry: true,
            timeout: None,
        }
    }

    /// Add a parameter.
    ///
    /// A leading `?` or `=` on the key is dropped; the prefix is chosen from
    /// the command kind when the sentence is built.
    pub fn param(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let key = key.as_ref().trim_start_matches(['?', '=']).to_string();
        self.args.push(Arg::Param(key, value.into()));
        self
    }

    /// Add several parameters in iteration order.
    pub fn params<I, K, V>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        params
            .into_iter()
            .fold(self, |cmd, (k, v)| cmd.param(k, v))
    }

    /// Add a word sent exactly as given (e.g. `?#|` query operators).
    pub fn raw_word(mut self, word: impl Into<String>) -> Self {
        self.args.push(Arg::Raw(word.into()));
        self
    }

    /// Keep the final `!done` in the reply even if it carries no attributes.
    pub fn collect_all(mut self) -> Self {
        self.collect_all = true;
        self
    }

    /// Don't re-login and resubmit when the router says "not logged in".
    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    /// Override the per-command timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Normalized command path.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Command category guessed from the path.
    #[inline]
    pub fn kind(&self) -> CommandKind {
        CommandKind::classify(&self.path)
    }

    /// True for monitor-style commands, which resolve on their first row.
    #[inline]
    pub fn is_monitor(&self) -> bool {
        self.kind() == CommandKind::Monitor
    }

    /// True for `/login`.
    #[inline]
    pub fn is_login(&self) -> bool {
        self.path == LOGIN_PATH
    }

    #[inline]
    pub fn wants_all(&self) -> bool {
        self.collect_all
    }

    #[inline]
    pub fn retry_enabled(&self) -> bool {
        self.retry
    }

    /// Per-command timeout override, if set.
    #[inline]
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// Value of a parameter by key, as it will be sent.
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.effective_params()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Copy of this command that will not retry.
    pub(crate) fn without_retry(&self) -> Self {
        Self {
            retry: false,
            ..self.clone()
        }
    }

    /// Parameters after monitor remapping.
    fn effective_params(&self) -> Vec<(String, &str)> {
        let params = self.args.iter().filter_map(|arg| match arg {
            Arg::Param(k, v) => Some((k.as_str(), v.as_str())),
            Arg::Raw(_) => None,
        });

        if !self.is_monitor() {
            return params.map(|(k, v)| (k.to_string(), v)).collect();
        }

        let traffic = self.path.contains("monitor-traffic");
        let mut out: Vec<(String, &str)> = Vec::new();
        for (key, value) in params {
            let key = match key {
                "name" | "interface" if traffic => "interface",
                "proplist" | PROPLIST_PARAM => PROPLIST_PARAM,
                ONCE_PARAM => continue,
                other => other,
            };
            out.retain(|(k, _)| k != key);
            out.push((key.to_string(), value));
        }
        out.push((ONCE_PARAM.to_string(), ""));
        out
    }

    /// Encoded words: the path, then one word per parameter.
    pub fn words(&self) -> Vec<String> {
        let prefix = self.kind().param_prefix();

        let mut words = Vec::with_capacity(self.args.len() + 2);
        words.push(self.path.clone());

        for (key, value) in self.effective_params() {
            // `.proplist` is an attribute even on queries.
            let prefix = if key == PROPLIST_PARAM { '=' } else { prefix };
            words.push(format!("{}{}={}", prefix, key, value));
        }

        words.extend(self.args.iter().filter_map(|arg| match arg {
            Arg::Raw(word) => Some(word.clone()),
            Arg::Param(..) => None,
        }));

        words
    }

    /// Build the sentence to send, optionally tagged with a request id.
    pub fn to_sentence(&self, tag: Option<u64>) -> Result<Sentence> {
        if self.path.is_empty() || self.path == "/" {
            return Err(RouterError::InvalidCommand("empty command path".to_string()));
        }

        let mut words = self.words();
        if let Some(tag) = tag {
            words.push(format!("{}{}", REQUEST_TAG_PREFIX, tag));
        }
        Ok(Sentence { words })
    }
}

impl From<&str> for Command {
    fn from(path: &str) -> Self {
        Command::new(path)
    }
}

impl From<String> for Command {
    fn from(path: String) -> Self {
        Command::new(path)
    }
}
