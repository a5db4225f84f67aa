//! Sentence type with typed accessors.
//!
//! A sentence is an ordered list of words. The first word is the tag: a
//! command path for outgoing sentences, or one of the reply tags for
//! incoming ones. On the wire each word is a length prefix followed by its
//! UTF-8 bytes and the sentence ends with a zero-length word.
//!
//! # Example
//!
//! ```
//! use routeros_client::protocol::{ReplyKind, Sentence};
//!
//! let sentence = Sentence::new(vec!["!re", "=name=ether1", "=mtu=1500"]);
//!
//! assert_eq!(sentence.kind(), ReplyKind::Re);
//! assert_eq!(sentence.attribute("name"), Some("ether1"));
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::length::{encode_length, encoded_size};
use crate::error::{RouterError, Result};

/// Reply tag: one data row.
pub const TAG_RE: &str = "!re";
/// Reply tag: command finished.
pub const TAG_DONE: &str = "!done";
/// Reply tag: command failed, connection still usable.
pub const TAG_TRAP: &str = "!trap";
/// Reply tag: connection-level failure.
pub const TAG_FATAL: &str = "!fatal";
/// Reply tag: query matched nothing (newer routers, followed by `!done`).
pub const TAG_EMPTY: &str = "!empty";

/// Prefix of the API attribute that carries a request tag.
pub const REQUEST_TAG_PREFIX: &str = ".tag=";

/// Classification of a sentence by its first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Re,
    Done,
    Trap,
    Fatal,
    Empty,
    /// Any other leading word, including outgoing command paths.
    Other,
}

impl ReplyKind {
    /// Classify a tag word.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            TAG_RE => ReplyKind::Re,
            TAG_DONE => ReplyKind::Done,
            TAG_TRAP => ReplyKind::Trap,
            TAG_FATAL => ReplyKind::Fatal,
            TAG_EMPTY => ReplyKind::Empty,
            _ => ReplyKind::Other,
        }
    }
}

/// A complete sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    /// Words in order, tag first. Never contains the empty terminator.
    pub words: Vec<String>,
}

impl Sentence {
    /// Create a sentence from its words.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    /// First word, or `""` for an empty sentence.
    #[inline]
    pub fn tag(&self) -> &str {
        self.words.first().map(String::as_str).unwrap_or("")
    }

    /// Reply classification of the tag.
    #[inline]
    pub fn kind(&self) -> ReplyKind {
        ReplyKind::from_tag(self.tag())
    }

    /// Words after the tag.
    #[inline]
    pub fn body(&self) -> &[String] {
        self.words.get(1..).unwrap_or(&[])
    }

    /// Iterate `=key=value` attributes after the tag.
    ///
    /// Words that don't start with `=` are skipped. Only the first `=` after
    /// the leading one separates key from value, so values may contain `=`.
    /// A word with no second `=` yields an empty value.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.body().iter().filter_map(|word| split_attribute(word))
    }

    /// Value of the first attribute named `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// True if the sentence carries any `=key=value` attribute.
    pub fn has_attributes(&self) -> bool {
        self.attributes().next().is_some()
    }

    /// Request tag echoed by the router (`.tag=<n>`), if any.
    pub fn request_tag(&self) -> Option<&str> {
        self.body()
            .iter()
            .find_map(|word| word.strip_prefix(REQUEST_TAG_PREFIX))
    }

    /// Free-form words after the tag joined with spaces, `.tag=` excluded.
    ///
    /// `!fatal` replies carry their reason this way rather than as attributes.
    pub fn text(&self) -> String {
        self.body()
            .iter()
            .filter(|word| !word.starts_with(REQUEST_TAG_PREFIX))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Encode this sentence, terminator included.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        encode_sentence(&self.words, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Size of the encoded sentence in bytes.
    pub fn encoded_len(&self) -> usize {
        self.words
            .iter()
            .map(|w| encoded_size(w.len().min(u32::MAX as usize) as u32) + w.len())
            .sum::<usize>()
            + 1
    }
}

/// Split an `=key=value` word.
pub(crate) fn split_attribute(word: &str) -> Option<(&str, &str)> {
    let rest = word.strip_prefix('=')?;
    Some(rest.split_once('=').unwrap_or((rest, "")))
}

/// Encode one word: length prefix then bytes.
pub fn encode_word<B: BufMut>(word: &str, out: &mut B) -> Result<()> {
    let len = u32::try_from(word.len()).map_err(|_| {
        RouterError::Protocol(format!("Word of {} bytes is too long to encode", word.len()))
    })?;
    encode_length(len, out);
    out.put_slice(word.as_bytes());
    Ok(())
}

/// Encode a whole sentence followed by the zero-length terminator.
///
/// Empty words are skipped: a zero-length word would end the sentence early.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use routeros_client::protocol::encode_sentence;
///
/// let mut buf = BytesMut::new();
/// encode_sentence(&["/login"], &mut buf).unwrap();
/// assert_eq!(&buf[..], b"\x06/login\x00");
/// ```
pub fn encode_sentence<S: AsRef<str>>(words: &[S], out: &mut BytesMut) -> Result<()> {
    for word in words {
        let word = word.as_ref();
        if word.is_empty() {
            continue;
        }
        encode_word(word, out)?;
    }
    out.put_u8(0);
    Ok(())
}
