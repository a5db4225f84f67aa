//! Sentence buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for the reassembly buffer. TCP delivers the
//! router's replies in arbitrary fragments, so the buffer keeps:
//! - the undecoded suffix, starting at the first incomplete length prefix
//!   or word payload
//! - the words of the sentence currently being assembled
//!
//! Feeding a stream in one chunk or split at any byte boundaries yields the
//! same sentences in the same order.
//!
//! # Example
//!
//! ```
//! use routeros_client::protocol::SentenceBuffer;
//!
//! let mut buffer = SentenceBuffer::new();
//!
//! assert!(buffer.push(b"\x05!do").unwrap().is_empty());
//! let sentences = buffer.push(b"ne\x00").unwrap();
//!
//! assert_eq!(sentences.len(), 1);
//! assert_eq!(sentences[0].tag(), "!done");
//! ```

use bytes::{Buf, BytesMut};

use super::length::decode_length;
use super::Sentence;
use crate::error::{RouterError, Result};

/// Default largest accepted word (16 MiB).
pub const DEFAULT_MAX_WORD_SIZE: u32 = 16 * 1024 * 1024;

/// Outcome of decoding the word at the front of the buffer.
enum Word {
    /// Zero-length word: the current sentence is complete.
    Terminator,
    /// A complete word.
    Data(String),
}

/// Buffer for accumulating incoming bytes and extracting complete sentences.
pub struct SentenceBuffer {
    /// Bytes received but not yet decoded.
    buffer: BytesMut,
    /// Words of the sentence in progress.
    current: Vec<String>,
    /// Maximum allowed word size.
    max_word_size: u32,
}

impl SentenceBuffer {
    /// Create a new sentence buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_word_size(DEFAULT_MAX_WORD_SIZE)
    }

    /// Create a new sentence buffer with a custom word size limit.
    pub fn with_max_word_size(max_word_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            current: Vec::new(),
            max_word_size,
        }
    }

    /// Push data into the buffer and extract all complete sentences.
    ///
    /// Returns the sentences completed by this chunk, oldest first (may be
    /// empty). Sentences without words are dropped. Incomplete data stays
    /// buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns error on a reserved control byte in length position or a
    /// word larger than the configured maximum. The buffer contents are
    /// unspecified afterwards; call [`clear`](Self::clear) before reuse.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Sentence>> {
        self.buffer.extend_from_slice(data);

        let mut sentences = Vec::new();

        while let Some(word) = self.try_extract_word()? {
            match word {
                Word::Data(word) => self.current.push(word),
                Word::Terminator => {
                    if self.current.is_empty() {
                        continue;
                    }
                    let sentence = Sentence {
                        words: std::mem::take(&mut self.current),
                    };
                    tracing::trace!(tag = sentence.tag(), words = sentence.words.len(), "sentence decoded");
                    sentences.push(sentence);
                }
            }
        }

        Ok(sentences)
    }

    /// Try to take one word off the front of the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(word))` if a complete word was extracted
    /// - `Ok(None)` if more data is needed (nothing is consumed)
    /// - `Err(...)` on a protocol violation
    fn try_extract_word(&mut self) -> Result<Option<Word>> {
        let Some((len, prefix)) = decode_length(&self.buffer)? else {
            return Ok(None);
        };

        if len > self.max_word_size {
            return Err(RouterError::Protocol(format!(
                "Word size {} exceeds maximum {}",
                len, self.max_word_size
            )));
        }

        let len = len as usize;
        if self.buffer.len() < prefix + len {
            return Ok(None);
        }

        self.buffer.advance(prefix);
        if len == 0 {
            return Ok(Some(Word::Terminator));
        }

        let payload = self.buffer.split_to(len);
        let word = match String::from_utf8(payload.to_vec()) {
            Ok(word) => word,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };

        Ok(Some(Word::Data(word)))
    }

    /// Get the number of undecoded bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if there are no undecoded bytes and no partial sentence.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.current.is_empty()
    }

    /// Number of words collected for the sentence in progress.
    pub fn partial_words(&self) -> usize {
        self.current.len()
    }

    /// Drop all buffered data and the partial sentence.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.current.clear();
    }
}

impl Default for SentenceBuffer {
    fn default() -> Self {
        Self::new()
    }
}
