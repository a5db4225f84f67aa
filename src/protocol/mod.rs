//! Protocol module - length codec, sentence framing, reply translation.
//!
//! This module implements the router API wire format:
//! - variable-width word length prefix
//! - sentence buffer for reassembling fragmented reads
//! - sentence type with reply classification
//! - conversion of `!re` sentences into attribute maps

mod length;
mod response;
mod sentence;
mod sentence_buffer;

pub use length::{
    decode_length, encode_length, encoded_size, MAX_1_BYTE, MAX_2_BYTE, MAX_3_BYTE, MAX_4_BYTE,
    MAX_PREFIX_SIZE,
};
pub use response::{parse_records, to_record, Record, Reply};
pub use sentence::{
    encode_sentence, encode_word, ReplyKind, Sentence, REQUEST_TAG_PREFIX, TAG_DONE, TAG_EMPTY,
    TAG_FATAL, TAG_RE, TAG_TRAP,
};
pub use sentence_buffer::{SentenceBuffer, DEFAULT_MAX_WORD_SIZE};
