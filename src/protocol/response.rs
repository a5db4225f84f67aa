//! Translation of data sentences into attribute maps.

use std::collections::HashMap;

use super::{ReplyKind, Sentence};

/// One data row: attribute name to value.
pub type Record = HashMap<String, String>;

/// Sentences kept for one completed command.
///
/// Holds every `!re` row plus the final `!done` when it carried attributes
/// or the command asked for everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub sentences: Vec<Sentence>,
}

impl Reply {
    /// Data rows as records. Empty when the router sent no `!re`.
    pub fn records(&self) -> Vec<Record> {
        parse_records(&self.sentences)
    }

    /// The kept `!done` sentence, if any.
    pub fn done(&self) -> Option<&Sentence> {
        self.sentences.iter().find(|s| s.kind() == ReplyKind::Done)
    }

    /// Attributes of the kept `!done` (empty if none).
    pub fn done_attributes(&self) -> Record {
        self.done().map(to_record).unwrap_or_default()
    }

    /// `=ret=` value of the `!done`: the new id after `add`, the challenge
    /// on legacy login.
    pub fn ret(&self) -> Option<&str> {
        self.done().and_then(|s| s.attribute("ret"))
    }

    /// True when no sentence was kept.
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Build a record from the `=key=value` words of a sentence.
///
/// Words not starting with `=` (the tag, `.tag=` words, stray text) are
/// ignored. A repeated key keeps its last value.
pub fn to_record(sentence: &Sentence) -> Record {
    sentence
        .attributes()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Convert `!re` sentences into records, in sentence order.
///
/// Sentences with any other tag contribute nothing.
///
/// # Example
///
/// ```
/// use routeros_client::protocol::{parse_records, Sentence};
///
/// let replies = vec![
///     Sentence::new(vec!["!re", "=name=foo", "=profile=default"]),
///     Sentence::new(vec!["!done"]),
/// ];
///
/// let records = parse_records(&replies);
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0]["profile"], "default");
/// ```
pub fn parse_records(sentences: &[Sentence]) -> Vec<Record> {
    sentences
        .iter()
        .filter(|s| s.kind() == ReplyKind::Re)
        .map(to_record)
        .collect()
}
