//! Field-map records exchanged with the manager.
//!
//! A [`Record`] is one complete protocol frame: a response, an event, or an
//! outbound action. Field order on the wire carries no meaning, so the record
//! is a plain map; serialization picks a deterministic order instead.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Field naming the command of an outbound action.
pub const ACTION: &str = "Action";
/// Field marking a record as a response to an action.
pub const RESPONSE: &str = "Response";
/// Field marking a record as an unsolicited event.
pub const EVENT: &str = "Event";
/// Human-readable detail carried by responses.
pub const MESSAGE: &str = "Message";

/// One protocol frame: field name to field value.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record(HashMap<String, String>);

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an outbound action named `name`.
    ///
    /// ```
    /// use ami_link::ami::record::Record;
    ///
    /// let action = Record::action("Originate").with("Channel", "SIP/100");
    /// assert_eq!(action.action_name(), Some("Originate"));
    /// ```
    #[must_use]
    pub fn action(name: impl Into<String>) -> Self {
        Self::new().with(ACTION, name)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Action` field, if any.
    #[must_use]
    pub fn action_name(&self) -> Option<&str> {
        self.get(ACTION)
    }

    /// `Response` field, if any.
    #[must_use]
    pub fn response(&self) -> Option<&str> {
        self.get(RESPONSE)
    }

    /// `Event` field, if any.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.get(EVENT)
    }

    /// `Message` field, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.get(MESSAGE)
    }

    /// Whether this is a `Response: Error` record.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response() == Some("Error")
    }

    /// Fields in wire order: `Action` first, the rest by ascending key.
    pub(crate) fn wire_fields(&self) -> Vec<(&str, &str)> {
        let mut fields: Vec<(&str, &str)> = self.iter().collect();
        fields.sort_by(|(a, _), (b, _)| (*a != ACTION).cmp(&(*b != ACTION)).then(a.cmp(b)));
        fields
    }
}

impl fmt::Debug for Record {
    /// Login secrets never reach logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.wire_fields() {
            if key.eq_ignore_ascii_case("Secret") {
                map.entry(&key, &"<redacted>");
            } else {
                map.entry(&key, &value);
            }
        }
        map.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<HashMap<String, String>> for Record {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl From<Record> for HashMap<String, String> {
    fn from(record: Record) -> Self {
        record.0
    }
}
