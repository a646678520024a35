//! A minimal JSON value tree tailored to the canonical form: object keys
//! are kept in sorted order, numbers are integer-only, and there is no
//! representation for insignificant whitespace to begin with.

use requiem_error::{ErrorCode, RequiemError};

/// A JSON value restricted to what the canonical form allows.
///
/// Unlike `serde_json::Value`, [`CanonicalValue::Object`] stores its
/// entries as a sorted `Vec<(String, CanonicalValue)>` rather than a map:
/// the sort order *is* the canonical form, so it is made explicit and
/// checked once at construction time instead of being an accident of
/// whichever map implementation happens to be linked in.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    /// JSON `null`.
    Null,
    /// JSON `true`/`false`.
    Bool(bool),
    /// A signed integer. Used for negative numbers.
    Int(i64),
    /// An unsigned integer. Used whenever the value doesn't fit in `i64`.
    UInt(u64),
    /// A JSON string.
    String(String),
    /// A JSON array. Order is significant and preserved.
    Array(Vec<CanonicalValue>),
    /// A JSON object. Entries are sorted by key, codepoint order, and
    /// keys are guaranteed unique.
    Object(Vec<(String, CanonicalValue)>),
}

impl CanonicalValue {
    /// Build an object from unsorted entries, sorting by key.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::JsonDuplicateKey`] if two entries share a key.
    pub fn object(mut entries: Vec<(String, CanonicalValue)>) -> Result<Self, RequiemError> {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for w in entries.windows(2) {
            if w[0].0 == w[1].0 {
                return Err(RequiemError::new(
                    ErrorCode::JsonDuplicateKey,
                    format!("duplicate object key: {:?}", w[0].0),
                ));
            }
        }
        Ok(Self::Object(entries))
    }

    /// Look up a key in an object value. Returns `None` for non-objects.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CanonicalValue> {
        match self {
            Self::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Remove a key from an object value in place, returning it if present.
    /// No-op on non-objects.
    pub fn remove(&mut self, key: &str) -> Option<CanonicalValue> {
        match self {
            Self::Object(entries) => {
                let idx = entries.iter().position(|(k, _)| k == key)?;
                Some(entries.remove(idx).1)
            }
            _ => None,
        }
    }

    /// Insert or replace a key in an object value, preserving sort order.
    /// No-op on non-objects.
    pub fn insert(&mut self, key: String, value: CanonicalValue) {
        if let Self::Object(entries) = self {
            match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(idx) => entries[idx].1 = value,
                Err(idx) => entries.insert(idx, (key, value)),
            }
        }
    }

    /// Convert a `serde_json::Value` into a [`CanonicalValue`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::JsonParseError`] if the tree contains a
    /// floating-point number, or [`ErrorCode::JsonDuplicateKey`] if (in
    /// principle) a map conversion produced duplicate keys.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, RequiemError> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Self::UInt(u))
                } else {
                    Err(RequiemError::new(
                        ErrorCode::JsonParseError,
                        format!("floating-point numbers are forbidden in canonical form: {n}"),
                    ))
                }
            }
            serde_json::Value::String(s) => Ok(Self::String(s.clone())),
            serde_json::Value::Array(arr) => {
                let items = arr
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Array(items))
            }
            serde_json::Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| Self::from_json(v).map(|cv| (k.clone(), cv)))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::object(entries)
            }
        }
    }

    /// Convert back into a `serde_json::Value` for interop with `serde`
    /// deserialization of concrete request/result types.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::Number((*i).into()),
            Self::UInt(u) => serde_json::Value::Number((*u).into()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}
