//! nbformat "multiline strings".
//!
//! On disk a text field is either a single string or a list of lines that
//! are concatenated. In memory it is always one `String`. Writing splits
//! after each newline, the way Jupyter itself writes sources.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Single(String),
    Lines(Vec<String>),
}

pub fn serialize<S: Serializer>(text: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(text.split_inclusive('\n'))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Repr::deserialize(deserializer)? {
        Repr::Single(text) => text,
        Repr::Lines(lines) => lines.concat(),
    })
}

/// Join a JSON value holding a multiline string into one `String`.
pub(crate) fn join_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|lines| lines.concat()),
        _ => None,
    }
}
