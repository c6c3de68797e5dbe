//! JSON-LD value shapes used by opendatacommunities.org
//!
//! Every property of a resource is an array of either literals
//! (`{"@value": "...", "@type": "..."}`) or references (`{"@id": "..."}`).
//! Field mappings read them through [`first_or_default`].

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::parse::first_or_default;

/// A typed or plain literal
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Literal {
    #[serde(rename = "@value", default, deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(rename = "@type", default)]
    pub datatype: Option<String>,
}

/// A reference to another resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Resource {
    #[serde(rename = "@id", default)]
    pub id: String,
}

/// Value of the first literal, or `""`.
pub fn first_value(literals: &[Literal]) -> String {
    first_or_default(literals).value
}

/// Identifier of the first reference, or `""`.
pub fn first_id(resources: &[Resource]) -> String {
    first_or_default(resources).id
}

/// Natural key of the parent of type `kind` (e.g. `"postcodedistrict"`) in a
/// "within" relation list, matched by substring of the parent URI. When
/// several match, the last one wins. `""` when none do.
pub fn parent_reference(within: &[Resource], kind: &str) -> String {
    within
        .iter()
        .filter(|parent| parent.id.contains(kind))
        .next_back()
        .map(|parent| parent.id.clone())
        .unwrap_or_default()
}

/// Accept a JSON string, number or boolean as a literal's text.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Number(number) => Ok(number.to_string()),
        serde_json::Value::Bool(flag) => Ok(flag.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!(
            "expected a scalar @value, found {}",
            other
        ))),
    }
}

/// Accept either `[item, ...]` or a bare `item` for a property.
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}
