//! Helpers for pulling values out of Web of Science record documents.
//!
//! The record JSON served by the API is converted from XML upstream, so the
//! multiplicity of a node is never declared: an element that appears once is
//! serialized as an object, the same element appearing twice becomes a list,
//! and text-only elements collapse to bare scalars. Every helper here first
//! classifies a node into a [`Shape`] and then handles each case explicitly,
//! so callers always get back a sequence or a mapping.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use wrex::extract::{dict_from, list_from, multi_dict_from};
//!
//! # fn example() -> Result<(), wrex::extract::ExtractError> {
//! let single = json!({"full_name": "Doe, Jane"});
//! let many = json!([{"full_name": "Doe, Jane"}, {"full_name": "Roe, Rick"}]);
//! assert_eq!(list_from(&single, Some("full_name"))?.len(), 1);
//! assert_eq!(list_from(&many, Some("full_name"))?.len(), 2);
//!
//! let titles = json!([
//!   {"type": "source", "content": "NATURE"},
//!   {"type": "item", "content": "A paper"}
//! ]);
//! assert_eq!(dict_from(&titles, "type", "content")?["item"], "A paper");
//!
//! let subjects = json!([
//!   {"ascatype": "traditional", "content": "Physics, Applied"},
//!   {"ascatype": "traditional", "content": "Optics"}
//! ]);
//! assert_eq!(
//!   multi_dict_from(&subjects, "ascatype", "content")?["traditional"],
//!   "Physics, Applied; Optics"
//! );
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use serde_json::Map;
use thiserror::Error;

use super::*;

/// Separator placed between values sharing a key in [`multi_dict_from`].
pub const MULTI_VALUE_SEPARATOR: &str = "; ";

/// Why a value could not be extracted from a node.
///
/// These never escape normalization; they are turned into missing fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
  /// An object did not contain the requested key.
  #[error("missing key `{0}`")]
  MissingKey(String),

  /// A node had a shape the helper cannot work with.
  #[error("expected {expected}, found {found}")]
  UnexpectedShape {
    /// The shape the helper needed
    expected: &'static str,
    /// The shape actually found
    found:    &'static str,
  },
}

/// The three shapes a document node can take.
#[derive(Debug, Clone, Copy)]
pub enum Shape<'a> {
  /// A JSON array
  List(&'a [Value]),
  /// A JSON object
  Object(&'a Map<String, Value>),
  /// Anything else: string, number, boolean or null
  Scalar(&'a Value),
}

impl<'a> Shape<'a> {
  /// Classifies a node.
  pub fn of(node: &'a Value) -> Self {
    match node {
      Value::Array(items) => Shape::List(items),
      Value::Object(map) => Shape::Object(map),
      other => Shape::Scalar(other),
    }
  }

  /// A short name for error messages.
  pub fn name(&self) -> &'static str {
    match self {
      Shape::List(_) => "list",
      Shape::Object(_) => "object",
      Shape::Scalar(_) => "scalar",
    }
  }
}

/// Looks `key` up in `node`, which must be an object.
pub fn get<'a>(node: &'a Value, key: &str) -> Result<&'a Value, ExtractError> {
  match Shape::of(node) {
    Shape::Object(map) => map.get(key).ok_or_else(|| ExtractError::MissingKey(key.to_string())),
    shape => Err(ExtractError::UnexpectedShape { expected: "object", found: shape.name() }),
  }
}

/// Follows a sequence of object keys from `node`.
///
/// ```
/// use serde_json::json;
/// use wrex::extract::{lookup, ExtractError};
///
/// let doc = json!({"static_data": {"summary": {"pub_info": {"pubyear": 2019}}}});
/// assert_eq!(lookup(&doc, &["static_data", "summary", "pub_info", "pubyear"]).unwrap(), 2019);
/// assert_eq!(
///   lookup(&doc, &["static_data", "item"]),
///   Err(ExtractError::MissingKey("item".into()))
/// );
/// ```
pub fn lookup<'a>(node: &'a Value, path: &[&str]) -> Result<&'a Value, ExtractError> {
  path.iter().try_fold(node, |current, key| get(current, key))
}

/// Returns `node` as a sequence, optionally projecting `key` off each element.
///
/// - a list is returned element by element (or with `key` taken from each),
/// - a single object becomes a one-element sequence (or its `key`),
/// - any scalar becomes a one-element sequence holding the scalar itself.
///
/// Projecting `key` from an element that lacks it, or from an element that is
/// not an object, is an error.
pub fn list_from<'a>(node: &'a Value, key: Option<&str>) -> Result<Vec<&'a Value>, ExtractError> {
  match (Shape::of(node), key) {
    (Shape::List(items), None) => Ok(items.iter().collect()),
    (Shape::List(items), Some(key)) => items.iter().map(|item| get(item, key)).collect(),
    (Shape::Object(_), Some(key)) => Ok(vec![get(node, key)?]),
    (Shape::Object(_), None) | (Shape::Scalar(_), _) => Ok(vec![node]),
  }
}

/// Collects the `(key_field, value_field)` pairs of a list of entries, or of a
/// single entry object.
fn entries<'a>(
  node: &'a Value,
  key_field: &str,
  value_field: &str,
) -> Result<Vec<(String, &'a Value)>, ExtractError> {
  let items: Vec<&Value> = match Shape::of(node) {
    Shape::List(items) => items.iter().collect(),
    Shape::Object(_) => vec![node],
    shape @ Shape::Scalar(_) =>
      return Err(ExtractError::UnexpectedShape { expected: "list or object", found: shape.name() }),
  };

  items
    .into_iter()
    .map(|item| -> Result<_, ExtractError> {
      Ok((scalar_text(get(item, key_field)?)?, get(item, value_field)?))
    })
    .collect()
}

/// Builds a mapping from each entry's `key_field` to its `value_field`.
///
/// A later entry with the same key replaces an earlier one.
pub fn dict_from<'a>(
  node: &'a Value,
  key_field: &str,
  value_field: &str,
) -> Result<HashMap<String, &'a Value>, ExtractError> {
  Ok(entries(node, key_field, value_field)?.into_iter().collect())
}

/// Like [`dict_from`], but values sharing a key are joined with `"; "`
/// instead of replacing one another.
pub fn multi_dict_from(
  node: &Value,
  key_field: &str,
  value_field: &str,
) -> Result<HashMap<String, String>, ExtractError> {
  let mut merged: HashMap<String, String> = HashMap::new();
  for (key, value) in entries(node, key_field, value_field)? {
    let value = scalar_text(value)?;
    merged
      .entry(key)
      .and_modify(|existing| {
        existing.push_str(MULTI_VALUE_SEPARATOR);
        existing.push_str(&value);
      })
      .or_insert(value);
  }
  Ok(merged)
}

/// Renders a scalar as plain text: strings without quotes, numbers and
/// booleans in their JSON spelling.
pub fn scalar_text(node: &Value) -> Result<String, ExtractError> {
  match node {
    Value::String(s) => Ok(s.clone()),
    Value::Number(n) => Ok(n.to_string()),
    Value::Bool(b) => Ok(b.to_string()),
    other => Err(ExtractError::UnexpectedShape { expected: "scalar", found: Shape::of(other).name() }),
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_list_from_shapes_agree() -> anyhow::Result<()> {
    let author = json!({"full_name": "Doe, Jane", "wos_standard": "Doe, J"});
    let single = list_from(&author, Some("full_name"))?;
    let wrapped_node = json!([author.clone()]);
    let wrapped = list_from(&wrapped_node, Some("full_name"))?;
    let scalar_node = json!("Doe, Jane");
    let scalar = list_from(&scalar_node, None)?;

    for result in [single, wrapped, scalar] {
      assert_eq!(result.len(), 1);
      assert_eq!(result[0], "Doe, Jane");
    }
    Ok(())
  }

  #[test]
  fn test_list_from_without_key() -> anyhow::Result<()> {
    let keywords = json!(["GRAPHENE", "TRANSPORT"]);
    assert_eq!(list_from(&keywords, None)?, vec![&json!("GRAPHENE"), &json!("TRANSPORT")]);

    let object = json!({"a": 1});
    assert_eq!(list_from(&object, None)?, vec![&object]);
    Ok(())
  }

  #[test]
  fn test_list_from_projection_errors() {
    let names = json!([{"full_name": "Doe, Jane"}, {"display_name": "Rick"}]);
    assert_eq!(
      list_from(&names, Some("full_name")),
      Err(ExtractError::MissingKey("full_name".into()))
    );

    let mixed = json!([{"full_name": "Doe, Jane"}, "Rick"]);
    assert!(matches!(
      list_from(&mixed, Some("full_name")),
      Err(ExtractError::UnexpectedShape { expected: "object", found: "scalar" })
    ));
  }

  #[test]
  fn test_dict_from_list_and_single() -> anyhow::Result<()> {
    let identifiers = json!([
      {"type": "doi", "value": "10.1000/xyz"},
      {"type": "issn", "value": "1234-5678"}
    ]);
    let dict = dict_from(&identifiers, "type", "value")?;
    assert_eq!(dict["doi"], "10.1000/xyz");
    assert_eq!(dict["issn"], "1234-5678");

    let single = json!({"type": "doi", "value": "10.1000/xyz"});
    let dict = dict_from(&single, "type", "value")?;
    assert_eq!(dict.len(), 1);
    assert_eq!(dict["doi"], "10.1000/xyz");
    Ok(())
  }

  #[test]
  fn test_dict_from_later_entry_wins() -> anyhow::Result<()> {
    let titles = json!([{"type": "item", "content": "Old"}, {"type": "item", "content": "New"}]);
    assert_eq!(dict_from(&titles, "type", "content")?["item"], "New");
    Ok(())
  }

  #[test]
  fn test_dict_from_rejects_bad_shapes() {
    assert!(matches!(
      dict_from(&json!("doi"), "type", "value"),
      Err(ExtractError::UnexpectedShape { .. })
    ));
    assert_eq!(
      dict_from(&json!({"type": "doi"}), "type", "value"),
      Err(ExtractError::MissingKey("value".into()))
    );
  }

  #[test]
  fn test_multi_dict_from_concatenates() -> anyhow::Result<()> {
    let subjects = json!([
      {"ascatype": "traditional", "content": "A"},
      {"ascatype": "extended", "content": "C"},
      {"ascatype": "traditional", "content": "B"}
    ]);
    let dict = multi_dict_from(&subjects, "ascatype", "content")?;
    assert_eq!(dict["traditional"], "A; B");
    assert_eq!(dict["extended"], "C");
    Ok(())
  }

  #[test]
  fn test_multi_dict_from_single_entry() -> anyhow::Result<()> {
    let subject = json!({"ascatype": "extended", "content": "Physics"});
    assert_eq!(multi_dict_from(&subject, "ascatype", "content")?["extended"], "Physics");
    Ok(())
  }

  #[test]
  fn test_lookup_through_list_is_shape_error() {
    let doc = json!({"address_name": [{"address_spec": {}}, {"address_spec": {}}]});
    assert!(matches!(
      lookup(&doc, &["address_name", "address_spec"]),
      Err(ExtractError::UnexpectedShape { expected: "object", found: "list" })
    ));
  }
}
