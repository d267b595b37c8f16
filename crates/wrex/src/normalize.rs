//! Conversion of raw record documents into canonical [`FieldMap`]s.
//!
//! Every canonical field has exactly one navigation path into the record
//! document. Fields fall into three groups:
//! - plain lookups that end at a scalar (or a list of scalars),
//! - sequences built with [`list_from`] (authors, keywords),
//! - fields read off an intermediate mapping that is built once per group with
//!   [`dict_from`] or [`multi_dict_from`] (titles, identifiers, categories).
//!
//! A field whose path is absent or has an unexpected shape is recorded in
//! [`FieldMap::missing`] and the remaining fields are still extracted; the
//! end-of-record marker is always present.

use std::collections::HashMap;

use super::*;
use crate::extract::{dict_from, list_from, lookup, multi_dict_from, scalar_text, ExtractError};

/// Path to the record summary.
const SUMMARY: [&str; 2] = ["static_data", "summary"];
/// Path to the full record metadata.
const FULLRECORD: [&str; 2] = ["static_data", "fullrecord_metadata"];

/// Plain lookups: the code and its path under the record root.
const SCALAR_FIELDS: &[(FieldCode, &[&str])] = &[
  (FieldCode::DocumentType, &["static_data", "summary", "doctypes", "doctype"]),
  (FieldCode::Abstract, &[
    "static_data",
    "fullrecord_metadata",
    "abstracts",
    "abstract",
    "abstract_text",
    "p",
  ]),
  (FieldCode::ReprintAddress, &[
    "static_data",
    "fullrecord_metadata",
    "reprint_addresses",
    "address_name",
    "address_spec",
    "full_address",
  ]),
  (FieldCode::CitedReferenceCount, &["static_data", "fullrecord_metadata", "refs", "count"]),
  (FieldCode::TimesCited, &[
    "dynamic_data",
    "citation_related",
    "tc_list",
    "silo_tc",
    "local_count",
  ]),
  (FieldCode::Publisher, &[
    "static_data",
    "summary",
    "publishers",
    "publisher",
    "names",
    "name",
    "full_name",
  ]),
  (FieldCode::PublisherCity, &[
    "static_data",
    "summary",
    "publishers",
    "publisher",
    "address_spec",
    "city",
  ]),
  (FieldCode::PublisherAddress, &[
    "static_data",
    "summary",
    "publishers",
    "publisher",
    "address_spec",
    "full_address",
  ]),
  (FieldCode::PublicationDate, &["static_data", "summary", "pub_info", "pubmonth"]),
  (FieldCode::PublicationYear, &["static_data", "summary", "pub_info", "pubyear"]),
  (FieldCode::Volume, &["static_data", "summary", "pub_info", "vol"]),
  (FieldCode::Issue, &["static_data", "summary", "pub_info", "issue"]),
  (FieldCode::BeginningPage, &["static_data", "summary", "pub_info", "page", "begin"]),
  (FieldCode::EndingPage, &["static_data", "summary", "pub_info", "page", "end"]),
  (FieldCode::PageCount, &["static_data", "summary", "pub_info", "page", "page_count"]),
  (FieldCode::DocumentDeliveryNumber, &["static_data", "item", "ids", "content"]),
  (FieldCode::AccessionNumber, &["UID"]),
];

/// Title group: dictionary key per code.
const TITLE_FIELDS: [(FieldCode, &str); 4] = [
  (FieldCode::Title, "item"),
  (FieldCode::SourceTitle, "source"),
  (FieldCode::SourceAbbreviation, "abbrev_29"),
  (FieldCode::IsoSourceAbbreviation, "abbrev_iso"),
];

/// Identifier group: dictionary key per code.
const IDENTIFIER_FIELDS: [(FieldCode, &str); 5] = [
  (FieldCode::ArticleNumber, "art_no"),
  (FieldCode::Doi, "doi"),
  (FieldCode::PubmedId, "pmid"),
  (FieldCode::Issn, "issn"),
  (FieldCode::EIssn, "eissn"),
];

/// Subject category group: dictionary key per code.
const CATEGORY_FIELDS: [(FieldCode, &str); 2] =
  [(FieldCode::WosCategories, "traditional"), (FieldCode::ResearchAreas, "extended")];

/// Joins a group prefix and a relative path.
fn path<'a>(prefix: &[&'a str], rest: &[&'a str]) -> Vec<&'a str> {
  prefix.iter().chain(rest).copied().collect()
}

/// Normalizes one raw record into its canonical fields.
///
/// This never fails: anything that cannot be resolved ends up in
/// [`FieldMap::missing`].
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wrex::{normalize::normalize, FieldCode};
///
/// let record = json!({
///   "UID": "WOS:000123456700001",
///   "static_data": {"summary": {"pub_info": {"pubyear": 2019, "pubtype": "Journal"}}}
/// });
/// let fields = normalize(&record);
/// assert_eq!(fields.get(FieldCode::PublicationType).unwrap().to_string(), "J");
/// assert_eq!(fields.get(FieldCode::PublicationYear).unwrap().to_string(), "2019");
/// assert!(fields.contains(FieldCode::EndOfRecord));
/// assert!(fields.missing().contains(&FieldCode::Doi));
/// ```
pub fn normalize(raw: &Value) -> FieldMap {
  let mut fields = FieldMap::new();

  fields.resolve(FieldCode::PublicationType, publication_type(raw));
  fields.resolve(FieldCode::Language, language(raw));

  for (code, field_path) in SCALAR_FIELDS {
    fields.resolve(*code, lookup(raw, field_path).and_then(FieldValue::from_node));
  }

  let names = lookup(raw, &path(&SUMMARY, &["names", "name"]));
  fields.resolve(
    FieldCode::Authors,
    names.clone().and_then(|n| FieldValue::from_nodes(&list_from(n, Some("wos_standard"))?)),
  );
  fields.resolve(
    FieldCode::AuthorFullNames,
    names.and_then(|n| FieldValue::from_nodes(&list_from(n, Some("full_name"))?)),
  );
  fields.resolve(
    FieldCode::KeywordsPlus,
    lookup(raw, &["static_data", "item", "keywords_plus", "keyword"])
      .and_then(|k| FieldValue::from_nodes(&list_from(k, None)?)),
  );
  fields.resolve(
    FieldCode::AuthorKeywords,
    lookup(raw, &path(&FULLRECORD, &["keywords", "keyword"]))
      .and_then(|k| FieldValue::from_nodes(&list_from(k, None)?)),
  );

  let titles = lookup(raw, &path(&SUMMARY, &["titles", "title"]))
    .and_then(|t| dict_from(t, "type", "content"));
  resolve_group(&mut fields, &TITLE_FIELDS, titles.map(text_values));

  let identifiers = lookup(raw, &["dynamic_data", "cluster_related", "identifiers", "identifier"])
    .and_then(|i| dict_from(i, "type", "value"));
  resolve_group(&mut fields, &IDENTIFIER_FIELDS, identifiers.map(text_values));

  let categories = lookup(raw, &path(&FULLRECORD, &["category_info", "subjects", "subject"]))
    .and_then(|s| multi_dict_from(s, "ascatype", "content"));
  resolve_group(&mut fields, &CATEGORY_FIELDS, categories);

  fields.insert(FieldCode::EndOfRecord, "");
  fields
}

/// `PT` is the first letter of the publication type (`Journal` → `J`).
fn publication_type(raw: &Value) -> Result<FieldValue, ExtractError> {
  let pubtype = scalar_text(lookup(raw, &path(&SUMMARY, &["pub_info", "pubtype"]))?)?;
  pubtype
    .chars()
    .next()
    .map(|c| FieldValue::Text(c.to_string()))
    .ok_or(ExtractError::UnexpectedShape { expected: "non-empty text", found: "empty text" })
}

/// `LA` is the single language, or the `primary` one when several are listed.
fn language(raw: &Value) -> Result<FieldValue, ExtractError> {
  let languages = lookup(raw, &path(&FULLRECORD, &["languages"]))?;
  let count = lookup(languages, &["count"])?.as_u64().unwrap_or(0);
  let language = lookup(languages, &["language"])?;
  if count <= 1 {
    FieldValue::from_node(lookup(language, &["content"])?)
  } else {
    let by_type = dict_from(language, "type", "content")?;
    let primary = by_type.get("primary").ok_or_else(|| ExtractError::MissingKey("primary".into()))?;
    FieldValue::from_node(primary)
  }
}

/// Flattens a dictionary of nodes into a dictionary of text.
fn text_values(dict: HashMap<String, &Value>) -> HashMap<String, String> {
  dict.into_iter().filter_map(|(k, v)| scalar_text(v).ok().map(|v| (k, v))).collect()
}

/// Reads every code of a group off one shared dictionary. A failure to build
/// the dictionary marks the whole group missing.
fn resolve_group(
  fields: &mut FieldMap,
  group: &[(FieldCode, &str)],
  dict: Result<HashMap<String, String>, ExtractError>,
) {
  match dict {
    Ok(dict) =>
      for (code, key) in group {
        match dict.get(*key) {
          Some(value) => fields.insert(*code, value.as_str()),
          None => fields.mark_missing(*code),
        }
      },
    Err(e) => {
      trace!("Group {:?} unresolved: {e}", group.iter().map(|(c, _)| c.code()).collect::<Vec<_>>());
      for (code, _) in group {
        fields.mark_missing(*code);
      }
    },
  }
}
