//! The canonical field schema of the tagged text export format.
//!
//! Each exported record is a sequence of lines starting with a two-letter
//! [`FieldCode`]. The set of codes is closed; [`FieldCode::ALL`] lists them in
//! the order they are written out, with the end-of-record marker
//! [`FieldCode::EndOfRecord`] always last.

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  str::FromStr,
};

use super::*;
use crate::extract::{scalar_text, ExtractError, Shape};

/// Indentation placed before the continuation lines of a multi-valued field.
pub const CONTINUATION_INDENT: &str = "   ";

/// A canonical two-letter field code.
///
/// The derived ordering follows declaration order, which is the export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldCode {
  /// `PT`: publication type, as its first letter (`J` for journal)
  PublicationType,
  /// `AU`: authors in short form
  Authors,
  /// `AF`: authors' full names
  AuthorFullNames,
  /// `TI`: document title
  Title,
  /// `SO`: full source title
  SourceTitle,
  /// `LA`: primary language
  Language,
  /// `DT`: document type
  DocumentType,
  /// `DE`: author keywords
  AuthorKeywords,
  /// `ID`: Keywords Plus
  KeywordsPlus,
  /// `AB`: abstract
  Abstract,
  /// `RP`: reprint address
  ReprintAddress,
  /// `NR`: cited reference count
  CitedReferenceCount,
  /// `TC`: times cited in the core collection
  TimesCited,
  /// `PU`: publisher
  Publisher,
  /// `PI`: publisher city
  PublisherCity,
  /// `PA`: publisher address
  PublisherAddress,
  /// `SN`: ISSN
  Issn,
  /// `EI`: eISSN
  EIssn,
  /// `J9`: 29-character source abbreviation
  SourceAbbreviation,
  /// `JI`: ISO source abbreviation
  IsoSourceAbbreviation,
  /// `PD`: publication date (month)
  PublicationDate,
  /// `PY`: publication year
  PublicationYear,
  /// `VL`: volume
  Volume,
  /// `IS`: issue
  Issue,
  /// `BP`: beginning page
  BeginningPage,
  /// `EP`: ending page
  EndingPage,
  /// `AR`: article number
  ArticleNumber,
  /// `DI`: DOI
  Doi,
  /// `PG`: page count
  PageCount,
  /// `WC`: Web of Science categories
  WosCategories,
  /// `SC`: research areas
  ResearchAreas,
  /// `GA`: document delivery number
  DocumentDeliveryNumber,
  /// `UT`: accession number (the record UID)
  AccessionNumber,
  /// `PM`: PubMed ID
  PubmedId,
  /// `ER`: end of record
  EndOfRecord,
}

impl FieldCode {
  /// Every code, in export order.
  pub const ALL: [FieldCode; 35] = [
    FieldCode::PublicationType,
    FieldCode::Authors,
    FieldCode::AuthorFullNames,
    FieldCode::Title,
    FieldCode::SourceTitle,
    FieldCode::Language,
    FieldCode::DocumentType,
    FieldCode::AuthorKeywords,
    FieldCode::KeywordsPlus,
    FieldCode::Abstract,
    FieldCode::ReprintAddress,
    FieldCode::CitedReferenceCount,
    FieldCode::TimesCited,
    FieldCode::Publisher,
    FieldCode::PublisherCity,
    FieldCode::PublisherAddress,
    FieldCode::Issn,
    FieldCode::EIssn,
    FieldCode::SourceAbbreviation,
    FieldCode::IsoSourceAbbreviation,
    FieldCode::PublicationDate,
    FieldCode::PublicationYear,
    FieldCode::Volume,
    FieldCode::Issue,
    FieldCode::BeginningPage,
    FieldCode::EndingPage,
    FieldCode::ArticleNumber,
    FieldCode::Doi,
    FieldCode::PageCount,
    FieldCode::WosCategories,
    FieldCode::ResearchAreas,
    FieldCode::DocumentDeliveryNumber,
    FieldCode::AccessionNumber,
    FieldCode::PubmedId,
    FieldCode::EndOfRecord,
  ];

  /// The two-letter tag written in the export.
  pub fn code(&self) -> &'static str {
    match self {
      FieldCode::PublicationType => "PT",
      FieldCode::Authors => "AU",
      FieldCode::AuthorFullNames => "AF",
      FieldCode::Title => "TI",
      FieldCode::SourceTitle => "SO",
      FieldCode::Language => "LA",
      FieldCode::DocumentType => "DT",
      FieldCode::AuthorKeywords => "DE",
      FieldCode::KeywordsPlus => "ID",
      FieldCode::Abstract => "AB",
      FieldCode::ReprintAddress => "RP",
      FieldCode::CitedReferenceCount => "NR",
      FieldCode::TimesCited => "TC",
      FieldCode::Publisher => "PU",
      FieldCode::PublisherCity => "PI",
      FieldCode::PublisherAddress => "PA",
      FieldCode::Issn => "SN",
      FieldCode::EIssn => "EI",
      FieldCode::SourceAbbreviation => "J9",
      FieldCode::IsoSourceAbbreviation => "JI",
      FieldCode::PublicationDate => "PD",
      FieldCode::PublicationYear => "PY",
      FieldCode::Volume => "VL",
      FieldCode::Issue => "IS",
      FieldCode::BeginningPage => "BP",
      FieldCode::EndingPage => "EP",
      FieldCode::ArticleNumber => "AR",
      FieldCode::Doi => "DI",
      FieldCode::PageCount => "PG",
      FieldCode::WosCategories => "WC",
      FieldCode::ResearchAreas => "SC",
      FieldCode::DocumentDeliveryNumber => "GA",
      FieldCode::AccessionNumber => "UT",
      FieldCode::PubmedId => "PM",
      FieldCode::EndOfRecord => "ER",
    }
  }
}

impl fmt::Display for FieldCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.code()) }
}

impl FromStr for FieldCode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let tag = s.trim().to_uppercase();
    FieldCode::ALL
      .into_iter()
      .find(|code| code.code() == tag)
      .ok_or_else(|| format!("unknown field code `{s}`"))
  }
}

/// The value of one canonical field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  /// A single piece of text
  Text(String),
  /// A single number, kept in its original JSON spelling
  Number(serde_json::Number),
  /// An ordered list of values, written one per line
  List(Vec<String>),
}

impl FieldValue {
  /// Converts a scalar or a list of scalars into a field value.
  pub fn from_node(node: &Value) -> Result<Self, ExtractError> {
    match Shape::of(node) {
      Shape::List(items) => items.iter().map(scalar_text).collect::<Result<_, _>>().map(Self::List),
      Shape::Scalar(Value::Number(n)) => Ok(FieldValue::Number(n.clone())),
      Shape::Scalar(Value::Null) =>
        Err(ExtractError::UnexpectedShape { expected: "scalar or list", found: "null" }),
      Shape::Scalar(other) => scalar_text(other).map(FieldValue::Text),
      shape @ Shape::Object(_) =>
        Err(ExtractError::UnexpectedShape { expected: "scalar or list", found: shape.name() }),
    }
  }

  /// Converts every node of an extracted sequence into one list value.
  pub fn from_nodes(nodes: &[&Value]) -> Result<Self, ExtractError> {
    nodes.iter().map(|node| scalar_text(node)).collect::<Result<_, _>>().map(FieldValue::List)
  }

  /// Whether the value renders to nothing.
  pub fn is_empty(&self) -> bool {
    match self {
      FieldValue::Text(s) => s.is_empty(),
      FieldValue::Number(_) => false,
      FieldValue::List(items) => items.is_empty(),
    }
  }
}

impl fmt::Display for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldValue::Text(s) => f.write_str(s),
      FieldValue::Number(n) => write!(f, "{n}"),
      FieldValue::List(items) => f.write_str(&items.join(&format!("\n{CONTINUATION_INDENT}"))),
    }
  }
}

impl From<&str> for FieldValue {
  fn from(s: &str) -> Self { FieldValue::Text(s.to_string()) }
}

impl From<String> for FieldValue {
  fn from(s: String) -> Self { FieldValue::Text(s) }
}

/// The canonical fields of one record, plus the codes that could not be
/// resolved from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
  /// Resolved fields, ordered by export order
  fields:  BTreeMap<FieldCode, FieldValue>,
  /// Codes whose source data was absent or malformed
  missing: BTreeSet<FieldCode>,
}

impl FieldMap {
  /// Creates an empty map.
  pub fn new() -> Self { Self::default() }

  /// Stores a resolved field.
  pub fn insert(&mut self, code: FieldCode, value: impl Into<FieldValue>) {
    self.missing.remove(&code);
    self.fields.insert(code, value.into());
  }

  /// Records that a field could not be resolved.
  pub fn mark_missing(&mut self, code: FieldCode) {
    if !self.fields.contains_key(&code) {
      self.missing.insert(code);
    }
  }

  /// Stores the field on success, marks it missing otherwise.
  pub fn resolve(&mut self, code: FieldCode, value: Result<FieldValue, ExtractError>) {
    match value {
      Ok(value) => self.insert(code, value),
      Err(e) => {
        trace!("Field {code} unresolved: {e}");
        self.mark_missing(code);
      },
    }
  }

  /// Looks up a resolved field.
  pub fn get(&self, code: FieldCode) -> Option<&FieldValue> { self.fields.get(&code) }

  /// Whether a field was resolved.
  pub fn contains(&self, code: FieldCode) -> bool { self.fields.contains_key(&code) }

  /// The codes that could not be resolved.
  pub fn missing(&self) -> &BTreeSet<FieldCode> { &self.missing }

  /// Resolved fields in export order.
  pub fn iter(&self) -> impl Iterator<Item = (FieldCode, &FieldValue)> {
    self.fields.iter().map(|(code, value)| (*code, value))
  }

  /// Number of resolved fields.
  pub fn len(&self) -> usize { self.fields.len() }

  /// Whether no field was resolved.
  pub fn is_empty(&self) -> bool { self.fields.is_empty() }
}

/// Writes one field as `CODE value`; an empty value is written as the bare code.
pub fn render_field(code: FieldCode, value: &FieldValue) -> String {
  if value.is_empty() {
    code.code().to_string()
  } else {
    format!("{code} {value}")
  }
}

impl fmt::Display for FieldMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let lines: Vec<String> = self.iter().map(|(code, value)| render_field(code, value)).collect();
    f.write_str(&lines.join("\n"))
  }
}
