//! Searching the Web of Science API and paging through the results.
//!
//! A search is started with [`start_query`], which sends the free-text query,
//! reads the service-assigned query id and result counts from the first
//! response, and returns a [`Query`] holding the first page of records. The
//! rest of the result set is then pulled in with [`Query::retrieve_all`],
//! which keeps requesting continuation pages by query id until every record
//! reported by the service has been seen.
//!
//! The service gives no consistency guarantees between pages: a page may
//! repeat records already seen, or come back empty even though records are
//! still missing. Records are therefore merged by their `UID`, and a run of
//! [`STALL_THRESHOLD`] fetches that add nothing ends retrieval after one final
//! catch-up request.
//!
//! # Examples
//!
//! ```no_run
//! use wrex::{start_query, ConnectionConfig, ReqwestTransport};
//!
//! # async fn example() -> Result<(), wrex::errors::WrexError> {
//! let config = ConnectionConfig::from_env()?;
//! let transport = ReqwestTransport::new();
//!
//! let mut query = start_query(&transport, &config, "TS=(metamaterials) AND PY=2019").await?;
//! query
//!   .retrieve_all(&transport, Some(&mut |done: usize, total: usize| println!("{done}/{total}")))
//!   .await?;
//!
//! println!("{}", query.status());
//! std::fs::write("savedrecs.txt", query.export(false))?;
//! # Ok(())
//! # }
//! ```

use std::{
  collections::{hash_map, HashMap},
  fmt,
};

use super::*;
use crate::{
  config::{render_parameters, FIRST_RECORD_PARAM, PAGE_SIZE_PARAM, USER_QUERY_PARAM},
  extract::{list_from, lookup},
  transport::API_KEY_HEADER,
};

/// Number of consecutive fetches adding no new records after which retrieval
/// makes one last catch-up request and stops.
pub const STALL_THRESHOLD: usize = 3;

/// Which endpoint a response came from. The two endpoints wrap their records
/// differently, so each has its own parsing branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
  /// Response to a free-text search: `QueryResult` plus `Data.Records`
  Initial,
  /// Response to a fetch by query id: `Records` only
  Continuation,
}

/// Result counts reported with the first page of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCounts {
  /// Service-assigned query id
  pub query_id:         i64,
  /// Number of records matching the query
  pub records_found:    usize,
  /// Number of records the service searched
  pub records_searched: usize,
}

/// One parsed response.
#[derive(Debug, Clone)]
pub struct Page {
  /// Endpoint the page came from
  pub kind:    PageKind,
  /// Counts, present on [`PageKind::Initial`] pages only
  pub counts:  Option<QueryCounts>,
  /// The records on this page
  pub records: Vec<Record>,
}

impl Page {
  /// Parses a response body of the given kind.
  ///
  /// # Errors
  ///
  /// Returns [`WrexError::Json`] for invalid JSON and
  /// [`WrexError::MalformedResponse`] when the wrapper structure of the kind
  /// is absent or a record has no `UID`.
  pub fn parse(kind: PageKind, body: &str) -> Result<Self, WrexError> {
    let parsed: Value = serde_json::from_str(body)?;

    let (counts, records) = match kind {
      PageKind::Initial => {
        let result = lookup(&parsed, &["QueryResult"])
          .map_err(|e| WrexError::MalformedResponse(format!("search response: {e}")))?;
        let counts = QueryCounts {
          query_id:         integer(result, "QueryID")?,
          records_found:    integer(result, "RecordsFound")?.max(0) as usize,
          records_searched: integer(result, "RecordsSearched")?.max(0) as usize,
        };
        let records = lookup(&parsed, &["Data", "Records", "records"])
          .map_err(|e| WrexError::MalformedResponse(format!("search response: {e}")))?;
        (Some(counts), records)
      },
      PageKind::Continuation => {
        let records = lookup(&parsed, &["Records", "records"])
          .map_err(|e| WrexError::MalformedResponse(format!("continuation response: {e}")))?;
        (None, records)
      },
    };

    Ok(Self { kind, counts, records: records_from(records)? })
  }

  /// Number of records on the page.
  pub fn len(&self) -> usize { self.records.len() }

  /// Whether the page carried no records.
  pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

/// Reads an integer that the service may send either as a number or a string.
fn integer(node: &Value, key: &str) -> Result<i64, WrexError> {
  let value = lookup(node, &[key]).map_err(|e| WrexError::MalformedResponse(e.to_string()))?;
  value
    .as_i64()
    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
    .ok_or_else(|| WrexError::MalformedResponse(format!("`{key}` is not an integer: {value}")))
}

/// Turns the `records` node of a page into records. An empty page is sent as
/// an empty string (or null) instead of an object.
fn records_from(node: &Value) -> Result<Vec<Record>, WrexError> {
  match node {
    Value::Null => Ok(Vec::new()),
    Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
    Value::Object(map) => match map.get("REC") {
      None => Ok(Vec::new()),
      Some(rec) => list_from(rec, None)
        .map_err(|e| WrexError::MalformedResponse(e.to_string()))?
        .into_iter()
        .map(|raw| Record::new(raw.clone()))
        .collect(),
    },
    other => Err(WrexError::MalformedResponse(format!("unexpected records node: {other}"))),
  }
}

/// Sends one request and maps failure statuses to errors.
async fn request<T: Transport>(
  transport: &T,
  url: &str,
  config: &ConnectionConfig,
  params: &[(String, String)],
) -> Result<String, WrexError> {
  let (status, body) =
    transport.send(url, &[(API_KEY_HEADER, config.api_key())], params).await?;
  if !(200..300).contains(&status) {
    let err = WrexError::from_status(status, &body);
    warn!("Request to {url} failed with status {status}");
    return Err(err);
  }
  Ok(body)
}

/// Starts a new search and returns it holding the first page of results.
///
/// The config is copied into the returned [`Query`], which uses it for every
/// later request.
///
/// # Errors
///
/// - [`WrexError::Defaults`] if the config has no usable page size,
/// - one of the status variants of [`WrexError`] if the service rejects the
///   request,
/// - [`WrexError::MalformedResponse`] if the response lacks the search result
///   wrapper.
pub async fn start_query<T: Transport>(
  transport: &T,
  config: &ConnectionConfig,
  search: &str,
) -> Result<Query, WrexError> {
  let page_size = config.page_size()?;

  let mut params = config.default_parameters().clone();
  params.insert(USER_QUERY_PARAM.to_string(), Value::from(search));

  info!("Searching for {search:?}");
  let body = request(transport, config.base_url(), config, &render_parameters(&params)).await?;
  let page = Page::parse(PageKind::Initial, &body)?;

  Query::from_page(page, config, search, page_size)
}

/// Fetches one continuation page of an existing search.
///
/// The free-text search term is never sent. `count` and `first_record`
/// override the config's page size and 1-based starting offset.
pub async fn fetch_by_id<T: Transport>(
  transport: &T,
  config: &ConnectionConfig,
  query_id: i64,
  count: Option<usize>,
  first_record: Option<usize>,
) -> Result<Page, WrexError> {
  let mut params = config.default_parameters().clone();
  params.remove(USER_QUERY_PARAM);
  if let Some(count) = count {
    params.insert(PAGE_SIZE_PARAM.to_string(), Value::from(count));
  }
  if let Some(first_record) = first_record {
    params.insert(FIRST_RECORD_PARAM.to_string(), Value::from(first_record));
  }

  let url = format!("{}/query/{query_id}", config.base_url());
  let body = request(transport, &url, config, &render_parameters(&params)).await?;
  let page = Page::parse(PageKind::Continuation, &body)?;
  debug!("Query {query_id} returned {} records from offset {first_record:?}", page.len());
  Ok(page)
}

/// Where a query is in its retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
  /// Only the first page has been fetched
  Fresh,
  /// Continuation pages have been fetched but records are still missing
  PartiallyRetrieved,
  /// Every reported record has been retrieved
  Complete,
}

/// A read-only summary of a query's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryStatus {
  /// Records retrieved so far
  pub retrieved:   usize,
  /// Records the service reported
  pub total_found: usize,
  /// Whether all reported records were retrieved
  pub complete:    bool,
  /// Whether the query's cursor is likely expired
  pub stale:       bool,
}

impl fmt::Display for QueryStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Retrieved records: {}/{}", self.retrieved, self.total_found)?;
    if self.complete {
      write!(f, "Data complete!")?;
    } else {
      write!(f, "Data incomplete. Run `retrieve_all` to retrieve the remaining records.")?;
    }
    if self.stale {
      write!(f, "\nQuery is stale, its results may no longer be retrievable.")?;
    }
    Ok(())
  }
}

/// One search and the records retrieved for it so far.
#[derive(Debug, Clone)]
pub struct Query {
  /// The free-text search, empty if unknown
  query_string:   String,
  /// Service-assigned query id
  query_id:       i64,
  /// Records matching the search, as reported by the first response
  total_found:    usize,
  /// Records searched, as reported by the first response
  total_searched: usize,
  /// Retrieved records by UID
  records:        HashMap<String, Record>,
  /// Records requested per continuation page
  page_size:      usize,
  /// This query's own copy of the connection settings
  config:         ConnectionConfig,
  /// When the query was created
  refreshed_at:   DateTime<Utc>,
  /// Result of the last staleness check
  stale:          bool,
  /// Continuation pages fetched so far
  fetches:        usize,
}

impl Query {
  /// Builds a query from its first page.
  ///
  /// # Errors
  ///
  /// Returns [`WrexError::MalformedResponse`] if the page carries no counts,
  /// i.e. is not a [`PageKind::Initial`] page.
  pub fn from_page(
    page: Page,
    config: &ConnectionConfig,
    query_string: &str,
    page_size: usize,
  ) -> Result<Self, WrexError> {
    let counts = page
      .counts
      .ok_or_else(|| WrexError::MalformedResponse("first page carries no result counts".into()))?;

    let mut query = Self {
      query_string: query_string.to_string(),
      query_id: counts.query_id,
      total_found: counts.records_found,
      total_searched: counts.records_searched,
      records: HashMap::new(),
      page_size,
      config: config.clone(),
      refreshed_at: Utc::now(),
      stale: false,
      fetches: 0,
    };
    query.merge(page);

    info!(
      "Query {} found {} of {} searched records, {} retrieved",
      query.query_id,
      query.total_found,
      query.total_searched,
      query.len()
    );
    Ok(query)
  }

  /// Merges a page into the record set and returns how many records were new.
  ///
  /// A record whose UID is already present replaces the earlier copy, so
  /// merging the same page twice leaves the set unchanged. Records beyond the
  /// reported total are kept, with a warning, since the service may grow the
  /// result set between pages.
  pub fn merge(&mut self, page: Page) -> usize {
    let before = self.records.len();
    for record in page.records {
      self.records.insert(record.uid.clone(), record);
    }
    if self.records.len() > self.total_found && before <= self.total_found {
      warn!(
        "Query {} now holds {} records but the service reported {}",
        self.query_id,
        self.records.len(),
        self.total_found
      );
    }
    self.records.len() - before
  }

  /// Pages through the remaining results until every reported record is
  /// retrieved or retrieval stalls.
  ///
  /// Pages are requested one after another starting right after the records
  /// already held. When [`STALL_THRESHOLD`] consecutive pages add nothing new,
  /// one final request asks for all still-missing records at once and
  /// retrieval stops whether or not that completes the set; check
  /// [`Query::is_complete`] afterwards. `progress` is called after every fetch
  /// with `(retrieved, total_found)`.
  ///
  /// # Errors
  ///
  /// Any failed request ends retrieval with that error. Records merged before
  /// the failure are kept.
  pub async fn retrieve_all<T: Transport>(
    &mut self,
    transport: &T,
    mut progress: Option<&mut (dyn FnMut(usize, usize) + Send)>,
  ) -> Result<(), WrexError> {
    if self.check_stale() {
      warn!("Query {} is stale, its cursor may have expired", self.query_id);
    }

    let mut stalls = 0;
    let mut previous = self.len();

    while !self.is_complete() {
      let page = self.fetch_page(transport, None).await?;
      self.merge(page);
      self.report(&mut progress);

      if self.len() == previous {
        stalls += 1;
        debug!("Fetch added no records ({stalls}/{STALL_THRESHOLD})");
        if stalls >= STALL_THRESHOLD {
          let missing = self.missing_count();
          warn!("Could not retrieve {missing}/{} records, trying one last time", self.total_found);
          let page = self.fetch_page(transport, Some(missing)).await?;
          self.merge(page);
          self.report(&mut progress);
          if !self.is_complete() {
            warn!(
              "Could not retrieve {}/{} records, giving up after {stalls} tries",
              self.missing_count(),
              self.total_found
            );
          }
          break;
        }
      } else {
        stalls = 0;
      }
      previous = self.len();
    }

    Ok(())
  }

  /// Requests the page that starts right after the records already held.
  async fn fetch_page<T: Transport>(
    &mut self,
    transport: &T,
    count: Option<usize>,
  ) -> Result<Page, WrexError> {
    let count = count.or(Some(self.page_size));
    let page =
      fetch_by_id(transport, &self.config, self.query_id, count, Some(self.len() + 1)).await?;
    self.fetches += 1;
    Ok(page)
  }

  /// Logs progress and forwards it to the caller's callback.
  fn report(&self, progress: &mut Option<&mut (dyn FnMut(usize, usize) + Send)>) {
    info!("Retrieved records: {}/{}", self.len(), self.total_found);
    if let Some(callback) = progress.as_mut() {
      callback(self.len(), self.total_found);
    }
  }

  /// Whether every reported record has been retrieved.
  pub fn is_complete(&self) -> bool { self.records.len() >= self.total_found }

  /// Number of reported records not yet retrieved.
  pub fn missing_count(&self) -> usize { self.total_found.saturating_sub(self.records.len()) }

  /// Recomputes and returns the stale flag.
  ///
  /// A query is stale once a full day has passed since it was created; the
  /// service expires query ids after roughly that long. Staleness is only
  /// reported, the query is never refreshed.
  pub fn check_stale(&mut self) -> bool { self.check_stale_at(Utc::now()) }

  /// [`Query::check_stale`] against an explicit clock reading.
  pub fn check_stale_at(&mut self, now: DateTime<Utc>) -> bool {
    let age = now - self.refreshed_at;
    self.stale = age.num_days() > 0;
    debug!("Query {} is {} (age {age})", self.query_id, if self.stale { "stale" } else { "fresh" });
    self.stale
  }

  /// The stale flag as of the last check.
  pub fn is_stale(&self) -> bool { self.stale }

  /// Where the query is in its retrieval.
  pub fn state(&self) -> QueryState {
    if self.is_complete() {
      QueryState::Complete
    } else if self.fetches == 0 {
      QueryState::Fresh
    } else {
      QueryState::PartiallyRetrieved
    }
  }

  /// Summarizes progress, rechecking staleness.
  pub fn status(&mut self) -> QueryStatus {
    let stale = self.check_stale();
    QueryStatus {
      retrieved: self.len(),
      total_found: self.total_found,
      complete: self.is_complete(),
      stale,
    }
  }

  /// The free-text search this query was started with.
  pub fn query_string(&self) -> &str { &self.query_string }

  /// The service-assigned query id.
  pub fn query_id(&self) -> i64 { self.query_id }

  /// Records matching the search.
  pub fn total_found(&self) -> usize { self.total_found }

  /// Records the service searched.
  pub fn total_searched(&self) -> usize { self.total_searched }

  /// Records requested per continuation page.
  pub fn page_size(&self) -> usize { self.page_size }

  /// This query's copy of the connection settings.
  pub fn config(&self) -> &ConnectionConfig { &self.config }

  /// When the query was created.
  pub fn refreshed_at(&self) -> DateTime<Utc> { self.refreshed_at }

  /// Continuation pages fetched so far.
  pub fn fetches(&self) -> usize { self.fetches }

  /// Number of records retrieved.
  pub fn len(&self) -> usize { self.records.len() }

  /// Whether no records have been retrieved.
  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  /// Looks a record up by UID.
  pub fn get(&self, uid: &str) -> Option<&Record> { self.records.get(uid) }

  /// The retrieved records keyed by UID.
  pub fn records(&self) -> &HashMap<String, Record> { &self.records }

  /// Iterates over the retrieved records in no particular order.
  pub fn iter(&self) -> hash_map::Values<'_, String, Record> { self.records.values() }

  /// Mutable access to the retrieved records, e.g. to regenerate fields.
  pub fn iter_mut(&mut self) -> hash_map::ValuesMut<'_, String, Record> {
    self.records.values_mut()
  }
}

impl<'a> IntoIterator for &'a Query {
  type IntoIter = hash_map::Values<'a, String, Record>;
  type Item = &'a Record;

  fn into_iter(self) -> Self::IntoIter { self.iter() }
}

impl fmt::Display for Query {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "WOS query for {:?} (id {}) containing {}/{} results",
      self.query_string,
      self.query_id,
      self.len(),
      self.total_found
    )
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::VecDeque, ops::Range, sync::Mutex};

  use async_trait::async_trait;
  use chrono::Duration;
  use serde_json::json;

  use super::*;

  /// A request as seen by [`ScriptedTransport`].
  #[derive(Debug, Clone)]
  struct SentRequest {
    url:     String,
    headers: Vec<(String, String)>,
    params:  Vec<(String, String)>,
  }

  impl SentRequest {
    fn param(&self, name: &str) -> Option<&str> {
      self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
  }

  /// Replays canned responses in order, then `fallback` forever.
  #[derive(Default)]
  struct ScriptedTransport {
    responses: Mutex<VecDeque<(u16, String)>>,
    fallback:  Option<(u16, String)>,
    sent:      Mutex<Vec<SentRequest>>,
  }

  impl ScriptedTransport {
    fn new(responses: Vec<(u16, String)>) -> Self {
      Self { responses: Mutex::new(responses.into()), ..Default::default() }
    }

    fn with_fallback(mut self, status: u16, body: String) -> Self {
      self.fallback = Some((status, body));
      self
    }

    fn sent(&self) -> Vec<SentRequest> { self.sent.lock().unwrap().clone() }
  }

  #[async_trait]
  impl Transport for ScriptedTransport {
    async fn send(
      &self,
      url: &str,
      headers: &[(&str, &str)],
      params: &[(String, String)],
    ) -> Result<(u16, String), WrexError> {
      self.sent.lock().unwrap().push(SentRequest {
        url:     url.to_string(),
        headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        params:  params.to_vec(),
      });
      let next = self.responses.lock().unwrap().pop_front();
      Ok(next.or_else(|| self.fallback.clone()).expect("transport script exhausted"))
    }
  }

  fn recs(uids: Range<usize>) -> Value {
    let recs: Vec<Value> = uids.map(|i| json!({"UID": format!("WOS:{i:015}")})).collect();
    json!({"REC": recs})
  }

  fn initial(query_id: i64, found: usize, uids: Range<usize>) -> (u16, String) {
    let body = json!({
      "QueryResult": {"QueryID": query_id, "RecordsFound": found, "RecordsSearched": 1000},
      "Data": {"Records": {"records": recs(uids)}}
    });
    (200, body.to_string())
  }

  fn continuation(uids: Range<usize>) -> (u16, String) {
    (200, json!({"Records": {"records": recs(uids)}}).to_string())
  }

  fn empty_continuation() -> (u16, String) {
    (200, json!({"Records": {"records": ""}}).to_string())
  }

  fn config() -> ConnectionConfig {
    ConnectionConfig::new("test-key").unwrap().with_base_url("http://wos.test/api/wos").unwrap()
  }

  #[tokio::test]
  async fn test_start_query_parses_first_page() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(7, 250, 0..100)]);
    let query = start_query(&transport, &config(), "TS=(graphene)").await?;

    assert_eq!(query.query_id(), 7);
    assert_eq!(query.total_found(), 250);
    assert_eq!(query.total_searched(), 1000);
    assert_eq!(query.len(), 100);
    assert_eq!(query.page_size(), 100);
    assert_eq!(query.query_string(), "TS=(graphene)");
    assert_eq!(query.state(), QueryState::Fresh);
    assert!(!query.is_complete());

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "http://wos.test/api/wos");
    assert_eq!(sent[0].param("usrQuery"), Some("TS=(graphene)"));
    assert_eq!(sent[0].param("databaseId"), Some("WOS"));
    assert_eq!(sent[0].headers, vec![("X-ApiKey".to_string(), "test-key".to_string())]);
    Ok(())
  }

  #[tokio::test]
  async fn test_first_page_can_complete_query() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(1, 3, 0..3)]);
    let mut query = start_query(&transport, &config(), "q").await?;
    assert_eq!(query.state(), QueryState::Complete);

    query.retrieve_all(&transport, None).await?;
    assert_eq!(transport.sent().len(), 1);
    Ok(())
  }

  #[tokio::test]
  async fn test_empty_result_set() -> anyhow::Result<()> {
    let body = json!({
      "QueryResult": {"QueryID": "3", "RecordsFound": "0", "RecordsSearched": "100"},
      "Data": {"Records": {"records": ""}}
    });
    let transport = ScriptedTransport::new(vec![(200, body.to_string())]);
    let query = start_query(&transport, &config(), "q").await?;
    assert!(query.is_empty());
    assert!(query.is_complete());
    assert_eq!(query.query_id(), 3);
    Ok(())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_retrieve_all_pages_through() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![
      initial(7, 250, 0..100),
      continuation(100..200),
      continuation(200..250),
    ]);
    let mut query = start_query(&transport, &config(), "q").await?;
    assert!(!query.is_complete());

    let mut seen = Vec::new();
    let mut record_progress = |done: usize, total: usize| seen.push((done, total));
    query.retrieve_all(&transport, Some(&mut record_progress)).await?;

    assert!(query.is_complete());
    assert_eq!(query.len(), 250);
    assert_eq!(query.state(), QueryState::Complete);
    assert_eq!(seen, vec![(200, 250), (250, 250)]);

    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1].url, "http://wos.test/api/wos/query/7");
    assert_eq!(sent[1].param("firstRecord"), Some("101"));
    assert_eq!(sent[1].param("count"), Some("100"));
    assert_eq!(sent[1].param("usrQuery"), None);
    assert_eq!(sent[2].param("firstRecord"), Some("201"));
    assert!(logs_contain("Retrieved records: 250/250"));
    Ok(())
  }

  #[tokio::test]
  async fn test_repeated_page_is_deduplicated() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![
      initial(7, 250, 0..100),
      continuation(0..100),
      continuation(100..200),
      continuation(200..250),
    ]);
    let mut query = start_query(&transport, &config(), "q").await?;
    let mut counts = Vec::new();
    query.retrieve_all(&transport, Some(&mut |done: usize, _: usize| counts.push(done))).await?;

    assert_eq!(counts, vec![100, 200, 250]);
    assert!(query.is_complete());
    assert_eq!(query.len(), 250);
    Ok(())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_stall_bound() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(9, 500, 0..100)])
      .with_fallback(200, empty_continuation().1);
    let mut query = start_query(&transport, &config(), "q").await?;
    query.retrieve_all(&transport, None).await?;

    let continuation_requests = &transport.sent()[1..];
    assert_eq!(continuation_requests.len(), STALL_THRESHOLD + 1);
    assert_eq!(query.fetches(), STALL_THRESHOLD + 1);

    let catch_up = continuation_requests.last().unwrap();
    assert_eq!(catch_up.param("count"), Some("400"));
    assert_eq!(catch_up.param("firstRecord"), Some("101"));

    assert!(!query.is_complete());
    assert_eq!(query.missing_count(), 400);
    assert_eq!(query.state(), QueryState::PartiallyRetrieved);
    assert!(logs_contain("trying one last time"));
    Ok(())
  }

  #[tokio::test]
  async fn test_productive_fetch_resets_stall_counter() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![
      initial(9, 300, 0..100),
      empty_continuation(),
      empty_continuation(),
      continuation(100..200),
    ])
    .with_fallback(200, empty_continuation().1);
    let mut query = start_query(&transport, &config(), "q").await?;
    query.retrieve_all(&transport, None).await?;

    // two stalls, one productive fetch, three stalls, one catch-up
    assert_eq!(transport.sent().len() - 1, 2 + 1 + STALL_THRESHOLD + 1);
    assert_eq!(query.len(), 200);
    Ok(())
  }

  #[tokio::test]
  async fn test_catch_up_can_complete() -> anyhow::Result<()> {
    let mut script = vec![initial(9, 150, 0..100)];
    script.extend(std::iter::repeat_with(empty_continuation).take(STALL_THRESHOLD));
    script.push(continuation(100..150));
    let transport = ScriptedTransport::new(script);

    let mut query = start_query(&transport, &config(), "q").await?;
    query.retrieve_all(&transport, None).await?;
    assert!(query.is_complete());
    Ok(())
  }

  #[tokio::test]
  async fn test_merge_is_idempotent_and_completeness_monotone() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(1, 20, 0..10)]);
    let mut query = start_query(&transport, &config(), "q").await?;

    let page = Page::parse(PageKind::Continuation, &continuation(10..20).1)?;
    assert_eq!(query.merge(page.clone()), 10);
    let uids: Vec<String> = {
      let mut uids: Vec<String> = query.iter().map(|r| r.uid.clone()).collect();
      uids.sort();
      uids
    };
    assert!(query.is_complete());

    assert_eq!(query.merge(page), 0);
    let mut again: Vec<String> = query.iter().map(|r| r.uid.clone()).collect();
    again.sort();
    assert_eq!(uids, again);
    assert!(query.is_complete());

    Ok(())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_merge_past_reported_total_warns() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(1, 2, 0..1)]);
    let mut query = start_query(&transport, &config(), "q").await?;
    assert!(!logs_contain("but the service reported"));

    let extra = Page::parse(PageKind::Continuation, &continuation(1..4).1)?;
    assert_eq!(query.merge(extra), 3);
    assert!(logs_contain("now holds 4 records but the service reported 2"));
    assert!(query.is_complete());
    assert_eq!(query.missing_count(), 0);
    Ok(())
  }

  #[tokio::test]
  async fn test_regenerate_every_record() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(1, 3, 0..3)]);
    let mut query = start_query(&transport, &config(), "q").await?;
    let before: Vec<String> = query.iter().map(|r| r.fields().to_string()).collect();
    assert!(query.iter().all(Record::is_normalized));

    for record in query.iter_mut() {
      let fields = record.regenerate();
      assert!(fields.contains(FieldCode::AccessionNumber));
    }
    let after: Vec<String> = query.iter().map(|r| r.fields().to_string()).collect();
    assert_eq!(before, after);
    Ok(())
  }

  #[tokio::test]
  async fn test_retrieval_runs_on_spawned_task() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(3, 20, 0..10), continuation(10..20)]);
    let mut query = start_query(&transport, &config(), "q").await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("savedrecs.txt");

    let handle = tokio::spawn(async move {
      let mut calls = 0;
      let mut count_calls = |_: usize, _: usize| calls += 1;
      query.retrieve_all(&transport, Some(&mut count_calls)).await?;
      query.write_export(&path, false).await?;
      Ok::<_, WrexError>((query, calls))
    });
    let (query, calls) = handle.await??;
    assert!(query.is_complete());
    assert_eq!(calls, 1);
    assert!(dir.path().join("savedrecs.txt").exists());
    Ok(())
  }

  #[tokio::test]
  async fn test_status_errors_propagate() -> anyhow::Result<()> {
    let transport =
      ScriptedTransport::new(vec![(403, json!({"message": "Invalid key"}).to_string())]);
    match start_query(&transport, &config(), "q").await {
      Err(WrexError::Forbidden(msg)) => assert_eq!(msg, "Invalid key"),
      other => panic!("expected forbidden, got {other:?}"),
    }

    let transport = ScriptedTransport::new(vec![
      initial(2, 300, 0..100),
      continuation(100..200),
      (429, json!({"message": "Slow down"}).to_string()),
    ]);
    let mut query = start_query(&transport, &config(), "q").await?;
    let err = query.retrieve_all(&transport, None).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(query.len(), 200);
    Ok(())
  }

  #[tokio::test]
  async fn test_bad_page_size_fails_before_sending() {
    let transport = ScriptedTransport::new(vec![]);
    let config = config().with_parameter("count", "lots");
    assert!(matches!(start_query(&transport, &config, "q").await, Err(WrexError::Defaults(_))));
    assert!(transport.sent().is_empty());
  }

  #[test]
  fn test_page_shapes() -> anyhow::Result<()> {
    // continuation bodies are not search bodies and vice versa
    let cont = continuation(0..2).1;
    assert!(matches!(Page::parse(PageKind::Initial, &cont), Err(WrexError::MalformedResponse(_))));
    let first = initial(1, 2, 0..2).1;
    assert!(matches!(
      Page::parse(PageKind::Continuation, &first),
      Err(WrexError::MalformedResponse(_))
    ));

    // a lone record is not wrapped in a list
    let single = json!({"Records": {"records": {"REC": {"UID": "WOS:1"}}}}).to_string();
    assert_eq!(Page::parse(PageKind::Continuation, &single)?.len(), 1);

    let no_uid = json!({"Records": {"records": {"REC": [{"static_data": {}}]}}}).to_string();
    assert!(Page::parse(PageKind::Continuation, &no_uid).is_err());

    assert!(matches!(Page::parse(PageKind::Continuation, "<xml/>"), Err(WrexError::Json(_))));
    Ok(())
  }

  #[tokio::test]
  async fn test_query_keeps_its_own_config() -> anyhow::Result<()> {
    let transport =
      ScriptedTransport::new(vec![initial(4, 30, 0..10), continuation(10..30)]);
    let shared = config().with_page_size(10);
    let mut query = start_query(&transport, &shared, "q").await?;

    let _changed = shared.clone().with_page_size(1).with_base_url("http://elsewhere.test")?;
    query.retrieve_all(&transport, None).await?;

    let sent = transport.sent();
    assert_eq!(sent[1].url, "http://wos.test/api/wos/query/4");
    assert_eq!(sent[1].param("count"), Some("10"));
    assert_eq!(query.config(), &shared);
    Ok(())
  }

  #[tokio::test]
  async fn test_staleness() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(vec![initial(1, 5, 0..2)]);
    let mut query = start_query(&transport, &config(), "q").await?;

    assert!(!query.check_stale());
    assert!(!query.check_stale_at(query.refreshed_at() + Duration::hours(23)));
    assert!(query.check_stale_at(query.refreshed_at() + Duration::days(2)));
    assert!(query.is_stale());

    let status = query.status();
    assert!(!status.stale);
    assert_eq!(status.retrieved, 2);
    assert!(status.to_string().contains("Retrieved records: 2/5"));
    assert!(status.to_string().contains("Data incomplete"));
    Ok(())
  }
}
