//! Tests for the paginated query module

use super::*;
use crate::auth::Session;
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::quota::{Governors, QuotaGovernor, QuotaPolicy, QuotaSnapshot};
use crate::target::ExtractionTarget;
use crate::types::{format_datetime, parse_datetime, JsonObject};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT_BODY: &str =
    r#"[{"message":"Your query request was running for too long.","errorCode":"QUERY_TIMEOUT"}]"#;

// ============================================================================
// Fake Transport
// ============================================================================

/// In-memory object with one record per timestamp. Queries whose window is
/// wider than `max_width` time out.
struct FakeTransport {
    records: Vec<DateTime<Utc>>,
    max_width: Option<Duration>,
    page_size: usize,
    cursors: Mutex<HashMap<String, Vec<JsonObject>>>,
    queries: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn new(records: Vec<DateTime<Utc>>) -> Self {
        Self {
            records,
            max_width: None,
            page_size: 7,
            cursors: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn timing_out_above(mut self, width: Duration) -> Self {
        self.max_width = Some(width);
        self
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn record(ts: &DateTime<Utc>) -> JsonObject {
        let value = json!({"Id": format_datetime(ts), "SystemModstamp": format_datetime(ts)});
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn page(&self, mut rest: Vec<JsonObject>) -> QueryPage {
        let tail = rest.split_off(rest.len().min(self.page_size));
        let mut page = QueryPage {
            records: rest,
            next_records_url: None,
            done: true,
        };
        if !tail.is_empty() {
            let mut cursors = self.cursors.lock().unwrap();
            let url = format!("/services/data/v41.0/query/01g-{}", cursors.len());
            cursors.insert(url.clone(), tail);
            page.next_records_url = Some(url);
            page.done = false;
        }
        page
    }
}

#[async_trait]
impl QueryTransport for FakeTransport {
    async fn fetch_page(&self, request: &PageRequest) -> Result<QueryPage> {
        let query = match request {
            PageRequest::Next(url) => {
                let rest = self.cursors.lock().unwrap().remove(url).unwrap();
                return Ok(self.page(rest));
            }
            PageRequest::Query(query) => query.clone(),
        };
        self.queries.lock().unwrap().push(query.clone());

        let re = Regex::new(r"WHERE \w+ (>=?) (\S+)(?: AND \w+ < (\S+))?").unwrap();
        let Some(caps) = re.captures(&query) else {
            let all = self.records.iter().map(Self::record).collect();
            return Ok(self.page(all));
        };
        let inclusive = &caps[1] == ">=";
        let start = parse_datetime(&caps[2]).unwrap();
        let end = caps.get(3).map(|m| parse_datetime(m.as_str()).unwrap());

        if let Some(max_width) = self.max_width {
            if end.unwrap_or_else(Utc::now) - start > max_width {
                return Err(Error::http_status(400, TIMEOUT_BODY));
            }
        }

        let mut matching: Vec<_> = self
            .records
            .iter()
            .filter(|ts| if inclusive { **ts >= start } else { **ts > start })
            .filter(|ts| end.map_or(true, |end| **ts < end))
            .copied()
            .collect();
        matching.sort();
        Ok(self.page(matching.iter().map(Self::record).collect()))
    }
}

fn account() -> ExtractionTarget {
    ExtractionTarget::new(
        "Account",
        vec!["Id".to_string(), "SystemModstamp".to_string()],
    )
    .with_replication_key("SystemModstamp")
}

fn engine(transport: Arc<FakeTransport>, config: RestConfig) -> PaginatedQuery {
    let governor = Arc::new(QuotaGovernor::rest(QuotaPolicy::default()));
    PaginatedQuery::new(transport, governor, config)
}

fn ids(records: &[JsonObject]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["Id"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Planner Tests
// ============================================================================

#[test]
fn test_planner_bisects_then_continues_inclusively() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap();
    let mut planner = WindowPlanner::new("Account", start, RestConfig::default());

    assert_eq!(planner.current(), Some(&Window::open(start)));

    planner.on_timeout(now).unwrap();
    let mid = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
    assert_eq!(planner.current().unwrap().end, Some(mid));
    assert_eq!(planner.consecutive_timeouts(), 1);

    planner.on_success();
    assert_eq!(planner.consecutive_timeouts(), 0);
    assert_eq!(
        planner.current(),
        Some(&Window {
            start: mid,
            start_inclusive: true,
            end: None,
        })
    );

    planner.on_success();
    assert_eq!(planner.current(), None);
    assert_eq!(planner.completed().len(), 2);
}

#[test]
fn test_planner_refuses_windows_below_minimum() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
    let mut planner = WindowPlanner::new("Account", start, RestConfig::default());

    // 36h halves to 18h, below the one-day minimum
    let err = planner.on_timeout(now).unwrap_err();
    match err {
        Error::UnrecoverableQueryWindow {
            stream,
            min_width_secs,
            ..
        } => {
            assert_eq!(stream, "Account");
            assert_eq!(min_width_secs, 86_400);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_planner_budget_counts_consecutive_timeouts() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let config = RestConfig::default().with_max_retries(2);
    let mut planner = WindowPlanner::new("Account", start, config);

    planner.on_timeout(now).unwrap();
    planner.on_success();
    planner.on_timeout(now).unwrap();
    let err = planner.on_timeout(now).unwrap_err();
    assert!(matches!(err, Error::QueryRetriesExhausted { attempts: 2, .. }));
}

// ============================================================================
// Query Tests
// ============================================================================

#[tokio::test]
async fn test_query_follows_cursors() {
    let start = Utc::now() - Duration::days(2);
    let records: Vec<_> = (1..=20).map(|i| start + Duration::minutes(i)).collect();
    let transport = Arc::new(FakeTransport::new(records.clone()));

    let results: Vec<JsonObject> = engine(transport.clone(), RestConfig::default())
        .query(&account(), start)
        .map(|r| r.unwrap())
        .collect()
        .await;

    let expected: Vec<String> = records.iter().map(format_datetime).collect();
    assert_eq!(ids(&results), expected);
    assert_eq!(transport.queries().len(), 1);
    assert!(transport.queries()[0].ends_with("ORDER BY SystemModstamp ASC"));
}

#[tokio::test]
async fn test_bisection_covers_ten_days_with_one_hour_limit() {
    let now = Utc::now().with_nanosecond(0).unwrap();
    let start = now - Duration::days(10);
    let records: Vec<_> = (0..480)
        .map(|i| start + Duration::minutes(7 + 30 * i))
        .filter(|ts| *ts < now)
        .collect();
    let transport =
        Arc::new(FakeTransport::new(records.clone()).timing_out_above(Duration::hours(1)));
    let config = RestConfig::default()
        .with_max_retries(10)
        .with_min_window(Duration::minutes(1));

    let results: Vec<JsonObject> = engine(transport.clone(), config)
        .query(&account(), start)
        .map(|r| r.unwrap())
        .collect()
        .await;

    let expected: Vec<String> = records.iter().map(format_datetime).collect();
    assert_eq!(ids(&results), expected);
    assert!(transport.queries().len() > 1);
}

#[tokio::test]
async fn test_always_timing_out_is_unrecoverable() {
    let start = Utc::now() - Duration::days(10);
    let transport = Arc::new(FakeTransport::new(vec![]).timing_out_above(Duration::zero()));

    let results: Vec<Result<JsonObject>> = engine(transport.clone(), RestConfig::default())
        .query(&account(), start)
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(Error::UnrecoverableQueryWindow { .. })
    ));
    // 10d -> 5d -> 2.5d -> 1.25d, and the next half is under a day
    assert_eq!(transport.queries().len(), 4);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let start = Utc::now() - Duration::days(365);
    let transport = Arc::new(FakeTransport::new(vec![]).timing_out_above(Duration::zero()));
    let config = RestConfig::default().with_min_window(Duration::seconds(1));

    let results: Vec<Result<JsonObject>> = engine(transport.clone(), config)
        .query(&account(), start)
        .collect()
        .await;

    assert!(matches!(
        results[0],
        Err(Error::QueryRetriesExhausted { attempts: 4, .. })
    ));
    assert_eq!(transport.queries().len(), 4);
}

#[tokio::test]
async fn test_query_override_is_not_bisected() {
    let transport = Arc::new(FakeTransport::new(vec![]).timing_out_above(Duration::zero()));
    let target = account().with_query_override(
        "SELECT Id FROM Account WHERE SystemModstamp > 2020-01-01T00:00:00Z",
    );

    let results: Vec<Result<JsonObject>> = engine(transport.clone(), RestConfig::default())
        .query(&target, Utc::now() - Duration::days(30))
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].as_ref().unwrap_err().is_query_timeout());
    assert_eq!(transport.queries().len(), 1);
}

#[tokio::test]
async fn test_target_without_replication_key_selects_everything() {
    let start = Utc::now() - Duration::days(2);
    let records: Vec<_> = (1..=9).map(|i| start + Duration::hours(i)).collect();
    let transport = Arc::new(FakeTransport::new(records));
    let target = ExtractionTarget::new("RecordType", vec!["Id".to_string()]);

    let results: Vec<JsonObject> = engine(transport.clone(), RestConfig::default())
        .query(&target, start)
        .map(|r| r.unwrap())
        .collect()
        .await;

    assert_eq!(results.len(), 9);
    assert_eq!(transport.queries(), vec!["SELECT Id FROM RecordType".to_string()]);
}

#[tokio::test]
async fn test_tripped_governor_stops_before_any_query() {
    let transport = Arc::new(FakeTransport::new(vec![]));
    let governor = Arc::new(QuotaGovernor::rest(QuotaPolicy::default()));
    assert!(governor
        .account_for_call(&QuotaSnapshot::new(1_900, 10_000))
        .is_err());

    let query = PaginatedQuery::new(transport.clone(), governor, RestConfig::default());
    let results: Vec<Result<JsonObject>> = query
        .query(&account(), Utc::now() - Duration::days(1))
        .collect()
        .await;

    assert!(matches!(results[0], Err(Error::QuotaExceeded { .. })));
    assert!(transport.queries().is_empty());
}

// ============================================================================
// HTTP Transport Tests
// ============================================================================

#[tokio::test]
async fn test_rest_api_pages_and_drops_attributes() {
    let server = MockServer::start().await;
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let soql = "SELECT Id,SystemModstamp FROM Account WHERE SystemModstamp > 2024-01-01T00:00:00.000000Z ORDER BY SystemModstamp ASC";

    Mock::given(method("GET"))
        .and(path("/services/data/v41.0/queryAll"))
        .and(query_param("q", soql))
        .and(header("Authorization", "Bearer token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Sforce-Limit-Info", "api-usage=10/15000")
                .set_body_json(json!({
                    "totalSize": 2,
                    "done": false,
                    "nextRecordsUrl": "/services/data/v41.0/query/01gD-2000",
                    "records": [
                        {"attributes": {"type": "Account"}, "Id": "001A", "SystemModstamp": "2024-01-02T00:00:00.000+0000"}
                    ]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v41.0/query/01gD-2000"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Sforce-Limit-Info", "api-usage=11/15000")
                .set_body_json(json!({
                    "totalSize": 2,
                    "done": true,
                    "records": [
                        {"attributes": {"type": "Account"}, "Id": "001B", "SystemModstamp": "2024-01-03T00:00:00.000+0000"}
                    ]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let governors = Governors::new(QuotaPolicy::default());
    let client = HttpClient::with_config(HttpClientConfig::builder().no_rate_limit().build())
        .unwrap()
        .with_governors(governors.clone());
    let api = RestApi::new(client, Session::new(server.uri(), "token", "41.0"));
    let query = PaginatedQuery::new(Arc::new(api), governors.rest.clone(), RestConfig::default());

    let results: Vec<JsonObject> = query
        .query(&account(), start)
        .map(|r| r.unwrap())
        .collect()
        .await;

    assert_eq!(ids(&results), vec!["001A", "001B"]);
    assert!(results.iter().all(|r| !r.contains_key("attributes")));
    assert_eq!(governors.rest.attempted(), 2);
}
