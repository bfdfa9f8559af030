//! Google Calendar tools, timestamp normalization and the user's timezone

use std::future::Future;
use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::Workspace;
use crate::auth::with_auth_retry;
use crate::error::{Error, Result};

/// Canonical wire format for Calendar API bounds
const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const FALLBACK_TIMEZONE: &str = "UTC";

/// Explicit UTC offset at the end of a timestamp: `+05:30`, `-0500`
static OFFSET_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]\d{2}:?\d{2}$").expect("valid regex"));

/// Local date-time layouts accepted without an offset
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Normalize a user-supplied timestamp for the Calendar API.
///
/// Values that already carry `Z` or an offset are returned as is. Bare dates
/// and local date-times are read in `user_tz` and converted to UTC. Anything
/// unrecognised gets a `Z` appended. An unknown `user_tz` is treated as UTC.
pub fn normalize_timestamp(raw: &str, user_tz: &str) -> String {
    if raw.is_empty() || raw.ends_with('Z') || OFFSET_SUFFIX.is_match(raw) {
        return raw.to_string();
    }

    let tz: Tz = user_tz.parse().unwrap_or_else(|_| {
        debug!("Unknown timezone '{}', using UTC", user_tz);
        Tz::UTC
    });

    let naive = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        });

    match naive.and_then(|naive| to_utc(&tz, naive)) {
        Some(utc) => utc,
        None => format!("{}Z", raw),
    }
}

fn to_utc(tz: &Tz, naive: NaiveDateTime) -> Option<String> {
    // Ambiguous times take the earlier instant; times in a DST gap move
    // forward an hour
    let local = tz
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())?;
    Some(local.with_timezone(&Utc).format(CANONICAL_FORMAT).to_string())
}

/// Memoizes the primary calendar's timezone for the life of the process.
///
/// Only successful lookups are cached; failures fall back to UTC and are
/// retried on the next call.
#[derive(Debug, Default)]
pub struct TimezoneResolver {
    cached: Mutex<Option<String>>,
}

impl TimezoneResolver {
    pub fn cached(&self) -> Option<String> {
        self.cached.lock().clone()
    }

    /// Return the cached timezone, or run `fetch` to obtain it
    pub async fn resolve<F, Fut>(&self, fetch: F) -> String
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(tz) = self.cached() {
            return tz;
        }

        match fetch().await {
            Ok(tz) if !tz.is_empty() => {
                info!("User timezone: {}", tz);
                *self.cached.lock() = Some(tz.clone());
                tz
            }
            Ok(_) => {
                warn!("Primary calendar has an empty timeZone, using UTC");
                FALLBACK_TIMEZONE.to_string()
            }
            Err(e) => {
                warn!("Could not fetch calendar timezone, using UTC: {}", e);
                FALLBACK_TIMEZONE.to_string()
            }
        }
    }
}

/// The user's timezone from their primary calendar, `"UTC"` on failure
pub async fn get_user_timezone(ws: &Workspace) -> String {
    ws.timezone
        .resolve(|| async {
            let calendar = with_auth_retry(&ws.auth, "calendar", "v3", |svc| async move {
                svc.get_json("calendars/primary", &[]).await
            })
            .await?;
            calendar["timeZone"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| Error::Other("primary calendar has no timeZone".to_string()))
        })
        .await
}

/// List the calendars the user can see
pub async fn calendar_list(ws: &Workspace) -> Result<Value> {
    let body = with_auth_retry(&ws.auth, "calendar", "v3", |svc| async move {
        svc.get_json("users/me/calendarList", &[]).await
    })
    .await?;

    let calendars: Vec<Value> = body["items"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|cal| {
            json!({
                "id": cal["id"],
                "summary": cal["summary"].as_str().unwrap_or("Untitled"),
                "description": cal["description"].as_str().unwrap_or_default(),
                "primary": cal["primary"].as_bool().unwrap_or(false),
                "accessRole": cal["accessRole"].as_str().unwrap_or_default(),
                "backgroundColor": cal["backgroundColor"].as_str().unwrap_or_default(),
            })
        })
        .collect();

    info!("Found {} calendars", calendars.len());

    Ok(json!({
        "status": "success",
        "count": calendars.len(),
        "calendars": calendars,
    }))
}

/// Arguments for [`calendar_get_events`]
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub calendar_id: String,
    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub max_results: usize,
    pub query: Option<String>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            time_min: None,
            time_max: None,
            max_results: 25,
            query: None,
        }
    }
}

fn format_event(event: &Value) -> Value {
    let start = &event["start"];
    let end = &event["end"];
    let attendees: Vec<Value> = event["attendees"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|a| {
            json!({
                "email": a["email"].as_str().unwrap_or_default(),
                "responseStatus": a["responseStatus"].as_str().unwrap_or_default(),
            })
        })
        .collect();

    json!({
        "id": event["id"],
        "summary": event["summary"].as_str().unwrap_or("(No Title)"),
        "description": event["description"].as_str().unwrap_or_default(),
        "start": start["dateTime"].as_str().or(start["date"].as_str()).unwrap_or_default(),
        "end": end["dateTime"].as_str().or(end["date"].as_str()).unwrap_or_default(),
        "location": event["location"].as_str().unwrap_or_default(),
        "status": event["status"].as_str().unwrap_or_default(),
        "htmlLink": event["htmlLink"].as_str().unwrap_or_default(),
        "attendees": attendees,
    })
}

/// Events in a time range, expanded into single instances.
///
/// Bounds default to now and one week from now. User-supplied bounds
/// without an offset are read in the user's calendar timezone.
pub async fn calendar_get_events(ws: &Workspace, query: EventQuery) -> Result<Value> {
    let user_tz = get_user_timezone(ws).await;
    let now = Utc::now();

    let time_min = match query.time_min.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => normalize_timestamp(raw, &user_tz),
        _ => now.format(CANONICAL_FORMAT).to_string(),
    };
    let time_max = match query.time_max.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => normalize_timestamp(raw, &user_tz),
        _ => (now + Duration::days(7)).format(CANONICAL_FORMAT).to_string(),
    };

    let mut params = vec![
        ("timeMin", time_min.clone()),
        ("timeMax", time_max.clone()),
        ("maxResults", query.max_results.clamp(1, 250).to_string()),
        ("singleEvents", "true".to_string()),
        ("orderBy", "startTime".to_string()),
    ];
    if let Some(q) = query.query.as_deref().filter(|q| !q.trim().is_empty()) {
        params.push(("q", q.to_string()));
    }
    let params = &params;
    let path = format!("calendars/{}/events", urlencoding::encode(&query.calendar_id));
    let path = &path;

    let body = with_auth_retry(&ws.auth, "calendar", "v3", move |svc| async move {
        svc.get_json(path, params).await
    })
    .await?;

    let events: Vec<Value> = body["items"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(format_event)
        .collect();

    info!(
        "Found {} events in {} between {} and {}",
        events.len(),
        query.calendar_id,
        time_min,
        time_max
    );

    Ok(json!({
        "status": "success",
        "calendar_id": query.calendar_id,
        "user_timezone": user_tz,
        "time_min": time_min,
        "time_max": time_max,
        "count": events.len(),
        "events": events,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::testing;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_utc_and_offset_values_unchanged() {
        for raw in [
            "2025-12-15T18:00:00Z",
            "2025-12-15T00:00:00-05:00",
            "2025-12-15T00:00:00+0530",
            "2025-12-15T10:00:00.000Z",
        ] {
            assert_eq!(normalize_timestamp(raw, "America/New_York"), raw);
        }
    }

    #[test]
    fn test_empty_unchanged() {
        assert_eq!(normalize_timestamp("", "UTC"), "");
    }

    #[test]
    fn test_naive_datetime_in_utc() {
        assert_eq!(
            normalize_timestamp("2025-12-15T18:00:00", "UTC"),
            "2025-12-15T18:00:00Z"
        );
    }

    #[test]
    fn test_bare_date_is_local_midnight() {
        assert_eq!(
            normalize_timestamp("2025-12-15", "America/New_York"),
            "2025-12-15T05:00:00Z"
        );
        assert_eq!(normalize_timestamp("2025-12-15", "UTC"), "2025-12-15T00:00:00Z");
        assert_eq!(
            normalize_timestamp("2025-06-01", "Asia/Tokyo"),
            "2025-05-31T15:00:00Z"
        );
    }

    #[test]
    fn test_accepted_local_layouts() {
        assert_eq!(
            normalize_timestamp("2025-07-01T09:30", "America/New_York"),
            "2025-07-01T13:30:00Z"
        );
        assert_eq!(
            normalize_timestamp("2025-07-01 09:30:15", "America/New_York"),
            "2025-07-01T13:30:15Z"
        );
        assert_eq!(
            normalize_timestamp("2025-12-15 18:00", "UTC"),
            "2025-12-15T18:00:00Z"
        );
        assert_eq!(
            normalize_timestamp("2025-12-15T18:00:00.250", "UTC"),
            "2025-12-15T18:00:00Z"
        );
    }

    #[test]
    fn test_dst_transitions() {
        // 01:30 happens twice on the fall-back day; the earlier (EDT) wins
        assert_eq!(
            normalize_timestamp("2025-11-02T01:30:00", "America/New_York"),
            "2025-11-02T05:30:00Z"
        );
        // 02:30 does not exist on the spring-forward day
        assert_eq!(
            normalize_timestamp("2025-03-09T02:30:00", "America/New_York"),
            "2025-03-09T07:30:00Z"
        );
    }

    #[test]
    fn test_unknown_timezone_is_utc() {
        assert_eq!(
            normalize_timestamp("2025-12-15T18:00:00", "Mars/Olympus_Mons"),
            "2025-12-15T18:00:00Z"
        );
    }

    #[test]
    fn test_unrecognised_gets_z() {
        assert_eq!(normalize_timestamp("next tuesday", "UTC"), "next tuesdayZ");
        assert_eq!(normalize_timestamp("2025-13-45", "UTC"), "2025-13-45Z");
    }

    #[tokio::test]
    async fn test_timezone_cached_after_success() {
        let resolver = TimezoneResolver::default();
        let fetches = AtomicUsize::new(0);

        for _ in 0..2 {
            let tz = resolver
                .resolve(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok("Europe/Berlin".to_string())
                })
                .await;
            assert_eq!(tz, "Europe/Berlin");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached().as_deref(), Some("Europe/Berlin"));
    }

    #[tokio::test]
    async fn test_timezone_failure_falls_back_to_utc() {
        let resolver = TimezoneResolver::default();
        let tz = resolver
            .resolve(|| async {
                Err(Error::Api {
                    status: 500,
                    message: "backend error".to_string(),
                })
            })
            .await;
        assert_eq!(tz, "UTC");
        assert!(resolver.cached().is_none());

        let tz = resolver.resolve(|| async { Ok("Asia/Tokyo".to_string()) }).await;
        assert_eq!(tz, "Asia/Tokyo");
    }

    #[tokio::test]
    async fn test_get_events_normalizes_bounds_in_user_timezone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "me@example.com",
                "timeZone": "America/New_York"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(query_param("timeMin", "2025-12-15T05:00:00Z"))
            .and(query_param("timeMax", "2025-12-16T00:00:00Z"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("maxResults", "250"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "evt1",
                    "start": {"dateTime": "2025-12-15T10:00:00-05:00"},
                    "end": {"date": "2025-12-15"},
                    "attendees": [{"email": "a@example.com", "responseStatus": "accepted"}]
                }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let query = EventQuery {
            time_min: Some("2025-12-15".to_string()),
            time_max: Some("2025-12-16T00:00:00Z".to_string()),
            max_results: 1000,
            ..Default::default()
        };

        let result = calendar_get_events(&ws, query.clone()).await.unwrap();
        assert_eq!(result["user_timezone"], "America/New_York");
        assert_eq!(result["time_min"], "2025-12-15T05:00:00Z");
        assert_eq!(result["count"], 1);

        let event = &result["events"][0];
        assert_eq!(event["summary"], "(No Title)");
        assert_eq!(event["start"], "2025-12-15T10:00:00-05:00");
        assert_eq!(event["end"], "2025-12-15");
        assert_eq!(event["attendees"][0]["responseStatus"], "accepted");

        // Second call reuses the cached timezone
        calendar_get_events(&ws, query).await.unwrap();
    }

    #[tokio::test]
    async fn test_calendar_list_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"id": "primary-id", "summary": "Me", "primary": true, "accessRole": "owner"},
                    {"id": "team@group.calendar.google.com", "accessRole": "reader"}
                ]
            })))
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let result = calendar_list(&ws).await.unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(result["calendars"][0]["primary"], true);
        assert_eq!(result["calendars"][1]["summary"], "Untitled");
        assert_eq!(result["calendars"][1]["primary"], false);
    }
}
