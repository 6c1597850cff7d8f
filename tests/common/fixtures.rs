//! Mock endpoints and canned payloads

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use catalog_harvest::{FailureChoice, FailureContext, FailurePolicy};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

/// Body of one discover page listing `ids`
pub fn discover_body(page: u32, total_pages: u32, ids: &[u64]) -> Value {
    let results: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "title": format!("Movie {}", id) }))
        .collect();
    json!({
        "page": page,
        "total_pages": total_pages,
        "total_results": ids.len(),
        "results": results
    })
}

/// Body of a detail payload with credits for `id`
pub fn details_body(id: u64) -> Value {
    json!({
        "id": id,
        "title": format!("Movie {}", id),
        "release_date": "2021-03-14",
        "runtime": 95,
        "overview": "A story\nin two lines.",
        "tagline": "",
        "vote_average": 6.8,
        "vote_count": 420,
        "popularity": 12.5,
        "budget": 1000000,
        "revenue": 2500000,
        "original_language": "en",
        "genres": [ { "id": 18, "name": "Drama" }, { "id": 53, "name": "Thriller" } ],
        "production_companies": [ { "id": 1, "name": "Studio One" } ],
        "credits": {
            "cast": [ { "name": "Lead" }, { "name": "Support" } ],
            "crew": [ { "name": "Writer", "job": "Screenplay" }, { "name": "Boss", "job": "Director" } ]
        }
    })
}

/// Discover mock for one year and page returning `ids`
pub fn discover_mock(year: i32, page: u32, total_pages: u32, ids: &[u64]) -> Mock {
    discover_route(year, page)
        .respond_with(ResponseTemplate::new(200).set_body_json(discover_body(page, total_pages, ids)))
}

/// Discover route for one year and page, without a response
pub fn discover_route(year: i32, page: u32) -> wiremock::MockBuilder {
    Mock::given(method("GET"))
        .and(path("/discover/movie"))
        .and(query_param("primary_release_year", year.to_string()))
        .and(query_param("page", page.to_string()))
}

/// Detail mock for `id`
pub fn details_mock(id: u64) -> Mock {
    Mock::given(method("GET"))
        .and(path(format!("/movie/{}", id)))
        .and(query_param("append_to_response", "credits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(details_body(id)))
}

/// Error body in the upstream's format
pub fn error_body(code: u32, message: &str) -> Value {
    json!({ "success": false, "status_code": code, "status_message": message })
}

/// Policy that answers from a script and records what it was asked
///
/// Once the script runs out it aborts the session.
#[derive(Clone, Default)]
pub struct ScriptedPolicy {
    choices: Arc<Mutex<VecDeque<FailureChoice>>>,
    seen: Arc<Mutex<Vec<FailureContext>>>,
}

impl ScriptedPolicy {
    /// Policy answering `choices` in order
    pub fn new(choices: impl IntoIterator<Item = FailureChoice>) -> Self {
        Self {
            choices: Arc::new(Mutex::new(choices.into_iter().collect())),
            seen: Arc::default(),
        }
    }

    /// Every context the policy was consulted with
    pub fn seen(&self) -> Vec<FailureContext> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl FailurePolicy for ScriptedPolicy {
    async fn decide(&mut self, context: &FailureContext) -> FailureChoice {
        self.seen.lock().unwrap().push(context.clone());
        self.choices
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FailureChoice::AbortSession)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
