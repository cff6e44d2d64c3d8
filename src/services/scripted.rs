//! Scripted catalog for crawl loop tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Beatmap, BeatmapSet, SearchPage, SearchQuery, UpstreamConfig};
use crate::services::CatalogSource;

#[derive(Default)]
pub struct ScriptedCatalog {
    sets: Mutex<HashMap<u64, BeatmapSet>>,
    maps: Mutex<HashMap<u64, Beatmap>>,
    pages: Mutex<VecDeque<SearchPage>>,
    failures: Mutex<VecDeque<u16>>,
    queries: Mutex<Vec<SearchQuery>>,
    calls: AtomicUsize,
}

pub fn set(id: u64, status: &str, map_ids: &[u64]) -> BeatmapSet {
    let maps: Vec<_> = map_ids
        .iter()
        .map(|m| json!({"id": m, "status": status, "checksum": format!("md5-{m}")}))
        .collect();
    serde_json::from_value(json!({
        "id": id,
        "status": status,
        "title": format!("set {id}"),
        "beatmaps": maps
    }))
    .unwrap()
}

pub fn map(id: u64, set_id: u64, status: &str) -> Beatmap {
    serde_json::from_value(json!({
        "id": id,
        "beatmapset_id": set_id,
        "status": status,
        "checksum": format!("md5-{id}")
    }))
    .unwrap()
}

pub fn page(sets: Vec<BeatmapSet>, cursor: Option<serde_json::Value>) -> SearchPage {
    SearchPage {
        beatmapsets: sets,
        cursor: cursor.map(crate::models::CrawlCursor::new),
        error: None,
        total: None,
    }
}

/// Upstream settings pointing at `server`, with a long-lived token mounted.
pub async fn upstream_at(server: &wiremock::MockServer) -> UpstreamConfig {
    wiremock::Mock::given(wiremock::matchers::path("/oauth/token"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 86400
        })))
        .mount(server)
        .await;

    UpstreamConfig {
        api_base_url: format!("{}/api/v2", server.uri()),
        token_url: format!("{}/oauth/token", server.uri()),
        client_id: "1".to_string(),
        client_secret: "secret".to_string(),
        request_interval_ms: 0,
        ..UpstreamConfig::default()
    }
}

impl ScriptedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set(self, set: BeatmapSet) -> Self {
        self.sets.lock().unwrap().insert(set.id, set);
        self
    }

    pub fn with_map(self, map: Beatmap) -> Self {
        self.maps.lock().unwrap().insert(map.id, map);
        self
    }

    pub fn push_page(&self, page: SearchPage) {
        self.pages.lock().unwrap().push_back(page);
    }

    /// Fail the next `times` calls with `status`.
    pub fn fail_next(&self, status: u16, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        failures.extend(std::iter::repeat_n(status, times));
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self, path: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().unwrap().pop_front() {
            Some(status) => Err(AppError::request(status, path)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CatalogSource for ScriptedCatalog {
    async fn beatmapset(&self, id: u64) -> Result<BeatmapSet> {
        let path = format!("beatmapsets/{id}");
        self.begin(&path)?;
        self.sets
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::request(404, path))
    }

    async fn beatmap(&self, id: u64) -> Result<Beatmap> {
        let path = format!("beatmaps/{id}");
        self.begin(&path)?;
        self.maps
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::request(404, path))
    }

    async fn beatmaps(&self, ids: &[u64]) -> Result<Vec<Beatmap>> {
        self.begin("beatmaps")?;
        let maps = self.maps.lock().unwrap();
        Ok(ids.iter().filter_map(|id| maps.get(id).cloned()).collect())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        self.queries.lock().unwrap().push(query.clone());
        self.begin("beatmapsets/search")?;
        Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
    }
}
