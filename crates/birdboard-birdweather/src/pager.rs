//! Cursor pagination over the `detections` connection.

use tracing::warn;

use crate::client::BirdWeatherClient;
use crate::error::BirdWeatherError;
use crate::types::{DetectionPage, DetectionQuery};

/// Walks detection pages one at a time.
///
/// `fetch` never moves the cursor, so fetching twice yields the same page.
/// The caller calls `advance` once it has accepted a page. After the last
/// page has been advanced past, the pager is finished and stays finished.
pub struct DetectionPager<'a> {
    client: &'a BirdWeatherClient,
    query: DetectionQuery,
    cursor: Option<String>,
    finished: bool,
}

impl<'a> DetectionPager<'a> {
    pub fn new(client: &'a BirdWeatherClient, query: DetectionQuery) -> Self {
        let cursor = query.after.clone();
        Self {
            client,
            query,
            cursor,
            finished: false,
        }
    }

    /// Start after a previously persisted cursor instead of the beginning.
    pub fn resume_from(mut self, cursor: Option<String>) -> Self {
        if cursor.is_some() {
            self.cursor = cursor;
        }
        self
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The page at the current cursor, or `None` once finished.
    pub async fn fetch(&self) -> Result<Option<DetectionPage>, BirdWeatherError> {
        if self.finished {
            return Ok(None);
        }
        let query = self.query.clone().after(self.cursor.clone());
        self.client.detections(query).await.map(Some)
    }

    /// Move past `page`.
    pub fn advance(&mut self, page: &DetectionPage) {
        if self.finished {
            return;
        }
        match (&page.end_cursor, page.has_next_page) {
            (Some(cursor), true) => self.cursor = Some(cursor.clone()),
            (None, true) => {
                warn!("Detections page reports more results but no cursor; stopping");
                self.finished = true;
            }
            (cursor, false) => {
                if cursor.is_some() {
                    self.cursor = cursor.clone();
                }
                self.finished = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::client::BirdWeatherSettings;
    use crate::types::Period;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_body(ids: &[&str], next: Option<&str>) -> serde_json::Value {
        let nodes: Vec<_> = ids
            .iter()
            .map(|id| json!({"timestamp": "2024-05-01T10:00:00Z", "species": {"id": id}}))
            .collect();
        json!({"data": {"detections": {
            "totalCount": 5,
            "pageInfo": {"hasNextPage": next.is_some(), "endCursor": next.unwrap_or("end")},
            "nodes": nodes
        }}})
    }

    async fn mount_pages(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"after": null}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["a", "b"], Some("c1"))))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"after": "c1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["c", "d"], Some("c2"))))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"after": "c2"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["e"], None)))
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> BirdWeatherClient {
        BirdWeatherClient::new(BirdWeatherSettings {
            api_url: format!("{}/graphql", server.uri()),
            api_key: Some("k".into()),
            station_id: Some("1".into()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_pages_do_not_overlap() {
        let server = MockServer::start().await;
        mount_pages(&server).await;
        let client = client_for(&server);

        let mut pager = DetectionPager::new(&client, DetectionQuery::new(Period::days(1)).with_page_size(2));
        let mut seen = HashSet::new();
        let mut pages = 0;
        while let Some(page) = pager.fetch().await.unwrap() {
            for d in &page.detections {
                assert!(seen.insert(d.species_id.clone().unwrap()), "duplicate across pages");
            }
            pager.advance(&page);
            pages += 1;
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 5);
        assert!(pager.is_finished());
        assert!(pager.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_without_advance_is_idempotent() {
        let server = MockServer::start().await;
        mount_pages(&server).await;
        let client = client_for(&server);

        let pager = DetectionPager::new(&client, DetectionQuery::new(Period::days(1)))
            .resume_from(Some("c1".into()));
        let first = pager.fetch().await.unwrap().unwrap();
        let again = pager.fetch().await.unwrap().unwrap();

        assert_eq!(first, again);
        assert_eq!(pager.cursor(), Some("c1"));
        assert_eq!(first.detections[0].species_id.as_deref(), Some("c"));
    }
}
