use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;

#[derive(Clone, Debug, PartialEq)]
pub struct DoiMetadata {
    pub title: String,
}

/// Looks up bibliographic metadata for a DOI. `Ok(None)` means the DOI is
/// unknown to the registry.
#[async_trait]
pub trait DoiResolver: Send + Sync {
    async fn lookup(&self, doi: &str) -> anyhow::Result<Option<DoiMetadata>>;
}

#[derive(Deserialize)]
struct WorkResponse {
    message: Work,
}

#[derive(Deserialize)]
struct Work {
    #[serde(default)]
    title: Vec<String>,
}

pub struct CrossrefResolver {
    client: reqwest::Client,
    base_url: String,
}

impl CrossrefResolver {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<CrossrefResolver> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sciarticle-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build the Crossref HTTP client")?;
        Ok(CrossrefResolver {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DoiResolver for CrossrefResolver {
    async fn lookup(&self, doi: &str) -> anyhow::Result<Option<DoiMetadata>> {
        let response = self
            .client
            .get(format!("{}/works/{}", self.base_url, doi))
            .send()
            .await
            .context("Crossref request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let work: WorkResponse = response
            .error_for_status()
            .context("Crossref refused the lookup")?
            .json()
            .await
            .context("Crossref returned an unreadable body")?;

        Ok(work
            .message
            .title
            .into_iter()
            .map(|title| title.split_whitespace().collect::<Vec<_>>().join(" "))
            .find(|title| !title.is_empty())
            .map(|title| DoiMetadata { title }))
    }
}

/// Used when lookups are switched off.
pub struct NoLookup;

#[async_trait]
impl DoiResolver for NoLookup {
    async fn lookup(&self, _doi: &str) -> anyhow::Result<Option<DoiMetadata>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{CrossrefResolver, DoiResolver};

    fn resolver(server: &MockServer) -> CrossrefResolver {
        CrossrefResolver::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn returns_the_first_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1038/nature12373"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "message": {"title": ["Nanometre-scale\n  thermometry in a living cell"]}
            })))
            .mount(&server)
            .await;

        let metadata = resolver(&server).lookup("10.1038/nature12373").await.unwrap();

        assert_eq!(
            metadata.unwrap().title,
            "Nanometre-scale thermometry in a living cell"
        );
    }

    #[tokio::test]
    async fn unknown_doi_has_no_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(resolver(&server).lookup("10.1234/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(resolver(&server).lookup("10.1234/x").await.is_err());
    }
}
