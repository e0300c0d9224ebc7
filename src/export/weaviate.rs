use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::article::Article;
use crate::settings::Settings;

use super::window::TimeWindow;

const PROPERTIES: &str = "feedId title language url pub_date created authors summary text";

/// Returns every record whose `created` epoch lies in the window, in one page.
pub trait PageFetcher {
    async fn fetch(&self, window: &TimeWindow) -> Result<Vec<Article>>;
}

/// Plain structured `Get` against the Weaviate GraphQL endpoint (no vector ranking).
pub struct WeaviateFetcher {
    client: reqwest::Client,
    endpoint: String,
    collection: String,
    page_limit: usize,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

impl WeaviateFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(WeaviateFetcher {
            client,
            endpoint: format!("{}/v1/graphql", settings.weaviate_base_url()),
            collection: settings.collection.clone(),
            page_limit: settings.page_limit,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PageFetcher for WeaviateFetcher {
    async fn fetch(&self, window: &TimeWindow) -> Result<Vec<Article>> {
        let query = build_query(&self.collection, self.page_limit, window);
        debug!("GraphQL query for {}: {}", window, query);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.endpoint))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Weaviate response body")?;
        if !status.is_success() {
            bail!("Weaviate returned {}: {}", status, body);
        }

        let mut page = parse_page(&body, &self.collection)?;
        let fetched = page.len();
        if page_is_full(fetched, self.page_limit) {
            warn!(
                "Window {} returned {} objects, the page limit; later records may be missing",
                window, fetched
            );
        }
        page.retain(|a| a.created.is_some_and(|c| window.contains_epoch(c)));
        if page.len() < fetched {
            warn!(
                "Dropped {} objects outside {} returned by Weaviate",
                fetched - page.len(),
                window
            );
        }
        Ok(page)
    }
}

/// A page filled up to `limit` was probably cut short by it.
fn page_is_full(fetched: usize, limit: usize) -> bool {
    limit > 0 && fetched >= limit
}

/// `created >= start AND created < end`, at most `limit` objects.
pub fn build_query(collection: &str, limit: usize, window: &TimeWindow) -> String {
    format!(
        r#"{{
  Get {{
    {collection}(
      limit: {limit}
      where: {{
        operator: And
        operands: [
          {{ path: ["created"], operator: GreaterThanEqual, valueInt: {from} }}
          {{ path: ["created"], operator: LessThan, valueInt: {till} }}
        ]
      }}
    ) {{
      {PROPERTIES}
    }}
  }}
}}"#,
        collection = collection,
        limit = limit,
        from = window.start_epoch(),
        till = window.end_epoch(),
    )
}

pub fn parse_page(body: &str, collection: &str) -> Result<Vec<Article>> {
    let parsed: GraphQlResponse =
        serde_json::from_str(body).context("Weaviate response is not valid JSON")?;

    if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
        let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
        bail!("Weaviate query failed: {}", messages.join("; "));
    }

    let objects = parsed
        .data
        .as_ref()
        .and_then(|d| d.get("Get"))
        .and_then(|g| g.get(collection))
        .ok_or_else(|| anyhow!("No data.Get.{} in Weaviate response", collection))?;

    if objects.is_null() {
        return Ok(Vec::new());
    }

    serde_json::from_value(objects.clone())
        .with_context(|| format!("Unexpected {} object shape", collection))
}
