//! Storefront metadata client
//!
//! Two-step resolution per work: the product info AJAX endpoint returns a
//! JSON payload keyed by ID (price, download count, base title), and the
//! work's HTML page supplies the fields absent from the JSON payload
//! (circle, cast, illustrators, intro, genre tags).

use super::ResolveError;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("koe-sync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Normalized storefront metadata for one work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkInfo {
    pub id: String,
    pub title: String,
    /// Circle / maker name
    pub circle: String,
    /// Voice actors credited on the work page
    pub cast: Vec<String>,
    pub illustrators: Vec<String>,
    pub genres: Vec<String>,
    pub intro: Option<String>,
    pub release_date: Option<String>,
    pub price: Option<i64>,
    pub dl_count: Option<i64>,
}

/// Base record extracted from the AJAX payload
#[derive(Debug, Clone)]
struct AjaxRecord {
    title: Option<String>,
    price: Option<i64>,
    dl_count: Option<i64>,
}

/// Fields recovered from the work's HTML page
#[derive(Debug, Clone)]
struct WorkPage {
    title: Option<String>,
    circle: String,
    cast: Vec<String>,
    illustrators: Vec<String>,
    genres: Vec<String>,
    intro: Option<String>,
    release_date: Option<String>,
}

static TITLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#work_name").expect("static selector"));
static MAKER_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.maker_name a").expect("static selector"));
static OUTLINE_ROW_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#work_outline tr").expect("static selector"));
static TH_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("static selector"));
static TD_LINK_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td a").expect("static selector"));
static TD_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("static selector"));
static GENRE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.main_genre a").expect("static selector"));
static INTRO_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"div[itemprop="description"]"#).expect("static selector"));

/// Storefront API client
pub struct StorefrontClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl StorefrontClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ResolveError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
        })
    }

    /// Fetch and merge the AJAX base record and HTML supplement for one work
    pub async fn fetch_work_info(&self, id: &str) -> Result<WorkInfo, ResolveError> {
        let ajax = self.fetch_ajax_record(id).await?;
        let page = self.fetch_work_page(id).await?;

        // The AJAX title is authoritative; the page heading is the fallback
        let title = ajax
            .title
            .or(page.title)
            .ok_or_else(|| ResolveError::Parse(format!("no title found for {}", id)))?;

        Ok(WorkInfo {
            id: id.to_string(),
            title,
            circle: page.circle,
            cast: page.cast,
            illustrators: page.illustrators,
            genres: page.genres,
            intro: page.intro,
            release_date: page.release_date,
            price: ajax.price,
            dl_count: ajax.dl_count,
        })
    }

    async fn fetch_ajax_record(&self, id: &str) -> Result<AjaxRecord, ResolveError> {
        let url = format!(
            "{}/home/product/info/ajax?product_id={}",
            self.base_url, id
        );
        debug!(work_id = %id, url = %url, "Fetching product info");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_upstream(status.as_u16(), &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;
        parse_ajax_payload(id, &body)
    }

    async fn fetch_work_page(&self, id: &str) -> Result<WorkPage, ResolveError> {
        let url = format!("{}/work/=/product_id/{}.html", self.base_url, id);
        debug!(work_id = %id, url = %url, "Fetching work page");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ResolveError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_upstream(status.as_u16(), &body));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;
        parse_work_page(id, &html)
    }
}

/// Parse the AJAX payload: a JSON object keyed by product ID. An absent or
/// non-object entry means the storefront has no record for this ID.
fn parse_ajax_payload(id: &str, body: &str) -> Result<AjaxRecord, ResolveError> {
    let payload: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ResolveError::Parse(e.to_string()))?;

    let record = match payload.get(id) {
        Some(record) if record.is_object() => record,
        _ => return Err(ResolveError::NotFound(id.to_string())),
    };

    Ok(AjaxRecord {
        title: record
            .get("work_name")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        price: record.get("price").and_then(|v| v.as_i64()),
        dl_count: record.get("dl_count").and_then(|v| v.as_i64()),
    })
}

/// Parse the work page. The maker anchor is required; its absence means the
/// page layout changed (or we got an unexpected document) and is a parse
/// failure rather than a silent empty record.
fn parse_work_page(id: &str, html: &str) -> Result<WorkPage, ResolveError> {
    let document = Html::parse_document(html);

    let circle = document
        .select(&MAKER_SEL)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ResolveError::Parse(format!("maker anchor missing for {}", id)))?;

    let title = document
        .select(&TITLE_SEL)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty());

    let mut cast = Vec::new();
    let mut illustrators = Vec::new();
    let mut release_date = None;

    for row in document.select(&OUTLINE_ROW_SEL) {
        let Some(label) = row.select(&TH_SEL).next().map(element_text) else {
            continue;
        };
        match label.as_str() {
            "声優" => cast = row.select(&TD_LINK_SEL).map(element_text).collect(),
            "イラスト" => {
                illustrators = row.select(&TD_LINK_SEL).map(element_text).collect()
            }
            "販売日" => {
                release_date = row
                    .select(&TD_SEL)
                    .next()
                    .map(element_text)
                    .filter(|t| !t.is_empty())
            }
            _ => {}
        }
    }

    let genres = document.select(&GENRE_SEL).map(element_text).collect();

    let intro = document
        .select(&INTRO_SEL)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty());

    Ok(WorkPage {
        title,
        circle,
        cast,
        illustrators,
        genres,
        intro,
        release_date,
    })
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Classify a non-2xx storefront response: an HTML error page reads
/// differently to the operator than a structured JSON error body.
fn classify_upstream(status: u16, body: &str) -> ResolveError {
    let trimmed = body.trim_start();
    let message = if trimmed.starts_with('<') {
        "upstream returned an HTML error page".to_string()
    } else if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let detail = json
            .get("message")
            .or_else(|| json.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or("unspecified");
        format!("upstream returned a JSON error body: {}", detail)
    } else {
        "upstream failure".to_string()
    };
    ResolveError::Upstream { status, message }
}
