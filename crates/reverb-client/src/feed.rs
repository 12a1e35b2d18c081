//! Client for the store's customer-review RSS feed.
//!
//! The feed serves one listing page per request, parameterized by catalog
//! id, storefront country, sort order, and page number:
//!
//! ```text
//! {base}/{country}/rss/customerreviews/page={page}/id={id}/sortby={sort}/json
//! ```
//!
//! Each page carries zero or more label-wrapped entries plus a `link`
//! element with `rel="next"` pointing at the following page. Entries
//! without a rating (the feed's app-metadata preamble) are ignored;
//! entries whose rating falls outside `[1, 5]` are rejected and counted,
//! never aborting the page.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use reverb_core::error::AppError;
use reverb_core::models::{FeedPage, FeedRequest, NormalizedReview};
use reverb_core::{HttpConfig, ReviewFeedClient};

/// Default upstream base URL.
pub const DEFAULT_BASE_URL: &str = "https://itunes.apple.com";

/// Fallback Retry-After when a 429 carries no usable header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

// =============================================================================
// Wire format
// =============================================================================

/// A `{"label": "..."}`-wrapped feed value.
#[derive(Deserialize, Debug, Clone)]
struct Label {
    label: String,
}

#[derive(Deserialize, Debug)]
struct AuthorField {
    name: Label,
}

/// One raw feed entry before normalization.
///
/// The first entry of a feed is often the app's own metadata, which lacks
/// an `im:rating` field; [`AppStoreFeedClient::normalize_entry`] filters it
/// out by requiring a parsable rating.
#[derive(Deserialize, Debug)]
struct RawEntry {
    id: Label,
    author: Option<AuthorField>,
    #[serde(rename = "im:rating")]
    rating: Option<Label>,
    title: Option<Label>,
    content: Option<Label>,
    #[serde(rename = "im:version")]
    version: Option<Label>,
    #[serde(rename = "im:voteSum")]
    vote_sum: Option<Label>,
    #[serde(rename = "im:voteCount")]
    vote_count: Option<Label>,
    updated: Option<Label>,
}

#[derive(Deserialize, Debug)]
struct LinkAttributes {
    rel: String,
    href: String,
}

#[derive(Deserialize, Debug)]
struct FeedLink {
    attributes: LinkAttributes,
}

#[derive(Deserialize, Debug)]
struct FeedBody {
    #[serde(default)]
    entry: Vec<RawEntry>,
    #[serde(default)]
    link: Vec<FeedLink>,
}

#[derive(Deserialize, Debug)]
struct FeedEnvelope {
    feed: FeedBody,
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the store review feed.
///
/// # Examples
///
/// ```no_run
/// use reverb_client::AppStoreFeedClient;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = AppStoreFeedClient::new("https://itunes.apple.com")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AppStoreFeedClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl AppStoreFeedClient {
    /// Creates a feed client against the given base URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL is invalid and
    /// `AppError::Client` if the HTTP client cannot be built.
    pub fn new(base_url_str: &str) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url_str)
            .map_err(|_| AppError::Config(format!("Invalid feed base URL: {base_url_str}")))?;

        let http_config = HttpConfig::default();
        let client = Client::builder()
            .user_agent(http_config.user_agent.clone())
            .timeout(http_config.timeout)
            .build()
            .map_err(|e| AppError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout: http_config.timeout,
        })
    }

    /// Creates a client against the production feed.
    pub fn production() -> Result<Self, AppError> {
        Self::new(DEFAULT_BASE_URL)
    }

    /// Builds the deterministic page URL for a request.
    fn page_url(&self, request: &FeedRequest) -> Result<Url, AppError> {
        let path = format!(
            "{}/rss/customerreviews/page={}/id={}/sortby={}/json",
            request.country,
            request.page,
            request.store_id,
            request.sort.feed_param()
        );
        self.base_url
            .join(&path)
            .map_err(|e| AppError::Config(format!("Invalid feed URL: {e}")))
    }

    /// Fetches and parses one feed page.
    async fn fetch_page_inner(&self, request: &FeedRequest) -> Result<FeedPage, AppError> {
        let url = self.page_url(request)?;

        let resp = match self.client.get(url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Err(AppError::Timeout(self.timeout.as_secs())),
            Err(e) if e.is_connect() => {
                return Err(AppError::Network(format!("Connection failed: {e}")));
            }
            Err(e) => return Err(AppError::Network(e.to_string())),
        };

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::AppNotFoundUpstream);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(AppError::RateLimitedUpstream { retry_after });
        }
        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let envelope: FeedEnvelope = resp
            .json()
            .await
            .map_err(|e| AppError::Client(format!("Malformed feed body: {e}")))?;

        Ok(Self::parse_body(envelope.feed, request))
    }

    /// Normalizes a parsed body into a [`FeedPage`].
    fn parse_body(body: FeedBody, request: &FeedRequest) -> FeedPage {
        let mut reviews = Vec::with_capacity(body.entry.len());
        let mut rejected = 0usize;

        for entry in body.entry {
            // Entries without any rating label are feed preamble, not reviews.
            let Some(rating_label) = &entry.rating else {
                continue;
            };
            match Self::normalize_entry(&entry, rating_label, request) {
                Some(review) => reviews.push(review),
                None => rejected += 1,
            }
        }

        let next_page = body
            .link
            .iter()
            .find(|l| l.attributes.rel == "next")
            .and_then(|l| parse_page_number(&l.attributes.href))
            // The feed repeats its last page forever; only a forward
            // pointer counts as a real next page.
            .filter(|&next| next > request.page);

        FeedPage {
            reviews,
            rejected,
            next_page,
        }
    }

    /// Normalizes one raw entry, rejecting ratings outside `[1, 5]`.
    fn normalize_entry(
        entry: &RawEntry,
        rating_label: &Label,
        request: &FeedRequest,
    ) -> Option<NormalizedReview> {
        let rating: i32 = rating_label.label.trim().parse().ok()?;
        if !(1..=5).contains(&rating) {
            return None;
        }

        let published_at = entry
            .updated
            .as_ref()
            .and_then(|l| DateTime::parse_from_rfc3339(&l.label).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(NormalizedReview {
            external_id: entry.id.label.clone(),
            rating,
            title: entry.title.as_ref().map(|l| l.label.clone()),
            content: entry
                .content
                .as_ref()
                .map(|l| l.label.clone())
                .unwrap_or_default(),
            author: entry.author.as_ref().map(|a| a.name.label.clone()),
            app_version: entry.version.as_ref().map(|l| l.label.clone()),
            country: request.country.clone(),
            language: None,
            published_at,
            vote_sum: parse_count(entry.vote_sum.as_ref()),
            vote_count: parse_count(entry.vote_count.as_ref()),
            source: request.sort,
        })
    }
}

/// Parses a non-negative count label, defaulting to 0.
fn parse_count(label: Option<&Label>) -> i64 {
    label
        .and_then(|l| l.label.trim().parse::<i64>().ok())
        .map(|n| n.max(0))
        .unwrap_or(0)
}

/// Extracts the page number from a feed link href.
///
/// Hrefs look like `.../rss/customerreviews/page=2/id=425073498/...`.
fn parse_page_number(href: &str) -> Option<u32> {
    let start = href.find("page=")? + "page=".len();
    let digits: String = href[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

impl ReviewFeedClient for AppStoreFeedClient {
    async fn fetch_page(&self, request: &FeedRequest) -> Result<FeedPage, AppError> {
        self.fetch_page_inner(request).await
    }
}
