//! Throttled HTTP fetching with a bounded retry budget.
//!
//! The module is split the same way as any decorated client:
//! - [`Transport`]: sends one request and returns the raw response
//! - [`ReqwestTransport`]: the real network implementation
//! - [`Fetcher`]: adds user-agent rotation, retries and a randomized delay
//!   after every attempt
//!
//! # Retry Strategy
//!
//! A response counts as usable when the status is 2xx and the body is not
//! blank. Transport errors (connect, timeout, body read) are caught and use
//! up an attempt just like an unusable response. After `retries` failed
//! attempts the fetcher returns `None` and the caller records the item as
//! failed.

use crate::error::Result;
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use rand::{Rng, rng};
use scraper::Html;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    ]
});

/// Pick a browser user-agent string at random.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rng())
        .copied()
        .unwrap_or("Mozilla/5.0")
}

/// HTTP method of a [`FetchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One request as the sites describe it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    /// Form fields, sent url-encoded in the body of a POST.
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// A plain GET with no extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            form: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// A POST whose body is the url-encoded `form`.
    ///
    /// # Arguments
    ///
    /// * `url` - Target URL
    /// * `form` - Field name/value pairs, sent in iteration order
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let req = FetchRequest::post_form(url, [("step", "1"), ("year", "111")]);
    /// ```
    pub fn post_form<K, V>(url: impl Into<String>, form: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            url: url.into(),
            method: Method::Post,
            form: form.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            headers: Vec::new(),
        }
    }

    /// Add a header. A `user-agent` set here replaces the random one.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn has_user_agent(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
    }
}

/// Status and decoded body of one response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    fn is_usable(&self) -> bool {
        (200..300).contains(&self.status) && !self.body.trim().is_empty()
    }
}

/// Sends a single request. Implementations do not retry.
pub trait Transport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse>;
}

/// [`Transport`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the shared client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.form),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse { status, body })
    }
}

/// A fetched page. The body is kept as text and parsed on demand so the
/// value stays `Send` across await points.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub body: String,
}

impl Document {
    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// Randomized delay window. Each call to [`Throttle::next_delay`] draws a
/// fresh value; nothing is stored between calls.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    min: Duration,
    max: Duration,
}

impl Throttle {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// No waiting at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniform in `[min, max)`; `min` when the window is empty.
    pub fn next_delay(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(rng().random_range(min..max))
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            debug!(?delay, "Throttling");
            sleep(delay).await;
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::from_millis(3_000, 5_000)
    }
}

/// Wraps a [`Transport`] with retries, user-agent rotation and throttling.
pub struct Fetcher<T> {
    transport: T,
    retries: usize,
    throttle: Throttle,
}

impl<T> fmt::Debug for Fetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("retries", &self.retries)
            .field("throttle", &self.throttle)
            .finish()
    }
}

impl<T: Transport> Fetcher<T> {
    /// Wrap `transport`.
    ///
    /// # Arguments
    ///
    /// * `transport` - Sends the individual attempts
    /// * `retries` - Attempts per fetch; values below 1 are raised to 1
    /// * `throttle` - Delay drawn after every attempt
    pub fn new(transport: T, retries: usize, throttle: Throttle) -> Self {
        Self {
            transport,
            retries: retries.max(1),
            throttle,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Fetch a page, returning `None` once the retry budget is spent.
    ///
    /// Every attempt is followed by a throttle pause, including the one that
    /// succeeds. A random browser user-agent is added unless the request
    /// already carries one.
    ///
    /// # Returns
    ///
    /// The first usable response (2xx with a non-blank body), or `None`.
    /// Failures are logged, never returned.
    #[instrument(level = "info", skip_all, fields(url = %request.url, method = ?request.method))]
    pub async fn fetch(&self, mut request: FetchRequest) -> Option<Document> {
        if !request.has_user_agent() {
            request
                .headers
                .push(("user-agent".to_string(), random_user_agent().to_string()));
        }

        let t0 = Instant::now();
        for attempt in 1..=self.retries {
            let outcome = self.transport.send(&request).await;
            self.throttle.pause().await;

            match outcome {
                Ok(resp) if resp.is_usable() => {
                    info!(
                        attempt,
                        bytes = resp.body.len(),
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Fetched page"
                    );
                    return Some(Document {
                        url: request.url.clone(),
                        body: resp.body,
                    });
                }
                Ok(resp) => warn!(
                    attempt,
                    max = self.retries,
                    status = resp.status,
                    bytes = resp.body.len(),
                    "Unusable response"
                ),
                Err(e) => warn!(attempt, max = self.retries, error = %e, "Request failed"),
            }
        }

        warn!(
            attempts = self.retries,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Retries exhausted"
        );
        None
    }
}
