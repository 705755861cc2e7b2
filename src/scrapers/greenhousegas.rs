//! Greenhouse-gas disclosure forms.
//!
//! Both pages are driven by form POSTs. The list form (`step=1`) returns a
//! table whose cells contain the company codes; the detail form (`step=2`)
//! returns one company's disclosure for the year.
//!
//! Years are ROC calendar years (`111` is 2022). Every record is dated June
//! 1st of the corresponding Gregorian year.

use super::Site;
use crate::config::SiteConfig;
use crate::error::{Error, Result};
use crate::fetcher::{FetchRequest, Fetcher, Transport};
use crate::models::Article;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};

const ROC_YEAR_OFFSET: i32 = 1911;

static TD: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static INPUT: Lazy<Selector> = Lazy::new(|| Selector::parse("input").unwrap());
static INLINE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}\u{3000}]+").unwrap());

#[derive(Debug, Clone)]
pub struct GreenhouseParams {
    /// ROC calendar year, e.g. `"111"`.
    pub year: String,
}

#[derive(Debug, Clone)]
pub struct GreenhouseGasSite {
    name: String,
    list_url: String,
    detail_url: String,
}

impl GreenhouseGasSite {
    pub const NAME: &'static str = "greenhousegas";

    /// Site reading its form endpoints from `urls`.
    ///
    /// # Arguments
    ///
    /// * `name` - Source name stamped on every record and output file
    /// * `urls` - `articleList` receives the company-list form,
    ///   `articleDetail` the per-company form
    pub fn new(name: impl Into<String>, urls: &SiteConfig) -> Self {
        Self {
            name: name.into(),
            list_url: urls.article_list.clone(),
            detail_url: urls.article_detail.clone(),
        }
    }
}

impl Site for GreenhouseGasSite {
    type Params = GreenhouseParams;

    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self, params: &GreenhouseParams) -> String {
        params.year.clone()
    }

    fn natural_key(&self, item_key: &str, params: &GreenhouseParams) -> String {
        format!("{}-{}", params.year, item_key)
    }

    #[instrument(level = "info", skip_all, fields(site = %self.name, year = %params.year))]
    async fn list_items<T: Transport>(
        &self,
        fetcher: &Fetcher<T>,
        params: &GreenhouseParams,
    ) -> Result<Vec<String>> {
        let request = FetchRequest::post_form(
            self.list_url.as_str(),
            [
                ("step", "1"),
                ("firstin", "1"),
                ("off", "1"),
                ("TYPEK", "sii"),
                ("year", params.year.as_str()),
            ],
        );
        let doc = fetcher
            .fetch(request)
            .await
            .ok_or_else(|| Error::EmptyResponse {
                url: self.list_url.clone(),
                attempts: fetcher.retries(),
            })?;

        let co_ids = parse_company_ids(&doc.html());
        info!(count = co_ids.len(), "Listed company codes");
        debug!(?co_ids, "Company codes");
        Ok(co_ids)
    }

    #[instrument(level = "info", skip_all, fields(site = %self.name, year = %params.year, %co_id))]
    async fn fetch_item<T: Transport>(
        &self,
        fetcher: &Fetcher<T>,
        co_id: &str,
        params: &GreenhouseParams,
    ) -> Result<Article> {
        let gregorian = gregorian_year(&params.year)?;
        let request = FetchRequest::post_form(
            self.detail_url.as_str(),
            [
                ("step", "2"),
                ("co_id", co_id),
                ("year", params.year.as_str()),
                ("TYPEK", "sii"),
                ("firstin", "true"),
            ],
        );
        let doc = fetcher
            .fetch(request)
            .await
            .ok_or_else(|| Error::EmptyResponse {
                url: self.detail_url.clone(),
                attempts: fetcher.retries(),
            })?;

        let content = page_text(&doc.html());
        if content.is_empty() {
            return Err(Error::Parse {
                url: self.detail_url.clone(),
                reason: format!("no text for company {co_id}"),
            });
        }
        info!(bytes = content.len(), "Parsed disclosure");

        Ok(Article {
            co_id: co_id.to_string(),
            year: params.year.clone(),
            company_name: None,
            industry: None,
            url: self.detail_url.clone(),
            content,
            datetime: format!("{gregorian}-06-01 00:00:00"),
        })
    }
}

fn gregorian_year(roc_year: &str) -> Result<i32> {
    roc_year
        .trim()
        .parse::<i32>()
        .map(|y| y + ROC_YEAR_OFFSET)
        .map_err(|_| Error::Config(format!("year {roc_year:?} is not a ROC calendar year")))
}

/// Company codes from the list table: cells without form inputs whose text
/// is all digits, first occurrence only.
pub fn parse_company_ids(document: &Html) -> Vec<String> {
    document
        .select(&TD)
        .filter(|td| td.select(&INPUT).next().is_none())
        .map(|td| td.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
        .unique()
        .collect()
}

/// Visible text of a page, one trimmed line per text node.
pub fn page_text(document: &Html) -> String {
    document
        .root_element()
        .text()
        .map(|t| INLINE_SPACE.replace_all(t.trim(), " ").into_owned())
        .filter(|t| !t.is_empty())
        .join("\n")
}
