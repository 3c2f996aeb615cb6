//! Daily quote adapter for the paginated KRX listing served by Naver Finance.
//!
//! The listing is an HTML page per `(code, page)` with rows ordered newest
//! first. Each data row carries a date cell (`td[align=center]`, `YYYY.MM.DD`),
//! a `span` marker, and six `td.num` cells: close, day-over-day diff, open,
//! high, low, volume. The navigation table's `td.pgRR` link ends in the last
//! page number.
//!
//! Transport is behind [`PageFetcher`] so fixtures can stand in for the
//! network.

use std::time::Duration;

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::number::NumberFormat;
use super::provider::{DataError, QuoteSource};
use crate::domain::{DailyBar, QuoteSeries, SecurityId};

const DATE_FORMAT: &str = "%Y.%m.%d";

/// Column positions among a row's `td.num` cells.
const COL_CLOSE: usize = 0;
const COL_OPEN: usize = 2;
const COL_HIGH: usize = 3;
const COL_LOW: usize = 4;
const COL_VOLUME: usize = 5;

/// Connection settings for the listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub number_format: NumberFormat,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://finance.naver.com/item/sise_day.naver".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into(),
            timeout_secs: 30,
            number_format: NumberFormat::EN_US,
        }
    }
}

/// Retrieves one raw listing page.
pub trait PageFetcher: Send + Sync {
    fn fetch_page(&self, code: &str, page: u32) -> Result<String, DataError>;
}

/// Blocking HTTP transport.
pub struct HttpPageFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpPageFetcher {
    pub fn new(config: &SourceConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn page_url(&self, code: &str, page: u32) -> String {
        format!("{}?code={code}&page={page}", self.base_url)
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch_page(&self, code: &str, page: u32) -> Result<String, DataError> {
        let url = self.page_url(code, page);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        resp.text()
            .map_err(|e| DataError::NetworkUnreachable(format!("reading body of {url}: {e}")))
    }
}

/// Quote source over the paginated daily listing.
pub struct NaverDailySource<F: PageFetcher> {
    fetcher: F,
    format: NumberFormat,
    today: Option<NaiveDate>,
}

impl NaverDailySource<HttpPageFetcher> {
    /// Source backed by the live listing.
    pub fn http(config: &SourceConfig) -> Result<Self, DataError> {
        Ok(Self::new(HttpPageFetcher::new(config)?, config.number_format))
    }
}

impl<F: PageFetcher> NaverDailySource<F> {
    pub fn new(fetcher: F, format: NumberFormat) -> Self {
        Self {
            fetcher,
            format,
            today: None,
        }
    }

    /// Pin "today" (the upper date bound) instead of reading the clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}

impl<F: PageFetcher> QuoteSource for NaverDailySource<F> {
    fn name(&self) -> &str {
        "naver_daily"
    }

    fn fetch(&self, security: &SecurityId, start: NaiveDate) -> Result<QuoteSeries, DataError> {
        let code = security.as_str();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DataError::SecurityNotFound(security.clone()));
        }

        let today = self.today();
        let first = self.fetcher.fetch_page(code, 1)?;
        let (page_count, rows) = {
            let doc = Html::parse_document(&first);
            (parse_page_count(&doc)?, parse_rows(&doc, self.format)?)
        };
        tracing::debug!(%security, page_count, "discovered page count");

        // Newest first while collecting.
        let mut collected = Vec::new();
        let mut reached_start = collect_rows(&mut collected, rows, start, today);
        let mut page = 2;
        while !reached_start && page <= page_count {
            let html = self.fetcher.fetch_page(code, page)?;
            let rows = parse_rows(&Html::parse_document(&html), self.format)?;
            reached_start = collect_rows(&mut collected, rows, start, today);
            page += 1;
        }

        collected.reverse();
        QuoteSeries::new(security.clone(), collected)
            .map_err(|e| DataError::ResponseFormatChanged(e.to_string()))
    }
}

/// Append rows (page order, newest first) to `out`. Returns true once a row
/// older than `start` is seen; that row and everything after it are dropped.
fn collect_rows(
    out: &mut Vec<DailyBar>,
    rows: Vec<DailyBar>,
    start: NaiveDate,
    today: NaiveDate,
) -> bool {
    for bar in rows {
        if bar.trading_date < start {
            return true;
        }
        if bar.trading_date > today {
            continue;
        }
        // A new session published mid-iteration shifts rows onto the next page.
        if let Some(last) = out.last() {
            if bar.trading_date >= last.trading_date {
                continue;
            }
        }
        out.push(bar);
    }
    false
}

fn selector(css: &str) -> Result<Selector, DataError> {
    Selector::parse(css).map_err(|e| DataError::Other(format!("invalid selector '{css}': {e}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Trailing decimal digits of `s`, e.g. `...&page=412` → 412.
fn trailing_number(s: &str) -> Option<u32> {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    s[start..].parse().ok()
}

/// Number of pages announced by the navigation table.
///
/// The `pgRR` ("last page") cell only appears on long listings; without it the
/// largest numbered page link is the last page.
fn parse_page_count(doc: &Html) -> Result<u32, DataError> {
    let nav = doc
        .select(&selector(r#"table[align="center"]"#)?)
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("navigation table missing".into()))?;

    if let Some(last) = nav.select(&selector("td.pgRR a")?).next() {
        let href = last
            .value()
            .attr("href")
            .ok_or_else(|| DataError::ResponseFormatChanged("last-page link has no href".into()))?;
        return trailing_number(href).ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("last-page link '{href}' has no page number"))
        });
    }

    Ok(nav
        .select(&selector("a")?)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(trailing_number)
        .max()
        .unwrap_or(1))
}

/// Data rows of one page, in page order (newest first).
///
/// The first and last `tr` of the document are the header and the navigation
/// row; rows without a `span` marker are spacers and are skipped.
fn parse_rows(doc: &Html, format: NumberFormat) -> Result<Vec<DailyBar>, DataError> {
    let tr = selector("tr")?;
    let marker = selector("span")?;
    let date_cell = selector(r#"td[align="center"]"#)?;
    let num_cell = selector("td.num")?;

    let rows: Vec<ElementRef<'_>> = doc.select(&tr).collect();
    if rows.len() < 2 {
        return Ok(Vec::new());
    }

    let mut bars = Vec::new();
    for row in &rows[1..rows.len() - 1] {
        if row.select(&marker).next().is_none() {
            continue;
        }

        let date_text = row
            .select(&date_cell)
            .next()
            .map(cell_text)
            .ok_or_else(|| DataError::ResponseFormatChanged("data row without date cell".into()))?;
        let trading_date = NaiveDate::parse_from_str(&date_text, DATE_FORMAT)
            .map_err(|_| DataError::InvalidDate(date_text.clone()))?;

        let nums: Vec<String> = row.select(&num_cell).map(cell_text).collect();
        if nums.len() <= COL_VOLUME {
            return Err(DataError::ResponseFormatChanged(format!(
                "row {date_text} has {} numeric cells, expected 6",
                nums.len()
            )));
        }

        let bar = DailyBar {
            trading_date,
            open: format.parse(&nums[COL_OPEN])?,
            high: format.parse(&nums[COL_HIGH])?,
            low: format.parse(&nums[COL_LOW])?,
            close: format.parse(&nums[COL_CLOSE])?,
            volume: format.parse(&nums[COL_VOLUME])?,
        };
        if !bar.is_valid() {
            return Err(DataError::ResponseFormatChanged(format!(
                "row {date_text} has negative values"
            )));
        }
        bars.push(bar);
    }

    Ok(bars)
}
