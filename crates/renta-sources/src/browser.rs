use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use renta_core::{RentaError, Result, UpstreamCause};
use tokio::task::JoinHandle;
use tracing::debug;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
// Inmoup detail pages render their gallery as a flexslider carousel.
const CAROUSEL_IMAGE_SELECTOR: &str = "div.flex-viewport ul.slides li img[itemprop='image']";
const CAROUSEL_NEXT_SELECTOR: &str = "a.flex-next";
const CAROUSEL_SETTLE: Duration = Duration::from_millis(250);

fn browser_error(message: impl Into<String>) -> RentaError {
    RentaError::SourceUnavailable {
        cause: UpstreamCause::Connection,
        message: message.into(),
    }
}

fn timeout_error(what: &str) -> RentaError {
    RentaError::SourceUnavailable {
        cause: UpstreamCause::Timeout,
        message: format!("browser operation timed out: {}", what),
    }
}

/// Headless-browser capability used by the inmoup escalation chain:
/// rendering a search page when the lightweight fetch fails, and walking
/// a listing's image carousel during the enhancement pass.
#[async_trait]
pub trait DomRenderer: Send + Sync {
    /// Navigate to `url` and return the HTML once DOM content is
    /// available (not full resource load), within a bounded timeout.
    async fn render(&self, url: &str) -> Result<String>;

    /// Open a listing page and collect up to `max` image URLs from its
    /// carousel, clicking through the slides when a next control exists.
    async fn collect_listing_images(&self, url: &str, max: usize) -> Result<Vec<String>>;
}

/// Production renderer. Every call owns its own browser/page pair; the
/// browser is torn down on every exit path, the operation result is
/// captured before close.
#[derive(Debug, Default)]
pub struct HeadlessChrome;

impl HeadlessChrome {
    pub fn new() -> Self {
        Self
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>)> {
        let config = BrowserConfig::builder().build().map_err(browser_error)?;
        let (browser, mut handler) = tokio::time::timeout(NAVIGATION_TIMEOUT, Browser::launch(config))
            .await
            .map_err(|_| timeout_error("launch"))?
            .map_err(|e| browser_error(e.to_string()))?;
        // The handler stream must be polled for the browser to make progress.
        let driver = tokio::spawn(async move { while handler.next().await.is_some() {} });
        Ok((browser, driver))
    }

    async fn open(&self, browser: &Browser, url: &str) -> Result<Page> {
        let page = tokio::time::timeout(NAVIGATION_TIMEOUT, browser.new_page(url))
            .await
            .map_err(|_| timeout_error(url))?
            .map_err(|e| browser_error(e.to_string()))?;
        tokio::time::timeout(NAVIGATION_TIMEOUT, page.wait_for_navigation())
            .await
            .map_err(|_| timeout_error(url))?
            .map_err(|e| browser_error(e.to_string()))?;
        Ok(page)
    }

    async fn teardown(mut browser: Browser, driver: JoinHandle<()>) {
        let _ = browser.close().await;
        driver.abort();
    }

    async fn render_inner(&self, browser: &Browser, url: &str) -> Result<String> {
        let page = self.open(browser, url).await?;
        page.content()
            .await
            .map_err(|e| browser_error(e.to_string()))
    }

    async fn harvest_inner(&self, browser: &Browser, url: &str, max: usize) -> Result<Vec<String>> {
        let page = self.open(browser, url).await?;
        let mut images: Vec<String> = Vec::new();

        // Each pass reads the visible slides, then advances the carousel;
        // slides load lazily so new URLs appear as we click through.
        for _ in 0..max {
            let elements = page
                .find_elements(CAROUSEL_IMAGE_SELECTOR)
                .await
                .unwrap_or_default();
            for element in elements {
                if let Ok(Some(src)) = element.attribute("src").await {
                    if !src.is_empty() && !images.contains(&src) {
                        images.push(src);
                    }
                }
            }
            if images.len() >= max {
                break;
            }
            match page.find_element(CAROUSEL_NEXT_SELECTOR).await {
                Ok(next) => {
                    if next.click().await.is_err() {
                        break;
                    }
                    tokio::time::sleep(CAROUSEL_SETTLE).await;
                }
                Err(_) => break,
            }
        }

        images.truncate(max);
        debug!("harvested {} carousel images from {}", images.len(), url);
        Ok(images)
    }
}

#[async_trait]
impl DomRenderer for HeadlessChrome {
    async fn render(&self, url: &str) -> Result<String> {
        let (browser, driver) = self.launch().await?;
        let result = self.render_inner(&browser, url).await;
        Self::teardown(browser, driver).await;
        result
    }

    async fn collect_listing_images(&self, url: &str, max: usize) -> Result<Vec<String>> {
        let (browser, driver) = self.launch().await?;
        let result = self.harvest_inner(&browser, url, max).await;
        Self::teardown(browser, driver).await;
        result
    }
}
