use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use scraper::{Html, Selector};
use url::Url;

static LAST_PAGE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[class*='last']").unwrap());
static REVIEW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div[itemprop='review']").unwrap());
static REVIEW_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.review-title").unwrap());

/// Total page count from the pagination control's "last page" link.
///
/// `/reviews/shop/57/` -> 57. Absence is fatal: there is no other bound.
pub fn last_page(html: &str) -> Result<usize> {
    let doc = Html::parse_document(html);
    let href = doc
        .select(&LAST_PAGE_SEL)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or_else(|| anyhow!("pagination control has no last-page link"))?;

    let segment = href
        .split(['?', '#'])
        .next()
        .unwrap_or(href)
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .ok_or_else(|| anyhow!("last-page link has no path segment: {}", href))?;

    segment
        .parse::<usize>()
        .map_err(|_| anyhow!("last-page segment is not a page number: {}", href))
}

/// Listing URL for page `n`: `{base}{n}/`.
pub fn page_url(base: &str, page: usize) -> String {
    if base.ends_with('/') {
        format!("{}{}/", base, page)
    } else {
        format!("{}/{}/", base, page)
    }
}

/// Absolute detail-page URLs linked from one listing page.
///
/// Entries without a title link are skipped.
pub fn detail_links(html: &str, page_url: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    doc.select(&REVIEW_SEL)
        .filter_map(|review| {
            let href = review
                .select(&REVIEW_LINK_SEL)
                .next()?
                .value()
                .attr("href")?;
            page_url.join(href).ok()
        })
        .collect()
}
