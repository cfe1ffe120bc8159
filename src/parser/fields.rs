use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use super::description;
use crate::record::ReviewRecord;

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| sel("span.summary"));
static STARS_SEL: LazyLock<Selector> = LazyLock::new(|| sel("div.rating-score > span"));
static LIKES_SEL: LazyLock<Selector> = LazyLock::new(|| sel("span[class*='review-yes'] span"));
static COMMENTS_SEL: LazyLock<Selector> = LazyLock::new(|| sel("a.review-comments span"));
static DATE_SEL: LazyLock<Selector> =
    LazyLock::new(|| sel("span[class^='review-postdate'] span"));
static PLUS_SEL: LazyLock<Selector> = LazyLock::new(|| sel("div.review-plus"));
static MINUS_SEL: LazyLock<Selector> = LazyLock::new(|| sel("div.review-minus"));
static DESCR_SEL: LazyLock<Selector> = LazyLock::new(|| sel("div[itemprop='description']"));
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| sel("table tr"));
static CELL_SEL: LazyLock<Selector> = LazyLock::new(|| sel("td"));

static INNER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)>(.*?)</").unwrap());
static LABELLED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)</b>(.*?)</div").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

const LABEL_YEAR: &str = "Год использования";
const LABEL_RECOMMEND: &str = "Рекомендую друзьям";
const LABEL_TIME: &str = "Время использования";
const LABEL_PRICE: &str = "Стоимость";

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

/// A required node was missing or empty on the detail page.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("required field `{0}` not found on page")]
    Missing(&'static str),
}

/// Extract one review from a detail-page document.
///
/// The returned record has an empty `id`; the caller derives it from the URL.
pub fn extract(html: &str) -> Result<ReviewRecord, FieldError> {
    let doc = Html::parse_document(html);

    let title = required(&doc, &TITLE_SEL, "title")?;
    let stars = required(&doc, &STARS_SEL, "stars")?;
    let date_posted = required(&doc, &DATE_SEL, "date_posted")?;
    let likes = required(&doc, &LIKES_SEL, "likes")?;
    let comments = required(&doc, &COMMENTS_SEL, "comments")?;

    let review_descr = doc
        .select(&DESCR_SEL)
        .next()
        .map(|el| description::reconstruct(&el.html()))
        .filter(|t| !t.is_empty())
        .ok_or(FieldError::Missing("review_descr"))?;

    let table = usage_table(&doc);
    let lookup = |label: &str| {
        table
            .iter()
            .find(|(k, _)| k == label)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };

    Ok(ReviewRecord {
        id: String::new(),
        title,
        stars,
        review_plus: labelled(&doc, &PLUS_SEL),
        review_minus: labelled(&doc, &MINUS_SEL),
        review_descr,
        year_usage: lookup(LABEL_YEAR),
        recommendation: lookup(LABEL_RECOMMEND),
        time_usage: lookup(LABEL_TIME),
        price: lookup(LABEL_PRICE),
        date_posted,
        likes,
        comments,
    })
}

/// Text between the node's opening tag and the next closing tag.
fn required(doc: &Html, selector: &Selector, field: &'static str) -> Result<String, FieldError> {
    doc.select(selector)
        .next()
        .and_then(|el| inner_capture(&el))
        .filter(|t| !t.is_empty())
        .ok_or(FieldError::Missing(field))
}

fn inner_capture(el: &ElementRef) -> Option<String> {
    let html = el.html();
    let caps = INNER_RE.captures(&html)?;
    Some(description::decode_entities(caps[1].trim()))
}

/// Pros/cons container: `<div class="review-plus"><b>Достоинства:</b> text</div>`.
fn labelled(doc: &Html, selector: &Selector) -> String {
    doc.select(selector)
        .next()
        .and_then(|el| {
            let html = el.html();
            LABELLED_RE
                .captures(&html)
                .map(|c| strip_tags(&c[1]))
        })
        .unwrap_or_default()
}

fn strip_tags(fragment: &str) -> String {
    let text = TAG_RE.replace_all(fragment, "");
    description::decode_entities(text.trim())
}

/// Label/value pairs from every two-column row on the page.
fn usage_table(doc: &Html) -> Vec<(String, String)> {
    doc.select(&ROW_SEL)
        .filter_map(|row| {
            let mut cells = row.select(&CELL_SEL);
            let label = cells.next()?.text().collect::<String>();
            let value = cells.next()?.text().collect::<String>();
            Some((normalize_label(&label), value.trim().to_string()))
        })
        .collect()
}

fn normalize_label(label: &str) -> String {
    label.trim().trim_end_matches(':').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::fixtures::{detail_page as page, DESCR_PARAGRAPHS, DESCR_WIDGET, FULL_ROWS};

    #[test]
    fn full_page_with_widget_description() {
        let rec = extract(&page(DESCR_WIDGET, FULL_ROWS, true)).unwrap();
        assert_eq!(rec.title, "Удобный магазин & быстрая доставка");
        assert_eq!(rec.stars, "4");
        assert_eq!(rec.review_plus, "Низкие цены, пункт выдачи рядом");
        assert_eq!(rec.review_minus, "Иногда брак");
        assert_eq!(
            rec.review_descr,
            "Заказываю здесь давно.\nВсе приходит вовремя.Советую всем."
        );
        assert_eq!(rec.year_usage, "2022");
        assert_eq!(rec.recommendation, "ДА");
        assert_eq!(rec.time_usage, "больше года");
        assert_eq!(rec.price, "1500 руб");
        assert_eq!(rec.date_posted, "15 янв 2023");
        assert_eq!(rec.likes, "12");
        assert_eq!(rec.comments, "3");
    }

    #[test]
    fn full_page_with_paragraph_description() {
        let rec = extract(&page(DESCR_PARAGRAPHS, FULL_ROWS, true)).unwrap();
        assert_eq!(
            rec.review_descr,
            "Заказываю здесь давно.\nВсе приходит вовремя.\nСоветую всем."
        );
        assert_eq!(rec.recommendation, "ДА");
    }

    #[test]
    fn missing_table_rows_default_to_empty() {
        let rows = r#"<tr><td>Год использования:</td><td>2021</td></tr>
<tr><td>Рекомендую друзьям:</td><td>НЕТ</td></tr>"#;
        let rec = extract(&page(DESCR_PARAGRAPHS, rows, true)).unwrap();
        assert_eq!(rec.time_usage, "");
        assert_eq!(rec.price, "");
        assert_eq!(rec.year_usage, "2021");
        assert_eq!(rec.recommendation, "НЕТ");
    }

    #[test]
    fn missing_stars_is_field_error() {
        let err = extract(&page(DESCR_PARAGRAPHS, FULL_ROWS, true).replace("rating-score", "x"))
            .unwrap_err();
        assert_eq!(err, FieldError::Missing("stars"));
        let err = extract(&page(DESCR_PARAGRAPHS, FULL_ROWS, false)).unwrap_err();
        assert_eq!(err, FieldError::Missing("stars"));
    }

    #[test]
    fn attributed_paragraph_description() {
        let rec = extract(&page(
            r#"<div itemprop="description"><p class="x">Текст отзыва.</p></div>"#,
            FULL_ROWS,
            true,
        )).unwrap();
        assert_eq!(rec.review_descr, "Текст отзыва.");
    }

    #[test]
    fn empty_description_is_field_error() {
        let err = extract(&page(r#"<div itemprop="description"></div>"#, FULL_ROWS, true))
            .unwrap_err();
        assert_eq!(err, FieldError::Missing("review_descr"));
        let html = page(
            r#"<div itemprop="description"><span>скрыто</span></div>"#,
            FULL_ROWS,
            true,
        );
        let err = extract(&html).unwrap_err();
        assert_eq!(err, FieldError::Missing("review_descr"));
    }

    #[test]
    fn unlabeled_pros_are_empty() {
        let html = page(DESCR_PARAGRAPHS, FULL_ROWS, true)
            .replace("<b>Достоинства:</b> Низкие цены, пункт выдачи рядом", "");
        let rec = extract(&html).unwrap();
        assert_eq!(rec.review_plus, "");
    }
}
