//! Detail and listing pages shaped like the live site's markup.

pub fn detail_page(descr: &str, table_rows: &str, with_stars: bool) -> String {
    let stars = if with_stars {
        r#"<div class="rating-score tooltip-right"><span>4</span></div>"#
    } else {
        ""
    };
    format!(
        r#"<!DOCTYPE html>
<html><head><title>Отзыв</title></head>
<body>
<div class="review-header">
  <h1><span class="summary">Удобный магазин &amp; быстрая доставка</span></h1>
  {stars}
  <span class="review-postdate dtreviewed"><span>15 янв 2023</span></span>
</div>
<div class="review-plus"><b>Достоинства:</b> Низкие цены, пункт выдачи рядом</div>
<div class="review-minus"><b>Недостатки:</b> Иногда брак</div>
{descr}
<table class="product-props">
{table_rows}
</table>
<div class="review-bar">
  <span class="review-btn review-yes tooltip-top"><span>12</span></span>
  <a class="review-btn review-comments tooltip-top" href="/review_1.html#comments"><span>3</span></a>
</div>
</body></html>"#
    )
}

pub const FULL_ROWS: &str = r#"<tr><td>Год использования:</td><td>2022</td></tr>
<tr><td>Время использования:</td><td>больше года</td></tr>
<tr><td>Стоимость:</td><td>1500 руб</td></tr>
<tr><td>Рекомендую друзьям:</td><td class="recommend">ДА</td></tr>"#;

pub const DESCR_WIDGET: &str = "<div class=\"review-body description\" itemprop=\"description\">Заказываю здесь давно.<br>Все приходит вовремя.<div class=\"adv\"><div><script>window.ad = 1;</script>\n</div></div>Советую всем.</div>";

pub const DESCR_PARAGRAPHS: &str = r#"<div class="review-body description" itemprop="description"><p>Заказываю здесь давно.</p><p>Все приходит вовремя.<br>Советую всем.</p></div>"#;

/// Listing page linking to `review_paths` with a pager ending at `last_page`.
pub fn listing_page(base_path: &str, review_paths: &[&str], last_page: usize) -> String {
    let reviews: String = review_paths
        .iter()
        .map(|p| {
            format!(
                r#"<div itemprop="review"><a class="review-title" href="{p}">Отзыв</a></div>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"<html><body>
<div class="review-list-chunk">
{reviews}
</div>
<div class="pager"><a class="pager-item last tooltip-top" href="{base_path}{last_page}/">{last_page}</a></div>
</body></html>"#
    )
}
