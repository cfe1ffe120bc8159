use serde::{Deserialize, Serialize};

/// One review as extracted from a detail page and persisted as `{id}.json`.
///
/// Numeric fields stay strings here; the loader coerces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub stars: String,
    #[serde(default)]
    pub review_plus: String,
    #[serde(default)]
    pub review_minus: String,
    pub review_descr: String,
    #[serde(default)]
    pub year_usage: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub time_usage: String,
    #[serde(default)]
    pub price: String,
    pub date_posted: String,
    pub likes: String,
    pub comments: String,
}

/// Review id from a detail URL: last non-empty path segment without extension.
///
/// `https://otzovik.com/review_14966907.html?x=1` -> `review_14966907`
pub fn review_id(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').find(|s| !s.is_empty())?;
    let stem = last.split('.').next().unwrap_or(last);
    if stem.is_empty() || stem.contains(':') {
        None
    } else {
        Some(stem.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_from_detail_url() {
        assert_eq!(
            review_id("https://otzovik.com/review_14966907.html").as_deref(),
            Some("review_14966907")
        );
        assert_eq!(
            review_id("https://otzovik.com/review_1.html?&capt4a=433").as_deref(),
            Some("review_1")
        );
        assert_eq!(review_id("https://otzovik.com/review_2/").as_deref(), Some("review_2"));
    }

    #[test]
    fn id_rejects_bare_origin() {
        assert_eq!(review_id("https://"), None);
        assert_eq!(review_id(""), None);
    }

    #[test]
    fn json_keeps_cyrillic_readable() {
        let rec = ReviewRecord {
            id: "review_1".into(),
            title: "Хороший магазин".into(),
            stars: "5".into(),
            review_plus: String::new(),
            review_minus: String::new(),
            review_descr: "Текст".into(),
            year_usage: String::new(),
            recommendation: "ДА".into(),
            time_usage: String::new(),
            price: String::new(),
            date_posted: "15 янв 2023".into(),
            likes: "3".into(),
            comments: "0".into(),
        };
        let json = serde_json::to_string_pretty(&rec).unwrap();
        assert!(json.contains("Хороший магазин"));
    }

    #[test]
    fn older_files_without_optional_keys_parse() {
        let json = r#"{"title":"t","stars":"4","review_descr":"d",
            "date_posted":"1 мая 2022","likes":"0","comments":"1"}"#;
        let rec: ReviewRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.time_usage, "");
        assert_eq!(rec.price, "");
    }
}
