use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use rayon::prelude::*;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::record::ReviewRecord;

pub const DEFAULT_DB_PATH: &str = "reviews.db";
const SITE_ORIGIN: &str = "https://otzovik.com";

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reviews (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            link           TEXT NOT NULL UNIQUE,
            title          TEXT NOT NULL,
            stars          INTEGER NOT NULL,
            review_plus    TEXT,
            review_minus   TEXT,
            review_descr   TEXT,
            year_usage     INTEGER,
            recommendation BOOLEAN NOT NULL,
            time_usage     TEXT,
            price          TEXT,
            date_posted    DATE NOT NULL,
            likes          INTEGER NOT NULL,
            comments       INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reviews_stars ON reviews(stars);
        ",
    )?;
    Ok(())
}

// ── Coercion ──

/// One `reviews` row, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRow {
    pub link: String,
    pub title: String,
    pub stars: i64,
    pub review_plus: Option<String>,
    pub review_minus: Option<String>,
    pub review_descr: Option<String>,
    pub year_usage: Option<i64>,
    pub recommendation: bool,
    pub time_usage: Option<String>,
    pub price: Option<String>,
    pub date_posted: String,
    pub likes: i64,
    pub comments: i64,
}

impl ReviewRow {
    pub fn from_record(id: &str, r: &ReviewRecord) -> Result<Self> {
        Ok(Self {
            link: format!("{}/{}.html", SITE_ORIGIN, id),
            title: r.title.clone(),
            stars: to_int(&r.stars, "stars")?,
            review_plus: null_if_empty(&r.review_plus),
            review_minus: null_if_empty(&r.review_minus),
            review_descr: null_if_empty(&r.review_descr),
            year_usage: match r.year_usage.trim() {
                "" => None,
                y => Some(to_int(y, "year_usage")?),
            },
            recommendation: r.recommendation.trim().to_uppercase() == "ДА",
            time_usage: null_if_empty(&r.time_usage),
            price: null_if_empty(&r.price),
            date_posted: parse_date(&r.date_posted)?,
            likes: to_int(&r.likes, "likes")?,
            comments: to_int(&r.comments, "comments")?,
        })
    }
}

fn to_int(value: &str, field: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} is not a number: {:?}", field, value))
}

fn null_if_empty(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// `"15 янв 2023"` -> `"2023-01-15"`. Month matched on its first three letters.
pub fn parse_date(raw: &str) -> Result<String> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let [day, month, year] = parts.as_slice() else {
        bail!("date is not `day month year`: {:?}", raw);
    };
    let prefix: String = month.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "янв" => 1,
        "фев" => 2,
        "мар" => 3,
        "апр" => 4,
        "мая" | "май" => 5,
        "июн" => 6,
        "июл" => 7,
        "авг" => 8,
        "сен" => 9,
        "окт" => 10,
        "ноя" => 11,
        "дек" => 12,
        _ => bail!("unknown month in date {:?}", raw),
    };
    let day: u32 = day.parse().map_err(|_| anyhow!("bad day in date {:?}", raw))?;
    let year: i32 = year.parse().map_err(|_| anyhow!("bad year in date {:?}", raw))?;
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| anyhow!("no such calendar date {:?}", raw))?;
    Ok(date.format("%Y-%m-%d").to_string())
}

// ── Loading ──

/// Read and coerce every `*.json` in `dir`. Any bad file fails the batch.
pub fn read_dataset(dir: &Path) -> Result<Vec<ReviewRow>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();

    files
        .par_iter()
        .map(|path| {
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow!("bad file name {}", path.display()))?;
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let record: ReviewRecord = serde_json::from_str(&text)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?;
            ReviewRow::from_record(id, &record)
                .with_context(|| format!("Malformed review in {}", path.display()))
        })
        .collect()
}

/// Rebuild the database at `db_path` from the JSON files in `input_dir`.
///
/// The old file is removed first; rows go in under one transaction.
pub fn organize(input_dir: &Path, db_path: &Path) -> Result<usize> {
    let rows = read_dataset(input_dir)?;

    if db_path.exists() {
        std::fs::remove_file(db_path)
            .with_context(|| format!("Failed to remove old database {}", db_path.display()))?;
    }
    let conn = connect(db_path)?;
    init_schema(&conn)?;
    let count = save_reviews(&conn, &rows)?;
    info!("Loaded {} reviews into {}", count, db_path.display());
    Ok(count)
}

pub fn save_reviews(conn: &Connection, rows: &[ReviewRow]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO reviews
             (link, title, stars, review_plus, review_minus, review_descr, year_usage,
              recommendation, time_usage, price, date_posted, likes, comments)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        for r in rows {
            count += stmt.execute(rusqlite::params![
                r.link, r.title, r.stars, r.review_plus, r.review_minus, r.review_descr,
                r.year_usage, r.recommendation, r.time_usage, r.price, r.date_posted,
                r.likes, r.comments,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Histograms ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramKind {
    Stars,
    Likes,
    Comments,
    YearUsage,
    DescrWords,
}

impl HistogramKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "stars" => Some(Self::Stars),
            "likes" => Some(Self::Likes),
            "comments" => Some(Self::Comments),
            "year_usage" => Some(Self::YearUsage),
            "descr_words" => Some(Self::DescrWords),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Stars => "stars",
            Self::Likes => "likes",
            Self::Comments => "comments",
            Self::YearUsage => "year_usage",
            Self::DescrWords => "review_descr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub value: i64,
    pub count: i64,
}

pub fn histogram(conn: &Connection, kind: HistogramKind) -> Result<Vec<Bucket>> {
    if kind == HistogramKind::DescrWords {
        let mut stmt = conn.prepare("SELECT COALESCE(review_descr, '') FROM reviews")?;
        let texts = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut counts = std::collections::BTreeMap::<i64, i64>::new();
        for t in texts {
            *counts.entry(t.split_whitespace().count() as i64).or_default() += 1;
        }
        return Ok(counts
            .into_iter()
            .map(|(value, count)| Bucket { value, count })
            .collect());
    }

    let col = kind.column();
    let sql = format!(
        "SELECT {col}, COUNT(*) FROM reviews WHERE {col} IS NOT NULL GROUP BY {col} ORDER BY {col}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Bucket {
                value: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub fn count_reviews(conn: &Connection) -> Result<usize> {
    let n: usize = conn.query_row("SELECT COUNT(*) FROM reviews", [], |r| r.get(0))?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stars: &str, descr: &str, date: &str) -> ReviewRecord {
        ReviewRecord {
            id: String::new(),
            title: "Заголовок".into(),
            stars: stars.into(),
            review_plus: " ".into(),
            review_minus: "Брак".into(),
            review_descr: descr.into(),
            year_usage: "".into(),
            recommendation: "да".into(),
            time_usage: String::new(),
            price: "500 руб".into(),
            date_posted: date.into(),
            likes: "2".into(),
            comments: "0".into(),
        }
    }

    fn write(dir: &Path, id: &str, rec: &ReviewRecord) {
        std::fs::write(
            dir.join(format!("{}.json", id)),
            serde_json::to_string_pretty(rec).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn russian_dates_become_iso() {
        assert_eq!(parse_date("15 янв 2023").unwrap(), "2023-01-15");
        assert_eq!(parse_date("3 мая 2021").unwrap(), "2021-05-03");
        assert_eq!(parse_date(" 9 декабря 2020 ").unwrap(), "2020-12-09");
        assert!(parse_date("31 фев 2023").is_err());
        assert!(parse_date("2023-01-15").is_err());
        assert!(parse_date("15 xyz 2023").is_err());
    }

    #[test]
    fn row_coercion() {
        let row = ReviewRow::from_record("review_7", &record("4", "Текст", "1 июн 2022")).unwrap();
        assert_eq!(row.link, "https://otzovik.com/review_7.html");
        assert_eq!(row.stars, 4);
        assert_eq!(row.review_plus, None);
        assert_eq!(row.review_minus.as_deref(), Some("Брак"));
        assert_eq!(row.year_usage, None);
        assert!(row.recommendation);
        assert_eq!(row.time_usage, None);
        assert_eq!(row.date_posted, "2022-06-01");

        let mut no = record("4", "Текст", "1 июн 2022");
        no.recommendation = "НЕТ".into();
        no.year_usage = "2020".into();
        let row = ReviewRow::from_record("r", &no).unwrap();
        assert!(!row.recommendation);
        assert_eq!(row.year_usage, Some(2020));
    }

    #[test]
    fn organize_loads_and_replaces() {
        let data = tempfile::tempdir().unwrap();
        write(data.path(), "review_1", &record("5", "один два три", "15 янв 2023"));
        write(data.path(), "review_2", &record("5", "один", "16 янв 2023"));
        write(data.path(), "review_3", &record("1", "", "17 янв 2023"));
        let out = tempfile::tempdir().unwrap();
        let db_path = out.path().join("reviews.db");

        assert_eq!(organize(data.path(), &db_path).unwrap(), 3);
        // A second load recreates rather than appends
        assert_eq!(organize(data.path(), &db_path).unwrap(), 3);

        let conn = connect(&db_path).unwrap();
        assert_eq!(count_reviews(&conn).unwrap(), 3);
        assert_eq!(
            histogram(&conn, HistogramKind::Stars).unwrap(),
            vec![Bucket { value: 1, count: 1 }, Bucket { value: 5, count: 2 }]
        );
        assert_eq!(
            histogram(&conn, HistogramKind::DescrWords).unwrap(),
            vec![
                Bucket { value: 0, count: 1 },
                Bucket { value: 1, count: 1 },
                Bucket { value: 3, count: 1 }
            ]
        );
        assert!(histogram(&conn, HistogramKind::YearUsage).unwrap().is_empty());
    }

    #[test]
    fn one_bad_record_fails_whole_load() {
        let data = tempfile::tempdir().unwrap();
        write(data.path(), "review_1", &record("5", "ok", "15 янв 2023"));
        write(data.path(), "review_2", &record("пять", "bad", "15 янв 2023"));
        let out = tempfile::tempdir().unwrap();
        let db_path = out.path().join("reviews.db");

        let err = organize(data.path(), &db_path).unwrap_err();
        assert!(format!("{:#}", err).contains("review_2.json"));
        assert!(!db_path.exists());
    }

    #[test]
    fn histogram_kinds_parse() {
        assert_eq!(HistogramKind::parse("likes"), Some(HistogramKind::Likes));
        assert_eq!(HistogramKind::parse("descr_words"), Some(HistogramKind::DescrWords));
        assert_eq!(HistogramKind::parse("price"), None);
    }
}
