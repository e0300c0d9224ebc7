use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// One article as returned by the vector database.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Article {
    #[serde(rename = "feedId", default)]
    pub feed_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pub_date: Option<PubDate>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub authors: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Publish date: a parsed timestamp when the source gave one, the raw value otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum PubDate {
    Timestamp(DateTime<FixedOffset>),
    Raw(String),
}

impl From<String> for PubDate {
    fn from(value: String) -> Self {
        match DateTime::parse_from_rfc3339(value.trim()) {
            Ok(ts) => PubDate::Timestamp(ts),
            Err(_) => PubDate::Raw(value),
        }
    }
}

impl PubDate {
    pub fn to_cell(&self) -> String {
        match self {
            PubDate::Timestamp(ts) => ts.to_rfc3339(),
            PubDate::Raw(raw) => raw.clone(),
        }
    }
}

/// Structured answer returned by the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub generic_category: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub crime_categories: Vec<String>,
    pub event_chance: i64,
    pub inaccessible: bool,
    #[serde(default)]
    pub explanation: String,
}

/// An exported row joined with its classification (or the reason there is none).
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedArticle {
    #[serde(rename = "feedId")]
    pub feed_id: String,
    pub title: String,
    pub language: String,
    pub url: String,
    pub pub_date: String,
    pub created: String,
    pub authors: String,
    pub summary: String,
    pub text: String,
    #[serde(flatten)]
    pub classification: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const CLASSIFIED_HEADER: [&str; 14] = [
    "feedId",
    "title",
    "language",
    "url",
    "pub_date",
    "created",
    "authors",
    "summary",
    "text",
    "generic_category",
    "crime_categories",
    "event_chance",
    "inaccessible",
    "explanation",
];

impl ClassifiedArticle {
    pub fn csv_cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.feed_id.clone(),
            self.title.clone(),
            self.language.clone(),
            self.url.clone(),
            self.pub_date.clone(),
            self.created.clone(),
            self.authors.clone(),
            self.summary.clone(),
            self.text.clone(),
        ];
        match &self.classification {
            Some(c) => cells.extend([
                c.generic_category.clone(),
                c.crime_categories.join(", "),
                c.event_chance.to_string(),
                c.inaccessible.to_string(),
                c.explanation.clone(),
            ]),
            None => cells.extend(std::iter::repeat(String::new()).take(5)),
        }
        cells
    }
}

/// Accepts `null`, a single string, or a list of strings.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<Option<String>>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(items)) => items.into_iter().flatten().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_from_database_json() {
        let json = r#"{
            "feedId": "f-1",
            "title": "Harbour fire",
            "language": "nl",
            "url": "https://example.org/a",
            "pub_date": "2024-03-14T03:00:00Z",
            "created": 1710385200,
            "authors": ["A. Smit", "B. Jansen"],
            "summary": null,
            "text": "Body"
        }"#;
        let a: Article = serde_json::from_str(json).unwrap();
        assert_eq!(a.feed_id.as_deref(), Some("f-1"));
        assert_eq!(a.created, Some(1710385200));
        assert_eq!(a.authors, vec!["A. Smit", "B. Jansen"]);
        assert!(a.summary.is_none());
        assert!(matches!(a.pub_date, Some(PubDate::Timestamp(_))));
    }

    #[test]
    fn missing_fields_default() {
        let a: Article = serde_json::from_str(r#"{"authors": null}"#).unwrap();
        assert!(a.authors.is_empty());
        assert!(a.pub_date.is_none());
        assert!(a.created.is_none());
    }

    #[test]
    fn pub_date_keeps_unparseable_value() {
        assert_eq!(
            PubDate::from("last tuesday".to_string()),
            PubDate::Raw("last tuesday".to_string())
        );
        let ts = PubDate::from("2024-03-14T03:00:00Z".to_string());
        assert_eq!(ts.to_cell(), "2024-03-14T03:00:00+00:00");
    }

    #[test]
    fn classification_accepts_single_crime_category() {
        let c: Classification = serde_json::from_str(
            r#"{"generic_category":"Crime","crime_categories":"Drug Busts","event_chance":1,"inaccessible":false,"explanation":"x"}"#,
        )
        .unwrap();
        assert_eq!(c.crime_categories, vec!["Drug Busts"]);
    }

    #[test]
    fn unclassified_row_has_empty_trailing_cells() {
        let row = ClassifiedArticle {
            feed_id: "1".into(),
            title: "t".into(),
            language: "en".into(),
            url: String::new(),
            pub_date: String::new(),
            created: "0".into(),
            authors: String::new(),
            summary: String::new(),
            text: String::new(),
            classification: None,
            error: Some("gave up".into()),
        };
        let cells = row.csv_cells();
        assert_eq!(cells.len(), CLASSIFIED_HEADER.len());
        assert!(cells[9..].iter().all(|c| c.is_empty()));
    }
}
