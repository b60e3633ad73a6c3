//! JSON documents printed by the tool (`-J` and `--dump-single-json --flat-playlist`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The tool prints `null` for many absent string/list fields; treat it as empty.
fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Media metadata decoded from `<tool> <url> -J`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadInfo {
    #[serde(rename = "webpage_url", deserialize_with = "nullable")]
    pub url: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub original_url: String,
    #[serde(deserialize_with = "nullable")]
    pub title: String,
    #[serde(deserialize_with = "nullable")]
    pub thumbnail: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub resolution: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub vcodec: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub acodec: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub ext: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub format_id: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub format_note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize_approx: Option<i64>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub upload_date: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub uploader: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub channel_url: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub uploader_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Set locally when the job is created; never read from the tool.
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl DownloadInfo {
    /// Placeholder info for a job whose metadata has not been fetched yet.
    pub fn pending(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: url.to_string(),
            created_at: Utc::now(),
            ..Self::default()
        }
    }
}

/// Channel or playlist dump with flat entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistDump {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    #[serde(deserialize_with = "nullable")]
    pub title: String,
    #[serde(deserialize_with = "nullable")]
    pub uploader: String,
    #[serde(deserialize_with = "nullable")]
    pub entries: Vec<PlaylistEntry>,
}

/// One flat entry of a [`PlaylistDump`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistEntry {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    #[serde(deserialize_with = "nullable")]
    pub title: String,
    #[serde(deserialize_with = "nullable")]
    pub webpage_url: String,
    /// Some extractors only fill `url` for flat entries.
    #[serde(deserialize_with = "nullable")]
    pub url: String,
    #[serde(deserialize_with = "nullable")]
    pub thumbnail: String,
    /// `YYYYMMDD`.
    #[serde(deserialize_with = "nullable")]
    pub upload_date: String,
}

impl PlaylistEntry {
    /// Canonical page URL of the entry, or `None` when the tool gave none.
    pub fn canonical_url(&self) -> Option<&str> {
        [self.webpage_url.as_str(), self.url.as_str()]
            .into_iter()
            .find(|u| !u.is_empty())
    }
}

/// Parses the tool's compact `YYYYMMDD` date into UTC midnight.
pub fn parse_upload_date(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d")?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}
