use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::download::error::FetchError;

/// What the probe (`--dump-single-json`) tells us about a URL before fetching.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    pub author: Option<String>,
    pub duration_secs: Option<u64>,
    /// yt-dlp extractor key, e.g. "Youtube", "Instagram"
    pub extractor: Option<String>,
    /// yt-dlp availability: public, unlisted, private, needs_auth, subscriber_only, premium_only
    pub availability: Option<String>,
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub is_live: bool,
}

/// Availability values that mean we cannot fetch without an account.
const RESTRICTED_AVAILABILITY: &[&str] = &["private", "needs_auth", "subscriber_only", "premium_only"];

fn str_field(json: &Value, key: &str) -> Option<String> {
    json.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "NA")
        .map(str::to_string)
}

fn u64_field(json: &Value, key: &str) -> Option<u64> {
    let value = json.get(key)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
}

impl MediaMetadata {
    /// Parses yt-dlp's single-JSON dump. Only `title` is effectively required;
    /// missing optional fields stay `None`.
    pub fn from_ytdlp_json(raw: &str) -> Result<Self, FetchError> {
        let json: Value = serde_json::from_str(raw.trim()).map_err(|e| FetchError::InvalidMetadata(e.to_string()))?;
        if !json.is_object() {
            return Err(FetchError::InvalidMetadata("expected a JSON object".to_string()));
        }

        let title = str_field(&json, "title")
            .or_else(|| str_field(&json, "fulltitle"))
            .or_else(|| str_field(&json, "id"))
            .unwrap_or_default();

        // Music sites fill `artist`/`creator`, video sites `uploader`/`channel`.
        let author = ["artist", "creator", "uploader", "channel"]
            .iter()
            .find_map(|key| str_field(&json, key));

        Ok(Self {
            title,
            author,
            duration_secs: u64_field(&json, "duration"),
            extractor: str_field(&json, "extractor_key").or_else(|| str_field(&json, "extractor")),
            availability: str_field(&json, "availability"),
            filesize_approx: u64_field(&json, "filesize").or_else(|| u64_field(&json, "filesize_approx")),
            is_live: json.get("is_live").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// Returns the availability label when the content needs an account we do not have.
    pub fn restriction(&self) -> Option<&str> {
        self.availability
            .as_deref()
            .filter(|a| RESTRICTED_AVAILABILITY.contains(a))
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "Untitled"
        } else {
            &self.title
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_probe() {
        let raw = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "uploader": "Rick Astley",
            "duration": 212.0,
            "extractor_key": "Youtube",
            "availability": "public",
            "filesize_approx": 12345678,
            "is_live": false
        }"#;
        let meta = MediaMetadata::from_ytdlp_json(raw).unwrap();
        assert_eq!(
            meta,
            MediaMetadata {
                title: "Never Gonna Give You Up".to_string(),
                author: Some("Rick Astley".to_string()),
                duration_secs: Some(212),
                extractor: Some("Youtube".to_string()),
                availability: Some("public".to_string()),
                filesize_approx: Some(12345678),
                is_live: false,
            }
        );
        assert_eq!(meta.restriction(), None);
    }

    #[test]
    fn test_artist_preferred_over_uploader() {
        let meta =
            MediaMetadata::from_ytdlp_json(r#"{"title":"t","artist":"Band","uploader":"Label"}"#).unwrap();
        assert_eq!(meta.author.as_deref(), Some("Band"));
    }

    #[test]
    fn test_na_and_missing_fields() {
        let meta = MediaMetadata::from_ytdlp_json(r#"{"id":"abc","uploader":"NA"}"#).unwrap();
        assert_eq!(meta.title, "abc");
        assert_eq!(meta.author, None);
        assert_eq!(meta.duration_secs, None);
    }

    #[test]
    fn test_restricted_availability() {
        let meta = MediaMetadata::from_ytdlp_json(r#"{"title":"x","availability":"needs_auth"}"#).unwrap();
        assert_eq!(meta.restriction(), Some("needs_auth"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            MediaMetadata::from_ytdlp_json("WARNING: no json"),
            Err(FetchError::InvalidMetadata(_))
        ));
        assert!(MediaMetadata::from_ytdlp_json("[1,2]").is_err());
    }

    #[test]
    fn test_display_title_fallback() {
        assert_eq!(MediaMetadata::default().display_title(), "Untitled");
    }
}
