use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the user asked for: the video itself or only its audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    #[default]
    Video,
    AudioOnly,
}

impl MediaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaMode::Video => "video",
            MediaMode::AudioOnly => "audio",
        }
    }
}

impl fmt::Display for MediaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(MediaMode::Video),
            "audio" | "audio_only" => Ok(MediaMode::AudioOnly),
            _ => Err(format!("Unknown media mode: {}", s)),
        }
    }
}
