//! Static platform table: display label, cookie policy, access pre-check and
//! quality ladder per supported site.

use strum::{EnumIter, IntoEnumIterator};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
    Facebook,
    X,
    Vimeo,
    SoundCloud,
    Reddit,
    Generic,
}

/// Height limits tried in order when quality fallback is enabled; `None` means "best".
const FULL_LADDER: &[Option<u32>] = &[Some(1080), Some(720), Some(480), None];
const SHORT_LADDER: &[Option<u32>] = &[Some(1080), None];
const BEST_ONLY: &[Option<u32>] = &[None];

impl Platform {
    /// Detects the platform by host. Subdomains match (`m.youtube.com`), lookalikes do not.
    pub fn detect(url: &Url) -> Platform {
        let Some(host) = url.host_str().map(|h| h.to_lowercase()) else {
            return Platform::Generic;
        };
        Platform::iter()
            .find(|platform| {
                platform
                    .domains()
                    .iter()
                    .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
            })
            .unwrap_or(Platform::Generic)
    }

    fn domains(&self) -> &'static [&'static str] {
        match self {
            Platform::YouTube => &["youtube.com", "youtu.be", "youtube-nocookie.com"],
            Platform::TikTok => &["tiktok.com"],
            Platform::Instagram => &["instagram.com"],
            Platform::Facebook => &["facebook.com", "fb.watch", "fb.com"],
            Platform::X => &["x.com", "twitter.com"],
            Platform::Vimeo => &["vimeo.com"],
            Platform::SoundCloud => &["soundcloud.com"],
            Platform::Reddit => &["reddit.com", "redd.it"],
            Platform::Generic => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube",
            Platform::TikTok => "TikTok",
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::X => "X",
            Platform::Vimeo => "Vimeo",
            Platform::SoundCloud => "SoundCloud",
            Platform::Reddit => "Reddit",
            Platform::Generic => "Web",
        }
    }

    /// Sites where a logged-in cookies file unlocks content.
    pub fn accepts_cookies(&self) -> bool {
        matches!(
            self,
            Platform::YouTube | Platform::Instagram | Platform::Facebook | Platform::X
        )
    }

    /// Sites that often serve private or login-walled posts; probed before a full fetch.
    pub fn needs_access_check(&self) -> bool {
        matches!(self, Platform::Instagram | Platform::Facebook | Platform::X)
    }

    pub fn quality_ladder(&self) -> &'static [Option<u32>] {
        match self {
            Platform::YouTube | Platform::Vimeo | Platform::Facebook | Platform::Generic => FULL_LADDER,
            Platform::TikTok | Platform::Instagram | Platform::X | Platform::Reddit => SHORT_LADDER,
            Platform::SoundCloud => BEST_ONLY,
        }
    }

    /// Labels of all named platforms, for help texts.
    pub fn supported_labels() -> Vec<&'static str> {
        Platform::iter()
            .filter(|p| *p != Platform::Generic)
            .map(|p| p.label())
            .collect()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(raw: &str) -> Platform {
        Platform::detect(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_detect_known_hosts() {
        assert_eq!(detect("https://www.youtube.com/watch?v=abc"), Platform::YouTube);
        assert_eq!(detect("https://youtu.be/abc"), Platform::YouTube);
        assert_eq!(detect("https://m.youtube.com/shorts/abc"), Platform::YouTube);
        assert_eq!(detect("https://vm.tiktok.com/ZM123/"), Platform::TikTok);
        assert_eq!(detect("https://www.instagram.com/reel/xyz/"), Platform::Instagram);
        assert_eq!(detect("https://fb.watch/abc/"), Platform::Facebook);
        assert_eq!(detect("https://x.com/user/status/1"), Platform::X);
        assert_eq!(detect("https://twitter.com/user/status/1"), Platform::X);
        assert_eq!(detect("https://soundcloud.com/artist/track"), Platform::SoundCloud);
        assert_eq!(detect("https://old.reddit.com/r/videos/1"), Platform::Reddit);
    }

    #[test]
    fn test_detect_rejects_lookalikes() {
        assert_eq!(detect("https://netflix.com/title/1"), Platform::Generic);
        assert_eq!(detect("https://notyoutube.com/watch"), Platform::Generic);
        assert_eq!(detect("https://example.org/video.mp4"), Platform::Generic);
    }

    #[test]
    fn test_ladders_end_with_best() {
        for platform in Platform::iter() {
            assert_eq!(platform.quality_ladder().last(), Some(&None), "{:?}", platform);
        }
    }

    #[test]
    fn test_supported_labels_excludes_generic() {
        let labels = Platform::supported_labels();
        assert!(labels.contains(&"YouTube"));
        assert!(!labels.contains(&"Web"));
    }
}
