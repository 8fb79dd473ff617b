//! yt-dlp backend.
//!
//! One subprocess per fetch. Stdout is streamed through the
//! [`ProgressParser`]; the stderr tail is kept for error classification.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use url::Url;

use super::{FetchRequest, FetchedFile, Fetcher};
use crate::core::config;
use crate::core::process::{output_tail, run_with_timeout, ProcessError};
use crate::core::types::MediaMode;
use crate::download::error::FetchError;
use crate::download::metadata::MediaMetadata;
use crate::download::platform::Platform;
use crate::download::progress::{ProgressEvent, ProgressParser};
use crate::download::scratch::{find_output_file, output_template, remove_job_artifacts, ScratchFile};
use crate::download::ytdlp_errors::{analyze_ytdlp_error, fix_hint};

/// Number of stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 50;

/// Explicit settings so tests can point the fetcher at a stand-in script.
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    /// Executable to run
    pub program: String,
    /// Arguments placed before everything else (e.g. a script path when `program` is `sh`)
    pub base_args: Vec<String>,
    pub scratch_dir: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub probe_timeout: Duration,
    /// Retry failed video fetches down the platform's quality ladder
    pub quality_fallback: bool,
}

impl FetcherSettings {
    pub fn from_config() -> Self {
        Self {
            program: config::YTDL_BIN.clone(),
            base_args: Vec::new(),
            scratch_dir: PathBuf::from(&*config::SCRATCH_DIR),
            cookies_file: config::YTDL_COOKIES_FILE.as_deref().map(PathBuf::from),
            fetch_timeout: config::download::fetch_timeout(),
            probe_timeout: config::download::probe_timeout(),
            quality_fallback: *config::download::QUALITY_FALLBACK,
        }
    }
}

/// Format arguments for one rung of the quality ladder.
///
/// With `allow_best` the video selector ends in an unrestricted
/// `bv*+ba/b`, so a single attempt never fails just because of the cap.
pub fn format_args(mode: MediaMode, max_height: Option<u32>, allow_best: bool) -> Vec<String> {
    match mode {
        MediaMode::AudioOnly => vec![
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
        ],
        MediaMode::Video => {
            let selector = match max_height {
                Some(h) if allow_best => format!("bv*[height<={h}]+ba/b[height<={h}]/bv*+ba/b"),
                Some(h) => format!("bv*[height<={h}]+ba/b[height<={h}]"),
                None => "bv*+ba/b".to_string(),
            };
            vec![
                "-f".to_string(),
                selector,
                "--merge-output-format".to_string(),
                "mp4".to_string(),
            ]
        }
    }
}

pub struct YtDlpFetcher {
    settings: FetcherSettings,
}

impl YtDlpFetcher {
    pub fn new(settings: FetcherSettings) -> Self {
        Self { settings }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(&self.settings.base_args);
        cmd
    }

    fn cookie_args(&self, platform: Platform) -> Vec<String> {
        match &self.settings.cookies_file {
            Some(path) if platform.accepts_cookies() => {
                vec!["--cookies".to_string(), path.to_string_lossy().into_owned()]
            }
            _ => Vec::new(),
        }
    }

    /// Full argument list for one fetch attempt.
    pub fn build_fetch_args(&self, request: &FetchRequest, max_height: Option<u32>, allow_best: bool) -> Vec<String> {
        let template = output_template(&self.settings.scratch_dir, &request.job_id);
        let mut args = vec![
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--force-overwrites".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
        ];
        args.extend(format_args(request.mode, max_height, allow_best));
        args.extend(self.cookie_args(request.platform));
        args.push(request.url.to_string());
        args
    }

    fn build_probe_args(&self, url: &Url) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.cookie_args(Platform::detect(url)));
        args.push(url.to_string());
        args
    }

    /// Turns a nonzero exit into the matching error.
    fn classify_failure(exit_code: Option<i32>, stderr: String) -> FetchError {
        let kind = analyze_ytdlp_error(&stderr);
        if kind.is_access_denied() {
            let reason = output_tail(stderr.as_bytes(), 1);
            return FetchError::AccessDenied { reason };
        }
        log::warn!("yt-dlp failure ({:?}): hint: {}", kind, fix_hint(kind));
        FetchError::ToolFailed { exit_code, stderr }
    }

    /// One subprocess run. Scratch artifacts are gone on every error path.
    async fn run_fetch(
        &self,
        request: &FetchRequest,
        args: Vec<String>,
        max_height: Option<u32>,
        progress_tx: &mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<FetchedFile, FetchError> {
        let scratch_dir = &self.settings.scratch_dir;
        fs_err::tokio::create_dir_all(scratch_dir).await?;

        log::debug!("Running {} {:?}", self.settings.program, args);
        let mut cmd = self.command();
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(FetchError::Spawn)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("yt-dlp stderr: {}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Vec::from(tail).join("\n")
        });

        let run = async {
            if let Some(mut stdout) = stdout {
                let mut parser = ProgressParser::new();
                let mut buf = [0u8; 4096];
                let mut carry: Vec<u8> = Vec::new();
                loop {
                    let n = match stdout.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            log::warn!("yt-dlp stdout read failed: {}", e);
                            break;
                        }
                    };
                    carry.extend_from_slice(&buf[..n]);
                    // Keep an incomplete UTF-8 sequence for the next chunk.
                    let valid = match std::str::from_utf8(&carry) {
                        Ok(s) => s.len(),
                        Err(e) if e.error_len().is_none() => e.valid_up_to(),
                        Err(_) => carry.len(),
                    };
                    let text = String::from_utf8_lossy(&carry[..valid]).into_owned();
                    carry.drain(..valid);
                    for event in parser.feed(&text) {
                        let _ = progress_tx.send(event);
                    }
                }
                if let Some(event) = parser.finish() {
                    let _ = progress_tx.send(event);
                }
            }
            child.wait().await
        };

        let outcome = tokio::time::timeout(self.settings.fetch_timeout, run).await;
        let status = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stderr_task.abort();
                remove_job_artifacts(scratch_dir, &request.job_id);
                return Err(FetchError::Io(e));
            }
            Err(_) => {
                log::error!(
                    "yt-dlp timed out after {}s for job {}, killing",
                    self.settings.fetch_timeout.as_secs(),
                    request.job_id
                );
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill yt-dlp: {}", e);
                }
                stderr_task.abort();
                remove_job_artifacts(scratch_dir, &request.job_id);
                return Err(FetchError::Timeout(self.settings.fetch_timeout));
            }
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            remove_job_artifacts(scratch_dir, &request.job_id);
            return Err(Self::classify_failure(status.code(), stderr_text));
        }

        let path = match find_output_file(scratch_dir, &request.job_id) {
            Ok(Some(path)) => path,
            Ok(None) => {
                remove_job_artifacts(scratch_dir, &request.job_id);
                log::error!(
                    "yt-dlp exited 0 but produced no file for job {}; stderr tail: {}",
                    request.job_id,
                    output_tail(stderr_text.as_bytes(), 5)
                );
                return Err(FetchError::OutputMissing {
                    job_id: request.job_id.clone(),
                });
            }
            Err(e) => {
                remove_job_artifacts(scratch_dir, &request.job_id);
                return Err(FetchError::Io(e));
            }
        };

        let file = ScratchFile::new(path, scratch_dir.clone(), request.job_id.clone());
        let size_bytes = file.size()?;
        Ok(FetchedFile {
            file,
            size_bytes,
            max_height,
        })
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn probe(&self, url: &Url) -> Result<MediaMetadata, FetchError> {
        let mut cmd = self.command();
        cmd.args(self.build_probe_args(url));

        let output = match run_with_timeout(&mut cmd, self.settings.probe_timeout).await {
            Ok(output) => output,
            Err(ProcessError::Spawn(e)) => return Err(FetchError::Spawn(e)),
            Err(ProcessError::Timeout(d)) => return Err(FetchError::Timeout(d)),
        };

        if !output.status.success() {
            let stderr = output_tail(&output.stderr, STDERR_TAIL_LINES);
            return Err(Self::classify_failure(output.status.code(), stderr));
        }

        MediaMetadata::from_ytdlp_json(&String::from_utf8_lossy(&output.stdout))
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<FetchedFile, FetchError> {
        let ladder = request.platform.quality_ladder();
        let use_ladder = self.settings.quality_fallback && request.mode == MediaMode::Video && ladder.len() > 1;

        if !use_ladder {
            let max_height = match request.mode {
                MediaMode::Video => ladder.first().copied().flatten(),
                MediaMode::AudioOnly => None,
            };
            let args = self.build_fetch_args(request, max_height, true);
            return self.run_fetch(request, args, max_height, &progress_tx).await;
        }

        let mut last_error = None;
        for (attempt, max_height) in ladder.iter().copied().enumerate() {
            if attempt > 0 {
                log::info!(
                    "Retrying job {} with lower quality: {}",
                    request.job_id,
                    max_height.map_or_else(|| "best".to_string(), |h| format!("{}p", h))
                );
            }
            let args = self.build_fetch_args(request, max_height, false);
            match self.run_fetch(request, args, max_height, &progress_tx).await {
                Ok(fetched) => return Ok(fetched),
                Err(e @ FetchError::ToolFailed { .. }) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::OutputMissing {
            job_id: request.job_id.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(cookies: Option<&str>) -> FetcherSettings {
        FetcherSettings {
            program: "yt-dlp".to_string(),
            base_args: Vec::new(),
            scratch_dir: PathBuf::from("/tmp/scratch"),
            cookies_file: cookies.map(PathBuf::from),
            fetch_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            quality_fallback: false,
        }
    }

    fn request(url: &str, mode: MediaMode) -> FetchRequest {
        FetchRequest::new("job42", Url::parse(url).unwrap(), mode)
    }

    #[test]
    fn test_video_args() {
        let fetcher = YtDlpFetcher::new(settings(None));
        let req = request("https://www.youtube.com/watch?v=abc", MediaMode::Video);
        let args = fetcher.build_fetch_args(&req, Some(1080), true);
        assert_eq!(
            args,
            vec![
                "-o",
                "/tmp/scratch/job42.%(ext)s",
                "--no-playlist",
                "--newline",
                "--force-overwrites",
                "--socket-timeout",
                "30",
                "-f",
                "bv*[height<=1080]+ba/b[height<=1080]/bv*+ba/b",
                "--merge-output-format",
                "mp4",
                "https://www.youtube.com/watch?v=abc",
            ]
        );
    }

    #[test]
    fn test_audio_args() {
        let args = format_args(MediaMode::AudioOnly, Some(720), true);
        assert_eq!(args, vec!["-f", "bestaudio/best", "-x", "--audio-format", "mp3"]);
    }

    #[test]
    fn test_strict_rung_has_no_best_fallback() {
        let args = format_args(MediaMode::Video, Some(480), false);
        assert_eq!(args[1], "bv*[height<=480]+ba/b[height<=480]");
        assert_eq!(format_args(MediaMode::Video, None, false)[1], "bv*+ba/b");
    }

    #[test]
    fn test_cookies_only_for_accepting_platforms() {
        let fetcher = YtDlpFetcher::new(settings(Some("/etc/cookies.txt")));

        let yt = fetcher.build_fetch_args(&request("https://youtu.be/x", MediaMode::Video), None, true);
        assert!(yt.windows(2).any(|w| w[0] == "--cookies" && w[1] == "/etc/cookies.txt"));

        let tiktok = fetcher.build_fetch_args(
            &request("https://www.tiktok.com/@u/video/1", MediaMode::Video),
            None,
            true,
        );
        assert!(!tiktok.contains(&"--cookies".to_string()));
    }

    #[test]
    fn test_probe_args() {
        let fetcher = YtDlpFetcher::new(settings(None));
        let args = fetcher.build_probe_args(&Url::parse("https://vimeo.com/1").unwrap());
        assert_eq!(args.first().map(String::as_str), Some("--dump-single-json"));
        assert_eq!(args.last().map(String::as_str), Some("https://vimeo.com/1"));
    }

    #[test]
    fn test_classify_failure() {
        let denied = YtDlpFetcher::classify_failure(Some(1), "ERROR: [Instagram] x: This account is private".into());
        assert!(denied.is_access_denied());

        let failed = YtDlpFetcher::classify_failure(Some(2), "ERROR: Unsupported URL".into());
        assert!(matches!(failed, FetchError::ToolFailed { exit_code: Some(2), .. }));
    }
}
