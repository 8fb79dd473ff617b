//! Scripted [`Fetcher`] fake: writes real files into a scratch dir, no subprocess

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use clipfetch::download::error::FetchError;
use clipfetch::download::metadata::MediaMetadata;
use clipfetch::download::progress::ProgressEvent;
use clipfetch::download::scratch::ScratchFile;
use clipfetch::download::source::{FetchRequest, FetchedFile, Fetcher};
use tokio::sync::mpsc;
use url::Url;

use super::Timeline;

#[derive(Clone)]
pub enum FetchScript {
    Deliver {
        ext: &'static str,
        bytes: usize,
        progress: Vec<f64>,
    },
    Fail(fn() -> FetchError),
    Panic,
}

impl Default for FetchScript {
    fn default() -> Self {
        FetchScript::Deliver {
            ext: "mp4",
            bytes: 2048,
            progress: vec![25.0, 50.0, 100.0],
        }
    }
}

#[derive(Clone)]
pub enum ProbeScript {
    Meta(MediaMetadata),
    Fail(fn() -> FetchError),
}

pub fn tool_failed() -> FetchError {
    FetchError::ToolFailed {
        exit_code: Some(1),
        stderr: "ERROR: something broke".to_string(),
    }
}

pub fn private_content() -> FetchError {
    FetchError::AccessDenied {
        reason: "private video".to_string(),
    }
}

pub struct ScriptedFetcher {
    scratch_dir: PathBuf,
    fetch_scripts: Mutex<HashMap<String, FetchScript>>,
    probe_scripts: Mutex<HashMap<String, ProbeScript>>,
    fetch_calls: Mutex<Vec<String>>,
    probe_calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Mutex<Duration>,
    timeline: Timeline,
}

impl ScriptedFetcher {
    pub fn new(scratch_dir: PathBuf, timeline: Timeline) -> Self {
        Self {
            scratch_dir,
            fetch_scripts: Mutex::new(HashMap::new()),
            probe_scripts: Mutex::new(HashMap::new()),
            fetch_calls: Mutex::new(Vec::new()),
            probe_calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            timeline,
        }
    }

    pub fn on_fetch(&self, url: &str, script: FetchScript) {
        self.fetch_scripts.lock().unwrap().insert(url.to_string(), script);
    }

    pub fn on_probe(&self, url: &str, script: ProbeScript) {
        self.probe_scripts.lock().unwrap().insert(url.to_string(), script);
    }

    /// Every fetch sleeps this long before producing its result.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        self.timeline.lock().unwrap().push(entry);
    }
}

/// Default probe answer derived from the URL.
pub fn metadata_for(url: &str) -> MediaMetadata {
    MediaMetadata {
        title: format!("Clip {}", url.rsplit('/').next().unwrap_or("")),
        author: Some("Some Author".to_string()),
        duration_secs: Some(125),
        extractor: Some("Generic".to_string()),
        availability: Some("public".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn probe(&self, url: &Url) -> Result<MediaMetadata, FetchError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.probe_scripts.lock().unwrap().get(url.as_str()).cloned();
        match script {
            Some(ProbeScript::Meta(meta)) => Ok(meta),
            Some(ProbeScript::Fail(make)) => Err(make()),
            None => Ok(metadata_for(url.as_str())),
        }
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<FetchedFile, FetchError> {
        let url = request.url.to_string();
        self.fetch_calls.lock().unwrap().push(url.clone());
        self.record(format!("fetch_start {}", url));
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .fetch_scripts
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_default();

        let result = match script {
            FetchScript::Deliver { ext, bytes, progress } => {
                for percent in progress {
                    let _ = progress_tx.send(ProgressEvent::new(percent));
                }
                std::fs::create_dir_all(&self.scratch_dir)?;
                let path = self.scratch_dir.join(format!("{}.{}", request.job_id, ext));
                std::fs::write(&path, vec![7u8; bytes])?;
                Ok(FetchedFile {
                    file: ScratchFile::new(path, self.scratch_dir.clone(), request.job_id.clone()),
                    size_bytes: bytes as u64,
                    max_height: None,
                })
            }
            FetchScript::Fail(make) => Err(make()),
            FetchScript::Panic => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("scripted fetch panic for {}", url);
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.record(format!("fetch_end {}", url));
        result
    }
}
