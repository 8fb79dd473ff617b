//! Scratch files: one unique prefix per job inside the scratch directory.
//!
//! yt-dlp picks the final extension itself and leaves intermediate artifacts
//! (`.part`, `.ytdl`, per-format `.f137.mp4`) next to the result, so every
//! lookup and cleanup works on the `<job-id>.` prefix rather than one path.

use std::io;
use std::path::{Path, PathBuf};

const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".tmp"];

fn job_prefix(job_id: &str) -> String {
    format!("{}.", job_id)
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) || name.contains(".part-Frag")
}

/// Output template handed to yt-dlp for this job.
pub fn output_template(scratch_dir: &Path, job_id: &str) -> PathBuf {
    scratch_dir.join(format!("{}.%(ext)s", job_id))
}

/// Finds the finished file produced for `job_id`, ignoring partial artifacts.
///
/// Prefers `<job-id>.<ext>` over leftovers with extra dots (unmerged
/// per-format streams); among equals the largest file wins.
pub fn find_output_file(scratch_dir: &Path, job_id: &str) -> io::Result<Option<PathBuf>> {
    let prefix = job_prefix(job_id);
    let mut candidates: Vec<(bool, u64, PathBuf)> = Vec::new();

    for entry in fs_err::read_dir(scratch_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&prefix) || is_partial(&name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let single_extension = !name[prefix.len()..].contains('.');
        candidates.push((single_extension, metadata.len(), entry.path()));
    }

    candidates.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    Ok(candidates.pop().map(|(_, _, path)| path))
}

/// Deletes everything in `scratch_dir` that belongs to `job_id`. Returns the number of removed files.
pub fn remove_job_artifacts(scratch_dir: &Path, job_id: &str) -> usize {
    let prefix = job_prefix(job_id);
    let entries = match fs_err::read_dir(scratch_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Scratch cleanup skipped: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        match fs_err::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove scratch artifact: {}", e),
        }
    }
    removed
}

/// Result file of one fetch, deleted with all job artifacts on drop unless persisted.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    scratch_dir: PathBuf,
    job_id: String,
    armed: bool,
}

impl ScratchFile {
    pub fn new(path: PathBuf, scratch_dir: PathBuf, job_id: impl Into<String>) -> Self {
        Self {
            path,
            scratch_dir,
            job_id: job_id.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extension chosen by the tool, lowercased.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(fs_err::metadata(&self.path)?.len())
    }

    /// Moves the file to `dest` (rename, or copy when crossing file systems)
    /// and cleans the remaining job artifacts. The guard no longer owns the file.
    pub fn persist(mut self, dest: &Path) -> io::Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent)?;
        }
        if fs_err::rename(&self.path, dest).is_err() {
            fs_err::copy(&self.path, dest)?;
        }
        self.armed = false;
        remove_job_artifacts(&self.scratch_dir, &self.job_id);
        Ok(dest.to_path_buf())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.armed {
            let removed = remove_job_artifacts(&self.scratch_dir, &self.job_id);
            log::debug!("Scratch cleanup for job {}: {} file(s)", self.job_id, removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[test]
    fn test_output_template() {
        let tpl = output_template(Path::new("/tmp/s"), "abc");
        assert_eq!(tpl, PathBuf::from("/tmp/s/abc.%(ext)s"));
    }

    #[test]
    fn test_find_output_file_ignores_partials_and_other_jobs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "job1.mp4.part", 100);
        touch(dir.path(), "job1.ytdl", 10);
        touch(dir.path(), "job2.mp4", 50);
        assert_eq!(find_output_file(dir.path(), "job1").unwrap(), None);

        let expected = touch(dir.path(), "job1.webm", 20);
        assert_eq!(find_output_file(dir.path(), "job1").unwrap(), Some(expected));
    }

    #[test]
    fn test_find_output_file_prefers_merged_result() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "job1.f137.mp4", 500);
        let merged = touch(dir.path(), "job1.mp4", 400);
        assert_eq!(find_output_file(dir.path(), "job1").unwrap(), Some(merged));
    }

    #[test]
    fn test_find_output_file_prefix_is_exact() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "job10.mp4", 10);
        assert_eq!(find_output_file(dir.path(), "job1").unwrap(), None);
    }

    #[test]
    fn test_drop_removes_all_job_artifacts() {
        let dir = TempDir::new().unwrap();
        let file = touch(dir.path(), "job1.mp4", 10);
        touch(dir.path(), "job1.mp4.part", 10);
        let other = touch(dir.path(), "job2.mp4", 10);

        drop(ScratchFile::new(file.clone(), dir.path().to_path_buf(), "job1"));

        assert!(!file.exists());
        assert!(!dir.path().join("job1.mp4.part").exists());
        assert!(other.exists());
    }

    #[test]
    fn test_persist_moves_file_and_disarms() {
        let dir = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let file = touch(dir.path(), "job1.mp3", 42);
        let scratch = ScratchFile::new(file.clone(), dir.path().to_path_buf(), "job1");
        assert_eq!(scratch.extension().as_deref(), Some("mp3"));
        assert_eq!(scratch.size().unwrap(), 42);

        let dest = cache.path().join("nested").join("key-job1.mp3");
        let persisted = scratch.persist(&dest).unwrap();

        assert_eq!(persisted, dest);
        assert!(dest.exists());
        assert!(!file.exists());
    }
}
