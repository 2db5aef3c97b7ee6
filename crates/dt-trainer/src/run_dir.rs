//! Locating the directory a training run wrote to.
//!
//! The trainer reports its output directory when it can. Otherwise the
//! expected `<base>/<run name>` path is tried, and as a last resort the most
//! recently modified directory under `<base>`. That last step only gives the
//! right answer when a single trial writes under `<base>` at a time, which
//! the study driver guarantees by running trials sequentially.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Most recently modified directory directly under `base`.
pub fn latest_run_dir(base: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(base).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_dir() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

/// Pick the run directory for `run_name`: reported path, then expected path,
/// then the newest directory under `base`.
pub fn resolve_run_dir(reported: Option<&Path>, base: &Path, run_name: &str) -> Option<PathBuf> {
    if let Some(path) = reported.filter(|p| p.is_dir()) {
        return Some(path.to_path_buf());
    }

    let expected = base.join(run_name);
    if expected.is_dir() {
        return Some(expected);
    }

    let fallback = latest_run_dir(base);
    if let Some(path) = &fallback {
        tracing::warn!(
            "Run directory {} not found, falling back to most recent {}",
            expected.display(),
            path.display()
        );
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch_dir(base: &Path, name: &str, age_secs: u64) -> PathBuf {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        fs::File::open(&dir).unwrap().set_modified(mtime).unwrap();
        dir
    }

    #[test]
    fn expected_path_is_preferred() {
        let base = TempDir::new().unwrap();
        let expected = touch_dir(base.path(), "trial_0", 100);
        touch_dir(base.path(), "newer", 0);

        assert_eq!(resolve_run_dir(None, base.path(), "trial_0"), Some(expected));
    }

    #[test]
    fn reported_path_beats_expected() {
        let base = TempDir::new().unwrap();
        touch_dir(base.path(), "trial_0", 0);
        let reported = touch_dir(base.path(), "trial_02", 100);

        assert_eq!(
            resolve_run_dir(Some(&reported), base.path(), "trial_0"),
            Some(reported)
        );
    }

    #[test]
    fn falls_back_to_latest_modified_directory() {
        let base = TempDir::new().unwrap();
        touch_dir(base.path(), "old_run", 300);
        let newest = touch_dir(base.path(), "trial_02", 5);
        touch_dir(base.path(), "older_run", 60);
        fs::write(base.path().join("stray.txt"), "not a run").unwrap();

        assert_eq!(resolve_run_dir(None, base.path(), "trial_0"), Some(newest));
    }

    #[test]
    fn missing_base_resolves_to_nothing() {
        let base = TempDir::new().unwrap();
        let missing = base.path().join("runs").join("detect");
        assert_eq!(resolve_run_dir(None, &missing, "trial_0"), None);
        assert_eq!(latest_run_dir(base.path()), None);
    }
}
