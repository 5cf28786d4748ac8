//! Filesystem flag inputs (spec §6 "Filesystem inputs"). Bootup completion
//! and update-mode are both observed as plain files rather than bus signals:
//! `init-done` existing under the boot-status directory, the `bootstate`
//! file's text content, and `/tmp/os-update-running`'s mere existence. Same
//! `notify`-on-parent-directory idiom as [`crate::config::TomlConfigStore`]
//! (watching the file itself misses editors/scripts that replace-via-rename).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Fallback window before bootup is declared complete anyway, used when the
/// boot-status directory never appears at all (spec §6: "absent directory:
/// treat bootup as complete 60 s after process start").
pub const DESKTOP_READY_FALLBACK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagSnapshot {
    pub bootup_complete: bool,
    pub update_mode: bool,
}

/// Watches the two flag-file inputs and republishes a combined snapshot
/// whenever either changes. Lives for the process lifetime; `mced`'s main
/// holds the returned `notify::RecommendedWatcher`s so they are not dropped.
pub struct FlagWatcher {
    boot_status_dir: PathBuf,
    update_flag_path: PathBuf,
    tx: watch::Sender<FlagSnapshot>,
    started_at: Instant,
}

impl FlagWatcher {
    pub fn spawn(
        boot_status_dir: impl Into<PathBuf>,
        update_flag_path: impl Into<PathBuf>,
    ) -> (Arc<Self>, watch::Receiver<FlagSnapshot>) {
        let boot_status_dir = boot_status_dir.into();
        let update_flag_path = update_flag_path.into();
        let initial = read_snapshot(&boot_status_dir, &update_flag_path);
        let (tx, rx) = watch::channel(initial);
        let watcher = Arc::new(Self {
            boot_status_dir,
            update_flag_path,
            tx,
            started_at: Instant::now(),
        });
        if !watcher.boot_status_dir.exists() {
            watcher.clone().spawn_desktop_ready_fallback();
        }
        (watcher, rx)
    }

    fn recompute(&self) {
        let next = read_snapshot(&self.boot_status_dir, &self.update_flag_path);
        if *self.tx.borrow() != next {
            debug!(?next, "flag snapshot changed");
            let _ = self.tx.send(next);
        }
    }

    /// Installs `notify` watches on both flag files' parent directories.
    /// Returns the watcher handles so the caller can keep them alive; if
    /// either install fails the corresponding input simply never updates
    /// past its initial read, which matches the conservative ("not yet
    /// complete" / "not in update mode") defaults.
    pub fn install_watchers(watcher: &Arc<Self>) -> Vec<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watchers = Vec::new();
        for dir in [
            watcher.boot_status_dir.clone(),
            watcher
                .update_flag_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/tmp")),
        ] {
            let this = Arc::clone(watcher);
            match notify::recommended_watcher(move |event: notify::Result<notify::Event>| match event {
                Ok(_) => this.recompute(),
                Err(err) => warn!(?err, "flag file watcher error"),
            }) {
                Ok(mut watcher) => {
                    if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                        warn!(?err, path = %dir.display(), "failed to install flag file watch");
                    } else {
                        watchers.push(watcher);
                    }
                }
                Err(err) => warn!(?err, "failed to construct flag file watcher"),
            }
        }
        watchers
    }

    fn spawn_desktop_ready_fallback(self: Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(DESKTOP_READY_FALLBACK).await;
            if !self.boot_status_dir.exists() {
                info_bootup_forced(self.started_at);
                let mut next = *self.tx.borrow();
                next.bootup_complete = true;
                let _ = self.tx.send(next);
            }
        });
    }
}

fn info_bootup_forced(started_at: Instant) {
    tracing::info!(
        elapsed = ?started_at.elapsed(),
        "boot-status directory absent, forcing bootup-complete via fallback timer"
    );
}

fn read_snapshot(boot_status_dir: &Path, update_flag_path: &Path) -> FlagSnapshot {
    FlagSnapshot {
        bootup_complete: read_bootup_complete(boot_status_dir),
        update_mode: update_flag_path.exists(),
    }
}

/// Bootup is complete once `init-done` exists, or `bootstate` names a
/// terminal state (spec §6: accepts `"user"` in addition to the raw
/// `init-done` marker, matching how actdead boots skip the desktop session).
fn read_bootup_complete(boot_status_dir: &Path) -> bool {
    if boot_status_dir.join("init-done").exists() {
        return true;
    }
    match std::fs::read_to_string(boot_status_dir.join("bootstate")) {
        Ok(text) => matches!(text.trim(), "user" | "actdead"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mce-flags-test-{name}-{:?}", std::thread::current().id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn init_done_marker_means_bootup_complete() {
        let dir = tmp_dir("init-done");
        std::fs::write(dir.join("init-done"), "").unwrap();
        assert!(read_bootup_complete(&dir));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bootstate_user_means_bootup_complete() {
        let dir = tmp_dir("bootstate");
        std::fs::write(dir.join("bootstate"), "user\n").unwrap();
        assert!(read_bootup_complete(&dir));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_is_not_complete_yet() {
        assert!(!read_bootup_complete(Path::new("/nonexistent/boot-status")));
    }

    #[test]
    fn update_flag_presence_toggles_update_mode() {
        let dir = tmp_dir("update-flag");
        let flag = dir.join("os-update-running");
        assert!(!read_snapshot(&dir, &flag).update_mode);
        std::fs::write(&flag, "").unwrap();
        assert!(read_snapshot(&dir, &flag).update_mode);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn desktop_ready_fallback_fires_after_sixty_seconds_when_dir_absent() {
        let missing = PathBuf::from("/nonexistent/boot-status-for-fallback-test");
        let (_watcher, mut rx) = FlagWatcher::spawn(missing, PathBuf::from("/nonexistent/os-update-running"));
        assert!(!rx.borrow().bootup_complete);
        tokio::time::advance(DESKTOP_READY_FALLBACK + Duration::from_secs(1)).await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().bootup_complete);
    }
}
