use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use crate::renderer::config::crop_extension;
use crate::renderer::error::RenderError;

/// Upper bound on waiting for the forwarding thread to exit.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How a directory entry is compared against the watch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// `channel0.jpg` matches `channel0`
    CropExtension,
    /// `toy.frag` matches only `toy.frag`
    Exact,
}

/// Decides which filesystem events name a watched file.
#[derive(Debug, Clone)]
pub struct NameFilter {
    watched: Vec<String>,
    mode: MatchMode,
}

impl NameFilter {
    pub fn new(watched: Vec<String>, mode: MatchMode) -> Self {
        Self { watched, mode }
    }

    /// Filename of `path` if it is on the watch list.
    pub fn matches(&self, path: &Path) -> Option<String> {
        let filename = path.file_name()?.to_str()?;
        let key = match self.mode {
            MatchMode::CropExtension => crop_extension(filename),
            MatchMode::Exact => filename,
        };
        self.watched
            .iter()
            .any(|w| w == key)
            .then(|| filename.to_owned())
    }

    /// Watched filenames written or created by `event`.
    pub fn changed_names(&self, event: &Event) -> Vec<String> {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return Vec::new();
        }
        event.paths.iter().filter_map(|p| self.matches(p)).collect()
    }
}

/// Watches one directory through OS change notifications and hands changed filenames to
/// the render loop.
pub struct DirectoryWatcher {
    directory: PathBuf,
    changes: Receiver<Vec<String>>,
    pending: Vec<String>,

    watcher: Option<RecommendedWatcher>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Starts watching. Files already present are not reported.
    ///
    /// `poll_interval` only applies when the platform falls back to polling.
    pub fn spawn(
        directory: PathBuf,
        watched: Vec<String>,
        mode: MatchMode,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver is gone only while shutting down
                let _ = events_tx.send(res);
            },
            Config::default().with_poll_interval(poll_interval),
        )
        .map_err(|err| eyre!("Failed to create watcher for {}: {err}", directory.display()))?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|err| eyre!("Failed to watch {}: {err}", directory.display()))?;

        let (changes_tx, changes) = unbounded();
        let (stop_tx, stop_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);

        let filter = NameFilter::new(watched, mode);
        let thread_dir = directory.clone();
        let handle = thread::Builder::new()
            .name(format!("watch {}", directory.display()))
            .spawn(move || {
                forward_events(&thread_dir, &filter, &events_rx, &stop_rx, &changes_tx);
                let _ = done_tx.send(());
            })
            .map_err(|err| eyre!("Failed to spawn watcher thread: {err}"))?;

        log::debug!("Watching {}", directory.display());

        Ok(Self {
            directory,
            changes,
            pending: Vec::new(),

            watcher: Some(watcher),
            stop_tx,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Non-blocking check for reported changes.
    pub fn has_changes(&mut self) -> bool {
        self.collect();
        !self.pending.is_empty()
    }

    /// Takes every changed filename reported so far, each once.
    pub fn drain(&mut self) -> Vec<String> {
        self.collect();
        let mut seen = Vec::with_capacity(self.pending.len());
        for name in self.pending.drain(..) {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    fn collect(&mut self) {
        for batch in self.changes.try_iter() {
            self.pending.extend(batch);
        }
    }

    /// Signals the thread to stop and waits for it, failing after [`STOP_TIMEOUT`].
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        // Unregisters from the OS before the forwarding thread goes away
        drop(self.watcher.take());

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        // A full channel means a stop is already pending
        let _ = self.stop_tx.try_send(());
        match self.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                handle
                    .join()
                    .map_err(|_| eyre!("Watcher thread for {} panicked", self.directory.display()))?;
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(RenderError::WatcherStopTimeout {
                directory: self.directory.clone(),
                timeout: STOP_TIMEOUT,
            }
            .into()),
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{err}");
        }
    }
}

fn forward_events(
    directory: &Path,
    filter: &NameFilter,
    events_rx: &Receiver<notify::Result<Event>>,
    stop_rx: &Receiver<()>,
    changes_tx: &Sender<Vec<String>>,
) {
    loop {
        select! {
            recv(stop_rx) -> _ => return,
            recv(events_rx) -> msg => {
                let event = match msg {
                    Ok(Ok(event)) => event,
                    Ok(Err(err)) => {
                        log::warn!("Watch error in {}: {err}", directory.display());
                        continue;
                    }
                    Err(_) => return,
                };

                let changed = filter.changed_names(&event);
                if changed.is_empty() {
                    continue;
                }
                log::debug!("Changed in {}: {changed:?}", directory.display());
                if changes_tx.send(changed).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};

    fn channel_filter() -> NameFilter {
        NameFilter::new(
            vec!["channel0".into(), "channel1".into()],
            MatchMode::CropExtension,
        )
    }

    fn wait_for_changes(watcher: &mut DirectoryWatcher) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !watcher.has_changes() {
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    #[test]
    fn crop_mode_ignores_extension() {
        let filter = channel_filter();
        assert_eq!(filter.matches(Path::new("/t/channel0.png")), Some("channel0.png".into()));
        assert_eq!(filter.matches(Path::new("/t/channel1.jpg")), Some("channel1.jpg".into()));
        assert_eq!(filter.matches(Path::new("/t/channel2.png")), None);
        assert_eq!(filter.matches(Path::new("/t/other.png")), None);
    }

    #[test]
    fn exact_mode_compares_extension() {
        let filter = NameFilter::new(
            vec!["toy.vert".into(), "toy.frag".into()],
            MatchMode::Exact,
        );
        assert_eq!(filter.matches(Path::new("shaders/toy.frag")), Some("toy.frag".into()));
        assert_eq!(filter.matches(Path::new("shaders/toy.frag.spv")), None);
        assert_eq!(filter.matches(Path::new("shaders/toy.vert.bak")), None);
    }

    #[test]
    fn only_writes_and_creates_are_changes() {
        let filter = channel_filter();
        let path = PathBuf::from("/t/channel0.png");

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(path.clone())
            .add_path(PathBuf::from("/t/unrelated.txt"));
        let read = Event::new(EventKind::Access(AccessKind::Any)).add_path(path.clone());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path);

        assert_eq!(filter.changed_names(&write), vec!["channel0.png".to_string()]);
        assert_eq!(filter.changed_names(&create), vec!["channel0.png".to_string()]);
        assert!(filter.changed_names(&read).is_empty());
        assert!(filter.changed_names(&remove).is_empty());
    }

    #[test]
    fn repeated_writes_are_each_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel0.png");
        fs::write(&path, b"a").unwrap();

        let mut watcher = DirectoryWatcher::spawn(
            dir.path().to_path_buf(),
            vec!["channel0".into()],
            MatchMode::CropExtension,
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(!watcher.has_changes());

        // Same length and back to back, so modification stamps may not differ
        fs::write(&path, b"b").unwrap();
        assert!(wait_for_changes(&mut watcher));
        assert_eq!(watcher.drain(), vec!["channel0.png".to_string()]);

        fs::write(&path, b"b").unwrap();
        assert!(wait_for_changes(&mut watcher));
        assert_eq!(watcher.drain(), vec!["channel0.png".to_string()]);

        watcher.stop().unwrap();
    }

    #[test]
    fn unwatched_files_are_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::spawn(
            dir.path().to_path_buf(),
            vec!["toy.frag".into()],
            MatchMode::Exact,
            Duration::from_millis(10),
        )
        .unwrap();

        fs::write(dir.path().join("toy.frag.spv"), b"x").unwrap();
        fs::write(dir.path().join("toy.frag"), b"void main() {}").unwrap();
        assert!(wait_for_changes(&mut watcher));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(watcher.drain(), vec!["toy.frag".to_string()]);
        watcher.stop().unwrap();
    }

    #[test]
    fn missing_directory_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let result = DirectoryWatcher::spawn(
            dir.path().join("absent"),
            vec!["channel0".into()],
            MatchMode::CropExtension,
            Duration::from_millis(10),
        );
        assert!(result.is_err());
    }

    #[test]
    fn drain_deduplicates() {
        let (tx, changes) = unbounded();
        let (stop_tx, _stop_rx) = bounded(1);
        let (_done_tx, done_rx) = bounded::<()>(1);
        let mut watcher = DirectoryWatcher {
            directory: PathBuf::from("textures"),
            changes,
            pending: Vec::new(),
            watcher: None,
            stop_tx,
            done_rx,
            handle: None,
        };

        tx.send(vec!["channel0.png".into()]).unwrap();
        tx.send(vec!["channel0.png".into(), "channel2.png".into()]).unwrap();

        assert_eq!(
            watcher.drain(),
            vec!["channel0.png".to_string(), "channel2.png".to_string()]
        );
    }
}
