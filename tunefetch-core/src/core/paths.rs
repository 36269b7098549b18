use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::filename::split_extension;

fn occupied(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Returns `desired` if nothing exists at `dir/desired`, otherwise the first
/// free `stem (n).ext` for n = 1, 2, ...
///
/// Not atomic with respect to other writers; concurrent callers targeting the
/// same directory go through [`DirectoryLocks::claim`].
pub fn resolve_unique_name(dir: &Path, desired: &str) -> String {
    resolve_with(dir, desired, |_| false)
}

fn resolve_with(dir: &Path, desired: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(desired) && !occupied(&dir.join(desired)) {
        return desired.to_string();
    }

    let (stem, ext) = split_extension(desired);
    let mut counter: u32 = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, counter, ext);
        if !taken(&candidate) && !occupied(&dir.join(&candidate)) {
            return candidate;
        }
        counter += 1;
    }
}

#[derive(Debug, Default)]
struct DirectoryNames {
    /// Held by running workers; the file may be mid-write.
    reserved: HashSet<String>,
    /// Finished outputs written through these locks.
    produced: HashSet<String>,
}

type SharedNames = Arc<Mutex<DirectoryNames>>;

/// One mutex per output directory guarding the names that running workers
/// have reserved or produced there. Directories never contend with each other.
#[derive(Clone, Default)]
pub struct DirectoryLocks {
    dirs: Arc<Mutex<HashMap<PathBuf, SharedNames>>>,
}

#[derive(Debug)]
pub enum NameClaim {
    /// A finished file already sits at the desired name.
    Existing(PathBuf),
    Reserved(Reservation),
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn directory(&self, dir: &Path) -> (PathBuf, SharedNames) {
        let key = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        let mut map = self.dirs.lock().unwrap_or_else(PoisonError::into_inner);
        let names = map
            .entry(key.clone())
            .or_insert_with(SharedNames::default)
            .clone();
        (key, names)
    }

    /// Check-and-reserve for `desired` inside `dir`, atomic with respect to
    /// every other claim on the same directory.
    ///
    /// A file on disk that was there before these locks touched the
    /// directory yields [`NameClaim::Existing`]. A name held by a running
    /// worker, or one another item already produced, is never reported as
    /// existing; the claim moves on to the next free `stem (n).ext` instead.
    pub fn claim(&self, dir: &Path, desired: &str) -> NameClaim {
        let (key, names) = self.directory(dir);
        let mut state = names.lock().unwrap_or_else(PoisonError::into_inner);

        let desired_path = dir.join(desired);
        let ours = state.reserved.contains(desired) || state.produced.contains(desired);
        if !ours && occupied(&desired_path) {
            return NameClaim::Existing(desired_path);
        }

        let name = resolve_with(dir, desired, |n| state.reserved.contains(n));
        state.reserved.insert(name.clone());
        drop(state);

        tracing::debug!("reserved '{}' in {}", name, key.display());
        NameClaim::Reserved(Reservation {
            dir: dir.to_path_buf(),
            name,
            names,
        })
    }

    pub fn reserved_count(&self, dir: &Path) -> usize {
        let (_, names) = self.directory(dir);
        let state = names.lock().unwrap_or_else(PoisonError::into_inner);
        state.reserved.len()
    }
}

/// A name held for one worker; released on drop.
#[derive(Debug)]
pub struct Reservation {
    dir: PathBuf,
    name: String,
    names: SharedNames,
}

impl Reservation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Records the name as a finished output of this run. Later claims for it
    /// resolve to a fresh name rather than skipping.
    pub fn commit(self) {
        let mut state = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        state.produced.insert(self.name.clone());
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut state = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        state.reserved.remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn free_name_is_returned_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(resolve_unique_name(tmp.path(), "My Song.mp3"), "My Song.mp3");
    }

    #[test]
    fn collisions_get_counter_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "My Song.mp3");
        assert_eq!(resolve_unique_name(tmp.path(), "My Song.mp3"), "My Song (1).mp3");

        touch(tmp.path(), "My Song (1).mp3");
        assert_eq!(resolve_unique_name(tmp.path(), "My Song.mp3"), "My Song (2).mp3");
    }

    #[test]
    fn name_without_extension() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "Album");
        assert_eq!(resolve_unique_name(tmp.path(), "Album"), "Album (1)");
    }

    #[test]
    fn resolved_name_is_never_returned_again_once_created() {
        let tmp = tempfile::tempdir().unwrap();
        let mut seen = HashSet::new();
        for _ in 0..6 {
            let name = resolve_unique_name(tmp.path(), "dup.mp3");
            assert!(seen.insert(name.clone()), "{} returned twice", name);
            touch(tmp.path(), &name);
        }
    }

    #[test]
    fn claim_reports_finished_file() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "done.mp3");
        let locks = DirectoryLocks::new();
        match locks.claim(tmp.path(), "done.mp3") {
            NameClaim::Existing(path) => assert_eq!(path, tmp.path().join("done.mp3")),
            NameClaim::Reserved(r) => panic!("unexpected reservation {}", r.name()),
        }
    }

    #[test]
    fn claim_skips_names_held_by_running_workers() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = DirectoryLocks::new();

        let NameClaim::Reserved(first) = locks.claim(tmp.path(), "same.mp3") else {
            panic!("expected reservation");
        };
        // the first worker's output is mid-write
        touch(tmp.path(), "same.mp3");

        let NameClaim::Reserved(second) = locks.claim(tmp.path(), "same.mp3") else {
            panic!("expected reservation");
        };
        assert_eq!(first.name(), "same.mp3");
        assert_eq!(second.name(), "same (1).mp3");
        assert_eq!(locks.reserved_count(tmp.path()), 2);

        drop(first);
        drop(second);
        assert_eq!(locks.reserved_count(tmp.path()), 0);
    }

    #[test]
    fn produced_name_is_not_mistaken_for_a_finished_file() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = DirectoryLocks::new();

        let NameClaim::Reserved(first) = locks.claim(tmp.path(), "song.mp3") else {
            panic!("expected reservation");
        };
        touch(tmp.path(), "song.mp3");
        first.commit();
        assert_eq!(locks.reserved_count(tmp.path()), 0);

        let NameClaim::Reserved(second) = locks.claim(tmp.path(), "song.mp3") else {
            panic!("expected reservation");
        };
        assert_eq!(second.name(), "song (1).mp3");
    }

    #[test]
    fn released_without_commit_still_skips_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = DirectoryLocks::new();

        let NameClaim::Reserved(first) = locks.claim(tmp.path(), "song.mp3") else {
            panic!("expected reservation");
        };
        drop(first);
        touch(tmp.path(), "song.mp3");

        assert!(matches!(
            locks.claim(tmp.path(), "song.mp3"),
            NameClaim::Existing(_)
        ));
    }

    #[test]
    fn concurrent_claims_are_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = DirectoryLocks::new();
        let dir = tmp.path().to_path_buf();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                let dir = dir.clone();
                std::thread::spawn(move || match locks.claim(&dir, "race.mp3") {
                    NameClaim::Reserved(r) => r,
                    NameClaim::Existing(p) => panic!("unexpected existing {:?}", p),
                })
            })
            .collect();

        let reservations: Vec<Reservation> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let names: HashSet<&str> = reservations.iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), 16);
        assert!(names.contains("race.mp3"));
        assert!(names.contains("race (15).mp3"));
    }

    #[test]
    fn directories_are_independent() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let locks = DirectoryLocks::new();

        let NameClaim::Reserved(ra) = locks.claim(a.path(), "x.mp3") else {
            panic!("expected reservation");
        };
        let NameClaim::Reserved(rb) = locks.claim(b.path(), "x.mp3") else {
            panic!("expected reservation");
        };
        assert_eq!(ra.name(), "x.mp3");
        assert_eq!(rb.name(), "x.mp3");
    }
}
