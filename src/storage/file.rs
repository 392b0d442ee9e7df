use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{ApplicationIdentity, DecisionKind, Durability, Outcome, RememberScope};
use crate::observability::metrics::record_store_write;

use super::entry::{self, header_line, parse_header, RememberedEntry, StoreLine, STORE_VERSION};
use super::pattern::OriginPattern;
use super::traits::{DecisionStore, StoreWarning};
use super::StoreError;

/// Decision store backed by a versioned, line-oriented file.
///
/// `Always` answers are written through to disk (temp file, fsync, rename)
/// under a single writer lock. `Once` answers live in a session index that
/// is never persisted.
pub struct FileDecisionStore {
    path: PathBuf,
    read_only: bool,
    persisted: RwLock<Vec<StoreLine>>,
    session: RwLock<Vec<StoreLine>>,
    write_lock: Mutex<()>,
    warnings: Mutex<Vec<StoreWarning>>,
}

#[derive(Default)]
struct Loaded {
    lines: Vec<StoreLine>,
    warnings: Vec<StoreWarning>,
    unreadable: bool,
}

impl FileDecisionStore {
    /// Open the store. Never fails; problems with the file surface as warnings.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with(path.into(), false)
    }

    /// Open a store that is consulted but never written, such as a
    /// system-wide store.
    pub fn open_read_only(path: impl Into<PathBuf>) -> Self {
        Self::open_with(path.into(), true)
    }

    fn open_with(path: PathBuf, read_only: bool) -> Self {
        let loaded = read_store(&path, !read_only);

        info!(
            path = %path.display(),
            entries = loaded.lines.len(),
            read_only,
            "Opened decision store"
        );

        FileDecisionStore {
            path,
            read_only,
            persisted: RwLock::new(loaded.lines),
            session: RwLock::new(Vec::new()),
            write_lock: Mutex::new(()),
            warnings: Mutex::new(loaded.warnings),
        }
    }

    /// Re-read the file, replacing the persisted index.
    pub fn reload(&self) {
        let _guard = self.write_lock.lock();
        let loaded = read_store(&self.path, !self.read_only);
        if !loaded.unreadable {
            *self.persisted.write() = loaded.lines;
        }
        self.warnings.lock().extend(loaded.warnings);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn persist(
        &self,
        pattern: &OriginPattern,
        kind: DecisionKind,
        outcome: Outcome,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let now = Utc::now();

        // Pick up answers written by other processes since we loaded
        let loaded = read_store(&self.path, true);
        let mut lines = if loaded.unreadable {
            self.persisted.read().clone()
        } else {
            loaded.lines
        };
        entry::upsert(&mut lines, pattern, kind, outcome, now);

        match write_store(&self.path, &lines) {
            Ok(()) => {
                *self.persisted.write() = lines;
                entry::remove(&mut self.session.write(), kind, pattern.as_str());
                record_store_write("success");
                info!(
                    path = %self.path.display(),
                    kind = %kind,
                    pattern = %pattern,
                    outcome = %outcome,
                    "Remembered answer persisted"
                );
                Ok(())
            }
            Err(e) => {
                entry::upsert(&mut self.session.write(), pattern, kind, outcome, now);
                record_store_write("failure");
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to persist remembered answer, keeping it for this session"
                );
                self.warnings.lock().push(StoreWarning::WriteFailed {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
                Err(StoreError::Write {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }
    }
}

impl DecisionStore for FileDecisionStore {
    fn lookup(&self, kind: DecisionKind, identity: &ApplicationIdentity) -> Option<Outcome> {
        let origin = identity.origin_str();
        entry::find(&self.persisted.read(), kind, origin)
            .or_else(|| entry::find(&self.session.read(), kind, origin))
    }

    fn remember_scoped(
        &self,
        kind: DecisionKind,
        identity: &ApplicationIdentity,
        outcome: Outcome,
        durability: Durability,
        scope: RememberScope,
    ) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        let pattern = OriginPattern::for_identity(identity, scope)?;

        match durability {
            Durability::Once => {
                entry::upsert(&mut self.session.write(), &pattern, kind, outcome, Utc::now());
                debug!(
                    kind = %kind,
                    pattern = %pattern,
                    outcome = %outcome,
                    "Remembered answer for this session"
                );
                Ok(())
            }
            Durability::Always => self.persist(&pattern, kind, outcome),
        }
    }

    fn forget(&self, kind: DecisionKind, pattern: &str) -> Result<bool, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        let _guard = self.write_lock.lock();
        let from_session = entry::remove(&mut self.session.write(), kind, pattern);

        let loaded = read_store(&self.path, true);
        let mut lines = if loaded.unreadable {
            self.persisted.read().clone()
        } else {
            loaded.lines
        };

        if !entry::remove(&mut lines, kind, pattern) {
            *self.persisted.write() = lines;
            return Ok(from_session);
        }

        write_store(&self.path, &lines).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        *self.persisted.write() = lines;

        info!(path = %self.path.display(), kind = %kind, pattern, "Forgot remembered answer");
        Ok(true)
    }

    fn entries(&self) -> Vec<RememberedEntry> {
        let persisted = self.persisted.read();
        let session = self.session.read();

        persisted
            .iter()
            .flat_map(|line| line.entries(Durability::Always))
            .chain(session.iter().flat_map(|line| line.entries(Durability::Once)))
            .collect()
    }

    fn take_warnings(&self) -> Vec<StoreWarning> {
        std::mem::take(&mut *self.warnings.lock())
    }
}

/// Read the store file. A missing file is an empty store; anything else
/// that prevents a clean load is reported as a warning, never an error.
fn read_store(path: &Path, backup_on_mismatch: bool) -> Loaded {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Loaded::default(),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Decision store unreadable, treating as empty"
            );
            return Loaded {
                warnings: vec![StoreWarning::Unreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }],
                unreadable: true,
                ..Default::default()
            };
        }
    };

    if content.trim().is_empty() {
        return Loaded::default();
    }

    let mut lines = content.lines();
    let header = lines.next().unwrap_or_default();
    let version = parse_header(header);

    if version != Some(STORE_VERSION) {
        let found = version.map(str::to_string);
        let backup = if backup_on_mismatch {
            backup_file(path, found.as_deref())
        } else {
            None
        };

        warn!(
            path = %path.display(),
            found = ?found,
            expected = STORE_VERSION,
            backup = ?backup,
            "Decision store version mismatch, starting empty"
        );

        return Loaded {
            warnings: vec![StoreWarning::VersionMismatch {
                path: path.to_path_buf(),
                found,
                expected: STORE_VERSION,
                backup,
            }],
            ..Default::default()
        };
    }

    let mut parsed = Vec::new();
    let mut skipped = 0;

    for (number, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match StoreLine::parse(line) {
            Ok(Some(store_line)) => parsed.push(store_line),
            Ok(None) => {}
            Err(reason) => {
                skipped += 1;
                debug!(
                    path = %path.display(),
                    line = number + 2,
                    reason = %reason,
                    "Skipping malformed store line"
                );
            }
        }
    }

    let mut warnings = Vec::new();
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "Skipped malformed decision store lines");
        warnings.push(StoreWarning::SkippedLines {
            path: path.to_path_buf(),
            count: skipped,
        });
    }

    Loaded {
        lines: parsed,
        warnings,
        unreadable: false,
    }
}

/// Move a file with an unexpected version aside as `<file>.<version>-backup`.
fn backup_file(path: &Path, version: Option<&str>) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_string_lossy().into_owned();
    let backup = path.with_file_name(format!(
        "{}.{}-backup",
        file_name,
        version.unwrap_or("unversioned")
    ));

    match fs::rename(path, &backup) {
        Ok(()) => Some(backup),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to back up decision store");
            None
        }
    }
}

fn write_store(path: &Path, lines: &[StoreLine]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut writer = BufWriter::new(File::create(&tmp)?);
    writeln!(writer, "{}", header_line())?;
    for line in lines {
        writeln!(writer, "{}", line.encode())?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SigningStatus;
    use tempfile::TempDir;

    fn identity(origin: &str) -> ApplicationIdentity {
        ApplicationIdentity::parse(origin, "App", SigningStatus::Unsigned).unwrap()
    }

    const KIND: DecisionKind = DecisionKind::RunUnsignedApplication;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileDecisionStore::open(dir.path().join("missing"));

        assert!(store.lookup(KIND, &identity("http://example.com/")).is_none());
        assert!(store.entries().is_empty());
        assert!(store.take_warnings().is_empty());
    }

    #[test]
    fn test_remember_round_trip_through_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let app = identity("http://example.com/apps/clock.jnlp");

        let store = FileDecisionStore::open(&path);
        store.remember(KIND, &app, Outcome::Allow, Durability::Always).unwrap();
        drop(store);

        let reopened = FileDecisionStore::open(&path);
        assert_eq!(reopened.lookup(KIND, &app), Some(Outcome::Allow));
        assert_eq!(
            reopened.lookup(KIND, &identity("http://example.com/apps/other.jnlp")),
            Some(Outcome::Allow)
        );
        assert!(reopened
            .lookup(DecisionKind::AcceptPartialSignature, &app)
            .is_none());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("#VERSION 3 "));
        assert!(content.contains(r"run-unsigned-application:A{ALLOW}; "));
    }

    #[test]
    fn test_sandbox_answer_covers_codebase() {
        let dir = TempDir::new().unwrap();
        let store = FileDecisionStore::open(dir.path().join("store"));

        store
            .remember(KIND, &identity("http://example.com/"), Outcome::Sandbox, Durability::Always)
            .unwrap();

        assert_eq!(
            store.lookup(KIND, &identity("http://example.com/app2")),
            Some(Outcome::Sandbox)
        );
        assert!(store.lookup(KIND, &identity("http://example.org/app2")).is_none());
    }

    #[test]
    fn test_once_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let app = identity("http://example.com/app.jnlp");

        let store = FileDecisionStore::open(&path);
        store.remember(KIND, &app, Outcome::Deny, Durability::Once).unwrap();
        assert_eq!(store.lookup(KIND, &app), Some(Outcome::Deny));
        assert!(!path.exists());

        let reopened = FileDecisionStore::open(&path);
        assert!(reopened.lookup(KIND, &app).is_none());
    }

    #[test]
    fn test_newer_answer_replaces_older() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let app = identity("http://example.com/app.jnlp");

        let store = FileDecisionStore::open(&path);
        store.remember(KIND, &app, Outcome::Allow, Durability::Always).unwrap();
        store.remember(KIND, &app, Outcome::Deny, Durability::Always).unwrap();

        assert_eq!(store.lookup(KIND, &app), Some(Outcome::Deny));
        assert_eq!(store.entries().len(), 1);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_application_scope() {
        let dir = TempDir::new().unwrap();
        let store = FileDecisionStore::open(dir.path().join("store"));
        let app = identity("http://example.com/apps/clock.jnlp");

        store
            .remember_scoped(
                KIND,
                &app,
                Outcome::Allow,
                Durability::Always,
                RememberScope::Application,
            )
            .unwrap();

        assert_eq!(store.lookup(KIND, &app), Some(Outcome::Allow));
        assert!(store.lookup(KIND, &identity("http://example.com/apps/other.jnlp")).is_none());
    }

    #[test]
    fn test_first_match_in_file_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        fs::write(
            &path,
            format!(
                "{}\n\
                 run-unsigned-application:N{{DENY}}; 1 http://example\\.com/.*\n\
                 run-unsigned-application:A{{ALLOW}}; 2 http://example\\.com/app\\.jnlp\n",
                header_line()
            ),
        )
        .unwrap();

        let store = FileDecisionStore::open(&path);
        assert_eq!(
            store.lookup(KIND, &identity("http://example.com/app.jnlp")),
            Some(Outcome::Deny)
        );
    }

    #[test]
    fn test_version_mismatch_backs_up_and_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        fs::write(&path, "#VERSION 2\nrun-unsigned-application:A{YES}; 1 .*\n").unwrap();

        let store = FileDecisionStore::open(&path);
        assert!(store.lookup(KIND, &identity("http://example.com/")).is_none());

        let warnings = store.take_warnings();
        assert_eq!(warnings.len(), 1);
        match &warnings[0] {
            StoreWarning::VersionMismatch { found, backup, .. } => {
                assert_eq!(found.as_deref(), Some("2"));
                assert_eq!(backup.as_deref(), Some(dir.path().join("store.2-backup").as_path()));
            }
            other => panic!("unexpected warning: {other:?}"),
        }
        assert!(dir.path().join("store.2-backup").exists());

        // Warnings are drained
        assert!(store.take_warnings().is_empty());
    }

    #[test]
    fn test_missing_header_is_a_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        fs::write(&path, "run-unsigned-application:A{ALLOW}; 1 .*\n").unwrap();

        let store = FileDecisionStore::open(&path);
        assert!(store.entries().is_empty());
        assert!(dir.path().join("store.unversioned-backup").exists());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        fs::write(
            &path,
            format!(
                "{}\nthis line is garbage\n\
                 run-unsigned-application:A{{SANDBOX}}; 1 http://example\\.com/.*\n\
                 run-unsigned-application:A{{ALLOW}}; 1 (\n",
                header_line()
            ),
        )
        .unwrap();

        let store = FileDecisionStore::open(&path);
        assert_eq!(
            store.lookup(KIND, &identity("http://example.com/x")),
            Some(Outcome::Sandbox)
        );
        assert_eq!(
            store.take_warnings(),
            vec![StoreWarning::SkippedLines { path: path.clone(), count: 2 }]
        );
    }

    #[test]
    fn test_write_failure_keeps_answer_for_session() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let store = FileDecisionStore::open(blocker.join("store"));
        let app = identity("http://example.com/app.jnlp");

        let result = store.remember(KIND, &app, Outcome::Allow, Durability::Always);
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert_eq!(store.lookup(KIND, &app), Some(Outcome::Allow));
        assert!(store
            .take_warnings()
            .iter()
            .any(|w| matches!(w, StoreWarning::WriteFailed { .. })));
    }

    #[test]
    fn test_forget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let app = identity("http://example.com/app.jnlp");

        let store = FileDecisionStore::open(&path);
        store.remember(KIND, &app, Outcome::Allow, Durability::Always).unwrap();
        let pattern = store.entries()[0].pattern.as_str().to_string();

        assert!(store.forget(KIND, &pattern).unwrap());
        assert!(!store.forget(KIND, &pattern).unwrap());
        assert!(store.lookup(KIND, &app).is_none());

        let reopened = FileDecisionStore::open(&path);
        assert!(reopened.entries().is_empty());
    }

    #[test]
    fn test_read_only_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("global");
        fs::write(
            &path,
            format!("{}\nrun-unsigned-application:N{{DENY}}; 1 .*\n", header_line()),
        )
        .unwrap();

        let store = FileDecisionStore::open_read_only(&path);
        let app = identity("http://example.com/");

        assert_eq!(store.lookup(KIND, &app), Some(Outcome::Deny));
        assert!(matches!(
            store.remember(KIND, &app, Outcome::Allow, Durability::Always),
            Err(StoreError::ReadOnly)
        ));
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let store = FileDecisionStore::open(&path);

        std::thread::scope(|scope| {
            for i in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    let app = identity(&format!("http://host{i}.example.com/app.jnlp"));
                    store.remember(KIND, &app, Outcome::Allow, Durability::Always).unwrap();
                });
            }
        });

        let reopened = FileDecisionStore::open(&path);
        assert_eq!(reopened.entries().len(), 8);
    }
}
