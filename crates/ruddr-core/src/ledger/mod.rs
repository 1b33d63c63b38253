// # Address Ledger
//
// Durable record of the last published (or last attempted) address for
// every updater and address family.
//
// ## Entry semantics
//
// Each (updater, family) entry is `(address | none, current)`:
//
// - `current = true`: the address is confirmed published
// - `current = false`: the remote state is unknown (never published, or
//   invalidated before an attempt that has not been confirmed)
//
// A missing entry reads as `(none, false)`. `(none, true)` is valid and
// means "intentionally no address of this family".
//
// ## Crash consistency
//
// Every mutation is written to disk before it returns, using
// write-then-rename so a crash never leaves a half-written file. Engines
// invalidate an entry *before* a publish attempt and commit it *after*
// success, so a crash mid-publish leaves the ledger pessimistic and the
// publish is retried at the next startup.
//
// ## Failure semantics
//
// - Read failures are never fatal: the offending entry (or the whole file)
//   is discarded and logged, forcing a republish.
// - Write failures are returned as [`Error::Ledger`]. Callers must not keep
//   publishing once stored and real state may have diverged.

mod format;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::address::{FamilyAddress, Ipv6Prefix};
use crate::error::{Error, Result};

/// A single (address, current) ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry<A> {
    /// Last published or attempted address, if any
    pub address: Option<A>,
    /// Whether `address` is confirmed published
    pub current: bool,
}

impl<A> LedgerEntry<A> {
    /// The entry for an unknown remote state: `(none, false)`
    pub const fn unknown() -> Self {
        Self {
            address: None,
            current: false,
        }
    }
}

/// Ledger contents for one updater
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendRecord {
    pub ipv4: Option<LedgerEntry<Ipv4Addr>>,
    pub ipv6: Option<LedgerEntry<Ipv6Prefix>>,
}

/// Persistent map from updater name to its last {IPv4, IPv6} entries
///
/// The ledger is loaded once at startup, before any engine runs. Each
/// (updater, family) entry is only ever mutated by that updater's own
/// engine; the internal lock only serializes file writes.
///
/// # Example
///
/// ```rust,no_run
/// use ruddr_core::AddressLedger;
/// use std::net::Ipv4Addr;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ledger = AddressLedger::load("/var/lib/ruddr/addrfile").await;
///
///     let addr = Ipv4Addr::new(203, 0, 113, 7);
///     if ledger.needs_update("my_updater", Some(addr)).await {
///         ledger.invalidate("my_updater", Some(addr)).await?;
///         // ... publish ...
///         ledger.set("my_updater", Some(addr)).await?;
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct AddressLedger {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<String, BackendRecord>>,
}

impl AddressLedger {
    /// Load the ledger from `path`
    ///
    /// A missing, unreadable or malformed file yields an empty (or partially
    /// empty) ledger. This never fails; problems are logged.
    pub async fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = Self::read_records(&path).await;

        tracing::debug!(
            "Loaded ledger {}: {} updater(s)",
            path.display(),
            records.len()
        );

        Self {
            path: Some(path),
            records: Mutex::new(records),
        }
    }

    /// Create a ledger that is never persisted
    ///
    /// Everything is forgotten at exit, so every address is republished on
    /// the next start.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Path of the backing file, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn read_records(path: &Path) -> BTreeMap<String, BackendRecord> {
        match fs::read_to_string(path).await {
            Ok(text) => format::decode(&text, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Ledger {} does not exist yet", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read ledger {} ({}). Will attempt to recreate.",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        }
    }

    /// Get the entry for `name` in family `A`
    ///
    /// Returns `(none, false)` for unknown updaters and missing entries.
    pub async fn get<A: FamilyAddress>(&self, name: &str) -> LedgerEntry<A> {
        let records = self.records.lock().await;
        records
            .get(name)
            .and_then(|record| *A::slot(record))
            .unwrap_or(LedgerEntry::unknown())
    }

    /// Commit `(address, true)`: the address is confirmed published
    ///
    /// # Errors
    ///
    /// [`Error::Ledger`] if the ledger file could not be written.
    pub async fn set<A: FamilyAddress>(&self, name: &str, address: Option<A>) -> Result<()> {
        self.commit(
            name,
            LedgerEntry {
                address,
                current: true,
            },
        )
        .await
    }

    /// Commit `(address, false)`: the remote state is no longer known
    ///
    /// Call this before attempting to publish `address`.
    ///
    /// # Errors
    ///
    /// [`Error::Ledger`] if the ledger file could not be written.
    pub async fn invalidate<A: FamilyAddress>(
        &self,
        name: &str,
        address: Option<A>,
    ) -> Result<()> {
        self.commit(
            name,
            LedgerEntry {
                address,
                current: false,
            },
        )
        .await
    }

    /// Whether `desired` must be published for `name`
    ///
    /// True if the entry is not current, or if the stored address differs
    /// from `desired`. An unchanged address still needs publishing when the
    /// previous attempt was never confirmed.
    pub async fn needs_update<A: FamilyAddress>(&self, name: &str, desired: Option<A>) -> bool {
        let entry = self.get::<A>(name).await;
        !entry.current || entry.address != desired
    }

    /// Names of all updaters with a ledger record
    pub async fn backends(&self) -> Vec<String> {
        self.records.lock().await.keys().cloned().collect()
    }

    async fn commit<A: FamilyAddress>(&self, name: &str, entry: LedgerEntry<A>) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut record = records.get(name).cloned().unwrap_or_default();
        *A::slot_mut(&mut record) = Some(entry);

        tracing::trace!(
            "Ledger {} {} -> ({:?}, {})",
            name,
            A::FAMILY,
            entry.address.map(|a| a.to_string()),
            entry.current
        );

        // Written under the lock so concurrent engines never interleave
        // writes to the temp file
        let previous = records.insert(name.to_string(), record);
        if let Err(e) = self.write(&records).await {
            // Memory never holds what the file does not
            match previous {
                Some(previous) => records.insert(name.to_string(), previous),
                None => records.remove(name),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Write all records to disk atomically
    async fn write(&self, records: &BTreeMap<String, BackendRecord>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = format::encode(records)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::ledger(format!(
                    "Failed to create ledger directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let temp_path = Self::temp_path(path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::ledger(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::ledger(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::ledger(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        fs::rename(&temp_path, path).await.map_err(|e| {
            Error::ledger(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::trace!("Ledger written to {}", path.display());
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn v4(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn v6(s: &str) -> Ipv6Prefix {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_missing_entries_are_unknown() {
        let ledger = AddressLedger::in_memory();

        assert_eq!(ledger.get::<Ipv4Addr>("nobody").await, LedgerEntry::unknown());
        assert_eq!(ledger.get::<Ipv6Prefix>("nobody").await, LedgerEntry::unknown());

        // A record for one family leaves the other unknown
        ledger.set("a", Some(v4("1.2.3.4"))).await.unwrap();
        assert_eq!(ledger.get::<Ipv6Prefix>("a").await, LedgerEntry::unknown());
    }

    #[tokio::test]
    async fn test_set_and_invalidate() {
        let ledger = AddressLedger::in_memory();

        ledger.set("a", Some(v4("1.2.3.4"))).await.unwrap();
        assert_eq!(
            ledger.get::<Ipv4Addr>("a").await,
            LedgerEntry {
                address: Some(v4("1.2.3.4")),
                current: true
            }
        );

        ledger.invalidate("a", Some(v4("5.6.7.8"))).await.unwrap();
        assert_eq!(
            ledger.get::<Ipv4Addr>("a").await,
            LedgerEntry {
                address: Some(v4("5.6.7.8")),
                current: false
            }
        );

        ledger.set("a", Some(v6("2001:db8::/64"))).await.unwrap();
        assert_eq!(
            ledger.get::<Ipv6Prefix>("a").await,
            LedgerEntry {
                address: Some(v6("2001:db8::/64")),
                current: true
            }
        );
        // IPv4 untouched by IPv6 commits
        assert!(!ledger.get::<Ipv4Addr>("a").await.current);
    }

    #[tokio::test]
    async fn test_needs_update() {
        let ledger = AddressLedger::in_memory();
        let a = v4("1.2.3.4");
        let b = v4("5.6.7.8");

        // Unknown
        assert!(ledger.needs_update("x", Some(a)).await);
        assert!(ledger.needs_update::<Ipv4Addr>("x", None).await);

        // Current and equal
        ledger.set("x", Some(a)).await.unwrap();
        assert!(!ledger.needs_update("x", Some(a)).await);
        assert!(ledger.needs_update("x", Some(b)).await);
        assert!(ledger.needs_update::<Ipv4Addr>("x", None).await);

        // Equal but not current
        ledger.invalidate("x", Some(a)).await.unwrap();
        assert!(ledger.needs_update("x", Some(a)).await);

        // Intentionally no address
        ledger.set::<Ipv4Addr>("x", None).await.unwrap();
        assert!(!ledger.needs_update::<Ipv4Addr>("x", None).await);
        assert!(ledger.needs_update("x", Some(a)).await);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("addrfile");

        let ledger = AddressLedger::load(&path).await;
        ledger.set("a", Some(v4("1.2.3.4"))).await.unwrap();
        ledger.invalidate("a", Some(v6("2001:db8:1::/48"))).await.unwrap();
        ledger.set::<Ipv4Addr>("b", None).await.unwrap();
        ledger.invalidate("c", Some(v4("9.9.9.9"))).await.unwrap();
        assert!(path.exists());

        let reloaded = AddressLedger::load(&path).await;
        for name in ["a", "b", "c", "d"] {
            assert_eq!(
                reloaded.get::<Ipv4Addr>(name).await,
                ledger.get::<Ipv4Addr>(name).await,
                "IPv4 mismatch for {}",
                name
            );
            assert_eq!(
                reloaded.get::<Ipv6Prefix>(name).await,
                ledger.get::<Ipv6Prefix>(name).await,
                "IPv6 mismatch for {}",
                name
            );
        }

        let mut names = reloaded.backends().await;
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let ledger = AddressLedger::load(dir.path().join("nothing-here")).await;
        assert!(ledger.backends().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupted_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("addrfile");
        fs::write(&path, b"{ corrupted").await.unwrap();

        let ledger = AddressLedger::load(&path).await;
        assert!(ledger.backends().await.is_empty());

        // Recreated on the next write
        ledger.set("a", Some(v4("1.2.3.4"))).await.unwrap();
        let reloaded = AddressLedger::load(&path).await;
        assert!(reloaded.get::<Ipv4Addr>("a").await.current);
    }

    #[tokio::test]
    async fn test_load_keeps_valid_siblings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("addrfile");
        fs::write(
            &path,
            br#"{
                "good": {"ipv4": ["1.2.3.4", true]},
                "bad": {"ipv4": ["not-an-address", true]}
            }"#,
        )
        .await
        .unwrap();

        let ledger = AddressLedger::load(&path).await;
        assert_eq!(
            ledger.get::<Ipv4Addr>("good").await,
            LedgerEntry {
                address: Some(v4("1.2.3.4")),
                current: true
            }
        );
        assert_eq!(ledger.get::<Ipv4Addr>("bad").await, LedgerEntry::unknown());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").await.unwrap();

        let ledger = AddressLedger::load(blocker.join("addrfile")).await;
        let result = ledger.set("a", Some(v4("1.2.3.4"))).await;
        assert!(matches!(result, Err(Error::Ledger(_))));

        let result = ledger.invalidate("a", Some(v4("1.2.3.4"))).await;
        assert!(matches!(result, Err(Error::Ledger(_))));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_entries_unchanged() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let ledger = AddressLedger::load(state_dir.join("addrfile")).await;
        ledger.invalidate("a", Some(v4("1.2.3.4"))).await.unwrap();

        fs::remove_dir_all(&state_dir).await.unwrap();
        fs::write(&state_dir, b"file").await.unwrap();

        assert!(ledger.set("a", Some(v4("5.6.7.8"))).await.is_err());
        assert_eq!(
            ledger.get::<Ipv4Addr>("a").await,
            LedgerEntry {
                address: Some(v4("1.2.3.4")),
                current: false
            }
        );

        assert!(ledger.set("b", Some(v4("5.6.7.8"))).await.is_err());
        assert_eq!(ledger.get::<Ipv4Addr>("b").await, LedgerEntry::unknown());
        assert_eq!(ledger.backends().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_rapid_writes_are_consistent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("addrfile");
        let ledger = AddressLedger::load(&path).await;

        for i in 0..10u8 {
            ledger.set("a", Some(Ipv4Addr::new(1, 2, 3, i))).await.unwrap();
        }

        let reloaded = AddressLedger::load(&path).await;
        assert_eq!(
            reloaded.get::<Ipv4Addr>("a").await.address,
            Some(Ipv4Addr::new(1, 2, 3, 9))
        );
        assert!(!AddressLedger::temp_path(&path).exists());
    }
}
