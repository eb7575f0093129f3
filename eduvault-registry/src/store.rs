//! SQLite-backed issuer baseline store

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use eduvault_core::PerceptualHash;

use crate::UNKNOWN_PREFIX;

static UNKNOWN_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^unknown_(\d+)$").unwrap());

/// Errors from the registry storage layer
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("issuer {issuer_id} has a malformed stored hash {value:?}")]
    CorruptHash { issuer_id: String, value: String },

    #[error("placeholder ids exhausted after {last}")]
    UnknownIdsExhausted { last: String },
}

/// One stored baseline row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerRecord {
    pub issuer_id: String,
    pub issuer_name: String,
    pub phash: PerceptualHash,
}

/// A stored template returned by prefix lookup
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineTemplate {
    pub issuer_id: String,
    pub phash: PerceptualHash,
}

/// Persistent issuer baseline registry
pub struct IssuerRegistry {
    conn: Mutex<Connection>,
}

impl IssuerRegistry {
    /// Open (creating if needed) the registry file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let registry = Self::with_connection(Connection::open(path)?)?;
        debug!("Opened issuer registry at {}", path.display());
        Ok(registry)
    }

    /// Volatile registry, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RegistryError> {
        let registry = Self {
            conn: Mutex::new(conn),
        };
        registry.init()?;
        Ok(registry)
    }

    /// Create the baseline table if it does not exist
    pub fn init(&self) -> Result<(), RegistryError> {
        self.conn.lock().execute(
            "CREATE TABLE IF NOT EXISTS issuer_phash (
                issuer_id TEXT PRIMARY KEY,
                issuer_name TEXT,
                phash TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Every template whose id starts with `issuer_prefix`, in storage order
    pub fn lookup_all(&self, issuer_prefix: &str) -> Result<Vec<BaselineTemplate>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT issuer_id, phash FROM issuer_phash
             WHERE substr(issuer_id, 1, length(?1)) = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![issuer_prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let templates = rows
            .into_iter()
            .map(|(issuer_id, hex)| {
                let phash = parse_stored(&issuer_id, &hex)?;
                Ok(BaselineTemplate { issuer_id, phash })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        debug!("Registry lookup {:?}: {} template(s)", issuer_prefix, templates.len());
        Ok(templates)
    }

    /// Fetch one row by exact id
    pub fn get(&self, issuer_id: &str) -> Result<Option<IssuerRecord>, RegistryError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT issuer_id, issuer_name, phash FROM issuer_phash WHERE issuer_id = ?1",
                params![issuer_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, hex)| to_record(id, name, hex)).transpose()
    }

    /// Idempotent upsert keyed by issuer id; an existing row is replaced wholesale
    pub fn insert_or_replace(
        &self,
        issuer_id: &str,
        issuer_name: &str,
        phash: PerceptualHash,
    ) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        upsert(&conn, issuer_id, issuer_name, phash)?;
        info!("Stored baseline {} ({}) = {}", issuer_id, issuer_name, phash);
        Ok(())
    }

    /// `unknown_<max+1>` over the stored placeholder ids, `unknown_1` when none exist
    pub fn next_unknown_id(&self) -> Result<String, RegistryError> {
        let conn = self.conn.lock();
        next_unknown_id(&conn)
    }

    /// Allocate a placeholder id and store its baseline under one lock
    pub fn allocate_unknown(
        &self,
        issuer_name: &str,
        phash: PerceptualHash,
    ) -> Result<String, RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let issuer_id = next_unknown_id(&tx)?;
        upsert(&tx, &issuer_id, issuer_name, phash)?;
        tx.commit()?;
        info!("Allocated placeholder issuer {} = {}", issuer_id, phash);
        Ok(issuer_id)
    }

    /// Every stored row, in storage order
    pub fn list(&self) -> Result<Vec<IssuerRecord>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT issuer_id, issuer_name, phash FROM issuer_phash ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, hex)| to_record(id, name, hex))
            .collect()
    }

    /// Delete one row; returns whether it existed
    pub fn remove(&self, issuer_id: &str) -> Result<bool, RegistryError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM issuer_phash WHERE issuer_id = ?1", params![issuer_id])?;
        if removed > 0 {
            info!("Removed issuer {}", issuer_id);
        }
        Ok(removed > 0)
    }

    /// Delete every placeholder row in one transaction; returns how many were removed
    pub fn purge_unknown(&self) -> Result<usize, RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for (id, _) in unknown_ids(&tx)? {
            removed += tx.execute("DELETE FROM issuer_phash WHERE issuer_id = ?1", params![id])?;
        }
        tx.commit()?;
        info!("Purged {} placeholder issuer(s)", removed);
        Ok(removed)
    }

    /// Upsert a batch of baselines in one transaction
    pub fn seed(&self, records: &[IssuerRecord]) -> Result<usize, RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for record in records {
            upsert(&tx, &record.issuer_id, &record.issuer_name, record.phash)?;
        }
        tx.commit()?;
        info!("Seeded {} baseline(s)", records.len());
        Ok(records.len())
    }
}

fn upsert(
    conn: &Connection,
    issuer_id: &str,
    issuer_name: &str,
    phash: PerceptualHash,
) -> Result<(), RegistryError> {
    conn.execute(
        "INSERT OR REPLACE INTO issuer_phash (issuer_id, issuer_name, phash) VALUES (?1, ?2, ?3)",
        params![issuer_id, issuer_name, phash.to_hex()],
    )?;
    Ok(())
}

/// Placeholder ids with their sequence numbers
fn unknown_ids(conn: &Connection) -> Result<Vec<(String, u64)>, RegistryError> {
    let mut stmt = conn.prepare(
        "SELECT issuer_id FROM issuer_phash WHERE substr(issuer_id, 1, length(?1)) = ?1",
    )?;
    let ids = stmt
        .query_map(params![UNKNOWN_PREFIX], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ids
        .into_iter()
        .filter_map(|id| {
            let n = UNKNOWN_ID_REGEX
                .captures(&id)
                .and_then(|caps| caps[1].parse::<u64>().ok())?;
            Some((id, n))
        })
        .collect())
}

fn next_unknown_id(conn: &Connection) -> Result<String, RegistryError> {
    let next = match unknown_ids(conn)?.into_iter().map(|(_, n)| n).max() {
        None => 1,
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| RegistryError::UnknownIdsExhausted {
                last: format!("{UNKNOWN_PREFIX}{max}"),
            })?,
    };
    Ok(format!("{UNKNOWN_PREFIX}{next}"))
}

fn parse_stored(issuer_id: &str, hex: &str) -> Result<PerceptualHash, RegistryError> {
    PerceptualHash::from_hex(hex).map_err(|_| RegistryError::CorruptHash {
        issuer_id: issuer_id.to_string(),
        value: hex.to_string(),
    })
}

fn to_record(
    issuer_id: String,
    issuer_name: Option<String>,
    hex: String,
) -> Result<IssuerRecord, RegistryError> {
    let phash = parse_stored(&issuer_id, &hex)?;
    Ok(IssuerRecord {
        issuer_name: issuer_name.unwrap_or_default(),
        issuer_id,
        phash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin_baselines;

    fn hash(bits: u64) -> PerceptualHash {
        PerceptualHash::from_bits(bits)
    }

    #[test]
    fn test_lookup_all_matches_prefix_in_storage_order() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        registry.insert_or_replace("unstop", "Unstop", hash(1)).unwrap();
        registry.insert_or_replace("udemy", "Udemy", hash(2)).unwrap();
        registry.insert_or_replace("unstop_t2", "Unstop", hash(3)).unwrap();

        let templates = registry.lookup_all("unstop").unwrap();
        let ids: Vec<_> = templates.iter().map(|t| t.issuer_id.as_str()).collect();
        assert_eq!(ids, vec!["unstop", "unstop_t2"]);
        assert_eq!(templates[1].phash, hash(3));
    }

    #[test]
    fn test_prefix_is_literal_not_a_pattern() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        registry.insert_or_replace("ciscoXccna", "Imposter", hash(1)).unwrap();
        registry.insert_or_replace("cisco_ccna", "Cisco", hash(2)).unwrap();

        let templates = registry.lookup_all("cisco_ccna").unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].issuer_id, "cisco_ccna");
    }

    #[test]
    fn test_insert_or_replace_is_idempotent() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        registry.insert_or_replace("nptel", "NPTEL", hash(7)).unwrap();
        registry.insert_or_replace("nptel", "NPTEL", hash(7)).unwrap();
        registry.insert_or_replace("nptel", "NPTEL v2", hash(9)).unwrap();

        let rows = registry.list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].issuer_name, "NPTEL v2");
        assert_eq!(rows[0].phash, hash(9));
    }

    #[test]
    fn test_next_unknown_starts_at_one() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        assert_eq!(registry.next_unknown_id().unwrap(), "unknown_1");
    }

    #[test]
    fn test_next_unknown_uses_max_not_count() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        registry.insert_or_replace("unknown_1", "Unknown Issuer", hash(1)).unwrap();
        registry.insert_or_replace("unknown_3", "Unknown Issuer", hash(3)).unwrap();
        registry.insert_or_replace("unknown_notes", "Unknown Issuer", hash(4)).unwrap();
        registry.insert_or_replace("unknown", "Unknown Issuer", hash(5)).unwrap();

        assert_eq!(registry.next_unknown_id().unwrap(), "unknown_4");
    }

    #[test]
    fn test_exhausted_unknown_ids_are_an_error() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        let last = format!("unknown_{}", u64::MAX);
        registry.insert_or_replace(&last, "Unknown Issuer", hash(1)).unwrap();

        let err = registry.next_unknown_id().unwrap_err();
        assert!(matches!(err, RegistryError::UnknownIdsExhausted { .. }));

        let err = registry.allocate_unknown("Unknown Issuer", hash(2)).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownIdsExhausted { .. }));
        assert_eq!(registry.list().unwrap().len(), 1);
        assert_eq!(registry.get(&last).unwrap().unwrap().phash, hash(1));
    }

    #[test]
    fn test_allocate_unknown_advances() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        let first = registry.allocate_unknown("Unknown Issuer", hash(10)).unwrap();
        let second = registry.allocate_unknown("Unknown Issuer", hash(11)).unwrap();

        assert_eq!(first, "unknown_1");
        assert_eq!(second, "unknown_2");
        assert_eq!(registry.get("unknown_2").unwrap().unwrap().phash, hash(11));
    }

    #[test]
    fn test_purge_unknown_keeps_known_issuers() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        registry.seed(&builtin_baselines()).unwrap();
        registry.allocate_unknown("Unknown Issuer", hash(1)).unwrap();
        registry.allocate_unknown("Unknown Issuer", hash(2)).unwrap();

        assert_eq!(registry.purge_unknown().unwrap(), 2);
        assert_eq!(registry.list().unwrap().len(), 7);
        assert_eq!(registry.purge_unknown().unwrap(), 0);
        assert_eq!(registry.next_unknown_id().unwrap(), "unknown_1");
    }

    #[test]
    fn test_remove_reports_presence() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        registry.insert_or_replace("udemy", "Udemy", hash(1)).unwrap();
        assert!(registry.remove("udemy").unwrap());
        assert!(!registry.remove("udemy").unwrap());
        assert!(registry.get("udemy").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_hash_surfaces() {
        let registry = IssuerRegistry::open_in_memory().unwrap();
        registry
            .conn
            .lock()
            .execute(
                "INSERT INTO issuer_phash VALUES ('broken', 'Broken', 'xyz')",
                [],
            )
            .unwrap();

        let err = registry.lookup_all("broken").unwrap_err();
        assert!(matches!(err, RegistryError::CorruptHash { .. }));
    }

    #[test]
    fn test_file_registry_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("issuer_phash.db");

        {
            let registry = IssuerRegistry::open(&path).unwrap();
            registry.seed(&builtin_baselines()).unwrap();
        }

        let registry = IssuerRegistry::open(&path).unwrap();
        let microsoft = registry.get("microsoft").unwrap().unwrap();
        assert_eq!(microsoft.issuer_name, "Microsoft");
        assert_eq!(microsoft.phash.to_hex(), "ecc19b8f318ec6c1");
    }
}
