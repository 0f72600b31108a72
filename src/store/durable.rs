//! ACID-durable atom database backed by redb.
//!
//! This is the reference database layer the binary uses: it supplies atoms
//! to a run and persists the final values afterwards. Atoms are stored as
//! bincode-encoded [`AtomRecord`]s keyed by index; a small metadata table
//! holds run summaries.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};

use crate::atom::{AtomRecord, AtomStore, MemAtomStore};
use crate::error::StoreError;
use crate::store::StoreResult;

const ATOM_TABLE: TableDefinition<u32, &[u8]> = TableDefinition::new("atoms");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

fn durable(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Durable {
        message: format!("{context}: {e}"),
    }
}

/// Persistent atom values and run metadata.
pub struct AtomDatabase {
    db: Arc<Database>,
}

impl AtomDatabase {
    /// Open or create the database in `data_dir`.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| durable(&format!("create {}", data_dir.display()), e))?;
        let db_path = data_dir.join("atoms.redb");
        let db = Database::create(&db_path)
            .map_err(|e| durable(&format!("failed to open redb at {}", db_path.display()), e))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Replace every stored atom with the contents of `atoms`.
    pub fn save_atoms(&self, atoms: &MemAtomStore) -> StoreResult<usize> {
        let records = atoms.records();
        let txn = self
            .db
            .begin_write()
            .map_err(|e| durable("begin_write failed", e))?;
        txn.delete_table(ATOM_TABLE)
            .map_err(|e| durable("delete_table failed", e))?;
        {
            let mut table = txn
                .open_table(ATOM_TABLE)
                .map_err(|e| durable("open_table failed", e))?;
            for (index, record) in records.iter().enumerate() {
                let bytes =
                    bincode::serialize(record).map_err(|e| durable("encode atom failed", e))?;
                table
                    .insert(index as u32, bytes.as_slice())
                    .map_err(|e| durable("insert failed", e))?;
            }
        }
        txn.commit().map_err(|e| durable("commit failed", e))?;
        tracing::debug!(atoms = records.len(), "saved atom values");
        Ok(records.len())
    }

    /// Load every stored atom, in index order. An empty database yields an
    /// empty store.
    pub fn load_atoms(&self) -> StoreResult<MemAtomStore> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| durable("begin_read failed", e))?;
        let table = match txn.open_table(ATOM_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(MemAtomStore::new()),
            Err(e) => return Err(durable("open_table failed", e)),
        };
        let len = table.len().map_err(|e| durable("len failed", e))? as usize;
        let mut atoms = MemAtomStore::with_capacity(len);
        for entry in table.iter().map_err(|e| durable("iter failed", e))? {
            let (key, value) = entry.map_err(|e| durable("read failed", e))?;
            let index = key.value();
            if index as usize != atoms.len() {
                return Err(StoreError::Durable {
                    message: format!("atom table has a gap before index {index}"),
                });
            }
            let record: AtomRecord = bincode::deserialize(value.value())
                .map_err(|e| durable(&format!("decode atom {index} failed"), e))?;
            atoms.push_record(record)?;
        }
        Ok(atoms)
    }

    pub fn put_meta(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| durable("begin_write failed", e))?;
        {
            let mut table = txn
                .open_table(META_TABLE)
                .map_err(|e| durable("open_table failed", e))?;
            table
                .insert(key, value)
                .map_err(|e| durable("insert failed", e))?;
        }
        txn.commit().map_err(|e| durable("commit failed", e))
    }

    pub fn get_meta(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| durable("begin_read failed", e))?;
        let table = match txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(durable("open_table failed", e)),
        };
        let result = table.get(key).map_err(|e| durable("get failed", e))?;
        Ok(result.map(|guard| guard.value().to_vec()))
    }
}

impl std::fmt::Debug for AtomDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomDatabase").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomId;
    use tempfile::TempDir;

    #[test]
    fn atoms_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let mut atoms = MemAtomStore::new();
        atoms.add_observed(1.0).unwrap();
        let x = atoms.add_variable(0.25).unwrap();
        atoms.set_value(x, 0.75).unwrap();
        {
            let db = AtomDatabase::open(dir.path()).unwrap();
            assert_eq!(db.save_atoms(&atoms).unwrap(), 2);
        }
        let db = AtomDatabase::open(dir.path()).unwrap();
        let loaded = db.load_atoms().unwrap();
        assert_eq!(loaded.records(), atoms.records());
        assert!(loaded.is_fixed(AtomId::new(0)).unwrap());
    }

    #[test]
    fn save_replaces_previous_atoms() {
        let dir = TempDir::new().unwrap();
        let db = AtomDatabase::open(dir.path()).unwrap();
        let mut big = MemAtomStore::new();
        for _ in 0..5 {
            big.add_variable(0.1).unwrap();
        }
        db.save_atoms(&big).unwrap();
        let mut small = MemAtomStore::new();
        small.add_variable(0.9).unwrap();
        db.save_atoms(&small).unwrap();
        assert_eq!(db.load_atoms().unwrap().values(), &[0.9]);
    }

    #[test]
    fn empty_database_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let db = AtomDatabase::open(dir.path()).unwrap();
        assert!(db.load_atoms().unwrap().is_empty());
        assert_eq!(db.get_meta("last_run").unwrap(), None);
    }

    #[test]
    fn meta_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = AtomDatabase::open(dir.path()).unwrap();
        db.put_meta("last_run", b"{\"iterations\":3}").unwrap();
        assert_eq!(
            db.get_meta("last_run").unwrap(),
            Some(b"{\"iterations\":3}".to_vec())
        );
    }
}
