//! LMDB-backed local store.
//!
//! One LMDB environment (`<name>.lmdb` directory) holds one named database per record
//! schema plus a string-keyed `settings` database. Record keys are big-endian `u64`
//! ids, so cursor order is id order and the last key is the highest id.
//!
//! All mutations go through [`LocalStore::write`], which runs a closure inside a single
//! read-write transaction: the transaction commits when the closure returns `Ok` and is
//! aborted otherwise, so a failed write never leaves partial rows behind. LMDB allows a
//! single writer at a time, which is the only serialization the merge engine relies on.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use lmdb::{
    Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, RoTransaction,
    RwTransaction, Transaction, WriteFlags,
};
use lmdb_sys::MDB_LAST;
use log::{debug, error, info, warn};
use serde_json::Value as JsonValue;

use crate::app_response::AppResponse;
use crate::config::SyncConfig;
use crate::local_db_model::{Record, RECORD_SCHEMAS, SETTINGS};

const MAX_DATABASES: u32 = 16;

struct StoreHandle {
    env: Environment,
    databases: HashMap<&'static str, Database>,
}

impl StoreHandle {
    fn database(&self, schema: &str) -> Result<Database, AppResponse> {
        self.databases
            .get(schema)
            .copied()
            .ok_or_else(|| AppResponse::NotFound(format!("Schema '{schema}' not found")))
    }
}

pub struct LocalStore {
    name: String,
    map_size: usize,
    handle: RwLock<Option<StoreHandle>>,
}

impl LocalStore {
    /// Opens (or creates) the store at `<name>.lmdb`.
    pub fn init(name: String, config: &SyncConfig) -> Result<Self, AppResponse> {
        let map_size = config.map_size_bytes();
        let handle = open_environment(&name, map_size)?;
        info!("Local store opened at {name}.lmdb");

        Ok(LocalStore {
            name,
            map_size,
            handle: RwLock::new(Some(handle)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.handle
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Flushes and closes the environment. Later calls fail with "not connected"
    /// until [`LocalStore::reconnect`] is called.
    pub fn close_database(&self) -> Result<(), AppResponse> {
        let mut guard = self
            .handle
            .write()
            .map_err(|_| AppResponse::DatabaseError("Store lock poisoned".to_string()))?;

        if let Some(handle) = guard.take() {
            if let Err(e) = handle.env.sync(true) {
                warn!("Failed to flush store {} before closing: {e}", self.name);
            }
            info!("Local store {} closed", self.name);
        }
        Ok(())
    }

    pub fn reconnect(&self) -> Result<(), AppResponse> {
        let mut guard = self
            .handle
            .write()
            .map_err(|_| AppResponse::DatabaseError("Store lock poisoned".to_string()))?;

        if guard.is_none() {
            *guard = Some(open_environment(&self.name, self.map_size)?);
            info!("Local store {} reconnected", self.name);
        }
        Ok(())
    }

    /// Removes every row of every schema, settings included.
    pub fn reset_database(&self) -> Result<(), AppResponse> {
        self.write(|txn| {
            for schema in RECORD_SCHEMAS {
                txn.clear_schema(schema)?;
            }
            txn.clear_schema(SETTINGS)
        })?;
        info!("Local store {} reset", self.name);
        Ok(())
    }

    /// Polls the connection state until it is up or `timeout` has passed.
    pub async fn wait_for_connection(
        &self,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), AppResponse> {
        let started = Instant::now();
        while !self.is_connected() {
            if started.elapsed() >= timeout {
                error!(
                    "❌ Store {} still not connected after {} ms",
                    self.name,
                    timeout.as_millis()
                );
                return Err(AppResponse::DatabaseError(format!(
                    "Timed out after {} ms waiting for the database connection",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }

    /// Runs `f` inside one read-write transaction.
    pub fn write<T, F>(&self, f: F) -> Result<T, AppResponse>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T, AppResponse>,
    {
        let guard = self.read_guard()?;
        let handle = guard.as_ref().ok_or_else(AppResponse::not_connected)?;
        let txn = handle.env.begin_rw_txn()?;
        let mut write = WriteTxn { txn, handle };

        match f(&mut write) {
            Ok(value) => {
                write.txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!("Aborting write transaction on {}: {e}", self.name);
                write.txn.abort();
                Err(e)
            }
        }
    }

    /// Runs `f` against one consistent read-only snapshot.
    pub fn read<T, F>(&self, f: F) -> Result<T, AppResponse>
    where
        F: FnOnce(&ReadTxn<'_>) -> Result<T, AppResponse>,
    {
        let guard = self.read_guard()?;
        let handle = guard.as_ref().ok_or_else(AppResponse::not_connected)?;
        let txn = handle.env.begin_ro_txn()?;
        let read = ReadTxn { txn, handle };
        f(&read)
    }

    pub fn get<S: Record>(&self, id: u64) -> Result<Option<S>, AppResponse> {
        self.read(|txn| txn.get(id))
    }

    /// All rows of a schema in id order.
    pub fn all<S: Record>(&self) -> Result<Vec<S>, AppResponse> {
        self.read(|txn| txn.all())
    }

    pub fn filter<S, P>(&self, predicate: P) -> Result<Vec<S>, AppResponse>
    where
        S: Record,
        P: Fn(&S) -> bool,
    {
        Ok(self.all::<S>()?.into_iter().filter(|it| predicate(it)).collect())
    }

    pub fn count<S: Record>(&self) -> Result<usize, AppResponse> {
        Ok(self.all::<S>()?.len())
    }

    /// Next free primary key of a schema: highest existing id + 1, or 1 when empty.
    pub fn next_id<S: Record>(&self) -> Result<u64, AppResponse> {
        self.read(|txn| txn.next_id::<S>())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, AppResponse> {
        self.read(|txn| txn.get_setting(key))
    }

    pub fn put_setting(&self, key: &str, value: &JsonValue) -> Result<(), AppResponse> {
        self.write(|txn| txn.put_setting(key, value))
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, Option<StoreHandle>>, AppResponse> {
        self.handle
            .read()
            .map_err(|_| AppResponse::DatabaseError("Store lock poisoned".to_string()))
    }
}

pub struct ReadTxn<'t> {
    txn: RoTransaction<'t>,
    handle: &'t StoreHandle,
}

impl<'t> ReadTxn<'t> {
    pub fn get<S: Record>(&self, id: u64) -> Result<Option<S>, AppResponse> {
        get_record(&self.txn, self.handle.database(S::SCHEMA)?, id)
    }

    pub fn all<S: Record>(&self) -> Result<Vec<S>, AppResponse> {
        all_records(&self.txn, self.handle.database(S::SCHEMA)?)
    }

    pub fn next_id<S: Record>(&self) -> Result<u64, AppResponse> {
        next_record_id(&self.txn, self.handle.database(S::SCHEMA)?)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, AppResponse> {
        get_setting(&self.txn, self.handle.database(SETTINGS)?, key)
    }
}

pub struct WriteTxn<'t> {
    txn: RwTransaction<'t>,
    handle: &'t StoreHandle,
}

impl<'t> WriteTxn<'t> {
    /// Inserts a new row. Fails if a row with the same id already exists.
    pub fn create<S: Record>(&mut self, record: &S) -> Result<(), AppResponse> {
        let db = self.handle.database(S::SCHEMA)?;
        let bytes = serde_json::to_vec(record)?;

        match self
            .txn
            .put(db, &id_key(record.id()), &bytes, WriteFlags::NO_OVERWRITE)
        {
            Ok(()) => Ok(()),
            Err(lmdb::Error::KeyExist) => Err(AppResponse::ValidationError(format!(
                "{} with id {} already exists",
                S::SCHEMA,
                record.id()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Inserts or overwrites a row.
    pub fn save<S: Record>(&mut self, record: &S) -> Result<(), AppResponse> {
        let db = self.handle.database(S::SCHEMA)?;
        let bytes = serde_json::to_vec(record)?;
        self.txn
            .put(db, &id_key(record.id()), &bytes, WriteFlags::empty())?;
        Ok(())
    }

    pub fn get<S: Record>(&self, id: u64) -> Result<Option<S>, AppResponse> {
        get_record(&self.txn, self.handle.database(S::SCHEMA)?, id)
    }

    pub fn all<S: Record>(&self) -> Result<Vec<S>, AppResponse> {
        all_records(&self.txn, self.handle.database(S::SCHEMA)?)
    }

    pub fn filter<S, P>(&self, predicate: P) -> Result<Vec<S>, AppResponse>
    where
        S: Record,
        P: Fn(&S) -> bool,
    {
        Ok(self.all::<S>()?.into_iter().filter(|it| predicate(it)).collect())
    }

    pub fn next_id<S: Record>(&self) -> Result<u64, AppResponse> {
        next_record_id(&self.txn, self.handle.database(S::SCHEMA)?)
    }

    /// Returns whether a row was actually removed.
    pub fn delete<S: Record>(&mut self, id: u64) -> Result<bool, AppResponse> {
        let db = self.handle.database(S::SCHEMA)?;
        match self.txn.del(db, &id_key(id), None) {
            Ok(()) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear_schema(&mut self, schema: &str) -> Result<(), AppResponse> {
        let db = self.handle.database(schema)?;
        self.txn.clear_db(db)?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, AppResponse> {
        get_setting(&self.txn, self.handle.database(SETTINGS)?, key)
    }

    pub fn put_setting(&mut self, key: &str, value: &JsonValue) -> Result<(), AppResponse> {
        if key.is_empty() {
            return Err(AppResponse::BadRequest("Setting key cannot be empty".to_string()));
        }
        let db = self.handle.database(SETTINGS)?;
        let bytes = serde_json::to_vec(value)?;
        self.txn.put(db, &key, &bytes, WriteFlags::empty())?;
        Ok(())
    }
}

fn open_environment(name: &str, map_size: usize) -> Result<StoreHandle, AppResponse> {
    let dir = format!("{name}.lmdb");
    std::fs::create_dir_all(&dir)
        .map_err(|e| AppResponse::DatabaseError(format!("Cannot create directory {dir}: {e}")))?;

    let env = Environment::new()
        .set_flags(EnvironmentFlags::NO_TLS)
        .set_max_dbs(MAX_DATABASES)
        .set_map_size(map_size)
        .open(Path::new(&dir))?;

    let mut databases = HashMap::new();
    for schema in RECORD_SCHEMAS.into_iter().chain([SETTINGS]) {
        let db = env.create_db(Some(schema), DatabaseFlags::empty())?;
        databases.insert(schema, db);
    }

    Ok(StoreHandle { env, databases })
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_id(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn get_record<S: Record, T: Transaction>(
    txn: &T,
    db: Database,
    id: u64,
) -> Result<Option<S>, AppResponse> {
    match txn.get(db, &id_key(id)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn all_records<S: Record, T: Transaction>(txn: &T, db: Database) -> Result<Vec<S>, AppResponse> {
    let mut cursor = txn.open_ro_cursor(db)?;
    let mut records: Vec<S> = Vec::new();
    for (_key, value) in cursor.iter() {
        records.push(serde_json::from_slice(value)?);
    }
    Ok(records)
}

fn next_record_id<T: Transaction>(txn: &T, db: Database) -> Result<u64, AppResponse> {
    let cursor = txn.open_ro_cursor(db)?;
    match cursor.get(None, None, MDB_LAST) {
        Ok((key, _)) => Ok(key.and_then(decode_id).map_or(1, |id| id + 1)),
        Err(lmdb::Error::NotFound) => Ok(1),
        Err(e) => Err(e.into()),
    }
}

fn get_setting<T: Transaction>(
    txn: &T,
    db: Database,
    key: &str,
) -> Result<Option<JsonValue>, AppResponse> {
    if key.is_empty() {
        return Ok(None);
    }
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
