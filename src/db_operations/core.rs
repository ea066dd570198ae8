use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;

use crate::config::CmsConfig;
use crate::error::{CmsError, CmsResult};
use crate::queue::Job;
use crate::record::Record;

/// Result type inside a record transaction closure.
pub type TxResult<T> = Result<T, ConflictableTransactionError<CmsError>>;

/// Unified access to the sled database backing the CMS.
#[derive(Clone)]
pub struct DbOperations {
    /// The underlying sled database instance
    db: sled::Db,
    /// Cached trees
    pub(crate) records_tree: sled::Tree,
    pub(crate) manifests_tree: sled::Tree,
    pub(crate) unique_tree: sled::Tree,
    pub(crate) jobs_tree: sled::Tree,
}

impl DbOperations {
    /// Creates a DbOperations instance with all required trees
    pub fn new(db: sled::Db) -> Result<Self, sled::Error> {
        let records_tree = db.open_tree("records")?;
        let manifests_tree = db.open_tree("manifests")?;
        let unique_tree = db.open_tree("unique_index")?;
        let jobs_tree = db.open_tree("jobs")?;

        Ok(Self {
            db,
            records_tree,
            manifests_tree,
            unique_tree,
            jobs_tree,
        })
    }

    /// Opens the database described by `config`.
    pub fn open(config: &CmsConfig) -> CmsResult<Self> {
        let db = sled::Config::new()
            .path(&config.storage_path)
            .temporary(config.temporary)
            .open()?;
        debug!(
            "Opened sled database at {} (temporary: {})",
            config.storage_path.display(),
            config.temporary
        );
        Ok(Self::new(db)?)
    }

    /// Gets a reference to the underlying database
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Next record or job id. Never zero.
    pub fn generate_id(&self) -> CmsResult<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    /// Run `f` as one serializable transaction over the record trees.
    ///
    /// sled retries the closure on conflict, so it must not have side effects
    /// outside the transaction. Returning an error rolls back every write.
    pub fn record_transaction<F, T>(&self, f: F) -> CmsResult<T>
    where
        F: Fn(&RecordTxn<'_>) -> TxResult<T>,
    {
        let result = (&self.records_tree, &self.manifests_tree, &self.unique_tree).transaction(
            |(records, manifests, unique)| {
                let txn = RecordTxn {
                    records,
                    manifests,
                    unique,
                };
                f(&txn)
            },
        )?;
        Ok(result)
    }

    // ========== JOB TREE ==========

    pub fn insert_job(&self, job: &Job) -> CmsResult<()> {
        let bytes = serde_json::to_vec(job)?;
        self.jobs_tree.insert(job_key(job), bytes)?;
        self.jobs_tree.flush()?;
        Ok(())
    }

    /// Pending jobs in FIFO order (creation time, then id).
    pub fn list_jobs(&self) -> CmsResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for item in self.jobs_tree.iter() {
            let (_, value) = item?;
            jobs.push(serde_json::from_slice(&value)?);
        }
        Ok(jobs)
    }

    /// First job in FIFO order accepted by `eligible`.
    pub fn first_job_where<P>(&self, mut eligible: P) -> CmsResult<Option<Job>>
    where
        P: FnMut(&Job) -> bool,
    {
        for item in self.jobs_tree.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if eligible(&job) {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    pub fn get_job(&self, id: u64) -> CmsResult<Option<Job>> {
        self.first_job_where(|job| job.id == id)
    }

    /// Deletes a job row; returns whether it existed.
    pub fn remove_job(&self, job: &Job) -> CmsResult<bool> {
        let removed = self.jobs_tree.remove(job_key(job))?.is_some();
        self.jobs_tree.flush()?;
        Ok(removed)
    }

    pub fn job_count(&self) -> usize {
        self.jobs_tree.len()
    }
}

fn job_key(job: &Job) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&job.created_at.timestamp_millis().max(0).to_be_bytes());
    key.extend_from_slice(&job.id.to_be_bytes());
    key
}

fn record_key(collection: &str, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(collection.len() + 9);
    key.extend_from_slice(collection.as_bytes());
    key.push(b'/');
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

/// Record-level view of an open transaction.
///
/// Every collection keeps a manifest (its ordered id list) that is read and
/// written inside the transaction, so enumerating a collection conflicts with
/// any concurrent insert or delete on it.
pub struct RecordTxn<'a> {
    records: &'a TransactionalTree,
    manifests: &'a TransactionalTree,
    unique: &'a TransactionalTree,
}

impl RecordTxn<'_> {
    /// Record ids of `collection` in insertion order
    pub fn ids(&self, collection: &str) -> TxResult<Vec<u64>> {
        match self.manifests.get(collection.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn set_ids(&self, collection: &str, ids: &[u64]) -> TxResult<()> {
        self.manifests.insert(collection.as_bytes(), encode(&ids)?)?;
        Ok(())
    }

    pub fn get(&self, collection: &str, id: u64) -> TxResult<Option<Record>> {
        match self.records.get(record_key(collection, id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every record of `collection` in insertion order.
    pub fn all(&self, collection: &str) -> TxResult<Vec<Record>> {
        let mut records = Vec::new();
        for id in self.ids(collection)? {
            if let Some(record) = self.get(collection, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Insert or replace a record, registering new ids in the manifest.
    pub fn put(&self, collection: &str, record: &Record) -> TxResult<()> {
        let previous = self.records.insert(record_key(collection, record.id), encode(record)?)?;
        if previous.is_none() {
            let mut ids = self.ids(collection)?;
            ids.push(record.id);
            self.set_ids(collection, &ids)?;
        }
        Ok(())
    }

    pub fn delete(&self, collection: &str, id: u64) -> TxResult<Option<Record>> {
        let Some(bytes) = self.records.remove(record_key(collection, id))? else {
            return Ok(None);
        };
        let mut ids = self.ids(collection)?;
        ids.retain(|existing| *existing != id);
        self.set_ids(collection, &ids)?;
        Ok(Some(decode(&bytes)?))
    }

    /// Point `key` at `id`, failing if another record already owns it.
    pub fn claim_unique(&self, key: &str, id: u64) -> TxResult<()> {
        if let Some(owner) = self.unique.get(key.as_bytes())? {
            if owner.as_ref() != &id.to_be_bytes()[..] {
                return Err(ConflictableTransactionError::Abort(CmsError::Conflict(format!(
                    "unique index entry '{}' is already taken",
                    key
                ))));
            }
            return Ok(());
        }
        self.unique.insert(key.as_bytes(), id.to_be_bytes().to_vec())?;
        Ok(())
    }

    /// Drop `key` if `id` owns it.
    pub fn release_unique(&self, key: &str, id: u64) -> TxResult<()> {
        if let Some(owner) = self.unique.get(key.as_bytes())? {
            if owner.as_ref() == &id.to_be_bytes()[..] {
                self.unique.remove(key.as_bytes())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn open() -> DbOperations {
        let db = sled::Config::new().temporary(true).open().unwrap();
        DbOperations::new(db).unwrap()
    }

    fn record(id: u64, title: &str) -> Record {
        let mut values = Map::new();
        values.insert("title".into(), json!(title));
        Record::new(id, values)
    }

    #[test]
    fn test_manifest_tracks_insertion_order() {
        let db = open();
        db.record_transaction(|txn| {
            txn.put("posts", &record(9, "a"))?;
            txn.put("posts", &record(2, "b"))?;
            txn.put("posts", &record(9, "a2"))?;
            Ok(())
        })
        .unwrap();

        let ids = db.record_transaction(|txn| txn.ids("posts")).unwrap();
        assert_eq!(ids, vec![9, 2]);

        let all = db.record_transaction(|txn| txn.all("posts")).unwrap();
        assert_eq!(all[0].values["title"], json!("a2"));
    }

    #[test]
    fn test_abort_rolls_back_every_write() {
        let db = open();
        let result: CmsResult<()> = db.record_transaction(|txn| {
            txn.put("posts", &record(1, "a"))?;
            Err(ConflictableTransactionError::Abort(CmsError::Conflict("stop".into())))
        });
        assert!(matches!(result, Err(CmsError::Conflict(_))));
        assert!(db.record_transaction(|txn| txn.ids("posts")).unwrap().is_empty());
    }

    #[test]
    fn test_unique_claims() {
        let db = open();
        db.record_transaction(|txn| txn.claim_unique("posts/slug/\"a\"", 1)).unwrap();
        db.record_transaction(|txn| txn.claim_unique("posts/slug/\"a\"", 1)).unwrap();
        let taken = db.record_transaction(|txn| txn.claim_unique("posts/slug/\"a\"", 2));
        assert!(matches!(taken, Err(CmsError::Conflict(_))));

        db.record_transaction(|txn| txn.release_unique("posts/slug/\"a\"", 1)).unwrap();
        db.record_transaction(|txn| txn.claim_unique("posts/slug/\"a\"", 2)).unwrap();
    }

    #[test]
    fn test_generated_ids_are_never_zero() {
        let db = open();
        let a = db.generate_id().unwrap();
        let b = db.generate_id().unwrap();
        assert!(a > 0 && b > a);
    }
}
