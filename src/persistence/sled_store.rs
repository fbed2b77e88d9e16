use chrono::Utc;
use serde_json::Value;
use sled::Db;

use crate::utils::error::PersistenceError;

/// A document as it sits in a collection: the store-assigned id and the
/// order JSON exactly as it was parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub document: Value,
}

/// Anything the consumer can persist parsed orders into.
pub trait DocumentStore: Send + Sync {
    /// Insert one document and return the id the store assigned to it.
    fn insert(&self, collection: &str, document: &Value) -> Result<String, PersistenceError>;
}

/// Document store backed by `sled`. Each collection is a sled tree.
#[derive(Clone)]
pub struct Persistence {
    db: Db,
}

impl Persistence {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        let db = sled::open(path).map_err(|e| PersistenceError::Open(e.to_string()))?;
        Ok(Self { db })
    }

    /// Store a document in the collection's tree. Keys lead with sled's
    /// monotonic id, so iteration yields documents in insertion order even if
    /// the wall clock steps back. The timestamp suffix is informational.
    pub fn insert_document(
        &self,
        collection: &str,
        document: &Value,
    ) -> Result<String, PersistenceError> {
        let serialized =
            serde_json::to_vec(document).map_err(|e| PersistenceError::Encode(e.to_string()))?;

        let tree = self.db.open_tree(collection)?;

        let seq = self.db.generate_id()?;
        let id = format!("{:020}_{}", seq, Utc::now().timestamp_millis());
        tree.insert(id.as_bytes(), serialized)?;

        Ok(id)
    }

    /// Load every document of a collection in insertion order.
    pub fn load_documents(&self, collection: &str) -> Result<Vec<StoredDocument>, PersistenceError> {
        let tree = self
            .db
            .open_tree(collection)
            .map_err(|e| PersistenceError::Read(e.to_string()))?;

        tree.iter()
            .map(|entry| {
                let (key, value) = entry.map_err(|e| PersistenceError::Read(e.to_string()))?;
                decode(&key, &value)
            })
            .collect()
    }

    pub fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredDocument>, PersistenceError> {
        let tree = self
            .db
            .open_tree(collection)
            .map_err(|e| PersistenceError::Read(e.to_string()))?;

        match tree
            .get(id.as_bytes())
            .map_err(|e| PersistenceError::Read(e.to_string()))?
        {
            Some(value) => decode(id.as_bytes(), &value).map(Some),
            None => Ok(None),
        }
    }

    pub fn count(&self, collection: &str) -> Result<usize, PersistenceError> {
        let tree = self
            .db
            .open_tree(collection)
            .map_err(|e| PersistenceError::Read(e.to_string()))?;
        Ok(tree.len())
    }
}

impl DocumentStore for Persistence {
    fn insert(&self, collection: &str, document: &Value) -> Result<String, PersistenceError> {
        self.insert_document(collection, document)
    }
}

fn decode(key: &[u8], value: &[u8]) -> Result<StoredDocument, PersistenceError> {
    let id = String::from_utf8_lossy(key).into_owned();
    let document =
        serde_json::from_slice(value).map_err(|e| PersistenceError::Read(e.to_string()))?;
    Ok(StoredDocument { id, document })
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}
