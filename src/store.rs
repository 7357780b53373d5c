//! Whole-collection persistence.
//!
//! Every collection (books, members, transactions) is written as a single blob:
//! the CBOR encoding of an id → entity map, wrapped in an envelope carrying the
//! SHA-256 digest of that encoding. A missing blob is an empty collection.
use crate::error::StoreError;
use minicbor::bytes::ByteVec;
use minicbor::{Decode, Encode};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

/// Storage port: load or overwrite one named blob.
pub trait Store {
    fn load(&self, collection: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn save(&self, collection: &str, blob: &[u8]) -> Result<(), StoreError>;
}

/// Blobs kept in an embedded sled database, one key per collection.
#[derive(Debug, Clone)]
pub struct SledStore {
    instance: Arc<sled::Db>,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self::new(Arc::new(db)))
    }
}

impl Store for SledStore {
    fn load(&self, collection: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.instance.get(collection)?.map(|blob| blob.to_vec()))
    }

    fn save(&self, collection: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.instance.insert(collection, blob)?;
        self.instance.flush()?;
        Ok(())
    }
}

/// In-process blobs. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Rc<RefCell<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.blobs.borrow().contains_key(collection)
    }
}

impl Store for MemoryStore {
    fn load(&self, collection: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.borrow().get(collection).cloned())
    }

    fn save(&self, collection: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.blobs
            .borrow_mut()
            .insert(collection.to_string(), blob.to_vec());
        Ok(())
    }
}

#[derive(Debug, Encode, Decode)]
struct Envelope {
    #[n(0)]
    digest: String, // sha256 hex of payload
    #[n(1)]
    payload: ByteVec,
}

fn encode_collection<T>(
    collection: &str,
    items: &BTreeMap<String, T>,
) -> Result<Vec<u8>, StoreError>
where
    T: Encode<()>,
{
    let encode_err = |err: minicbor::encode::Error<std::convert::Infallible>| StoreError::Encode {
        collection: collection.to_string(),
        message: err.to_string(),
    };

    let payload = minicbor::to_vec(items).map_err(encode_err)?;
    let digest = sha256::digest(&payload);
    let envelope = Envelope {
        digest,
        payload: ByteVec::from(payload),
    };

    minicbor::to_vec(&envelope).map_err(encode_err)
}

fn decode_collection<T>(collection: &str, blob: &[u8]) -> Result<BTreeMap<String, T>, StoreError>
where
    T: for<'b> Decode<'b, ()>,
{
    let decode_err = |source| StoreError::Decode {
        collection: collection.to_string(),
        source,
    };

    let envelope: Envelope = minicbor::decode(blob).map_err(decode_err)?;
    if sha256::digest(envelope.payload.as_slice()) != envelope.digest {
        return Err(StoreError::Corrupt(collection.to_string()));
    }

    minicbor::decode(envelope.payload.as_slice()).map_err(decode_err)
}

/// An id-keyed collection held in memory and rewritten whole on every change.
///
/// Mutations that fail to persist are undone in memory before the error is
/// returned, so readers never see a change the store did not accept.
#[derive(Debug)]
pub struct Repository<T, S> {
    collection: &'static str,
    store: S,
    items: BTreeMap<String, T>,
}

impl<T, S> Repository<T, S>
where
    T: Clone + Encode<()> + for<'b> Decode<'b, ()>,
    S: Store,
{
    /// Load the collection from the store, or start empty if it was never saved.
    pub fn open(store: S, collection: &'static str) -> Result<Self, StoreError> {
        let items = match store.load(collection)? {
            Some(blob) => decode_collection(collection, &blob)?,
            None => BTreeMap::new(),
        };
        tracing::debug!(collection, count = items.len(), "loaded collection");

        Ok(Self {
            collection,
            store,
            items,
        })
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert or replace, returning the previous value.
    pub fn put(&mut self, id: String, item: T) -> Result<Option<T>, StoreError> {
        let previous = self.items.insert(id.clone(), item);

        if let Err(err) = self.persist() {
            match previous {
                Some(ref old) => {
                    self.items.insert(id, old.clone());
                }
                None => {
                    self.items.remove(&id);
                }
            }
            return Err(err);
        }

        Ok(previous)
    }

    pub fn remove(&mut self, id: &str) -> Result<Option<T>, StoreError> {
        let Some(removed) = self.items.remove(id) else {
            return Ok(None);
        };

        if let Err(err) = self.persist() {
            self.items.insert(id.to_string(), removed);
            return Err(err);
        }

        Ok(Some(removed))
    }

    /// Apply `f` to every item; persists once if any call reported a change.
    /// Returns how many items changed.
    pub fn update_each<F>(&mut self, mut f: F) -> Result<usize, StoreError>
    where
        F: FnMut(&mut T) -> bool,
    {
        let snapshot = self.items.clone();
        let mut changed = 0;
        for item in self.items.values_mut() {
            if f(item) {
                changed += 1;
            }
        }

        if changed > 0 {
            if let Err(err) = self.persist() {
                self.items = snapshot;
                return Err(err);
            }
        }

        Ok(changed)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let blob = encode_collection(self.collection, &self.items)?;
        self.store.save(self.collection, &blob)?;
        tracing::debug!(
            collection = self.collection,
            count = self.items.len(),
            bytes = blob.len(),
            "persisted collection"
        );
        Ok(())
    }
}
