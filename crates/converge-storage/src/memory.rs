use std::collections::BTreeMap;
use std::sync::Mutex;

use converge_core::files::content_hash;

use crate::error::StorageError;
use crate::store::{Blob, BlobStore, BoxFuture, ObjectMeta};

struct StoredObject {
    body: Vec<u8>,
    generation: u64,
    md5: String,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    last_generation: u64,
}

impl Inner {
    fn write(&mut self, key: &str, body: Vec<u8>) -> String {
        self.last_generation += 1;
        let generation = self.last_generation;
        let md5 = content_hash(&body);
        self.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                generation,
                md5,
            },
        );
        generation.to_string()
    }
}

/// In-process [`BlobStore`].
///
/// Generations are a store-wide counter, so a deleted and re-created object
/// never reuses a generation. All preconditions are checked under one lock,
/// which makes conditional operations linearizable.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        // A poisoned lock only means another test thread panicked mid-call;
        // the map itself is always left consistent.
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Keys currently stored, in order.
    pub fn keys(&self) -> Vec<String> {
        self.with_inner(|inner| inner.objects.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.with_inner(|inner| inner.objects.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Blob, StorageError>> {
        Box::pin(async move {
            self.with_inner(|inner| {
                inner
                    .objects
                    .get(key)
                    .map(|obj| Blob {
                        body: obj.body.clone(),
                        generation: obj.generation.to_string(),
                    })
                    .ok_or_else(|| StorageError::NotFound {
                        key: key.to_string(),
                    })
            })
        })
    }

    fn put<'a>(&'a self, key: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<String, StorageError>> {
        Box::pin(async move { Ok(self.with_inner(|inner| inner.write(key, body))) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.with_inner(|inner| inner.objects.remove(key));
            Ok(())
        })
    }

    fn conditional_create<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, StorageError>> {
        Box::pin(async move {
            self.with_inner(|inner| {
                if inner.objects.contains_key(key) {
                    return Err(StorageError::PreconditionFailed {
                        key: key.to_string(),
                    });
                }
                Ok(inner.write(key, body))
            })
        })
    }

    fn conditional_delete<'a>(
        &'a self,
        key: &'a str,
        generation: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.with_inner(|inner| match inner.objects.get(key) {
                None => Err(StorageError::NotFound {
                    key: key.to_string(),
                }),
                Some(obj) if obj.generation.to_string() != generation => {
                    Err(StorageError::PreconditionFailed {
                        key: key.to_string(),
                    })
                }
                Some(_) => {
                    inner.objects.remove(key);
                    Ok(())
                }
            })
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectMeta>, StorageError>> {
        Box::pin(async move {
            Ok(self.with_inner(|inner| {
                inner
                    .objects
                    .range(prefix.to_string()..)
                    .take_while(|(key, _)| key.starts_with(prefix))
                    .map(|(key, obj)| ObjectMeta {
                        key: key.clone(),
                        size: obj.body.len() as u64,
                        generation: obj.generation.to_string(),
                        md5: Some(obj.md5.clone()),
                    })
                    .collect()
            }))
        })
    }
}
