//! In-memory storage backend.
//!
//! Implements [`StoragePort`] for the host build and the test suites.
//! Writes replace the whole value under a composite `namespace::key`,
//! which gives the settings store its atomicity trivially; the EEPROM/
//! NVS adapter on hardware provides the same guarantee natively.

use std::collections::HashMap;

use crate::app::ports::{StorageError, StoragePort};

pub struct MemStorage {
    store: HashMap<String, Vec<u8>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            store: HashMap::new(),
        }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}::{key}")
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StoragePort for MemStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.store.get(&Self::composite_key(namespace, key)) {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&Self::composite_key(namespace, key))
    }
}
