use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::debug;

use crate::{
    client::{KeyValueClient, KeyValueEntry},
    protocol::{RequestError, ValueWithType, lock},
};

/// Value as kept in the cache. Binary payloads are replaced by their size;
/// fetch them with [`KeyValueInspector::get_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Value(ValueWithType),
    Binary { size: usize },
}

impl From<ValueWithType> for CachedValue {
    fn from(value: ValueWithType) -> Self {
        match value {
            ValueWithType::Binary(bytes) => CachedValue::Binary { size: bytes.len() },
            other => CachedValue::Value(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub key: ValueWithType,
    pub value: CachedValue,
}

impl From<KeyValueEntry> for CachedEntry {
    fn from(entry: KeyValueEntry) -> Self {
        Self {
            key: entry.key,
            value: entry.value.into(),
        }
    }
}

/// Read-through cache over a [`KeyValueClient`].
pub struct KeyValueInspector {
    client: Arc<KeyValueClient>,
    cache: Mutex<HashMap<String, Vec<CachedEntry>>>,
}

impl KeyValueInspector {
    pub fn new(client: Arc<KeyValueClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cached content of `server_id`, fetched on first use.
    pub fn get_data(&self, server_id: &str) -> Result<Vec<CachedEntry>, RequestError> {
        let mut cache = lock(&self.cache);
        if let Some(entries) = cache.get(server_id) {
            return Ok(entries.clone());
        }
        Self::fetch(&self.client, &mut cache, server_id)
    }

    /// Replaces the cached content of `server_id` with a fresh copy.
    pub fn reload(&self, server_id: &str) -> Result<Vec<CachedEntry>, RequestError> {
        let mut cache = lock(&self.cache);
        Self::fetch(&self.client, &mut cache, server_id)
    }

    /// Fetches one value, binary payload included. The cache is not touched.
    pub fn get_value(
        &self,
        server_id: &str,
        key: &ValueWithType,
    ) -> Result<ValueWithType, RequestError> {
        Ok(self.client.get(server_id, key)?.value)
    }

    pub fn set(
        &self,
        server_id: &str,
        key: ValueWithType,
        value: ValueWithType,
    ) -> Result<(), RequestError> {
        let mut cache = lock(&self.cache);
        self.client.set(server_id, &key, &value)?;

        if let Some(entries) = cache.get_mut(server_id) {
            let value = CachedValue::from(value);
            match entries.iter_mut().find(|entry| entry.key == key) {
                Some(entry) => entry.value = value,
                None => entries.push(CachedEntry { key, value }),
            }
        }
        Ok(())
    }

    pub fn remove(&self, server_id: &str, key: &ValueWithType) -> Result<(), RequestError> {
        let mut cache = lock(&self.cache);
        self.client.remove(server_id, key)?;

        if let Some(entries) = cache.get_mut(server_id) {
            entries.retain(|entry| entry.key != *key);
        }
        Ok(())
    }

    pub fn clear(&self, server_id: &str) -> Result<(), RequestError> {
        let mut cache = lock(&self.cache);
        self.client.clear(server_id)?;

        if let Some(entries) = cache.get_mut(server_id) {
            entries.clear();
        }
        Ok(())
    }

    fn fetch(
        client: &KeyValueClient,
        cache: &mut HashMap<String, Vec<CachedEntry>>,
        server_id: &str,
    ) -> Result<Vec<CachedEntry>, RequestError> {
        let values = client.get_all(server_id)?;
        debug!("key_value {server_id}: cached {} entries", values.values.len());

        let entries: Vec<CachedEntry> = values.values.into_iter().map(CachedEntry::from).collect();
        cache.insert(server_id.to_string(), entries.clone());
        Ok(entries)
    }
}
