use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use log::debug;
use lru::LruCache;

use crate::{
    client::{QueryResult, SqlClient, UpdateResult},
    protocol::{RequestError, ValueWithType, lock},
};

/// Per-server LRU of query results over a [`SqlClient`], keyed by exact query text.
pub struct SqlInspector {
    client: Arc<SqlClient>,
    capacity: NonZeroUsize,
    cache: Mutex<HashMap<String, LruCache<String, QueryResult>>>,
}

impl SqlInspector {
    /// A zero `capacity` is treated as one.
    pub fn new(client: Arc<SqlClient>, capacity: usize) -> Self {
        Self {
            client,
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Result of `query`, from cache unless `force_reload` is set.
    pub fn query(
        &self,
        server_id: &str,
        query: &str,
        force_reload: bool,
    ) -> Result<QueryResult, RequestError> {
        let mut cache = lock(&self.cache);
        let results = cache
            .entry(server_id.to_string())
            .or_insert_with(|| LruCache::new(self.capacity));

        if !force_reload {
            if let Some(result) = results.get(query) {
                debug!("sql {server_id}: cache hit");
                return Ok(result.clone());
            }
        }

        let result = self.client.query(server_id, query)?;
        results.put(query.to_string(), result.clone());
        Ok(result)
    }

    /// Runs a mutating statement and drops every cached result of the server.
    pub fn update(
        &self,
        server_id: &str,
        query: &str,
        affected_tables: &[String],
        variables: &[Option<ValueWithType>],
    ) -> Result<UpdateResult, RequestError> {
        let mut cache = lock(&self.cache);
        let result = self
            .client
            .update(server_id, query, affected_tables, variables)?;

        if let Some(results) = cache.get_mut(server_id) {
            results.clear();
        }
        Ok(result)
    }

    pub fn is_cached(&self, server_id: &str, query: &str) -> bool {
        lock(&self.cache)
            .get(server_id)
            .is_some_and(|results| results.contains(query))
    }
}
