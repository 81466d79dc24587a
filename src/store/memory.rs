//! In-memory record store. Rows live in an id-ordered map; conditions are
//! named predicates registered up front. `group`, `joins`, `include` and
//! `select` are accepted and recorded but have no effect on the rows.

use super::query::{page_of, FindQuery, HydrateOptions};
use super::{Identified, RecordStore, UnitId};
use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type ConditionFn = Arc<dyn Fn(&MemoryRecord) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: UnitId,
    pub attributes: Value,
    pub readonly: bool,
}

impl MemoryRecord {
    pub fn new(id: UnitId, attributes: Value) -> Self {
        Self {
            id,
            attributes,
            readonly: false,
        }
    }
}

impl Identified for MemoryRecord {
    fn unit_id(&self) -> UnitId {
        self.id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<UnitId, MemoryRecord>>,
    conditions: RwLock<HashMap<String, ConditionFn>>,
    queries: Mutex<Vec<FindQuery>>,
    count_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one empty-attribute row per id.
    pub fn with_ids(ids: impl IntoIterator<Item = UnitId>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.write().unwrap_or_else(|e| e.into_inner());
            for id in ids {
                rows.insert(id, MemoryRecord::new(id, Value::Null));
            }
        }
        store
    }

    /// Registers a named predicate usable as `ScanDescriptor::conditions`.
    pub fn with_condition<F>(self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MemoryRecord) -> bool + Send + Sync + 'static,
    {
        self.conditions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn insert(&self, record: MemoryRecord) -> Result<()> {
        self.write_rows()?.insert(record.id, record);
        Ok(())
    }

    pub fn remove(&self, id: UnitId) -> Result<Option<MemoryRecord>> {
        Ok(self.write_rows()?.remove(&id))
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every paginated find issued so far, in order.
    pub fn queries(&self) -> Vec<FindQuery> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    pub fn count_calls(&self) -> u64 {
        self.count_calls.load(Ordering::SeqCst)
    }

    fn write_rows(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<UnitId, MemoryRecord>>> {
        self.rows
            .write()
            .map_err(|_| anyhow!("memory store rows lock poisoned"))
    }

    fn condition(&self, name: Option<&str>) -> Result<Option<ConditionFn>> {
        let Some(name) = name else {
            return Ok(None);
        };
        let conditions = self
            .conditions
            .read()
            .map_err(|_| anyhow!("memory store conditions lock poisoned"))?;
        match conditions.get(name) {
            Some(predicate) => Ok(Some(Arc::clone(predicate))),
            None => bail!("unknown condition '{name}'"),
        }
    }

    fn matching_ids(&self, conditions: Option<&str>) -> Result<Vec<UnitId>> {
        let predicate = self.condition(conditions)?;
        let rows = self
            .rows
            .read()
            .map_err(|_| anyhow!("memory store rows lock poisoned"))?;
        Ok(rows
            .values()
            .filter(|record| predicate.as_ref().map_or(true, |matches| matches(record)))
            .map(|record| record.id)
            .collect())
    }
}

fn descending(order: Option<&str>) -> Result<bool> {
    match order.map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(order) => match order.as_str() {
            "id" | "id asc" => Ok(false),
            "id desc" => Ok(true),
            other => bail!("unsupported order '{other}'"),
        },
    }
}

impl RecordStore for MemoryStore {
    type Record = MemoryRecord;

    fn count<'a>(&'a self, conditions: Option<&'a str>) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.matching_ids(conditions)?.len() as u64)
        })
    }

    fn find<'a>(&'a self, query: &'a FindQuery) -> BoxFuture<'a, Result<Vec<MemoryRecord>>> {
        Box::pin(async move {
            if let Ok(mut queries) = self.queries.lock() {
                queries.push(query.clone());
            }

            let mut ids = self.matching_ids(query.conditions.as_deref())?;
            if descending(query.order.as_deref())? {
                ids.reverse();
            }
            let page = page_of(&ids, query.limit, query.offset);

            let rows = self
                .rows
                .read()
                .map_err(|_| anyhow!("memory store rows lock poisoned"))?;
            Ok(page
                .into_iter()
                .filter_map(|id| rows.get(&id).cloned())
                .map(|mut record| {
                    record.readonly = query.readonly;
                    record
                })
                .collect())
        })
    }

    fn find_by_id<'a>(
        &'a self,
        id: UnitId,
        options: &'a HydrateOptions,
    ) -> BoxFuture<'a, Result<MemoryRecord>> {
        Box::pin(async move {
            let rows = self
                .rows
                .read()
                .map_err(|_| anyhow!("memory store rows lock poisoned"))?;
            let mut record = rows
                .get(&id)
                .cloned()
                .ok_or_else(|| anyhow!("record {id} not found"))?;
            record.readonly = options.readonly;
            Ok(record)
        })
    }
}
