//! Lazily paged proxy for a persisted table.
//!
//! A [`TraceTable`] fetches nothing until a row is touched. Rows are read in
//! pages of `page_size`; touching row `i` fetches the page holding it exactly
//! once and keeps it in a small least-recently-used page cache shared by all
//! proxies of the same table on one backend. The row count comes from
//! `table_query_stats` and is also learned for free whenever a short page
//! comes back.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use weave_server::{TableQueryReq, TableQueryStatsReq, TableRowSchema};
use weave_types::{Ref, TableRef};

use crate::error::{TraceError, TraceResult};
use crate::mutation::TraceRoot;
use crate::proxy::{Node, TraceBackend, TraceValue};

/// Table states a backend keeps alive between proxies.
pub(crate) const DEFAULT_TABLE_STATES: usize = 32;

type Page = Arc<Vec<TableRowSchema>>;

/// Bounded map evicting the least recently used entry.
struct Lru<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    // Least recently used first.
    recency: VecDeque<K>,
}

impl<K: Clone + Eq + Hash, V: Clone> Lru<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key.clone());
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let value = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(value)
    }

    fn insert(&mut self, key: K, value: V) {
        self.touch(&key);
        self.entries.insert(key, value);
        while self.entries.len() > self.capacity {
            match self.recency.pop_front() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                }
                None => break,
            }
        }
    }

    fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

struct TableState {
    table_ref: TableRef,
    page_size: usize,
    cache: Mutex<Lru<usize, Page>>,
    count: Mutex<Option<usize>>,
    fetches: AtomicUsize,
}

/// Page caches and row counts per `(project, table digest)`, so proxies
/// built for the same table at different times reuse fetched pages.
pub(crate) struct TableStates(Mutex<Lru<(String, String), Arc<TableState>>>);

impl TableStates {
    pub(crate) fn new(capacity: usize) -> Self {
        Self(Mutex::new(Lru::new(capacity)))
    }

    fn state_for(&self, table_ref: &TableRef, page_size: usize, cache_pages: usize) -> Arc<TableState> {
        let key = (table_ref.project_id(), table_ref.digest().to_string());
        let mut states = self.0.lock().expect("lock poisoned");
        if let Some(state) = states.get(&key) {
            return state;
        }
        let state = Arc::new(TableState {
            table_ref: table_ref.clone(),
            page_size,
            cache: Mutex::new(Lru::new(cache_pages)),
            count: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        });
        states.insert(key, state.clone());
        state
    }
}

/// Proxy for a table reached through `reference`.
///
/// Rows are addressed as `reference/id/<row digest>`, so a table reached
/// through an object field keeps addressing its rows through that field.
/// Every proxy of the same table on one backend shares its pages.
#[derive(Clone)]
pub struct TraceTable {
    state: Arc<TableState>,
    node: Node,
}

impl TraceTable {
    pub(crate) fn new(table_ref: TableRef, reference: Ref, backend: TraceBackend, root: TraceRoot) -> Self {
        let state = backend
            .tables()
            .state_for(&table_ref, backend.page_size(), backend.cache_pages());
        Self {
            state,
            node: Node {
                reference: Some(reference),
                backend,
                root,
            },
        }
    }

    /// The table's own ref, without any path.
    pub fn table_ref(&self) -> &TableRef {
        &self.state.table_ref
    }

    pub fn reference(&self) -> Option<&Ref> {
        self.node.reference.as_ref()
    }

    pub(crate) fn set_reference(&mut self, reference: Ref) {
        self.node.reference = Some(reference);
    }

    pub fn root(&self) -> &TraceRoot {
        &self.node.root
    }

    pub fn page_size(&self) -> usize {
        self.state.page_size
    }

    /// Number of `table_query` requests issued so far for this table.
    pub fn page_fetches(&self) -> usize {
        self.state.fetches.load(Ordering::Relaxed)
    }

    /// Page indices currently cached, ascending.
    pub fn cached_pages(&self) -> Vec<usize> {
        let cache = self.state.cache.lock().expect("lock poisoned");
        let mut indices: Vec<usize> = cache.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    fn known_len(&self) -> Option<usize> {
        *self.state.count.lock().expect("lock poisoned")
    }

    fn set_len(&self, len: usize) {
        *self.state.count.lock().expect("lock poisoned") = Some(len);
    }

    /// Row count. Asks the server once, then answers from memory.
    pub async fn len(&self) -> TraceResult<usize> {
        if let Some(len) = self.known_len() {
            return Ok(len);
        }
        let res = self
            .node
            .backend
            .server()
            .table_query_stats(TableQueryStatsReq {
                project_id: self.state.table_ref.project_id(),
                digest: self.state.table_ref.digest().to_string(),
            })
            .await?;
        self.set_len(res.count);
        Ok(res.count)
    }

    pub async fn is_empty(&self) -> TraceResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn page(&self, index: usize) -> TraceResult<Page> {
        let cached = self.state.cache.lock().expect("lock poisoned").get(&index);
        if let Some(page) = cached {
            return Ok(page);
        }
        let page_size = self.state.page_size;
        let offset = index * page_size;
        let res = self
            .node
            .backend
            .server()
            .table_query(TableQueryReq {
                project_id: self.state.table_ref.project_id(),
                digest: self.state.table_ref.digest().to_string(),
                offset,
                limit: Some(page_size),
            })
            .await?;
        self.state.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            table = %self.state.table_ref,
            page = index,
            rows = res.rows.len(),
            "fetched table page"
        );
        if res.rows.len() < page_size && (index == 0 || !res.rows.is_empty()) {
            self.set_len(offset + res.rows.len());
        }
        let page = Arc::new(res.rows);
        self.state
            .cache
            .lock()
            .expect("lock poisoned")
            .insert(index, page.clone());
        Ok(page)
    }

    async fn wrap_row(&self, row: &TableRowSchema) -> TraceResult<TraceValue> {
        let table_ref = &self.state.table_ref;
        let value = self
            .node
            .backend
            .serializer()
            .from_json(&row.val, &table_ref.project_id(), self.node.backend.server())
            .await?;
        let reference = match &self.node.reference {
            Some(r) => r.with_item(row.digest.clone()),
            None => Ref::Table(table_ref.with_item(row.digest.clone())),
        };
        self.node.child(value, Some(reference)).await
    }

    /// Row at position `index`.
    pub async fn row(&self, index: usize) -> TraceResult<TraceValue> {
        let page_size = self.state.page_size;
        let page = self.page(index / page_size).await?;
        match page.get(index % page_size) {
            Some(row) => self.wrap_row(row).await,
            None => Err(TraceError::IndexOutOfRange {
                index,
                len: self.len().await?,
            }),
        }
    }

    /// Rows in `range`, clamped to the table length.
    pub async fn rows(&self, range: Range<usize>) -> TraceResult<Vec<TraceValue>> {
        let end = range.end.min(self.len().await?);
        let mut out = Vec::with_capacity(end.saturating_sub(range.start));
        for index in range.start..end {
            out.push(self.row(index).await?);
        }
        Ok(out)
    }

    pub async fn all_rows(&self) -> TraceResult<Vec<TraceValue>> {
        self.rows(0..usize::MAX).await
    }

    /// Row whose digest is `digest`. Scans pages in order.
    pub async fn row_by_id(&self, digest: &str) -> TraceResult<TraceValue> {
        let page_size = self.state.page_size;
        let mut index = 0;
        loop {
            let page = self.page(index).await?;
            if let Some(row) = page.iter().find(|r| r.digest == digest) {
                return self.wrap_row(row).await;
            }
            if page.len() < page_size {
                return Err(TraceError::RowNotFound {
                    digest: digest.to_string(),
                });
            }
            index += 1;
        }
    }
}

impl std::fmt::Debug for TraceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceTable")
            .field("table_ref", &self.state.table_ref)
            .field("reference", &self.node.reference)
            .field("known_len", &self.known_len())
            .field("page_fetches", &self.page_fetches())
            .finish()
    }
}
