use crate::models::db_operations::StoreError;
use crate::models::{Article, ArticleFilter, ArticleStatus};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use uuid::Uuid;

/// Article JSON keyed by the 16 UUID bytes.
pub const ARTICLES: TableDefinition<&[u8; 16], &str> = TableDefinition::new("articles");

/// Persistence collaborator for article records. The workflow engine reloads
/// through `load` before every transition and never keeps a copy across calls.
pub trait ArticleStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Option<Article>, StoreError>;

    /// Insert or overwrite. Concurrent writers on one article are last-write-wins.
    fn save(&self, article: &Article) -> Result<(), StoreError>;

    /// Matching articles, most recently updated first.
    fn list(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

fn sort_recent_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

// ====================================================================
// ======================== REDB STORE ================================
// ====================================================================

pub struct RedbArticleStore {
    db: Arc<Database>,
}

impl RedbArticleStore {
    pub fn new(db: Arc<Database>) -> Self {
        RedbArticleStore { db }
    }

    fn key(id: &str) -> Result<[u8; 16], StoreError> {
        Ok(Uuid::parse_str(id)?.into_bytes())
    }
}

impl ArticleStore for RedbArticleStore {
    fn load(&self, id: &str) -> Result<Option<Article>, StoreError> {
        // Ids that are not UUIDs can never have been stored.
        let Ok(key) = Self::key(id) else {
            return Ok(None);
        };
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ARTICLES)?;
        let article = match table.get(&key)? {
            Some(guard) => Some(serde_json::from_str(guard.value())?),
            None => None,
        };
        Ok(article)
    }

    fn save(&self, article: &Article) -> Result<(), StoreError> {
        let key = Self::key(&article.id)?;
        let json = serde_json::to_string(article)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ARTICLES)?;
            table.insert(&key, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ARTICLES)?;
        let mut articles = Vec::new();
        for row in table.iter()? {
            let (_, json) = row?;
            match serde_json::from_str::<Article>(json.value()) {
                Ok(article) if filter.matches(&article) => articles.push(article),
                Ok(_) => {}
                Err(e) => log::error!("Skipping unreadable article record: {}", e),
            }
        }
        sort_recent_first(&mut articles);
        Ok(articles)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Ok(key) = Self::key(id) else {
            return Ok(false);
        };
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ARTICLES)?;
            let removed = table.remove(&key)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

// ====================================================================
// ======================= IN-MEMORY STORE ============================
// ====================================================================

#[derive(Default)]
pub struct MemoryArticleStore {
    articles: Mutex<HashMap<String, Article>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Article>> {
        self.articles.lock().unwrap_or_else(|poisoned| {
            log::error!("Article store lock was poisoned! Recovering lock.");
            poisoned.into_inner()
        })
    }
}

impl ArticleStore for MemoryArticleStore {
    fn load(&self, id: &str) -> Result<Option<Article>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    fn save(&self, article: &Article) -> Result<(), StoreError> {
        self.lock().insert(article.id.clone(), article.clone());
        Ok(())
    }

    fn list(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError> {
        let mut articles: Vec<Article> = self.lock().values().filter(|a| filter.matches(a)).cloned().collect();
        sort_recent_first(&mut articles);
        Ok(articles)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(id).is_some())
    }
}

// ====================================================================
// ===================== CHANGE NOTIFICATION ==========================
// ====================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleEvent {
    Saved { id: String, status: ArticleStatus },
    Deleted { id: String },
}

pub type ArticleListener = Box<dyn Fn(&ArticleEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Wraps a store and tells subscribers about every successful write.
pub struct NotifyingArticleStore<S> {
    inner: S,
    listeners: RwLock<Vec<(SubscriptionId, ArticleListener)>>,
    next_id: Mutex<u64>,
}

impl<S: ArticleStore> NotifyingArticleStore<S> {
    pub fn new(inner: S) -> Self {
        NotifyingArticleStore {
            inner,
            listeners: RwLock::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    pub fn subscribe(&self, listener: ArticleListener) -> SubscriptionId {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *next += 1;
            SubscriptionId(*next)
        };
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn publish(&self, event: ArticleEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, listener) in listeners.iter() {
            listener(&event);
        }
    }
}

impl<S: ArticleStore> ArticleStore for NotifyingArticleStore<S> {
    fn load(&self, id: &str) -> Result<Option<Article>, StoreError> {
        self.inner.load(id)
    }

    fn save(&self, article: &Article) -> Result<(), StoreError> {
        self.inner.save(article)?;
        self.publish(ArticleEvent::Saved {
            id: article.id.clone(),
            status: article.status,
        });
        Ok(())
    }

    fn list(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError> {
        self.inner.list(filter)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.inner.delete(id)?;
        if removed {
            self.publish(ArticleEvent::Deleted { id: id.to_string() });
        }
        Ok(removed)
    }
}
