use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;

use super::QueryResult;
use super::stats::DialStats;

/// Identity of one query's result: the request shape, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub campaigns: Vec<String>,
    pub dims: Vec<String>,
    pub percentiles: Vec<u8>,
}

/// Result cache, valid only as long as the locally visible partition set is
/// unchanged. Commits and deletions must call [`QueryCache::invalidate`].
#[derive(Default)]
pub struct QueryCache {
    rows: RwLock<HashMap<CacheKey, Arc<QueryResult>>>,
    stats: RwLock<HashMap<CacheKey, Arc<DialStats>>>,
}

impl QueryCache {
    pub fn get_rows(&self, key: &CacheKey) -> Option<Arc<QueryResult>> {
        self.rows.read().ok()?.get(key).cloned()
    }

    pub fn put_rows(&self, key: CacheKey, result: Arc<QueryResult>) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(key, result);
        }
    }

    pub fn get_stats(&self, key: &CacheKey) -> Option<Arc<DialStats>> {
        self.stats.read().ok()?.get(key).cloned()
    }

    pub fn put_stats(&self, key: CacheKey, stats: Arc<DialStats>) {
        if let Ok(mut map) = self.stats.write() {
            map.insert(key, stats);
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut rows) = self.rows.write() {
            rows.clear();
        }
        if let Ok(mut stats) = self.stats.write() {
            stats.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(campaign: &str) -> CacheKey {
        CacheKey {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            campaigns: vec![campaign.to_string()],
            dims: vec!["campaign".to_string()],
            percentiles: vec![95, 90, 85],
        }
    }

    #[test]
    fn test_hit_miss_and_invalidate() {
        let cache = QueryCache::default();
        let result = Arc::new(QueryResult::empty(vec!["campaign".to_string()]));

        assert!(cache.get_rows(&key("A")).is_none());
        cache.put_rows(key("A"), result);
        assert!(cache.get_rows(&key("A")).is_some());
        assert!(cache.get_rows(&key("B")).is_none(), "different shape, different entry");

        cache.invalidate();
        assert!(cache.get_rows(&key("A")).is_none());
    }
}
