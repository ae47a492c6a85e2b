//! Short-lived side caches: preview samples keyed by handle, and the
//! per-owner "last successful upload" used for recovery.
//!
//! Both are bounded (FIFO eviction) and expire entries after a TTL measured
//! on the injected clock. Neither is a source of truth.

use crate::{
    models::{
        preview::{MAX_PREVIEW_ROWS, PreviewOrigin, PreviewRow, PreviewSample},
        schema::{ColumnSchema, ColumnType},
    },
    services::clock::SharedClock,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    sync::Mutex,
    time::Duration,
};
use uuid::Uuid;

/// Default capacity for bounded caches.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

struct Slot<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Bounded map with FIFO eviction and per-entry expiry.
pub struct ExpiringCache<V> {
    entries: HashMap<String, Slot<V>>,
    /// Insertion order for FIFO eviction
    order: VecDeque<String>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(slot) if slot.expires_at > now => return Some(slot.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove(key);
        }
        None
    }

    pub fn insert(&mut self, key: String, value: V, now: DateTime<Utc>) {
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let slot = Slot { value, expires_at };

        // Existing key: refresh value and expiry, keep its place in line.
        if let Entry::Occupied(mut e) = self.entries.entry(key.clone()) {
            e.insert(slot);
            return;
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        self.entries.insert(key.clone(), slot);
        self.order.push_back(key);
    }

    pub fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holds decoded preview rows so a UI can render before (or without) a full
/// read of the stored object.
pub struct PreviewCache {
    inner: Mutex<ExpiringCache<PreviewSample>>,
    clock: SharedClock,
}

impl PreviewCache {
    pub fn new(clock: SharedClock, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(ExpiringCache::new(capacity, ttl)),
            clock,
        }
    }

    /// Store rows under `handle`, truncated to the preview bound. Replaces any
    /// earlier sample under the same handle.
    pub fn put(&self, handle: &str, mut rows: Vec<PreviewRow>, origin: PreviewOrigin) -> PreviewSample {
        rows.truncate(MAX_PREVIEW_ROWS);
        let now = self.clock.now();
        let sample = PreviewSample {
            handle: handle.to_string(),
            origin,
            rows,
            created_at: now,
        };
        self.lock().insert(handle.to_string(), sample.clone(), now);
        sample
    }

    pub fn get(&self, handle: &str) -> Option<PreviewSample> {
        let now = self.clock.now();
        self.lock().get(handle, now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExpiringCache<PreviewSample>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pointer to an owner's most recent successful upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LastUpload {
    pub dataset_id: Uuid,
    pub preview_handle: String,
    pub recorded_at: DateTime<Utc>,
}

/// Recovery aid keyed by owner id. Never consulted for the dataset itself.
pub struct RecoveryCache {
    inner: Mutex<ExpiringCache<LastUpload>>,
    clock: SharedClock,
}

impl RecoveryCache {
    pub fn new(clock: SharedClock, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(ExpiringCache::new(capacity, ttl)),
            clock,
        }
    }

    pub fn remember(&self, owner_id: Uuid, dataset_id: Uuid, preview_handle: &str) {
        let now = self.clock.now();
        let entry = LastUpload {
            dataset_id,
            preview_handle: preview_handle.to_string(),
            recorded_at: now,
        };
        self.lock().insert(owner_id.to_string(), entry, now);
    }

    pub fn last_upload(&self, owner_id: Uuid) -> Option<LastUpload> {
        let now = self.clock.now();
        self.lock().get(&owner_id.to_string(), now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExpiringCache<LastUpload>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Placeholder rows shaped like `schema`. Only used when no real sample
/// could be read; callers must label them synthetic.
pub fn synthetic_rows_from_schema(schema: &ColumnSchema, count: usize) -> Vec<PreviewRow> {
    (0..count)
        .map(|i| {
            schema
                .iter()
                .map(|(name, ty)| {
                    let value = match ty {
                        ColumnType::Number => json!((i as i64 + 1) * 10),
                        ColumnType::Boolean => json!(i % 2 == 0),
                        ColumnType::Date => json!(format!("2024-01-{:02}", i % 28 + 1)),
                        ColumnType::String => json!(format!("{} {}", name, i + 1)),
                        ColumnType::Object => Value::Object(Map::new()),
                        ColumnType::Unknown => Value::Null,
                    };
                    (name.to_string(), value)
                })
                .collect()
        })
        .collect()
}

/// Placeholder rows guessed from the file name alone, for files whose schema
/// is unknown.
pub fn synthetic_rows_from_file_name(file_name: &str, count: usize) -> Vec<PreviewRow> {
    let lowered = file_name.to_ascii_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |vocabulary: &[&str]| words.iter().any(|w| vocabulary.contains(w));
    let sales = mentions(&["sale", "sales", "revenue", "revenues", "order", "orders"]);
    let vehicles = mentions(&["vehicle", "vehicles", "car", "cars", "auto", "autos", "automotive"]);
    let survey = mentions(&["survey", "surveys", "feedback"]);

    let row = |i: usize| -> Value {
        let n = i as i64;
        if sales {
            const REGIONS: [&str; 4] = ["North", "South", "East", "West"];
            json!({
                "date": format!("2024-{:02}-01", i % 12 + 1),
                "product": format!("Product {}", (b'A' + (i % 5) as u8) as char),
                "region": REGIONS[i % REGIONS.len()],
                "units": 10 + (n * 7) % 90,
                "revenue": 1000 + (n * 379) % 9000,
            })
        } else if vehicles {
            const MAKES: [&str; 4] = ["Toyota", "Ford", "Honda", "Tesla"];
            json!({
                "make": MAKES[i % MAKES.len()],
                "model": format!("Model {}", i % 6 + 1),
                "year": 2015 + n % 10,
                "mileage": 5000 + (n * 7919) % 120_000,
                "price": 15_000 + (n * 2311) % 40_000,
            })
        } else if survey {
            json!({
                "respondent_id": n + 1,
                "age": 18 + (n * 13) % 60,
                "satisfaction": 1 + n % 5,
                "would_recommend": i % 3 != 0,
                "comment": format!("Response {}", i + 1),
            })
        } else {
            json!({
                "id": n + 1,
                "label": format!("Item {}", i + 1),
                "value": (n * 37) % 100,
                "date": format!("2024-01-{:02}", i % 28 + 1),
            })
        }
    };

    (0..count)
        .filter_map(|i| match row(i) {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::preview::new_preview_handle, services::clock::ManualClock};
    use std::sync::Arc;

    #[test]
    fn bounded_cache_evicts_oldest() {
        let now = Utc::now();
        let mut cache = ExpiringCache::new(2, DEFAULT_TTL);
        cache.insert("a".to_string(), 1, now);
        cache.insert("b".to_string(), 2, now);
        cache.insert("a".to_string(), 10, now);
        cache.insert("c".to_string(), 3, now);

        assert_eq!(cache.get("a", now), None);
        assert_eq!(cache.get("b", now), Some(2));
        assert_eq!(cache.get("c", now), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let now = Utc::now();
        let mut cache = ExpiringCache::new(4, Duration::from_secs(60));
        cache.insert("a".to_string(), 1, now);
        assert_eq!(cache.get("a", now + chrono::Duration::seconds(59)), Some(1));
        assert_eq!(cache.get("a", now + chrono::Duration::seconds(60)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn preview_put_truncates_and_second_put_supersedes() {
        let clock = Arc::new(ManualClock::default());
        let cache = PreviewCache::new(clock.clone(), 8, DEFAULT_TTL);
        let handle = new_preview_handle();

        let rows = synthetic_rows_from_file_name("x.csv", MAX_PREVIEW_ROWS + 10);
        let sample = cache.put(&handle, rows, PreviewOrigin::Local);
        assert_eq!(sample.rows.len(), MAX_PREVIEW_ROWS);

        cache.put(&handle, Vec::new(), PreviewOrigin::Stored);
        let fetched = cache.get(&handle).unwrap();
        assert_eq!(fetched.origin, PreviewOrigin::Stored);
        assert!(fetched.rows.is_empty());

        clock.advance(DEFAULT_TTL);
        assert!(cache.get(&handle).is_none());
    }

    #[test]
    fn recovery_cache_tracks_latest_upload_per_owner() {
        let clock = Arc::new(ManualClock::default());
        let cache = RecoveryCache::new(clock, 8, DEFAULT_TTL);
        let owner = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        cache.remember(owner, first, "h1");
        cache.remember(owner, second, "h2");
        let last = cache.last_upload(owner).unwrap();
        assert_eq!(last.dataset_id, second);
        assert_eq!(last.preview_handle, "h2");
        assert!(cache.last_upload(Uuid::new_v4()).is_none());
    }

    #[test]
    fn synthetic_rows_follow_schema_types() {
        let schema: ColumnSchema = [
            ("n", ColumnType::Number),
            ("b", ColumnType::Boolean),
            ("d", ColumnType::Date),
            ("s", ColumnType::String),
        ]
        .into_iter()
        .collect();
        let rows = synthetic_rows_from_schema(&schema, 3);
        assert_eq!(rows.len(), 3);
        assert!(rows[0]["n"].is_number());
        assert!(rows[0]["b"].is_boolean());
        assert_eq!(rows[0]["d"], json!("2024-01-01"));
        assert_eq!(rows[1]["s"], json!("s 2"));
    }

    #[test]
    fn synthetic_rows_recognize_file_name_patterns() {
        let sales = synthetic_rows_from_file_name("Q3_Sales.csv", 2);
        assert!(sales[0].contains_key("revenue"));
        let vehicles = synthetic_rows_from_file_name("vehicle-fleet.json", 2);
        assert!(vehicles[0].contains_key("make"));
        let survey = synthetic_rows_from_file_name("customer survey.csv", 2);
        assert!(survey[0].contains_key("satisfaction"));
        let other = synthetic_rows_from_file_name("misc.csv", 2);
        assert!(other[0].contains_key("label"));
    }

    #[test]
    fn file_name_patterns_match_whole_words_only() {
        for name in ["scorecard.csv", "discarded_items.csv", "autumn.csv", "border_crossings.csv"] {
            let rows = synthetic_rows_from_file_name(name, 1);
            assert!(rows[0].contains_key("id"), "{name} should use the generic shape");
        }
        let cars = synthetic_rows_from_file_name("used_cars.csv", 1);
        assert!(cars[0].contains_key("make"));
        let orders = synthetic_rows_from_file_name("Orders 2024.xlsx", 1);
        assert!(orders[0].contains_key("revenue"));
    }
}
