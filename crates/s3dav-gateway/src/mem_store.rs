//! In-memory S3-compatible object store.
//!
//! Implements [`ObjectStore`] with S3 listing semantics (non-recursive
//! listings roll keys up into `/`-terminated common prefixes). Used as the
//! store behind tests and local runs; failure injection and per-operation
//! call counters let tests observe exactly which store calls were issued.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::store::{
    BucketInfo, ListOptions, ObjectBody, ObjectInfo, ObjectReader, ObjectStore, StoreError,
    StoreResult,
};

/// Store operation kinds, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// ListBuckets
    ListBuckets,
    /// HeadBucket
    BucketExists,
    /// CreateBucket
    MakeBucket,
    /// DeleteBucket
    RemoveBucket,
    /// ListObjects
    ListObjects,
    /// GetObject
    GetObject,
    /// PutObject
    PutObject,
    /// DeleteObject
    RemoveObject,
    /// CopyObject
    CopyObject,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: SystemTime,
}

#[derive(Debug)]
struct BucketState {
    creation_date: SystemTime,
    objects: BTreeMap<String, StoredObject>,
}

impl BucketState {
    fn new() -> Self {
        Self {
            creation_date: SystemTime::now(),
            objects: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct FailPoint {
    op: StoreOp,
    key: Option<String>,
    error: StoreError,
}

fn internal_error() -> StoreError {
    StoreError::Transport {
        reason: "store lock poisoned".to_string(),
    }
}

fn no_such_bucket(bucket: &str) -> StoreError {
    StoreError::service("NoSuchBucket", "The specified bucket does not exist", bucket)
}

fn no_such_key(bucket: &str, key: &str) -> StoreError {
    StoreError::service(
        "NoSuchKey",
        "The specified key does not exist",
        format!("{bucket}/{key}"),
    )
}

/// S3-like object store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    buckets: Arc<RwLock<HashMap<String, BucketState>>>,
    failures: Mutex<Vec<FailPoint>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given (empty) buckets.
    pub fn with_buckets(names: &[&str]) -> Self {
        let store = Self::new();
        if let Ok(mut buckets) = store.buckets.write() {
            for name in names {
                buckets.insert(name.to_string(), BucketState::new());
            }
        }
        store
    }

    fn validate_bucket_name(name: &str) -> StoreResult<()> {
        let invalid = || {
            StoreError::service("InvalidBucketName", "The specified bucket is not valid", name)
        };
        if name.len() < 3 || name.len() > 63 {
            return Err(invalid());
        }
        let edge_ok =
            |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(invalid());
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(invalid());
        }
        Ok(())
    }

    /// Makes every later `op` fail with `error`, optionally only for one key.
    pub fn fail_on(&self, op: StoreOp, key: Option<&str>, error: StoreError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(FailPoint {
                op,
                key: key.map(str::to_string),
                error,
            });
        }
    }

    /// Makes every object deletion take `latency` before it completes.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.latency.lock() {
            *current = Some(latency);
        }
    }

    /// Highest number of object deletions that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn track_in_flight(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// How many times `op` was called.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Calls that modify the store (put, remove, copy, bucket create/remove).
    pub fn mutating_calls(&self) -> usize {
        [
            StoreOp::PutObject,
            StoreOp::RemoveObject,
            StoreOp::CopyObject,
            StoreOp::MakeBucket,
            StoreOp::RemoveBucket,
        ]
        .into_iter()
        .map(|op| self.calls(op))
        .sum()
    }

    /// Stores an object directly, bypassing counters and failure injection.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets
                .entry(bucket.to_string())
                .or_insert_with(BucketState::new)
                .objects
                .insert(
                    key.to_string(),
                    StoredObject {
                        data: data.into(),
                        last_modified: SystemTime::now(),
                    },
                );
        }
    }

    /// Object contents, bypassing counters and failure injection.
    pub fn contents(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let buckets = self.buckets.read().ok()?;
        buckets
            .get(bucket)?
            .objects
            .get(key)
            .map(|o| o.data.clone())
    }

    /// Every key in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .ok()
            .and_then(|b| b.get(bucket).map(|bs| bs.objects.keys().cloned().collect()))
            .unwrap_or_default()
    }

    fn enter(&self, op: StoreOp, key: Option<&str>) -> StoreResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
        let failures = self.failures.lock().map_err(|_| internal_error())?;
        for fp in failures.iter() {
            if fp.op != op {
                continue;
            }
            match (&fp.key, key) {
                (None, _) => return Err(fp.error.clone()),
                (Some(want), Some(got)) if want == got => return Err(fp.error.clone()),
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        self.enter(StoreOp::ListBuckets, None)?;
        let buckets = self.buckets.read().map_err(|_| internal_error())?;
        let mut list: Vec<BucketInfo> = buckets
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                creation_date: b.creation_date,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        self.enter(StoreOp::BucketExists, Some(bucket))?;
        let buckets = self.buckets.read().map_err(|_| internal_error())?;
        Ok(buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.enter(StoreOp::MakeBucket, Some(bucket))?;
        Self::validate_bucket_name(bucket)?;
        let mut buckets = self.buckets.write().map_err(|_| internal_error())?;
        if buckets.contains_key(bucket) {
            return Err(StoreError::service(
                "BucketAlreadyOwnedByYou",
                "Your previous request to create the named bucket succeeded",
                bucket,
            ));
        }
        buckets.insert(bucket.to_string(), BucketState::new());
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.enter(StoreOp::RemoveBucket, Some(bucket))?;
        let mut buckets = self.buckets.write().map_err(|_| internal_error())?;
        match buckets.get(bucket) {
            None => Err(no_such_bucket(bucket)),
            Some(bs) if !bs.objects.is_empty() => Err(StoreError::service(
                "BucketNotEmpty",
                "The bucket you tried to delete is not empty",
                bucket,
            )),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_objects(&self, bucket: &str, opts: &ListOptions) -> StoreResult<Vec<ObjectInfo>> {
        self.enter(StoreOp::ListObjects, Some(bucket))?;
        let buckets = self.buckets.read().map_err(|_| internal_error())?;
        let bs = buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;

        let mut entries: BTreeMap<String, ObjectInfo> = BTreeMap::new();
        for (key, obj) in bs
            .objects
            .range(opts.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&opts.prefix))
        {
            let rest = &key[opts.prefix.len()..];
            if !opts.recursive {
                if let Some(pos) = rest.find('/') {
                    let common = format!("{}{}", opts.prefix, &rest[..=pos]);
                    let info = entries.entry(common.clone()).or_insert(ObjectInfo {
                        key: common,
                        size: 0,
                        last_modified: obj.last_modified,
                    });
                    if obj.last_modified > info.last_modified {
                        info.last_modified = obj.last_modified;
                    }
                    continue;
                }
            }
            entries.insert(
                key.clone(),
                ObjectInfo {
                    key: key.clone(),
                    size: obj.data.len() as u64,
                    last_modified: obj.last_modified,
                },
            );
        }

        let mut list: Vec<ObjectInfo> = entries.into_values().collect();
        if opts.max_keys > 0 {
            list.truncate(opts.max_keys);
        }
        Ok(list)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Box<dyn ObjectReader>> {
        self.enter(StoreOp::GetObject, Some(key))?;
        let buckets = self.buckets.read().map_err(|_| internal_error())?;
        let bs = buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        let obj = bs
            .objects
            .get(key)
            .ok_or_else(|| no_such_key(bucket, key))?;
        Ok(Box::new(Cursor::new(obj.data.clone())))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ObjectBody,
        size: u64,
    ) -> StoreResult<()> {
        self.enter(StoreOp::PutObject, Some(key))?;
        let mut data = Vec::with_capacity(size as usize);
        body.read_to_end(&mut data)
            .await
            .map_err(|e| StoreError::Transport {
                reason: e.to_string(),
            })?;
        if data.len() as u64 != size {
            return Err(StoreError::service(
                "IncompleteBody",
                format!("expected {} bytes, got {}", size, data.len()),
                format!("{bucket}/{key}"),
            ));
        }
        let mut buckets = self.buckets.write().map_err(|_| internal_error())?;
        let bs = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        bs.objects.insert(
            key.to_string(),
            StoredObject {
                data: Bytes::from(data),
                last_modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.enter(StoreOp::RemoveObject, Some(key))?;
        let _in_flight = self.track_in_flight().await;
        let mut buckets = self.buckets.write().map_err(|_| internal_error())?;
        let bs = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        bs.objects.remove(key);
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        self.enter(StoreOp::CopyObject, Some(src_key))?;
        let mut buckets = self.buckets.write().map_err(|_| internal_error())?;
        let data = buckets
            .get(src_bucket)
            .ok_or_else(|| no_such_bucket(src_bucket))?
            .objects
            .get(src_key)
            .ok_or_else(|| no_such_key(src_bucket, src_key))?
            .data
            .clone();
        let dst = buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| no_such_bucket(dst_bucket))?;
        dst.objects.insert(
            dst_key.to_string(),
            StoredObject {
                data,
                last_modified: SystemTime::now(),
            },
        );
        Ok(())
    }
}
