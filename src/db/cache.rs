//! Read-through caches for license-side lookups.
//!
//! The public license API is read-heavy: installed clients poll /check and
//! /version far more often than anything writes. One shared cache covers the
//! three license-side tables (licenses, activations, license_meta), keyed by
//! license id with a key -> id index in front. Every write path invalidates
//! the touched license before committing its response.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::models::{Activation, License, LicenseMeta};

const DEFAULT_CAPACITY: u64 = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct LicenseCache {
    /// license id -> license row
    licenses: Cache<String, Arc<License>>,
    /// license key -> license id (hop into `licenses`)
    key_index: Cache<String, String>,
    /// license id -> activation rows
    activations: Cache<String, Arc<Vec<Activation>>>,
    /// license id -> meta rows
    meta: Cache<String, Arc<Vec<LicenseMeta>>>,
}

impl LicenseCache {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_settings(max_capacity: u64, ttl: Duration) -> Self {
        fn build<V: Clone + Send + Sync + 'static>(
            max_capacity: u64,
            ttl: Duration,
        ) -> Cache<String, V> {
            Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build()
        }
        Self {
            licenses: build(max_capacity, ttl),
            key_index: build(max_capacity, ttl),
            activations: build(max_capacity, ttl),
            meta: build(max_capacity, ttl),
        }
    }

    pub fn get_license(&self, license_id: &str) -> Option<Arc<License>> {
        self.licenses.get(license_id)
    }

    pub fn get_license_by_key(&self, key: &str) -> Option<Arc<License>> {
        let id = self.key_index.get(key)?;
        self.licenses.get(&id)
    }

    pub fn store_license(&self, license: &License) {
        self.key_index
            .insert(license.key.clone(), license.id.clone());
        self.licenses
            .insert(license.id.clone(), Arc::new(license.clone()));
    }

    pub fn get_activations(&self, license_id: &str) -> Option<Arc<Vec<Activation>>> {
        self.activations.get(license_id)
    }

    pub fn store_activations(&self, license_id: &str, rows: Vec<Activation>) {
        self.activations
            .insert(license_id.to_string(), Arc::new(rows));
    }

    pub fn get_meta(&self, license_id: &str) -> Option<Arc<Vec<LicenseMeta>>> {
        self.meta.get(license_id)
    }

    pub fn store_meta(&self, license_id: &str, rows: Vec<LicenseMeta>) {
        self.meta.insert(license_id.to_string(), Arc::new(rows));
    }

    /// Drop every cached view of a license. Called before any write to the
    /// license, its activations, or its meta is observable.
    pub fn invalidate_license(&self, license_id: &str) {
        if let Some(license) = self.licenses.get(license_id) {
            self.key_index.invalidate(&license.key);
        }
        self.licenses.invalidate(license_id);
        self.activations.invalidate(license_id);
        self.meta.invalidate(license_id);
    }

    pub fn invalidate_all(&self) {
        self.licenses.invalidate_all();
        self.key_index.invalidate_all();
        self.activations.invalidate_all();
        self.meta.invalidate_all();
    }
}

impl Default for LicenseCache {
    fn default() -> Self {
        Self::new()
    }
}
