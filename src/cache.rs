//! File-backed memoization of call results.
//!
//! Each memoized call is described by a [`CallSignature`]: an identity string
//! plus positional and keyword arguments. The signature is canonicalized to
//! JSON (object keys sorted, unserializable values replaced by their type
//! name) and hashed with SHA-256. The hex digest names a single JSON file in
//! the cache directory holding the call's result.
//!
//! There is no expiry and no locking. Two writers racing on the same key
//! both compute and the last one wins, which is harmless as long as the
//! memoized call gives equivalent answers for equal signatures.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

// ============================================================================
// Call Signature
// ============================================================================

/// Canonical description of a memoized call.
///
/// Identity built with [`CallSignature::method`] uses the *type name* of the
/// resolver, not the instance. Two distinct resolver values of the same type
/// asking the same question with equal arguments share one cache entry, even
/// if they were configured differently (e.g. different models).
#[derive(Debug, Clone, PartialEq)]
pub struct CallSignature {
    identity: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl CallSignature {
    /// Signature with a free-form identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Signature for `method` on resolver type `R`.
    pub fn method<R: ?Sized>(method: &str) -> Self {
        Self::new(format!("{}_{method}", short_type_name::<R>()))
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(canonical(value));
        self
    }

    /// Add a keyword argument. Insertion order does not affect the key.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.kwargs.insert(name.to_string(), canonical(value));
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Hex SHA-256 digest of `identity_args_kwargs`.
    pub fn key(&self) -> String {
        let args = Value::Array(self.args.clone());
        let kwargs = Value::Object(
            self.kwargs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        );
        let key_string = format!("{}_{}_{}", self.identity, args, kwargs);

        let mut hasher = Sha256::new();
        hasher.update(key_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Canonical JSON for a value: sorted object keys, or the type name when
/// the value cannot be represented as JSON.
pub fn canonical<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => sort_keys(v),
        Err(_) => Value::String(short_type_name::<T>().to_string()),
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Last path segment of a type name, without generic parameters.
///
/// `alloc::vec::Vec<u8>` becomes `Vec`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ============================================================================
// Cache Store
// ============================================================================

/// Directory of memoized results, one JSON file per [`CallSignature`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `signature`.
    pub fn path_for(&self, signature: &CallSignature) -> PathBuf {
        self.dir.join(format!("{}.json", signature.key()))
    }

    /// Return the memoized result for `signature`, or run `compute` and
    /// persist its result.
    pub async fn get_or_compute<T, F, Fut>(&self, signature: &CallSignature, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(hit) = self.read(signature) {
            return hit;
        }

        let result = compute().await;
        self.write(signature, &result);
        result
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but a `None` result is
    /// returned without being persisted, so the call is retried next time.
    pub async fn get_or_compute_option<T, F, Fut>(
        &self,
        signature: &CallSignature,
        compute: F,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if let Some(hit) = self.read(signature) {
            return Some(hit);
        }

        let result = compute().await?;
        self.write(signature, &result);
        Some(result)
    }

    /// Read a cached result. Unreadable or mis-shaped entries are deleted.
    pub fn read<T: DeserializeOwned>(&self, signature: &CallSignature) -> Option<T> {
        let path = self.path_for(signature);
        if !path.exists() {
            return None;
        }

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<T>(&text).map_err(|e| e.to_string()));

        match parsed {
            Ok(value) => {
                debug!(identity = signature.identity(), "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "Discarding corrupted cache entry: {e}"
                );
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), "Failed to remove cache entry: {e}");
                }
                None
            }
        }
    }

    /// Persist a result. Failures are logged and otherwise ignored.
    pub fn write<T: Serialize + ?Sized>(&self, signature: &CallSignature, value: &T) {
        let text = match serde_json::to_string_pretty(value) {
            Ok(text) => text,
            Err(e) => {
                warn!(identity = signature.identity(), "Could not cache result: {e}");
                return;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), "Could not create cache directory: {e}");
            return;
        }

        let path = self.path_for(signature);
        if let Err(e) = std::fs::write(&path, text) {
            warn!(path = %path.display(), "Could not write cache entry: {e}");
        }
    }

    /// Remove the entry for `signature`. Returns whether a file was removed.
    pub fn invalidate(&self, signature: &CallSignature) -> bool {
        std::fs::remove_file(self.path_for(signature)).is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
