//! Authoritative service → secret table.
//!
//! Each service lives in its own slot behind its own lock. The outer map
//! lock is only held long enough to find, insert or remove a slot, so
//! validation and rotation of unrelated services never contend on a
//! shared lock. Removing a service empties its slot before dropping it
//! from the map, which makes any in-flight operation holding the slot
//! observe `NotFound` rather than a stale secret.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::error;

use crate::clock::Clock;
use crate::crypto::{DigestKey, SecretDigest, SecretGenerator};
use crate::error::{Error, Result};
use crate::types::{SecretValue, ServiceId, ServiceMetadata};

/// Number of shards in the issued-digest set.
const ISSUED_SHARDS: usize = 16;

/// A stored service: metadata plus the digest of its live secret.
struct ServiceRecord {
    id: ServiceId,
    digest: SecretDigest,
    roles: BTreeSet<String>,
    registered_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl ServiceRecord {
    fn metadata(&self) -> ServiceMetadata {
        ServiceMetadata {
            id: self.id.clone(),
            roles: self.roles.clone(),
            registered_at: self.registered_at,
            rotated_at: self.rotated_at,
            generation: self.generation,
        }
    }
}

/// `None` once the service has been removed.
type Slot = Arc<Mutex<Option<ServiceRecord>>>;

/// In-memory secret store.
///
/// Only keyed digests are kept; plaintext secrets are returned to the
/// caller exactly once, from [`SecretStore::register`] or
/// [`SecretStore::rotate`].
pub struct SecretStore {
    services: RwLock<HashMap<ServiceId, Slot>>,
    key: DigestKey,
    generator: SecretGenerator,
    issued: [Mutex<HashSet<SecretDigest>>; ISSUED_SHARDS],
    max_generation_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl SecretStore {
    /// Creates an empty store.
    ///
    /// The digest key is drawn from the generator's entropy source.
    ///
    /// # Errors
    ///
    /// Returns an error if the entropy source fails.
    pub fn new(
        generator: SecretGenerator,
        max_generation_attempts: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key = DigestKey::generate(generator.entropy())?;
        Ok(Self {
            services: RwLock::new(HashMap::new()),
            key,
            generator,
            issued: std::array::from_fn(|_| Mutex::new(HashSet::new())),
            max_generation_attempts: max_generation_attempts.max(1),
            clock,
        })
    }

    /// Registers a service and returns its first secret.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service is already registered
    /// - No unique secret could be generated
    pub fn register(&self, id: &ServiceId, roles: BTreeSet<String>) -> Result<SecretValue> {
        if self.contains(id) {
            return Err(Error::AlreadyExists { id: id.to_string() });
        }

        let (secret, digest) = self.fresh_secret()?;
        let record = ServiceRecord {
            id: id.clone(),
            digest,
            roles,
            registered_at: self.clock.now(),
            rotated_at: None,
            generation: 1,
        };

        let mut services = self.services.write();
        if services.contains_key(id) {
            return Err(Error::AlreadyExists { id: id.to_string() });
        }
        services.insert(id.clone(), Arc::new(Mutex::new(Some(record))));

        Ok(secret)
    }

    /// Returns the metadata for a service. Never includes the secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not exist.
    pub fn get(&self, id: &ServiceId) -> Result<ServiceMetadata> {
        let slot = self.slot(id)?;
        let guard = slot.lock();
        guard
            .as_ref()
            .map(ServiceRecord::metadata)
            .ok_or_else(|| not_found(id))
    }

    /// Returns the roles assigned to a service.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not exist.
    pub fn roles_of(&self, id: &ServiceId) -> Result<BTreeSet<String>> {
        let slot = self.slot(id)?;
        let guard = slot.lock();
        guard
            .as_ref()
            .map(|record| record.roles.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Checks a supplied secret against the service's live secret.
    ///
    /// A mismatch is `Ok(false)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not exist.
    pub fn validate(&self, id: &ServiceId, supplied: &str) -> Result<bool> {
        let slot = self.slot(id)?;
        let supplied = self.key.digest(supplied.as_bytes());
        let guard = slot.lock();
        guard
            .as_ref()
            .map(|record| record.digest.matches(&supplied))
            .ok_or_else(|| not_found(id))
    }

    /// Replaces a service's secret and returns the new one.
    ///
    /// The new secret is generated before the service's lock is taken; the
    /// swap itself is a single assignment under that lock, so readers see
    /// either the old or the new secret and never neither.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service does not exist
    /// - No unique secret could be generated
    pub fn rotate(&self, id: &ServiceId) -> Result<SecretValue> {
        let slot = self.slot(id)?;
        let (secret, digest) = self.fresh_secret()?;
        let now = self.clock.now();

        let mut guard = slot.lock();
        let record = guard.as_mut().ok_or_else(|| not_found(id))?;
        record.digest = digest;
        record.rotated_at = Some(now);
        record.generation += 1;

        Ok(secret)
    }

    /// Removes a service entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not exist.
    pub fn remove(&self, id: &ServiceId) -> Result<()> {
        let mut services = self.services.write();
        let slot = services.remove(id).ok_or_else(|| not_found(id))?;
        slot.lock().take().map(|_| ()).ok_or_else(|| not_found(id))
    }

    /// Snapshot of the registered identifiers, sorted.
    #[must_use]
    pub fn list_ids(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.services.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Returns true if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if a service is registered.
    #[must_use]
    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.read().contains_key(id)
    }

    fn slot(&self, id: &ServiceId) -> Result<Slot> {
        self.services
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Draws a secret whose digest has never been issued by this store.
    fn fresh_secret(&self) -> Result<(SecretValue, SecretDigest)> {
        for _ in 0..self.max_generation_attempts {
            let secret = self.generator.draw()?;
            let digest = self.key.digest(secret.expose().as_bytes());
            let shard = &self.issued[digest.shard(ISSUED_SHARDS)];
            if shard.lock().insert(digest) {
                return Ok((secret, digest));
            }
        }

        error!(
            attempts = self.max_generation_attempts,
            "secret generation exhausted; entropy source is repeating values"
        );
        Err(Error::GenerationExhausted {
            attempts: self.max_generation_attempts,
        })
    }
}

fn not_found(id: &ServiceId) -> Error {
    Error::NotFound { id: id.to_string() }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("services_count", &self.len())
            .field("key", &"[REDACTED]")
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}
