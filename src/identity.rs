//! Resolving DIDs and handles to identities and profiles.
//!
//! Not used by the live core itself; consumers resolve actors before
//! building query descriptors around them.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use esav_shared::{
    classify_identifier, normalize_handle, ApiError, IdentifierType, Profile, ResolvedIdentity,
};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::storage::{self, SharedStore};

pub const DEFAULT_RESOLVER_ENDPOINT: &str = "https://free-fly-24.deno.dev/";
pub const DEFAULT_PROFILE_ENDPOINT: &str =
    "https://esav.whey.party/xrpc/party.whey.esav.resolveIdentity";

/// How long a cached resolution stays valid.
pub const IDENTITY_CACHE_TTL_MS: i64 = 60 * 60 * 1000;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a DID or handle (a leading `@` is ignored). `Ok(None)` means
    /// the identity does not exist.
    async fn resolve(&self, did_or_handle: &str) -> Result<Option<ResolvedIdentity>, ApiError>;
}

/// Resolver backed by an HTTP endpoint taking `?did=` or `?handle=`.
#[derive(Debug, Clone)]
pub struct HttpIdentityResolver {
    client: Client,
    endpoint: String,
}

impl Default for HttpIdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVER_ENDPOINT)
    }
}

impl HttpIdentityResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn resolve_url(&self, did_or_handle: &str) -> Result<String, ApiError> {
        identifier_url(&self.endpoint, did_or_handle)
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, did_or_handle: &str) -> Result<Option<ResolvedIdentity>, ApiError> {
        let url = self.resolve_url(did_or_handle)?;
        get_optional(&self.client, &url).await
    }
}

/// `{endpoint}?did=..` or `{endpoint}?handle=..`, depending on the input.
fn identifier_url(endpoint: &str, did_or_handle: &str) -> Result<String, ApiError> {
    let input = normalize_handle(did_or_handle);
    let param = match classify_identifier(input) {
        IdentifierType::Did => "did",
        IdentifierType::Handle => "handle",
        IdentifierType::Unknown => {
            return Err(ApiError::InvalidIdentifier(did_or_handle.to_string()))
        }
    };
    Ok(format!("{}?{}={}", endpoint, param, urlencoding::encode(input)))
}

/// GET `url` as JSON, mapping 404 to `Ok(None)`.
async fn get_optional<T: DeserializeOwned>(client: &Client, url: &str) -> Result<Option<T>, ApiError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(ApiError::Http {
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ApiError::Deserialize(e.to_string()))
}

/// A value as written to the durable store, with the time it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistentValue {
    value: String,
    /// Milliseconds since the Unix epoch.
    time: i64,
}

/// Caches another resolver's answers in a [`crate::storage::KeyValueStore`].
///
/// Entries are keyed `handleDid:{input}`; a lookup by handle is also cached
/// under the resolved DID.
pub struct CachedIdentityResolver<R> {
    inner: R,
    store: SharedStore,
    ttl_ms: i64,
}

impl<R: IdentityResolver> CachedIdentityResolver<R> {
    pub fn new(inner: R, store: SharedStore) -> Self {
        Self {
            inner,
            store,
            ttl_ms: IDENTITY_CACHE_TTL_MS,
        }
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    fn cached(&self, key: &str, now: i64) -> Option<ResolvedIdentity> {
        let entry: PersistentValue = storage::load(self.store.as_ref(), key)?;
        if now - entry.time >= self.ttl_ms {
            return None;
        }
        serde_json::from_str(&entry.value).ok()
    }

    fn remember(&self, key: &str, identity: &ResolvedIdentity, now: i64) {
        let Ok(value) = serde_json::to_string(identity) else {
            return;
        };
        let entry = PersistentValue { value, time: now };
        if !storage::save(self.store.as_ref(), key, &entry) {
            tracing::warn!("failed to cache identity under {}", key);
        }
    }
}

#[async_trait]
impl<R: IdentityResolver> IdentityResolver for CachedIdentityResolver<R> {
    async fn resolve(&self, did_or_handle: &str) -> Result<Option<ResolvedIdentity>, ApiError> {
        let input = normalize_handle(did_or_handle);
        let key = cache_key(input);
        let now = Utc::now().timestamp_millis();

        if let Some(identity) = self.cached(&key, now) {
            return Ok(Some(identity));
        }

        let Some(identity) = self.inner.resolve(input).await? else {
            return Ok(None);
        };
        self.remember(&key, &identity, now);
        if !input.starts_with("did:") && !identity.did.is_empty() {
            self.remember(&cache_key(&identity.did), &identity, now);
        }
        Ok(Some(identity))
    }
}

fn cache_key(input: &str) -> String {
    format!("handleDid:{input}")
}

#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Resolve a DID or handle and fetch its Bluesky profile record.
    async fn profile(&self, did_or_handle: &str) -> Result<Option<Profile>, ApiError>;
}

/// Profile lookups against the ESAV `resolveIdentity` endpoint.
#[derive(Debug, Clone)]
pub struct HttpProfileResolver {
    client: Client,
    endpoint: String,
}

impl Default for HttpProfileResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_ENDPOINT)
    }
}

impl HttpProfileResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn profile_url(&self, did_or_handle: &str) -> Result<String, ApiError> {
        Ok(format!(
            "{}&includeBskyProfile=true",
            identifier_url(&self.endpoint, did_or_handle)?
        ))
    }
}

#[async_trait]
impl ProfileResolver for HttpProfileResolver {
    async fn profile(&self, did_or_handle: &str) -> Result<Option<Profile>, ApiError> {
        let url = self.profile_url(did_or_handle)?;
        get_optional(&self.client, &url).await
    }
}

#[derive(Default)]
struct ProfileCache {
    handle_to_did: HashMap<String, String>,
    did_to_profile: HashMap<String, Profile>,
}

/// Keeps profiles in memory for the life of the resolver.
///
/// A handle is answered from cache once a profile for it has been fetched,
/// whichever identifier that fetch used.
pub struct CachedProfileResolver<R> {
    inner: R,
    cache: RwLock<ProfileCache>,
}

impl<R: ProfileResolver> CachedProfileResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: RwLock::new(ProfileCache::default()),
        }
    }

    fn cached(&self, input: &str) -> Option<Profile> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let did = match classify_identifier(input) {
            IdentifierType::Did => input,
            _ => cache.handle_to_did.get(input)?.as_str(),
        };
        cache.did_to_profile.get(did).cloned()
    }
}

#[async_trait]
impl<R: ProfileResolver> ProfileResolver for CachedProfileResolver<R> {
    async fn profile(&self, did_or_handle: &str) -> Result<Option<Profile>, ApiError> {
        let input = normalize_handle(did_or_handle);
        if classify_identifier(input) == IdentifierType::Unknown {
            return Err(ApiError::InvalidIdentifier(did_or_handle.to_string()));
        }
        if let Some(profile) = self.cached(input) {
            return Ok(Some(profile));
        }

        let Some(profile) = self.inner.profile(input).await? else {
            return Ok(None);
        };
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache
            .handle_to_did
            .insert(profile.handle.clone(), profile.did.clone());
        cache
            .did_to_profile
            .insert(profile.did.clone(), profile.clone());
        Ok(Some(profile))
    }
}
