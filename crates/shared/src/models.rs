//! Identity and record-addressing models used around the live client.

use serde::{Deserialize, Serialize};

/// Result of resolving a DID or handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub did: String,
    pub handle: String,
    pub pds_url: String,
    /// Whether the PDS is hosted by Bluesky.
    #[serde(default)]
    pub bsky_pds: bool,
}

/// An identity together with its `app.bsky.actor.profile` record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub did: String,
    pub handle: String,
    pub pds_url: String,
    #[serde(default)]
    pub profile: ActorProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActorProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<BlobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<BlobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    #[serde(rename = "ref")]
    pub link: BlobLink,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobLink {
    #[serde(rename = "$link")]
    pub cid: String,
}

impl Profile {
    /// Display name, or the handle when the profile has none.
    pub fn display_name(&self) -> &str {
        match self.profile.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.handle,
        }
    }

    /// CID of the avatar blob, if one is set.
    pub fn avatar_cid(&self) -> Option<&str> {
        self.profile.avatar.as_ref().map(|blob| blob.link.cid.as_str())
    }
}

/// What kind of actor identifier a string is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    Did,
    Handle,
    Unknown,
}

/// Strip the leading `@` users tend to type in front of handles.
pub fn normalize_handle(input: &str) -> &str {
    input.strip_prefix('@').unwrap_or(input)
}

/// Classify an identifier as a DID (`did:method:id`) or a handle
/// (`name.tld`, TLD at least two letters).
pub fn classify_identifier(input: &str) -> IdentifierType {
    if input.is_empty() {
        return IdentifierType::Unknown;
    }
    if is_did(input) {
        return IdentifierType::Did;
    }
    if is_handle(input) {
        return IdentifierType::Handle;
    }
    IdentifierType::Unknown
}

fn is_did(input: &str) -> bool {
    let mut parts = input.splitn(3, ':');
    let (Some(scheme), Some(method), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    scheme.eq_ignore_ascii_case("did")
        && !method.is_empty()
        && method.chars().all(|c| c.is_ascii_alphanumeric())
        && !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn is_handle(input: &str) -> bool {
    let Some((name, tld)) = input.rsplit_once('.') else {
        return false;
    };
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// The parts of an `at://did/collection/rkey` record URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub did: String,
    pub collection: String,
    /// Record key; may itself contain `/`.
    pub rkey: String,
}

impl AtUri {
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("at://")?;
        let mut parts = rest.splitn(3, '/');
        let did = parts.next()?;
        let collection = parts.next()?;
        let rkey = parts.next()?;
        Some(Self {
            did: did.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }

    pub fn to_uri(&self) -> String {
        format!("at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

/// Build a namespaced query identifier such as `forum:bsky.app`.
pub fn query_id(prefix: &str, param: &str) -> String {
    format!("{prefix}:{param}")
}
