//! ESAV Live wire protocol.
//!
//! Every frame is a JSON text message tagged by its `type` field.
//!
//! Client → server: `subscribe`, `unsubscribe`, `pong`.
//! Server → client: `query-delta`, `ping`, `error`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// An indexed record as the server sends it.
///
/// Metadata fields are optional because the server only guarantees the
/// record body; everything that is not metadata lands in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDoc {
    #[serde(rename = "$metadata.uri", default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(rename = "$metadata.cid", default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(rename = "$metadata.did", default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    #[serde(
        rename = "$metadata.collection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub collection: Option<String>,
    #[serde(rename = "$metadata.rkey", default, skip_serializing_if = "Option::is_none")]
    pub rkey: Option<String>,
    #[serde(
        rename = "$metadata.indexedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub indexed_at: Option<String>,
    /// The untouched repository record, when the index kept it.
    #[serde(rename = "$raw", default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Map<String, Value>>,
    /// Record-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl QueryDoc {
    /// Look up a record-specific field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Look up a record-specific field that is expected to be a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// A document as held in the client cache: content hash plus body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsavDocument {
    pub cid: String,
    pub doc: QueryDoc,
}

/// Latest known result of one live query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    /// Consistency token for resuming the subscription.
    pub ecid: String,
    /// Document URIs in server order.
    pub result: Vec<String>,
}

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        query_id: String,
        esquery: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ecid: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { query_id: String },
    Pong,
}

impl ClientMessage {
    pub fn subscribe(query_id: impl Into<String>, esquery: Value, ecid: Option<String>) -> Self {
        ClientMessage::Subscribe {
            query_id: query_id.into(),
            esquery,
            ecid,
        }
    }

    pub fn unsubscribe(query_id: impl Into<String>) -> Self {
        ClientMessage::Unsubscribe {
            query_id: query_id.into(),
        }
    }

    /// The query this message is about, if any.
    pub fn query_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Subscribe { query_id, .. } | ClientMessage::Unsubscribe { query_id } => {
                Some(query_id.as_str())
            }
            ClientMessage::Pong => None,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// Messages the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    QueryDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        documents: Option<HashMap<String, EsavDocument>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queries: Option<HashMap<String, QueryState>>,
    },
    Ping,
    Error { error: String },
}

impl ServerMessage {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
