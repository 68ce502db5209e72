//! Wire types for the mesh directory synchronizer.
//!
//! Every peer-to-peer message is a length-prefixed, deflate-compressed JSON
//! blob (see `meshsync_net`'s framed channel); this crate owns the shapes of
//! those JSON payloads so every crate in the workspace agrees on them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod discovery;

/// A single instruction for reconstructing a file from a base plus a delta.
///
/// Encoded on the wire as a bare integer (`BlockRef`) or a base64 string
/// (`Literal`) inside a JSON array — never as a tagged object — so a
/// `delta` field round-trips as `[0, 1, "aGVsbG8=", 4]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaItem {
    /// Reuse block `index` verbatim from the receiver's base file.
    BlockRef(u64),
    /// Literal bytes with no counterpart in the base file.
    Literal(Vec<u8>),
}

impl Serialize for DeltaItem {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::Engine;
        match self {
            DeltaItem::BlockRef(index) => serializer.serialize_u64(*index),
            DeltaItem::Literal(bytes) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }
    }
}

impl<'de> Deserialize<'de> for DeltaItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DeltaItemVisitor;

        impl serde::de::Visitor<'_> for DeltaItemVisitor {
            type Value = DeltaItem;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a block index (integer) or base64-encoded literal (string)")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(DeltaItem::BlockRef(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(DeltaItem::BlockRef)
                    .map_err(|_| E::custom("negative block index"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(v)
                    .map(DeltaItem::Literal)
                    .map_err(|e| E::custom(format!("invalid base64 literal: {e}")))
            }
        }

        deserializer.deserialize_any(DeltaItemVisitor)
    }
}

/// Error returned when a raw JSON value can't be interpreted as a [`DeltaItem`].
#[derive(Debug, thiserror::Error)]
pub enum DeltaCodecError {
    #[error("delta element is neither an integer nor a string: {0}")]
    UnsupportedElement(serde_json::Value),
}

/// Serialize a delta (as produced by `meshsync_store::generate_delta`) into
/// the JSON-safe list carried on the wire.
///
/// Builds each `Value` directly rather than through `serde_json::to_value`,
/// since `DeltaItem`'s shape (a bare integer or a bare string) is simple
/// enough to construct without a fallible round-trip through the
/// serializer.
pub fn serialize_delta(delta: &[DeltaItem]) -> Vec<serde_json::Value> {
    use base64::Engine;
    delta
        .iter()
        .map(|item| match item {
            DeltaItem::BlockRef(index) => serde_json::Value::Number((*index).into()),
            DeltaItem::Literal(bytes) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
        })
        .collect()
}

/// Inverse of [`serialize_delta`].
pub fn deserialize_delta(raw: &[serde_json::Value]) -> Result<Vec<DeltaItem>, DeltaCodecError> {
    raw.iter()
        .map(|v| {
            serde_json::from_value(v.clone())
                .map_err(|_| DeltaCodecError::UnsupportedElement(v.clone()))
        })
        .collect()
}

/// The action carried by a live update or a reconciliation delta entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "MODIFY")]
    Modify,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "RENAME")]
    Rename,
}

/// One entry of a [`DirectoryManifest`] (spec §3 data model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub mtime: f64,
    pub size: u64,
    /// base64(compressed signature bytes), as produced by the signature store's `save`.
    pub signature: String,
}

/// A snapshot of a peer's directory, keyed by forward-slash relative path.
pub type DirectoryManifest = HashMap<String, ManifestEntry>;

/// One entry of a `DELTA_TRANSFER` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaTransferEntry {
    pub delta: Vec<DeltaItem>,
    pub mtime: f64,
    pub action: Action,
    pub is_full_file: bool,
}

/// Payload of a `DELTA_TRANSFER` message, keyed by relative path.
pub type DeltaTransferPayload = HashMap<String, DeltaTransferEntry>;

/// Payload of a `MODIFICATION_UPDATE` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationUpdate {
    pub file_path: String,
    pub action: Action,
    pub mtime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Vec<DeltaItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_full_file: Option<bool>,
}

/// The three message types exchanged over a framed channel.
///
/// Serializes as `{"type": "...", "payload": ...}` via serde's adjacently
/// tagged enum representation, matching spec.md §6 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    #[serde(rename = "DIRECTORY_STATE")]
    DirectoryState(DirectoryManifest),
    #[serde(rename = "DELTA_TRANSFER")]
    DeltaTransfer(DeltaTransferPayload),
    #[serde(rename = "MODIFICATION_UPDATE")]
    ModificationUpdate(ModificationUpdate),
}
