//! The identifier space (§4.1): a 160-bit ring derived from SHA-1, compared
//! as unsigned integers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

/// A point on the 160-bit identifier ring.
///
/// Byte arrays of equal length compare lexicographically the same way their
/// big-endian integer interpretation would, so plain derived `Ord` gives us
/// unsigned ring-position comparison for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 20]);

impl NodeId {
    /// The bootstrap node's id, irrespective of its own `ip:port` hash
    /// (§9 "Coordinator id of 0", preserved for wire compatibility).
    pub const ZERO: NodeId = NodeId([0u8; 20]);

    pub fn of(s: &str) -> NodeId {
        let mut hasher = Sha1::new();
        hasher.update(s.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        NodeId(bytes)
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<NodeId, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let mut arr = [0u8; 20];
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        arr.copy_from_slice(&bytes);
        Ok(NodeId(arr))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Returns whether `h` falls in the circular half-open interval `(start, end]`.
///
/// This is the single definition used both for ownership (`§4.1`, with
/// `start = predecessor.id`, `end = self.id`) and for computing which keys
/// must move on join/transfer (`original_source/chordify/routes/join.py::is_key_in_range`).
pub fn in_interval(h: NodeId, start: NodeId, end: NodeId) -> bool {
    if start < end {
        start < h && h <= end
    } else {
        h > start || h <= end
    }
}
