use crate::error::Error;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde_json::Value;
use std::{convert::TryFrom, mem::size_of};

/// Helper type that allows simple serialization and deserialization of byte vectors
/// that are represented as hex strings in JSON.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(value: Vec<u8>) -> Self {
        HexBytes(value)
    }
}

impl From<HexBytes> for Vec<u8> {
    fn from(v: HexBytes) -> Self {
        v.0
    }
}

impl From<HexBytes> for Value {
    fn from(eb: HexBytes) -> Self {
        Into::<String>::into(eb).into()
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Odd length sequences are accepted by prepending a `0` nibble, some pools send
/// extranonce1 that way.
fn hex_decode(s: &str) -> Result<Vec<u8>, Error> {
    if s.len() % 2 != 0 {
        Ok(hex::decode(format!("0{s}"))?)
    } else {
        Ok(hex::decode(s)?)
    }
}

impl TryFrom<&str> for HexBytes {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        Ok(HexBytes(hex_decode(value)?))
    }
}

impl From<HexBytes> for String {
    fn from(bytes: HexBytes) -> String {
        hex::encode(bytes.0)
    }
}

impl std::fmt::Display for HexBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// A `u32` written as 8 hex chars in big endian order (`version`, `nbits`, `ntime`, `nonce`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HexU32Be(pub u32);

impl From<HexU32Be> for Value {
    fn from(eu: HexU32Be) -> Self {
        Into::<String>::into(eu).into()
    }
}

impl TryFrom<&str> for HexU32Be {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        let bytes = hex_decode(value)?;
        if bytes.len() != size_of::<u32>() {
            return Err(Error::InvalidLength {
                expected: size_of::<u32>(),
                actual: bytes.len(),
            });
        }
        Ok(HexU32Be(BigEndian::read_u32(&bytes)))
    }
}

impl From<HexU32Be> for String {
    fn from(v: HexU32Be) -> Self {
        format!("{:08x}", v.0)
    }
}

/// PrevHash in Stratum V1 has brain-damaged serialization as it swaps bytes of every u32 word
/// into big endian. Therefore, we need a special type for it.
///
/// The inner value is the hash in block header (internal) byte order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrevHash(pub [u8; 32]);

impl PrevHash {
    /// The hash in the order block explorers display it.
    pub fn to_display_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }
}

impl TryFrom<&str> for PrevHash {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        let stratum_order = hex_decode(value)?;
        if stratum_order.len() != 32 {
            return Err(Error::InvalidLength {
                expected: 32,
                actual: stratum_order.len(),
            });
        }
        let mut inner = [0u8; 32];
        // every word goes from big endian to little endian byte order
        for (src, dst) in stratum_order
            .chunks(size_of::<u32>())
            .zip(inner.chunks_mut(size_of::<u32>()))
        {
            LittleEndian::write_u32(dst, BigEndian::read_u32(src));
        }
        Ok(PrevHash(inner))
    }
}

impl From<PrevHash> for Value {
    fn from(ph: PrevHash) -> Self {
        Into::<String>::into(ph).into()
    }
}

impl From<PrevHash> for String {
    fn from(v: PrevHash) -> Self {
        let mut stratum_order = [0u8; 32];
        for (src, dst) in v
            .0
            .chunks(size_of::<u32>())
            .zip(stratum_order.chunks_mut(size_of::<u32>()))
        {
            BigEndian::write_u32(dst, LittleEndian::read_u32(src));
        }
        hex::encode(stratum_order)
    }
}

/// One hash of a merkle branch, exactly 32 bytes in internal byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerkleNode(pub [u8; 32]);

impl TryFrom<&str> for MerkleNode {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        let bytes = hex_decode(value)?;
        let inner: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(MerkleNode(inner))
    }
}

impl From<MerkleNode> for Value {
    fn from(node: MerkleNode) -> Self {
        hex::encode(node.0).into()
    }
}
