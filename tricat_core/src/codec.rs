//! Block encoding.
//!
//! Two block kinds make up a content tree:
//!
//! ```text
//! leaf:   [0x00] [data ...]
//! branch: [0x01] [height: u8] [total_size: u64] [count: u32] ([cid: 32] [size: u64]) * count
//! ```
//!
//! Integers are big-endian. `height` is 1 when the children are leaves, and
//! every tree is balanced, so a reader can list all leaves by fetching only
//! branch blocks.

use crate::cid::ContentId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const LEAF_TAG: u8 = 0x00;
const BRANCH_TAG: u8 = 0x01;
const BRANCH_HEADER_LEN: usize = 1 + 1 + 8 + 4;
const LINK_LEN: usize = 32 + 8;

/// Errors produced while decoding a block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty block")]
    Empty,

    #[error("unknown block tag {0:#04x}")]
    UnknownTag(u8),

    #[error("truncated block: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("branch with height 0")]
    ZeroHeight,

    #[error("branch claims {claimed} bytes but links sum to {actual}")]
    SizeMismatch { claimed: u64, actual: u64 },

    #[error("expected a {expected} block")]
    WrongKind { expected: &'static str },
}

/// Reference from a branch to one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub cid: ContentId,
    /// Content bytes under this child.
    pub size: u64,
}

/// A decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Leaf(Bytes),
    Branch {
        height: u8,
        total_size: u64,
        links: Vec<Link>,
    },
}

impl Block {
    /// Content bytes represented by this block (and its subtree).
    pub fn content_size(&self) -> u64 {
        match self {
            Block::Leaf(data) => data.len() as u64,
            Block::Branch { total_size, .. } => *total_size,
        }
    }

    /// Encodes the block.
    pub fn encode(&self) -> Bytes {
        match self {
            Block::Leaf(data) => {
                let mut buf = BytesMut::with_capacity(1 + data.len());
                buf.put_u8(LEAF_TAG);
                buf.put_slice(data);
                buf.freeze()
            }
            Block::Branch {
                height,
                total_size,
                links,
            } => {
                let mut buf = BytesMut::with_capacity(BRANCH_HEADER_LEN + links.len() * LINK_LEN);
                buf.put_u8(BRANCH_TAG);
                buf.put_u8(*height);
                buf.put_u64(*total_size);
                buf.put_u32(links.len() as u32);
                for link in links {
                    buf.put_slice(link.cid.as_bytes());
                    buf.put_u64(link.size);
                }
                buf.freeze()
            }
        }
    }

    /// Encodes the block and computes its identifier.
    pub fn seal(&self) -> (ContentId, Bytes) {
        let encoded = self.encode();
        (ContentId::of(&encoded), encoded)
    }

    /// Decodes a block. Leaf data is a zero-copy slice of `encoded`.
    pub fn decode(encoded: &Bytes) -> Result<Self, CodecError> {
        let tag = *encoded.first().ok_or(CodecError::Empty)?;
        match tag {
            LEAF_TAG => Ok(Block::Leaf(encoded.slice(1..))),
            BRANCH_TAG => Self::decode_branch(encoded),
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    fn decode_branch(encoded: &Bytes) -> Result<Self, CodecError> {
        if encoded.len() < BRANCH_HEADER_LEN {
            return Err(CodecError::Truncated {
                expected: BRANCH_HEADER_LEN,
                actual: encoded.len(),
            });
        }

        let mut buf = &encoded[1..];
        let height = buf.get_u8();
        if height == 0 {
            return Err(CodecError::ZeroHeight);
        }
        let total_size = buf.get_u64();
        let count = buf.get_u32() as usize;

        let expected = BRANCH_HEADER_LEN + count * LINK_LEN;
        if encoded.len() != expected {
            return Err(CodecError::Truncated {
                expected,
                actual: encoded.len(),
            });
        }

        let mut links = Vec::with_capacity(count);
        for _ in 0..count {
            let mut cid = [0u8; 32];
            buf.copy_to_slice(&mut cid);
            let size = buf.get_u64();
            links.push(Link {
                cid: ContentId::from_bytes(cid),
                size,
            });
        }

        // an overflowing sum is rejected even against a claim of u64::MAX
        let summed = links
            .iter()
            .try_fold(0u64, |sum, link| sum.checked_add(link.size));
        if summed != Some(total_size) {
            return Err(CodecError::SizeMismatch {
                claimed: total_size,
                actual: summed.unwrap_or(u64::MAX),
            });
        }

        Ok(Block::Branch {
            height,
            total_size,
            links,
        })
    }

    /// Unwraps a leaf's data.
    pub fn into_leaf(self) -> Result<Bytes, CodecError> {
        match self {
            Block::Leaf(data) => Ok(data),
            Block::Branch { .. } => Err(CodecError::WrongKind { expected: "leaf" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch() -> Block {
        Block::Branch {
            height: 1,
            total_size: 30,
            links: vec![
                Link {
                    cid: ContentId::of(b"a"),
                    size: 10,
                },
                Link {
                    cid: ContentId::of(b"b"),
                    size: 20,
                },
            ],
        }
    }

    #[test]
    fn test_leaf_roundtrip() {
        let leaf = Block::Leaf(Bytes::from_static(b"some data"));
        let decoded = Block::decode(&leaf.encode()).unwrap();
        assert_eq!(decoded, leaf);
        assert_eq!(decoded.content_size(), 9);
    }

    #[test]
    fn test_empty_leaf_is_one_byte() {
        let encoded = Block::Leaf(Bytes::new()).encode();
        assert_eq!(encoded.as_ref(), &[LEAF_TAG]);
    }

    #[test]
    fn test_branch_roundtrip() {
        let block = branch();
        let encoded = block.encode();
        assert_eq!(encoded.len(), BRANCH_HEADER_LEN + 2 * LINK_LEN);
        assert_eq!(Block::decode(&encoded).unwrap(), block);
    }

    #[test]
    fn test_seal_names_the_encoding() {
        let (cid, encoded) = branch().seal();
        assert!(cid.matches(&encoded));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Block::decode(&Bytes::new()), Err(CodecError::Empty));
        assert_eq!(
            Block::decode(&Bytes::from_static(&[0x7f])),
            Err(CodecError::UnknownTag(0x7f))
        );

        let encoded = branch().encode();
        let truncated = encoded.slice(..encoded.len() - 1);
        assert!(matches!(
            Block::decode(&truncated),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let mut raw = BytesMut::from(branch().encode().as_ref());
        // total_size lives right after tag + height
        raw[2..10].copy_from_slice(&31u64.to_be_bytes());
        assert_eq!(
            Block::decode(&raw.freeze()),
            Err(CodecError::SizeMismatch {
                claimed: 31,
                actual: 30
            })
        );
    }

    #[test]
    fn test_decode_rejects_overflowing_link_sizes() {
        let block = Block::Branch {
            height: 1,
            total_size: 5,
            links: vec![
                Link {
                    cid: ContentId::of(b"a"),
                    size: u64::MAX,
                },
                Link {
                    cid: ContentId::of(b"b"),
                    size: 6,
                },
            ],
        };
        assert_eq!(
            Block::decode(&block.encode()),
            Err(CodecError::SizeMismatch {
                claimed: 5,
                actual: u64::MAX
            })
        );

        let Block::Branch { links, .. } = block else {
            unreachable!()
        };
        let saturated = Block::Branch {
            height: 1,
            total_size: u64::MAX,
            links,
        };
        assert!(matches!(
            Block::decode(&saturated.encode()),
            Err(CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_into_leaf() {
        assert!(branch().into_leaf().is_err());
        let data = Block::Leaf(Bytes::from_static(b"x")).into_leaf().unwrap();
        assert_eq!(data.as_ref(), b"x");
    }
}
