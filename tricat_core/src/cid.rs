//! Content identifiers.

/// Content-derived handle of a block: the BLAKE3 digest of its encoding.
///
/// Identical bytes always produce the identical identifier, on any node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Computes the identifier of an encoded block.
    pub fn of(encoded: &[u8]) -> Self {
        Self(*blake3::hash(encoded).as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns true if `encoded` hashes to this identifier.
    pub fn matches(&self, encoded: &[u8]) -> bool {
        Self::of(encoded) == *self
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentId(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_deterministic() {
        assert_eq!(ContentId::of(b"hello"), ContentId::of(b"hello"));
        assert_ne!(ContentId::of(b"hello"), ContentId::of(b"hello!"));
    }

    #[test]
    fn test_content_id_display() {
        let cid = ContentId::from_bytes([0x0f; 32]);
        assert_eq!(cid.to_string().len(), 64);
        assert!(cid.to_string().starts_with("0f0f"));
        assert_eq!(format!("{cid:?}"), "ContentId(0f0f0f0f)");
    }

    #[test]
    fn test_matches() {
        let cid = ContentId::of(b"block");
        assert!(cid.matches(b"block"));
        assert!(!cid.matches(b"blocc"));
    }
}
