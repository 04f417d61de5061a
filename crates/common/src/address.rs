use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters of the SHA-256 digest kept in an address segment.
const HASH_CHARS: usize = 16;

/// Errors from address construction and parsing.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("malformed segment {0:?}: expected \"type:hash\"")]
    MalformedSegment(String),
    #[error("invalid type tag {0:?}: must be lowercase ascii")]
    InvalidTypeTag(String),
    #[error("invalid hash {0:?}: expected {HASH_CHARS} lowercase hex chars")]
    InvalidHash(String),
}

/// One `type:hash` component of an address path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment {
    pub type_tag: String,
    pub hash: String,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_tag, self.hash)
    }
}

/// A stable, content-addressable identifier.
///
/// Derived purely from a type tag plus content bytes, so identical logical
/// content always yields the identical address without a central allocator.
/// Segments form a parent path, outermost first:
/// `universe:ab12cd34ef567890/entity:0011223344556677/component:8899aabbccddeeff`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    segments: Vec<Segment>,
}

impl Address {
    /// Derive an address from a type tag and the content it identifies.
    pub fn for_content(type_tag: &str, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(type_tag.as_bytes());
        hasher.update([0u8]);
        hasher.update(content);
        let digest = format!("{:x}", hasher.finalize());
        Self {
            segments: vec![Segment {
                type_tag: type_tag.to_string(),
                hash: digest[..HASH_CHARS].to_string(),
            }],
        }
    }

    /// Prefix this address with a parent path, producing the nested form.
    pub fn within(&self, parent: &Address) -> Self {
        let mut segments = parent.segments.clone();
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// The final (innermost) segment, which names the addressed object itself.
    pub fn leaf(&self) -> &Segment {
        // Constructors guarantee at least one segment.
        &self.segments[self.segments.len() - 1]
    }

    /// All segments, outermost first.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parse an address string into its structured form.
    ///
    /// Fails on malformed input; never defaults or truncates.
    pub fn parse(s: &str) -> Result<ParsedAddress, AddressError> {
        let addr: Address = s.parse()?;
        let leaf = addr.leaf().clone();
        let find = |tag: &str| {
            addr.segments
                .iter()
                .find(|seg| seg.type_tag == tag)
                .map(|seg| Address {
                    segments: vec![seg.clone()],
                })
        };
        Ok(ParsedAddress {
            universe: find("universe"),
            entity: find("entity"),
            path: addr.segments.clone(),
            type_tag: leaf.type_tag,
            hash: leaf.hash,
        })
    }
}

/// Structured view of a parsed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Type tag of the innermost segment.
    pub type_tag: String,
    /// Hash of the innermost segment.
    pub hash: String,
    /// Enclosing universe segment, if the path carries one.
    pub universe: Option<Address>,
    /// Enclosing entity segment, if the path carries one.
    pub entity: Option<Address>,
    /// Full path, outermost first.
    pub path: Vec<Segment>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let mut segments = Vec::new();
        for part in s.split('/') {
            let (tag, hash) = part
                .split_once(':')
                .ok_or_else(|| AddressError::MalformedSegment(part.to_string()))?;
            if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                return Err(AddressError::InvalidTypeTag(tag.to_string()));
            }
            if hash.len() != HASH_CHARS || !hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
                return Err(AddressError::InvalidHash(hash.to_string()));
            }
            segments.push(Segment {
                type_tag: tag.to_string(),
                hash: hash.to_string(),
            });
        }
        Ok(Self { segments })
    }
}

// Addresses travel as plain strings in saves and logs.
impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_identical_address() {
        let a = Address::for_content("universe", b"alpha");
        let b = Address::for_content("universe", b"alpha");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn different_content_different_address() {
        let a = Address::for_content("universe", b"alpha");
        let b = Address::for_content("universe", b"beta");
        assert_ne!(a, b);
    }

    #[test]
    fn type_tag_is_part_of_identity() {
        let a = Address::for_content("universe", b"alpha");
        let b = Address::for_content("entity", b"alpha");
        assert_ne!(a.leaf().hash, b.leaf().hash);
    }

    #[test]
    fn display_parse_roundtrip() {
        let u = Address::for_content("universe", b"prime");
        let e = Address::for_content("entity", b"alice").within(&u);
        let c = Address::for_content("component", b"needs").within(&e);

        let s = c.to_string();
        let parsed = Address::parse(&s).unwrap();
        assert_eq!(parsed.type_tag, "component");
        assert_eq!(parsed.path.len(), 3);
        assert_eq!(parsed.universe.unwrap().leaf().hash, u.leaf().hash);
        assert_eq!(parsed.entity.unwrap().leaf().hash, e.leaf().hash);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("nocolon").is_err());
        assert!(Address::parse("universe:short").is_err());
        assert!(Address::parse("UNIVERSE:0123456789abcdef").is_err());
        assert!(Address::parse("universe:0123456789ABCDEF").is_err());
    }

    #[test]
    fn serde_as_string() {
        let a = Address::for_content("universe", b"prime");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, format!("\"{a}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
