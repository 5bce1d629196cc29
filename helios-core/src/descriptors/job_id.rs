//! Job identifiers
//!
//! A job id has the string form `name:version:hash`. The hash component is
//! derived from the job config, so jobs with the same name and version but
//! different configs remain distinguishable. Abbreviated ids (name only, or
//! name and version) are accepted wherever an operator supplies an id.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of a fully qualified job hash (hex SHA-1).
pub const FULL_HASH_LEN: usize = 40;

/// Length of the abbreviated hash used in short renderings.
pub const SHORT_HASH_LEN: usize = 7;

/// Error returned when a job id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job id: {0}")]
pub struct JobIdParseError(pub String);

/// Unique job identifier.
///
/// Ordering is by name, then version, then hash, with absent components
/// sorting first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    name: String,
    version: Option<String>,
    hash: Option<String>,
}

impl JobId {
    /// Creates an id with a name and version but no hash.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, JobIdParseError> {
        let name = name.into();
        let version = version.into();
        validate_component("name", &name)?;
        validate_component("version", &version)?;
        Ok(Self {
            name,
            version: Some(version),
            hash: None,
        })
    }

    /// Returns a copy of this id carrying the given hash.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Parses a job id with 1 (name), 2 (name:version) or 3
    /// (name:version:hash) components. Any other shape is an error.
    pub fn parse(id: &str) -> Result<Self, JobIdParseError> {
        let parts: Vec<&str> = id.split(':').collect();
        match parts.as_slice() {
            [name] => {
                validate_component("name", name)?;
                Ok(Self {
                    name: (*name).to_string(),
                    version: None,
                    hash: None,
                })
            }
            [name, version] => Self::new(*name, *version),
            [name, version, hash] => {
                if hash.is_empty() {
                    return Err(JobIdParseError(id.to_string()));
                }
                Ok(Self::new(*name, *version)
                    .map_err(|_| JobIdParseError(id.to_string()))?
                    .with_hash(*hash))
            }
            _ => Err(JobIdParseError(id.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// True when name, version and a full-length hash are all present.
    pub fn is_fully_qualified(&self) -> bool {
        self.version.is_some()
            && self.hash.as_ref().is_some_and(|h| h.len() == FULL_HASH_LEN)
    }

    /// Rendering with the hash abbreviated to seven characters.
    pub fn to_short_string(&self) -> String {
        match (&self.version, &self.hash) {
            (Some(version), Some(hash)) => {
                let short = &hash[..hash.len().min(SHORT_HASH_LEN)];
                format!("{}:{}:{}", self.name, version, short)
            }
            (Some(version), None) => format!("{}:{}", self.name, version),
            _ => self.name.clone(),
        }
    }
}

fn validate_component(what: &str, value: &str) -> Result<(), JobIdParseError> {
    if value.is_empty() {
        return Err(JobIdParseError(format!("{what} is empty")));
    }
    if value.contains(':') {
        return Err(JobIdParseError(format!("{what} contains colon: {value}")));
    }
    Ok(())
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.version, &self.hash) {
            (Some(version), Some(hash)) => {
                write!(f, "{}:{}:{}", self.name, version, hash)
            }
            (Some(version), None) => write!(f, "{}:{}", self.name, version),
            _ => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for JobId {
    type Err = JobIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct JobIdVisitor;

        impl Visitor<'_> for JobIdVisitor {
            type Value = JobId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a job id string of the form name:version:hash")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<JobId, E> {
                JobId::parse(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(JobIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fully_qualified() {
        let id = JobId::parse("foo:17:0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(id.name(), "foo");
        assert_eq!(id.version(), Some("17"));
        assert_eq!(
            id.hash(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
        assert!(id.is_fully_qualified());
    }

    #[test]
    fn test_parse_name_only() {
        let id = JobId::parse("a").unwrap();
        assert_eq!(id.name(), "a");
        assert_eq!(id.version(), None);
        assert_eq!(id.hash(), None);
        assert!(!id.is_fully_qualified());
    }

    #[test]
    fn test_parse_rejects_four_parts() {
        assert!(JobId::parse("a:b:c:d").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_components() {
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("a:").is_err());
        assert!(JobId::parse(":b").is_err());
        assert!(JobId::parse("a:b:").is_err());
    }

    #[test]
    fn test_roundtrip_through_string() {
        for s in ["a", "a:b", "a:b:0123456789abcdef0123456789abcdef01234567"] {
            let id = JobId::parse(s).unwrap();
            assert_eq!(id.to_string(), s);
            assert_eq!(JobId::parse(&id.to_string()).unwrap(), id);
        }
    }

    #[test]
    fn test_short_string_truncates_hash() {
        let id = JobId::parse("a:b:0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(id.to_short_string(), "a:b:0123456");
    }

    #[test]
    fn test_ordering_absent_fields_first() {
        let name_only = JobId::parse("a").unwrap();
        let with_version = JobId::parse("a:1").unwrap();
        let with_hash = JobId::parse("a:1:aaaa").unwrap();
        assert!(name_only < with_version);
        assert!(with_version < with_hash);
        assert!(JobId::parse("a:2").unwrap() > with_hash);
        assert!(JobId::parse("b").unwrap() > with_hash);
    }

    #[test]
    fn test_serde_as_bare_string() {
        let id = JobId::parse("a:b:cafe").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"a:b:cafe\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_new_validates() {
        assert!(JobId::new("", "1").is_err());
        assert!(JobId::new("a", "").is_err());
        assert!(JobId::new("a:b", "1").is_err());
        assert!(JobId::new("a", "1:2").is_err());
    }
}
