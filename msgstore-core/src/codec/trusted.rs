//! Trusted payload types
//!
//! Decoding never instantiates an object payload whose type name is not
//! matched by one of these patterns. The built-in `text` and `bytes`
//! payloads are always accepted.

use super::CodecError;
use crate::message::{BYTES_TYPE, TEXT_TYPE};

/// Allow-list of payload type name patterns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedTypes {
    patterns: Vec<String>,
}

impl TrustedTypes {
    /// Patterns use `*` as a wildcard anywhere: `billing.*`, `*.Invoice`,
    /// `billing.*.v2`. A lone `*` trusts every type.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Only the built-in payload types
    pub fn builtin_only() -> Self {
        Self::default()
    }

    pub fn trust_all() -> Self {
        Self::new(["*"])
    }

    pub fn add_pattern(&mut self, pattern: impl Into<String>) {
        self.patterns.push(pattern.into());
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_trusted(&self, type_name: &str) -> bool {
        type_name == TEXT_TYPE
            || type_name == BYTES_TYPE
            || self.patterns.iter().any(|p| simple_match(p, type_name))
    }

    /// Gate for writing an object payload
    ///
    /// `text` and `bytes` name the built-in payloads on the wire, so an
    /// object using either name would be read back as something else.
    pub(super) fn check_object_type(&self, type_name: &str) -> Result<(), CodecError> {
        if type_name == TEXT_TYPE || type_name == BYTES_TYPE {
            return Err(CodecError::Serialization(format!(
                "object payload type '{}' is reserved for built-in payloads",
                type_name
            )));
        }
        if !self.is_trusted(type_name) {
            return Err(CodecError::Serialization(format!(
                "payload type '{}' is not in the trusted types",
                type_name
            )));
        }
        Ok(())
    }
}

fn simple_match(pattern: &str, candidate: &str) -> bool {
    let Some(first) = pattern.find('*') else {
        return pattern == candidate;
    };

    if first > 0 {
        return candidate.starts_with(&pattern[..first])
            && simple_match(&pattern[first..], &candidate[first..]);
    }

    let rest = &pattern[1..];
    if rest.is_empty() {
        return true;
    }

    match rest.find('*') {
        None => candidate.ends_with(rest),
        Some(0) => simple_match(rest, candidate),
        Some(next) => {
            let part = &rest[..next];
            candidate
                .match_indices(part)
                .any(|(i, _)| simple_match(&rest[next..], &candidate[i + part.len()..]))
        }
    }
}
