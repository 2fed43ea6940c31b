use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{JitError, JitResult};

/// Compiler options; part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    pub opt_level: u8,
    pub vectorize: bool,
    pub extra: BTreeMap<String, String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: 2,
            vectorize: true,
            extra: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    /// Feeds every option into `hasher` with length-prefixed strings, so
    /// distinct option maps never share an encoding.
    pub fn hash_into(&self, hasher: &mut Sha1) {
        hasher.update([self.opt_level, u8::from(self.vectorize)]);
        hasher.update((self.extra.len() as u64).to_le_bytes());
        for (key, value) in &self.extra {
            update_prefixed(hasher, key);
            update_prefixed(hasher, value);
        }
    }
}

fn update_prefixed(hasher: &mut Sha1, text: &str) {
    hasher.update((text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
}

/// Source text plus entry point to compile. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationRequest {
    source: Arc<str>,
    entry_point: String,
    options: CompileOptions,
    location: Option<u64>,
}

impl CompilationRequest {
    pub fn new(source: impl Into<Arc<str>>, entry_point: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            entry_point: entry_point.into(),
            options: CompileOptions::default(),
            location: None,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Call-site identifier used by [`KeyPolicy::Location`].
    pub fn with_location(mut self, location: u64) -> Self {
        self.location = Some(location);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn location(&self) -> Option<u64> {
        self.location
    }

    /// Rejects requests no compiler could accept.
    pub fn validate(&self) -> JitResult<()> {
        if self.entry_point.trim().is_empty() {
            return Err(JitError::compilation(
                "compiled kernel must name exactly one entry point",
            ));
        }
        if self.source.trim().is_empty() {
            return Err(JitError::compilation("compilation source is empty"));
        }
        Ok(())
    }

    pub fn cache_key(&self, policy: KeyPolicy) -> CacheKey {
        match (policy, self.location) {
            (KeyPolicy::Location, Some(location)) => CacheKey::from_location(location),
            _ => CacheKey::fingerprint(self),
        }
    }
}

/// How requests map onto cache entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Hash of source, entry point and options.
    #[default]
    Content,
    /// Call-site identifier; requests without one fall back to content.
    Location,
}

impl FromStr for KeyPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "content" => Ok(KeyPolicy::Content),
            "location" => Ok(KeyPolicy::Location),
            other => Err(format!("unknown key policy `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn fingerprint(request: &CompilationRequest) -> Self {
        let mut hasher = Sha1::new();
        update_prefixed(&mut hasher, &request.source);
        update_prefixed(&mut hasher, &request.entry_point);
        request.options.hash_into(&mut hasher);
        Self::new(format!("{:x}", hasher.finalize()))
    }

    pub fn from_location(location: u64) -> Self {
        Self::new(format!("loc:{location:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_changes_with_source_entry_and_options() {
        let base = CompilationRequest::new("func @main() {}", "main");
        let key = base.cache_key(KeyPolicy::Content);

        assert_eq!(key, base.clone().cache_key(KeyPolicy::Content));
        assert_ne!(
            key,
            CompilationRequest::new("func @main() { }", "main").cache_key(KeyPolicy::Content)
        );
        assert_ne!(
            key,
            CompilationRequest::new("func @main() {}", "other").cache_key(KeyPolicy::Content)
        );

        let options = CompileOptions {
            opt_level: 3,
            ..CompileOptions::default()
        };
        assert_ne!(
            key,
            base.with_options(options).cache_key(KeyPolicy::Content)
        );
    }

    #[test]
    fn option_maps_with_shared_rendering_get_distinct_keys() {
        let with_extra = |pairs: &[(&str, &str)]| {
            let extra = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            CompilationRequest::new("func @main() {}", "main").with_options(CompileOptions {
                extra,
                ..CompileOptions::default()
            })
        };
        let nested = with_extra(&[("a", "b::c=d")]);
        let split = with_extra(&[("a", "b"), ("c", "d")]);
        assert_ne!(nested.options(), split.options());
        assert_ne!(
            nested.cache_key(KeyPolicy::Content),
            split.cache_key(KeyPolicy::Content)
        );

        let joined = with_extra(&[("ab", "")]);
        let moved = with_extra(&[("a", "b")]);
        assert_ne!(
            joined.cache_key(KeyPolicy::Content),
            moved.cache_key(KeyPolicy::Content)
        );
    }

    #[test]
    fn source_and_entry_point_boundary_is_unambiguous() {
        let a = CompilationRequest::new("func\0", "main");
        let b = CompilationRequest::new("func", "\0main");
        assert_ne!(a.cache_key(KeyPolicy::Content), b.cache_key(KeyPolicy::Content));
    }

    #[test]
    fn location_key_ignores_content() {
        let a = CompilationRequest::new("a", "main").with_location(7);
        let b = CompilationRequest::new("b", "main").with_location(7);
        assert_eq!(
            a.cache_key(KeyPolicy::Location),
            b.cache_key(KeyPolicy::Location)
        );
        assert_ne!(
            a.cache_key(KeyPolicy::Content),
            b.cache_key(KeyPolicy::Content)
        );

        let unlocated = CompilationRequest::new("a", "main");
        assert_eq!(
            unlocated.cache_key(KeyPolicy::Location),
            unlocated.cache_key(KeyPolicy::Content)
        );
    }

    #[test]
    fn validation_rejects_missing_entry_point() {
        assert!(CompilationRequest::new("source", " ").validate().is_err());
        assert!(CompilationRequest::new("", "main").validate().is_err());
        assert!(CompilationRequest::new("source", "main").validate().is_ok());
    }

    #[test]
    fn key_policy_parses_case_insensitively() {
        assert_eq!("Location".parse::<KeyPolicy>(), Ok(KeyPolicy::Location));
        assert!("hash".parse::<KeyPolicy>().is_err());
    }
}
