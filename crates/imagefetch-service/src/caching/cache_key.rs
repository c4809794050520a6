use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

use super::FetchError;

/// The URL schemes a [`ResourceKey`] may use.
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// The identity of a fetchable image, both in the caches and in the in-flight registry.
///
/// Two keys are equal when their original strings are equal, no URL normalization is applied.
#[derive(Debug, Clone, Eq)]
pub struct ResourceKey {
    key: Arc<str>,
    url: Arc<Url>,
    hash: [u8; 32],
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for ResourceKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// The two variants persisted on disk for every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheVariant {
    /// The image at its original resolution.
    Full,
    /// The thumbnail that is handed out to callers.
    Thumbnail,
}

impl CacheVariant {
    fn tag(self) -> u8 {
        match self {
            CacheVariant::Full => 1,
            CacheVariant::Thumbnail => 2,
        }
    }
}

impl ResourceKey {
    /// Validates `key` and turns it into a [`ResourceKey`].
    pub fn parse(key: &str) -> Result<Self, FetchError> {
        let url = Url::parse(key).map_err(|err| FetchError::InvalidKey(format!("`{key}`: {err}")))?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(FetchError::InvalidKey(format!(
                "`{key}`: unsupported scheme `{}`",
                url.scheme()
            )));
        }

        if url.scheme() == "file" && url.to_file_path().is_err() {
            return Err(FetchError::InvalidKey(format!("`{key}`: not a local file path")));
        }

        Ok(Self {
            key: key.into(),
            url: Arc::new(url),
            hash: Sha256::digest(key.as_bytes()).into(),
        })
    }

    /// The key exactly as it was requested.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The parsed URL of the resource.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The file name of the given variant inside the cache directory.
    ///
    /// This is the hex-formatted sha-256 hash of the key, followed by a variant tag:
    /// `<hash>_1` for the full image, and `<hash>_2` for the thumbnail.
    pub fn cache_name(&self, variant: CacheVariant) -> String {
        let mut name = String::with_capacity(self.hash.len() * 2 + 2);
        for b in &self.hash {
            name.push_str(&format!("{b:02x}"));
        }
        name.push('_');
        name.push(char::from(b'0' + variant.tag()));
        name
    }
}
