use super::{ResourceKey, SharedImage};

type InMemoryCache = moka::sync::Cache<ResourceKey, SharedImage>;

/// The volatile thumbnail tier.
///
/// Entries are weighed by the size of their decoded pixel buffer, the cache evicts once the
/// configured capacity (in bytes) is exceeded.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    cache: InMemoryCache,
}

impl MemoryCache {
    pub fn new(capacity: u64) -> Self {
        let cache = InMemoryCache::builder()
            .max_capacity(capacity)
            .name("thumbnails")
            // NOTE: we count the key to the weight as well
            .weigher(|k: &ResourceKey, v: &SharedImage| {
                let size = std::mem::size_of::<ResourceKey>()
                    + k.as_str().len()
                    + v.as_bytes().len();
                u32::try_from(size).unwrap_or(u32::MAX)
            })
            .build();

        Self { cache }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<SharedImage> {
        self.cache.get(key)
    }

    pub fn insert(&self, key: ResourceKey, image: SharedImage) {
        self.cache.insert(key, image)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.cache.contains_key(key)
    }
}
