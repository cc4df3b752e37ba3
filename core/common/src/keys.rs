//! Store key conventions.

use url::Url;

/// Namespace prefix for cached response snapshots.
pub const CACHE_KEY_PREFIX: &str = "offline-cache::";

/// Key holding the ordered list of pending mutations.
pub const QUEUE_KEY: &str = "offline-queue";

/// Build the cache key for a request URI.
///
/// The full URI (scheme, host, path and query) is part of the key, so two
/// query variants of the same path are cached independently.
pub fn cache_key(url: &Url) -> String {
    cache_key_for(url.as_str())
}

/// Build the cache key for a URI that is already in string form.
pub fn cache_key_for(url: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, url)
}

/// Recover the URI from a cache key, if the key is in the cache namespace.
pub fn uri_from_cache_key(key: &str) -> Option<&str> {
    key.strip_prefix(CACHE_KEY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_includes_query() {
        let a = Url::parse("https://api.example.com/api/items?page=1").unwrap();
        let b = Url::parse("https://api.example.com/api/items?page=2").unwrap();

        assert_eq!(
            cache_key(&a),
            "offline-cache::https://api.example.com/api/items?page=1"
        );
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn test_uri_from_cache_key() {
        let key = cache_key_for("https://api.example.com/api/items/1");
        assert_eq!(
            uri_from_cache_key(&key),
            Some("https://api.example.com/api/items/1")
        );
        assert_eq!(uri_from_cache_key(QUEUE_KEY), None);
    }
}
