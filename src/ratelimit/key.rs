//! Rate limit key construction.

use std::fmt;

/// A key that identifies one actor performing one action.
///
/// The bucket names the action (`auth`, `register`, ...) and the
/// discriminator names the actor (client address, account id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Logical action bucket
    pub bucket: String,
    /// Caller-supplied actor identifier
    pub discriminator: String,
}

impl RateLimitKey {
    /// Create a key from a bucket and discriminator.
    pub fn new(bucket: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            discriminator: discriminator.into(),
        }
    }

    /// The string form handed to the limiter: `bucket:discriminator`.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.bucket, self.discriminator)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bucket, self.discriminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = RateLimitKey::new("auth", "203.0.113.7");
        assert_eq!(key.to_string_key(), "auth:203.0.113.7");
        assert_eq!(key.to_string(), key.to_string_key());
    }

    #[test]
    fn test_buckets_namespace_the_same_actor() {
        let login = RateLimitKey::new("auth", "10.0.0.1");
        let signup = RateLimitKey::new("register", "10.0.0.1");
        assert_ne!(login.to_string_key(), signup.to_string_key());
    }
}
