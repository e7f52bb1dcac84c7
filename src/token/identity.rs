//! Identity lookup used to find the secret a token must verify against.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

/// A principal as seen by the admission layer: an identifier and the secret
/// its tokens are signed with. Owned by the user-management side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub secret: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

/// Read-only view of the principals the host knows about.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up a principal by identifier.
    async fn find(&self, id: &str) -> Option<Identity>;
}

/// A fixed, in-process set of principals.
#[derive(Debug, Default)]
pub struct StaticIdentities {
    identities: RwLock<HashMap<String, String>>,
}

impl StaticIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: Identity) {
        self.identities.write().insert(identity.id, identity.secret);
    }

    /// Replace the secret of `id`, revoking every token issued under the old one.
    /// Returns `false` if `id` is unknown.
    pub fn rotate_secret(&self, id: &str, secret: impl Into<String>) -> bool {
        match self.identities.write().get_mut(id) {
            Some(current) => {
                *current = secret.into();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Identity> {
        self.identities
            .write()
            .remove(id)
            .map(|secret| Identity::new(id, secret))
    }
}

impl FromIterator<Identity> for StaticIdentities {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        let identities = StaticIdentities::new();
        for identity in iter {
            identities.insert(identity);
        }
        identities
    }
}

#[async_trait]
impl IdentityStore for StaticIdentities {
    async fn find(&self, id: &str) -> Option<Identity> {
        self.identities
            .read()
            .get(id)
            .map(|secret| Identity::new(id, secret.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_and_rotate() {
        let store: StaticIdentities = [Identity::new("1", "a")].into_iter().collect();
        assert_eq!(store.find("1").await, Some(Identity::new("1", "a")));
        assert_eq!(store.find("2").await, None);

        assert!(store.rotate_secret("1", "b"));
        assert!(!store.rotate_secret("2", "b"));
        assert_eq!(store.find("1").await.map(|i| i.secret), Some("b".to_string()));

        assert!(store.remove("1").is_some());
        assert_eq!(store.find("1").await, None);
    }

    #[test]
    fn test_removed_identity_is_unknown() {
        let store = StaticIdentities::new();
        store.insert(Identity::new("7", "s"));
        assert_eq!(store.remove("7"), Some(Identity::new("7", "s")));
        assert_eq!(store.remove("7"), None);
        assert_eq!(tokio_test::block_on(store.find("7")), None);
    }
}
