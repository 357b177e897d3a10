//! In-process credential store.
//!
//! The shuttle backend authenticates both the REST API and the push channel
//! with an opaque bearer token owned by the surrounding application. The
//! store is cloned into every component that needs the token; each reads it
//! per attempt so a refreshed credential is picked up without rebuilding
//! clients. The only writer inside this crate is the 401 handler in the
//! REST client, which clears a stale token.

use std::sync::{Arc, Mutex};

/// Shared handle to the current bearer token.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    token: Arc<Mutex<Option<String>>>,
}

impl TokenStore {
    /// Empty store; requests go out unauthenticated until `save` is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.save(token);
        store
    }

    pub fn get(&self) -> Option<String> {
        self.token.lock().expect("token store lock poisoned").clone()
    }

    pub fn save(&self, token: impl Into<String>) {
        *self.token.lock().expect("token store lock poisoned") = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.lock().expect("token store lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let store = TokenStore::new();
        assert_eq!(store.get(), None);

        let other = store.clone();
        other.save("abc");
        assert_eq!(store.get(), Some("abc".to_string()));

        store.clear();
        assert_eq!(other.get(), None);
    }
}
