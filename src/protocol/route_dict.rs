//! Route dictionary for route compression.
//!
//! Maps route strings to 16-bit codes and back. The server advertises the
//! mapping in its handshake; each session owns one dictionary and the message
//! codec consults it on every encode and decode.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Inner {
    routes: HashMap<String, u16>,
    codes: HashMap<u16, String>,
}

/// Bidirectional `route ⇄ code` mapping behind a reader/writer lock.
///
/// Share it with `Arc<RouteDictionary>`. Lookups take the read lock; only
/// registration takes the write lock.
#[derive(Debug, Default)]
pub struct RouteDictionary {
    inner: RwLock<Inner>,
}

impl RouteDictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a mapping, replacing any previous mapping for either side.
    pub fn register(&self, route: impl Into<String>, code: u16) {
        let route = route.into();
        let mut inner = self.write();
        if let Some(old_code) = inner.routes.insert(route.clone(), code) {
            inner.codes.remove(&old_code);
        }
        if let Some(old_route) = inner.codes.insert(code, route.clone()) {
            if old_route != route {
                inner.routes.remove(&old_route);
            }
        }
    }

    /// Register every mapping from an iterator.
    pub fn extend<I, S>(&self, entries: I)
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        for (route, code) in entries {
            self.register(route, code);
        }
    }

    /// Code for `route`, if one is registered.
    pub fn code(&self, route: &str) -> Option<u16> {
        self.read().routes.get(route).copied()
    }

    /// Route for `code`, if one is registered.
    pub fn route(&self, code: u16) -> Option<String> {
        self.read().codes.get(&code).cloned()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.read().routes.len()
    }

    /// Check if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.read().routes.is_empty()
    }

    /// Remove all mappings.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.routes.clear();
        inner.codes.clear();
    }
}
