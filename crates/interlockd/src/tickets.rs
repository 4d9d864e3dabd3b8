use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use base64::prelude::*;
use rand::RngCore;

use interlock_core::{Error, Result};

const TICKET_SIZE: usize = 16;

/// Short-lived id → absolute-path mapping authorizing one XSRF-free binary
/// download. Tickets are single use: the first lookup removes them. The
/// cache never outgrows the set of outstanding user downloads, so no expiry
/// is needed.
#[derive(Default)]
pub struct TicketCache {
    inner: Mutex<HashMap<String, PathBuf>>,
}

impl TicketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: PathBuf) -> String {
        let mut raw = [0u8; TICKET_SIZE];
        rand::thread_rng().fill_bytes(&mut raw);
        let id = BASE64_URL_SAFE.encode(raw);

        self.inner.lock().unwrap().insert(id.clone(), path);

        id
    }

    /// Atomically look up and delete.
    pub fn remove(&self, id: &str) -> Result<PathBuf> {
        self.inner
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| Error::Other("download id not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_is_single_use() {
        let cache = TicketCache::new();
        let id = cache.add(PathBuf::from("/mnt/file.txt"));

        assert_eq!(cache.remove(&id).unwrap(), PathBuf::from("/mnt/file.txt"));

        let err = cache.remove(&id).unwrap_err();
        assert_eq!(err.to_string(), "download id not found");
    }

    #[test]
    fn test_ids_are_unique_and_urlsafe() {
        let cache = TicketCache::new();
        let a = cache.add(PathBuf::from("/a"));
        let b = cache.add(PathBuf::from("/b"));

        assert_ne!(a, b);
        assert!(!a.contains('/') && !a.contains('+'));
    }

    #[test]
    fn test_unknown_id_rejected() {
        let cache = TicketCache::new();
        assert!(cache.remove("bogus").is_err());
    }
}
