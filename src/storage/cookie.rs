// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cookie-jar fallback backend.
//!
//! Values are percent-encoded and carry an expiry. Writes live for 30 days;
//! removal rewrites the cookie with an expiry one day in the past.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{StorageBackend, StorageError};
use crate::clock::WallClock;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const COOKIE_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, Clone)]
struct Cookie {
    encoded: String,
    expires_ms: i64,
}

pub struct CookieBackend {
    jar: DashMap<String, Cookie>,
    clock: Arc<dyn WallClock>,
}

impl CookieBackend {
    pub fn new(clock: Arc<dyn WallClock>) -> Self {
        Self {
            jar: DashMap::new(),
            clock,
        }
    }

    fn write(&self, key: &str, value: &str, days: i64) {
        let cookie = Cookie {
            encoded: urlencoding::encode(value).into_owned(),
            expires_ms: self.clock.now_ms() + days * DAY_MS,
        };
        self.jar.insert(key.to_string(), cookie);
    }

    /// `name=value` pairs of the live cookies, like a `Cookie` header.
    #[cfg(test)]
    #[must_use]
    pub fn header(&self) -> String {
        let now = self.clock.now_ms();
        let mut pairs: Vec<String> = self
            .jar
            .iter()
            .filter(|c| c.value().expires_ms > now)
            .map(|c| format!("{}={}", c.key(), c.value().encoded))
            .collect();
        pairs.sort();
        pairs.join("; ")
    }
}

#[async_trait]
impl StorageBackend for CookieBackend {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(cookie) = self.jar.get(key).map(|c| c.value().clone()) else {
            return Ok(None);
        };
        if cookie.expires_ms <= self.clock.now_ms() {
            return Ok(None);
        }
        urlencoding::decode(&cookie.encoded)
            .map(|v| Some(v.into_owned()))
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(key, value, COOKIE_LIFETIME_DAYS);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.write(key, "", -1);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cookie"
    }
}
