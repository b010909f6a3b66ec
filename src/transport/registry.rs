//! Domain code → HTTP status registry.

use std::collections::HashMap;

use crate::errors::normalize_code;

/// Status used for domain codes with no registry entry.
pub const DEFAULT_DOMAIN_STATUS: u16 = 400;

const DEFAULT_ENTRIES: &[(&str, u16)] = &[
    ("BAD_REQUEST", 400),
    ("UNAUTHORIZED", 401),
    ("UNAUTHENTICATED", 401),
    ("PAYMENT_REQUIRED", 402),
    ("FORBIDDEN", 403),
    ("NOT_FOUND", 404),
    ("METHOD_NOT_ALLOWED", 405),
    ("CONFLICT", 409),
    ("ALREADY_EXISTS", 409),
    ("GONE", 410),
    ("PRECONDITION_FAILED", 412),
    ("PAYLOAD_TOO_LARGE", 413),
    ("UNPROCESSABLE", 422),
    ("LOCKED", 423),
    ("RATE_LIMITED", 429),
    ("TOO_MANY_REQUESTS", 429),
];

/// Explicit mapping of domain codes to statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRegistry {
    entries: HashMap<String, u16>,
}

impl StatusRegistry {
    /// Registry with no entries; every code maps to 400.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or replace an entry. The code is normalized first.
    pub fn insert(&mut self, code: &str, status: u16) {
        self.entries.insert(normalize_code(code), status);
    }

    /// Defaults plus the given overrides.
    pub fn with_overrides<'a, I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a u16)>,
    {
        let mut registry = Self::default();
        for (code, status) in overrides {
            registry.insert(code, *status);
        }
        registry
    }

    pub fn status_for(&self, code: &str) -> u16 {
        self.entries
            .get(code)
            .copied()
            .unwrap_or(DEFAULT_DOMAIN_STATUS)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (code, status) in DEFAULT_ENTRIES {
            registry.insert(code, *status);
        }
        registry
    }
}
