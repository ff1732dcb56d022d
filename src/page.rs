//! # Stage: Host Page
//!
//! ## Responsibility
//! The two things the engine needs from the page it runs in: the URL query
//! string (for preview links) and a place to inject presentation payload.
//!
//! ## NOT Responsible For
//! - Deciding when to activate (the wave's trigger)

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Page-side port.
pub trait Page: Send + Sync {
    /// Raw query string, with or without the leading `?`.
    fn query(&self) -> String;
    /// Append a stylesheet to the document.
    fn inject_css(&self, css: &str);
}

/// Split `?a=1&b=2` into a map. Later keys win; a key without `=` maps to `""`.
/// The value stops at the next `=`, so `a=b=c` yields `b`.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .strip_prefix('?')
        .unwrap_or(query)
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut parts = segment.split('=');
            let key = parts.next().unwrap_or(segment);
            (key.to_string(), parts.next().unwrap_or("").to_string())
        })
        .collect()
}

/// In-memory page: a fixed query string and a log of injected styles.
#[derive(Debug, Clone, Default)]
pub struct StaticPage {
    query: String,
    styles: Arc<Mutex<Vec<String>>>,
}

impl StaticPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }

    /// Styles injected so far, in order.
    pub fn styles(&self) -> Vec<String> {
        self.styles.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Page for StaticPage {
    fn query(&self) -> String {
        self.query.clone()
    }

    fn inject_css(&self, css: &str) {
        if let Ok(mut s) = self.styles.lock() {
            s.push(css.to_string());
        }
    }
}
