//! Current URL, and the modal/navigation state it carries.

use crate::layer::{LayerEntry, LayerKind, LayerResult, PersistenceLayer};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

const FRAGMENT_KEY: &str = "url#fragment";

/// Tracks the shell's current URL.
///
/// Each configured navigation parameter present in the query string is an
/// artifact keyed `url?<name>=<decoded value>`; a fragment is `url#fragment`.
#[derive(Clone)]
pub struct NavigationState {
    url: Arc<RwLock<String>>,
    params: Arc<Vec<String>>,
}

struct ParsedUrl<'a> {
    base: &'a str,
    query: Vec<(&'a str, &'a str)>,
    fragment: Option<&'a str>,
}

fn parse(url: &str) -> ParsedUrl<'_> {
    let (rest, fragment) = match url.split_once('#') {
        Some((r, f)) => (r, Some(f)),
        None => (url, None),
    };
    let (base, query) = match rest.split_once('?') {
        Some((b, q)) => (b, q),
        None => (rest, ""),
    };
    let query = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
        .collect();
    ParsedUrl {
        base,
        query,
        fragment,
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

impl NavigationState {
    pub fn new(url: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            url: Arc::new(RwLock::new(url.into())),
            params: Arc::new(params),
        }
    }

    pub fn url(&self) -> String {
        self.url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.write().unwrap_or_else(PoisonError::into_inner) = url.into();
    }

    fn is_navigation_param(&self, name: &str) -> bool {
        let name = decode(name);
        self.params.iter().any(|p| *p == name)
    }

    fn entry_key(name: &str, value: &str) -> String {
        format!("url?{}={}", decode(name), decode(value))
    }

    /// Removes the navigation parameters whose artifact keys appear in `keys`,
    /// and the fragment when `url#fragment` does. Other parameters are kept.
    fn strip(&self, url: &str, keys: &[String]) -> (String, usize) {
        let parsed = parse(url);
        let mut removed = 0;
        let mut kept = Vec::new();
        for (name, value) in parsed.query {
            if self.is_navigation_param(name) && keys.contains(&Self::entry_key(name, value)) {
                removed += 1;
            } else if value.is_empty() {
                kept.push(name.to_string());
            } else {
                kept.push(format!("{name}={value}"));
            }
        }
        let mut out = parsed.base.to_string();
        if !kept.is_empty() {
            out.push('?');
            out.push_str(&kept.join("&"));
        }
        match parsed.fragment {
            Some(_) if keys.iter().any(|k| k == FRAGMENT_KEY) => removed += 1,
            Some(f) => {
                out.push('#');
                out.push_str(f);
            }
            None => {}
        }
        (out, removed)
    }
}

#[async_trait]
impl PersistenceLayer for NavigationState {
    fn kind(&self) -> LayerKind {
        LayerKind::Navigation
    }

    async fn snapshot(&self) -> LayerResult<Vec<LayerEntry>> {
        let url = self.url();
        let parsed = parse(&url);
        let mut entries: Vec<LayerEntry> = parsed
            .query
            .iter()
            .filter(|(name, _)| self.is_navigation_param(name))
            .map(|(name, value)| LayerEntry::new(Self::entry_key(name, value)))
            .collect();
        if parsed.fragment.is_some_and(|f| !f.is_empty()) {
            entries.push(LayerEntry::new(FRAGMENT_KEY));
        }
        Ok(entries)
    }

    async fn purge(&self, keys: &[String]) -> LayerResult<usize> {
        let mut url = self.url.write().unwrap_or_else(PoisonError::into_inner);
        let (stripped, removed) = self.strip(&url, keys);
        *url = stripped;
        Ok(removed)
    }
}
