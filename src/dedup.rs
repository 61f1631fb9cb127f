// src/dedup.rs
//! Dedup adapter: URL canonicalization, stable dedup keys, and per-source admission
//! backed by the store's atomic check-and-insert.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::StoreError;
use crate::model::{CapturedItem, NewItem, SourceId};
use crate::store::Store;

/// Query parameters that only carry campaign/referral tracking.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "mc_cid", "mc_eid", "spm", "scm",
    "from", "ref", "ref_src", "share_token", "igshid", "_hsenc", "_hsmkt",
];

fn is_tracking_param(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    n.starts_with("utm_") || TRACKING_PARAMS.contains(&n.as_str())
}

fn strip_tracking(url: &mut Url) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);
}

/// Resolve a candidate against the listing page URL and drop tracking noise.
/// Path case is preserved; this is the URL stored on the item.
pub fn canonicalize(candidate: &str, base: &Url) -> Option<Url> {
    let mut url = base.join(candidate.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    strip_tracking(&mut url);
    Some(url)
}

/// Fully normalized form used for identity: lowercase scheme/host/path, no tracking
/// parameters, no fragment, no trailing slash on non-root paths.
pub fn normalize_for_key(url: &Url) -> String {
    let mut u = url.clone();
    strip_tracking(&mut u);
    let mut path = u.path().to_lowercase();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    // scheme and host are already lowercased by the parser
    let mut out = format!("{}://{}", u.scheme(), u.host_str().unwrap_or_default());
    if let Some(port) = u.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(&path);
    if let Some(q) = u.query() {
        out.push('?');
        out.push_str(q);
    }
    out
}

/// Stable sha256 hex over the normalized URL.
pub fn dedup_key(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_key(url).as_bytes());
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Per-source admission over a store.
pub struct DedupAdapter<'a> {
    store: &'a dyn Store,
}

impl<'a> DedupAdapter<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Cheap pre-check; `record` is still the authority.
    pub async fn is_new(&self, source_id: SourceId, key: &str) -> Result<bool, StoreError> {
        Ok(!self.store.contains_item(source_id, key).await?)
    }

    /// Atomic check-and-insert. `None` means the key was already captured for this source.
    pub async fn record(&self, item: NewItem) -> Result<Option<CapturedItem>, StoreError> {
        self.store.insert_item_if_new(item).await
    }
}
