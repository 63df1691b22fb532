//! Manage the local digest file.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::DigestStore;
use sync_types::{now_millis, Digest};

use crate::config::DeviceConfig;
use crate::store::JsonDigestStore;

/// Fields for a digest added by hand.
#[derive(Debug, Clone, Default)]
pub struct NewDigest {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: Option<String>,
    /// Relevance score in `[0, 1]`.
    pub relevance: f64,
    /// Keywords.
    pub keywords: Vec<String>,
}

/// Add or replace one digest.
pub async fn add(data_dir: &Path, new: NewDigest) -> Result<()> {
    let device = DeviceConfig::load(data_dir).await?;
    if !(0.0..=1.0).contains(&new.relevance) {
        anyhow::bail!("Relevance must be between 0 and 1");
    }
    let domain = domain_of(&new.url).context("URL has no host")?;

    let store = JsonDigestStore::open(data_dir).await?;
    let mut digest = Digest::new(new.url, domain, now_millis());
    digest.title = new.title.unwrap_or_default();
    digest.relevance_score = new.relevance;
    digest.keywords = new.keywords.into_iter().collect();
    digest.source_devices.insert(device.device_id);

    let label = format!("{} ({})", digest.url, &digest.id[..12]);
    store.save(digest).await?;
    println!("Saved {}", label);
    Ok(())
}

/// Print every stored digest, most recently accessed first.
pub async fn list(data_dir: &Path) -> Result<()> {
    let store = JsonDigestStore::open(data_dir).await?;
    let mut digests = store.list_all().await?;
    if digests.is_empty() {
        println!("No digests stored.");
        return Ok(());
    }
    digests.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));

    println!("{} digests:", digests.len());
    for digest in digests {
        println!(
            "  {:.2}  {}  (from {} devices, merged {}x)",
            digest.relevance_score,
            digest.url,
            digest.source_devices.len(),
            digest.merge_count
        );
    }
    Ok(())
}

/// Host part of an http(s) URL.
fn domain_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then(|| host.to_lowercase())
}
