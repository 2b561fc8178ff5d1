//! Account topology and regional endpoint ordering.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

/// One regional endpoint of the account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionEndpoint {
    /// Region display name, e.g. `"West US"`.
    pub name: String,
    /// Regional service endpoint.
    pub endpoint: Url,
}

impl RegionEndpoint {
    /// Creates a regional endpoint.
    pub fn new(name: impl Into<String>, endpoint: Url) -> Self {
        Self { name: name.into(), endpoint }
    }
}

/// Account topology as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseAccount {
    /// Regions accepting writes, in account order.
    pub write_regions: Vec<RegionEndpoint>,
    /// Regions serving reads, in account order.
    pub read_regions: Vec<RegionEndpoint>,
    /// Whether every write region accepts writes concurrently.
    #[serde(default)]
    pub enable_multiple_write_locations: bool,
}

/// Fetches the account topology.
#[async_trait]
pub trait TopologyFetcher: Send + Sync + fmt::Debug {
    /// Returns the current regions of the account.
    async fn fetch_regions(&self) -> Result<DatabaseAccount>;
}

/// Ordered endpoints derived from one topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocationSnapshot {
    pub(crate) read: Vec<RegionEndpoint>,
    pub(crate) write: Vec<RegionEndpoint>,
}

impl LocationSnapshot {
    /// Snapshot used before any topology is known.
    pub(crate) fn fallback(default_endpoint: &Url) -> Self {
        let default = default_region(default_endpoint);
        Self { read: vec![default.clone()], write: vec![default] }
    }

    /// Orders an account's regions.
    ///
    /// Preferred regions present in the account come first, in preference
    /// order, followed by the remaining regions in account order. Writes use
    /// only the first write region unless both the account and the client
    /// allow multiple write locations. An empty list falls back to the
    /// default endpoint.
    pub(crate) fn from_account(
        account: &DatabaseAccount,
        preferred: &[String],
        use_multiple_write_locations: bool,
        default_endpoint: &Url,
    ) -> Self {
        let mut read = order_by_preference(&account.read_regions, preferred);
        let mut write = if use_multiple_write_locations && account.enable_multiple_write_locations
        {
            order_by_preference(&account.write_regions, preferred)
        } else {
            account.write_regions.iter().take(1).cloned().collect()
        };

        if read.is_empty() {
            read.push(default_region(default_endpoint));
        }
        if write.is_empty() {
            write.push(default_region(default_endpoint));
        }
        Self { read, write }
    }
}

fn order_by_preference(regions: &[RegionEndpoint], preferred: &[String]) -> Vec<RegionEndpoint> {
    let is_preferred =
        |region: &RegionEndpoint| preferred.iter().any(|name| name.eq_ignore_ascii_case(&region.name));

    let mut ordered: Vec<RegionEndpoint> = preferred
        .iter()
        .filter_map(|name| regions.iter().find(|region| region.name.eq_ignore_ascii_case(name)))
        .cloned()
        .collect();
    ordered.extend(regions.iter().filter(|region| !is_preferred(region)).cloned());
    ordered
}

fn default_region(endpoint: &Url) -> RegionEndpoint {
    RegionEndpoint::new(endpoint.host_str().unwrap_or_default(), endpoint.clone())
}
