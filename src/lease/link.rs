use std::net::IpAddr;

use serde::Deserialize;
use serde::Serialize;

/// A configured link: the contiguous address range the server hands out on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub start: IpAddr,
    pub end: IpAddr,
}

impl LinkConfig {
    pub fn new(
        name: impl Into<String>,
        start: IpAddr,
        end: IpAddr,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn contains(
        &self,
        ip: &IpAddr,
    ) -> bool {
        // IpAddr orders every V4 before every V6, so a mixed-family range
        // would match nothing useful; validation rejects those.
        *ip >= self.start && *ip <= self.end
    }

    pub fn is_well_formed(&self) -> bool {
        self.start.is_ipv4() == self.end.is_ipv4() && self.start <= self.end
    }
}

/// Maps addresses to the local link context they belong to.
#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    links: Vec<LinkConfig>,
}

impl LinkResolver {
    pub fn new(links: Vec<LinkConfig>) -> Self {
        Self { links }
    }

    pub fn resolve(
        &self,
        ip: &IpAddr,
    ) -> Option<&LinkConfig> {
        self.links.iter().find(|link| link.contains(ip))
    }

    pub fn links(&self) -> &[LinkConfig] {
        &self.links
    }
}
