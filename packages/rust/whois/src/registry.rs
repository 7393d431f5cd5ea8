//! Zone → WHOIS server table.
//!
//! Built once at startup (built-in entries merged with `[whois.servers]`
//! overrides) and shared behind an `Arc` afterwards. Nothing mutates it after
//! construction, so lookups take no lock.

use std::collections::{BTreeMap, HashMap};

/// Built-in WHOIS servers for common generic and country-code zones.
const BUILTIN_SERVERS: &[(&str, &str)] = &[
    ("com", "whois.verisign-grs.com"),
    ("net", "whois.verisign-grs.com"),
    ("org", "whois.pir.org"),
    ("info", "whois.nic.info"),
    ("biz", "whois.nic.biz"),
    ("name", "whois.nic.name"),
    ("mobi", "whois.nic.mobi"),
    ("pro", "whois.nic.pro"),
    ("edu", "whois.educause.edu"),
    ("gov", "whois.dotgov.gov"),
    ("io", "whois.nic.io"),
    ("co", "whois.nic.co"),
    ("me", "whois.nic.me"),
    ("tv", "whois.nic.tv"),
    ("cc", "ccwhois.verisign-grs.com"),
    ("ai", "whois.nic.ai"),
    ("dev", "whois.nic.google"),
    ("app", "whois.nic.google"),
    ("xyz", "whois.nic.xyz"),
    ("online", "whois.nic.online"),
    ("site", "whois.nic.site"),
    ("tech", "whois.nic.tech"),
    ("store", "whois.nic.store"),
    ("shop", "whois.nic.shop"),
    ("cloud", "whois.nic.cloud"),
    ("us", "whois.nic.us"),
    ("ca", "whois.cira.ca"),
    ("uk", "whois.nic.uk"),
    ("eu", "whois.eu"),
    ("de", "whois.denic.de"),
    ("fr", "whois.nic.fr"),
    ("nl", "whois.domain-registry.nl"),
    ("be", "whois.dns.be"),
    ("ch", "whois.nic.ch"),
    ("at", "whois.nic.at"),
    ("it", "whois.nic.it"),
    ("es", "whois.nic.es"),
    ("se", "whois.iis.se"),
    ("pl", "whois.dns.pl"),
    ("ru", "whois.tcinet.ru"),
    ("br", "whois.registro.br"),
    ("au", "whois.auda.org.au"),
    ("in", "whois.registry.in"),
    ("jp", "whois.jprs.jp"),
];

/// Immutable mapping from top-level zone to WHOIS server hostname.
#[derive(Debug, Clone, Default)]
pub struct TldRegistry {
    servers: HashMap<String, String>,
}

impl TldRegistry {
    /// Registry holding only the built-in table.
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN_SERVERS.iter().copied())
    }

    /// Built-in table with `overrides` added on top (override wins).
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut registry = Self::builtin();
        for (zone, server) in overrides {
            registry.servers.insert(normalize_zone(zone), server.clone());
        }
        registry
    }

    /// Registry made of exactly `entries`.
    pub fn from_entries<I, Z, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Z, S)>,
        Z: AsRef<str>,
        S: Into<String>,
    {
        let servers = entries
            .into_iter()
            .map(|(zone, server)| (normalize_zone(zone.as_ref()), server.into()))
            .collect();
        Self { servers }
    }

    /// Case-insensitive lookup. `None` means the zone is unknown.
    pub fn lookup(&self, zone: &str) -> Option<&str> {
        self.servers.get(&normalize_zone(zone)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

fn normalize_zone(zone: &str) -> String {
    zone.trim().trim_start_matches('.').to_ascii_lowercase()
}
