//! Geographic enrichment.
//!
//! Resolution order: configured country-map file → domain TLD heuristic →
//! `"unknown"`. Private and loopback addresses are tagged as such and
//! never resolved. Lookups are cached per address for the run.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;

use serde_json::{Value, json};

use boxflow_api::model::ParsedServer;

/// Country database: exact addresses / hostnames or domain suffixes
/// (leading dot) mapped to ISO 3166-1 alpha-2 codes.
#[derive(Default)]
pub struct GeoEnricher {
    db: Option<HashMap<String, String>>,
    cache: Mutex<HashMap<String, Value>>,
}

impl GeoEnricher {
    pub fn new(db_path: Option<&str>) -> Self {
        let db = db_path.and_then(|path| match load_db(Path::new(path)) {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!(path, error = %e, "geo database unavailable, falling back to TLD heuristic");
                None
            }
        });
        Self { db, cache: Mutex::new(HashMap::new()) }
    }

    pub fn enrich(&self, server: &mut ParsedServer) {
        let address = server.address.clone();
        if let Some(cached) = self.cache.lock().ok().and_then(|c| c.get(&address).cloned()) {
            server.set_meta("geo", cached);
            return;
        }

        let info = self.lookup(&address);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(address, info.clone());
        }
        server.set_meta("geo", info);
    }

    fn lookup(&self, address: &str) -> Value {
        if is_private_address(address) {
            return json!({"type": "private"});
        }

        if let Some(db) = &self.db {
            if let Some(country) = db.get(address) {
                return json!({"country": country.to_uppercase(), "source": "db"});
            }
            // Domain-suffix entries: ".example.com" matches api.example.com.
            for (key, country) in db {
                if key.starts_with('.') && address.ends_with(key.as_str()) {
                    return json!({"country": country.to_uppercase(), "source": "db"});
                }
            }
        }

        if let Some(country) = tld_country(address) {
            return json!({"country": country, "source": "tld"});
        }

        json!({"country": "unknown", "source": "unknown"})
    }
}

fn load_db(path: &Path) -> Result<HashMap<String, String>, String> {
    let raw = std::fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&raw).map_err(|e| e.to_string())
}

/// Two-letter country hint from a domain's TLD.
fn tld_country(address: &str) -> Option<String> {
    if address.parse::<IpAddr>().is_ok() {
        return None;
    }
    let tld = address.rsplit('.').next()?;
    if tld.len() == 2 && tld.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(tld.to_uppercase())
    } else {
        None
    }
}

pub fn is_private_address(address: &str) -> bool {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        };
    }
    address == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxflow_api::model::ParsedServer;
    use std::io::Write;

    #[test]
    fn tld_heuristic() {
        assert_eq!(tld_country("proxy.example.de"), Some("DE".to_string()));
        assert_eq!(tld_country("proxy.example.com"), None);
        assert_eq!(tld_country("10.0.0.1"), None);
    }

    #[test]
    fn private_detection() {
        assert!(is_private_address("127.0.0.1"));
        assert!(is_private_address("192.168.1.4"));
        assert!(is_private_address("::1"));
        assert!(is_private_address("localhost"));
        assert!(!is_private_address("8.8.8.8"));
        assert!(!is_private_address("proxy.example.io"));
    }

    #[test]
    fn db_lookup_with_suffix_match() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"1.2.3.4": "us", ".example.net": "nl"}"#).unwrap();
        let enricher = GeoEnricher::new(file.path().to_str());

        let mut exact = ParsedServer::new("ss", "1.2.3.4", 443);
        enricher.enrich(&mut exact);
        assert_eq!(exact.meta["geo"]["country"], json!("US"));

        let mut suffix = ParsedServer::new("ss", "edge.example.net", 443);
        enricher.enrich(&mut suffix);
        assert_eq!(suffix.meta["geo"]["country"], json!("NL"));
    }

    #[test]
    fn fallback_chain_ends_in_unknown() {
        let enricher = GeoEnricher::new(None);
        let mut server = ParsedServer::new("ss", "8.8.8.8", 443);
        enricher.enrich(&mut server);
        assert_eq!(server.meta["geo"]["country"], json!("unknown"));

        let mut private = ParsedServer::new("ss", "10.1.2.3", 443);
        enricher.enrich(&mut private);
        assert_eq!(private.meta["geo"]["type"], json!("private"));
    }
}
