//! ASN-to-country resolution with three backends: none, CSV file, or a
//! relational table refreshed in the background.
//!
//! The sink depends only on this capability, never on a concrete backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
const ASN_COUNTRY_TABLE: &str = "asn_countries";

/// ASN-to-country lookup capability.
pub enum CountryResolver {
    /// No data source: every lookup misses.
    Null,
    /// Mapping loaded once from a two-column CSV file.
    File(FileResolver),
    /// Mapping loaded from a database table and refreshed periodically.
    Table(TableResolver),
}

impl CountryResolver {
    /// Country code for an ASN, or None if unknown.
    pub fn resolve(&self, asn: u32) -> Option<String> {
        match self {
            CountryResolver::Null => None,
            CountryResolver::File(r) => r.resolve(asn),
            CountryResolver::Table(r) => r.resolve(asn),
        }
    }

    /// First known country along an AS path, scanning left to right.
    pub fn resolve_from_path(&self, as_path: &[u32]) -> Option<String> {
        as_path.iter().find_map(|asn| self.resolve(*asn))
    }

    /// Number of ASNs in the mapping.
    pub fn count(&self) -> usize {
        match self {
            CountryResolver::Null => 0,
            CountryResolver::File(r) => r.count(),
            CountryResolver::Table(r) => r.count(),
        }
    }
}

/// Resolver backed by a `asn,country_code` CSV file, loaded once.
pub struct FileResolver {
    mapping: HashMap<u32, String>,
}

impl FileResolver {
    /// Load mappings from a CSV file. A header row is detected by a
    /// non-numeric first column and skipped; country codes are upper-cased
    /// and anything that is not two letters is discarded.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!("failed to read ASN data file: {}", path.as_ref().display())
        })?;

        let mut mapping = HashMap::new();
        for line in content.lines() {
            let mut columns = line.splitn(2, ',');
            let (asn, country) = match (columns.next(), columns.next()) {
                (Some(asn), Some(country)) => (asn.trim(), country.trim()),
                _ => continue,
            };
            // Non-numeric first column: header row, or junk either way
            let asn: u32 = match asn.parse() {
                Ok(asn) => asn,
                Err(_) => continue,
            };
            let country = country.to_uppercase();
            if country.len() == 2 {
                mapping.insert(asn, country);
            }
        }

        info!(
            "loaded {} ASN mappings from {}",
            mapping.len(),
            path.as_ref().display()
        );
        Ok(Self { mapping })
    }

    fn resolve(&self, asn: u32) -> Option<String> {
        self.mapping.get(&asn).cloned()
    }

    fn count(&self) -> usize {
        self.mapping.len()
    }
}

/// Resolver backed by a relational table, refreshed every 15 minutes by a
/// background task that swaps the whole mapping at once.
pub struct TableResolver {
    mapping: Arc<RwLock<HashMap<u32, String>>>,
    pool: PgPool,
}

impl TableResolver {
    pub fn new(pool: PgPool) -> Self {
        Self {
            mapping: Arc::new(RwLock::new(HashMap::new())),
            pool,
        }
    }

    /// Load immediately, then keep refreshing until shutdown.
    pub fn start(&self, shutdown: &broadcast::Sender<()>) {
        let mapping = self.mapping.clone();
        let pool = self.pool.clone();
        let mut shutdown = shutdown.subscribe();

        tokio::spawn(async move {
            refresh(&pool, &mapping).await;

            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => refresh(&pool, &mapping).await,
                    _ = shutdown.recv() => {
                        debug!("ASN resolver refresh task stopped");
                        return;
                    }
                }
            }
        });
    }

    fn resolve(&self, asn: u32) -> Option<String> {
        self.mapping.read().get(&asn).cloned()
    }

    fn count(&self) -> usize {
        self.mapping.read().len()
    }
}

async fn refresh(pool: &PgPool, mapping: &Arc<RwLock<HashMap<u32, String>>>) {
    let query = format!(
        "SELECT asn::bigint AS asn, country_code FROM {ASN_COUNTRY_TABLE} \
         WHERE country_code IS NOT NULL AND country_code != ''"
    );

    let rows = match sqlx::query(&query).fetch_all(pool).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("ASN resolver refresh failed: {}", e);
            return;
        }
    };

    let mut fresh = HashMap::with_capacity(rows.len());
    for row in &rows {
        let asn: i64 = match row.try_get("asn") {
            Ok(asn) => asn,
            Err(_) => continue,
        };
        let country: String = match row.try_get("country_code") {
            Ok(country) => country,
            Err(_) => continue,
        };
        fresh.insert(asn as u32, country);
    }

    let count = fresh.len();
    *mapping.write() = fresh;
    info!("ASN resolver refreshed: {} mappings", count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_resolver(content: &str) -> CountryResolver {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        CountryResolver::File(FileResolver::load(file.path()).unwrap())
    }

    #[test]
    fn null_resolver_never_resolves() {
        let resolver = CountryResolver::Null;
        assert_eq!(resolver.resolve(13335), None);
        assert_eq!(resolver.resolve_from_path(&[13335, 6939]), None);
        assert_eq!(resolver.count(), 0);
    }

    #[test]
    fn file_resolver_with_header() {
        let resolver = csv_resolver("asn,country_code\n13335,US\n15169,US\n3356,US\n");
        assert_eq!(resolver.resolve(13335).as_deref(), Some("US"));
        assert_eq!(resolver.resolve(99999), None);
        assert_eq!(resolver.count(), 3);
    }

    #[test]
    fn file_resolver_without_header() {
        let resolver = csv_resolver("13335,US\n15169,DE\n");
        assert_eq!(resolver.resolve(13335).as_deref(), Some("US"));
        assert_eq!(resolver.count(), 2);
    }

    #[test]
    fn country_codes_are_uppercased() {
        let resolver = csv_resolver("13335,us\n15169,de\n");
        assert_eq!(resolver.resolve(13335).as_deref(), Some("US"));
        assert_eq!(resolver.resolve(15169).as_deref(), Some("DE"));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let resolver = csv_resolver("13335,US\nnot-an-asn,FR\n15169\n64500,USA\n");
        // Only the valid two-letter row survives
        assert_eq!(resolver.count(), 1);
        assert_eq!(resolver.resolve(64500), None);
    }

    #[test]
    fn path_resolution_takes_first_hit() {
        let resolver = csv_resolver("13335,US\n15169,DE\n");
        assert_eq!(
            resolver.resolve_from_path(&[99999, 15169, 13335]).as_deref(),
            Some("DE")
        );
        assert_eq!(resolver.resolve_from_path(&[1, 2, 3]), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(FileResolver::load("/nonexistent/path/file.csv").is_err());
    }
}
