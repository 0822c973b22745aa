//! Runtime configuration from command-line flags with `BGP_RADAR_*`
//! environment fallbacks. A flag always wins over its environment
//! variable.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "bgp-radar")]
#[command(author, version, about = "Real-time BGP anomaly detector using RIPE RIS Live")]
pub struct Config {
    /// Comma-separated list of RIS collectors to subscribe to
    #[arg(
        long,
        env = "BGP_RADAR_COLLECTORS",
        default_value = "rrc00",
        value_delimiter = ','
    )]
    pub collectors: Vec<String>,

    /// PostgreSQL URL for event persistence (optional)
    #[arg(long, env = "BGP_RADAR_DATABASE")]
    pub database: Option<String>,

    /// Redis URL for the shared origin store (optional)
    #[arg(long, env = "BGP_RADAR_REDIS")]
    pub redis: Option<String>,

    /// Path to an ASN-country CSV file (format: asn,country_code)
    #[arg(long, env = "BGP_RADAR_ASN_DATA")]
    pub asn_data: Option<PathBuf>,

    /// Update queue capacity
    #[arg(long, env = "BGP_RADAR_BUFFER", default_value_t = 100_000)]
    pub buffer: usize,

    /// Number of detector workers
    #[arg(long, env = "BGP_RADAR_WORKERS", default_value_t = 8)]
    pub workers: usize,

    /// Stats logging interval in seconds
    #[arg(long, env = "BGP_RADAR_STATS", default_value_t = 30)]
    pub stats: u64,
}

impl Config {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = Config::try_parse_from(["bgp-radar"]).unwrap();
        assert_eq!(config.collectors, vec!["rrc00"]);
        assert_eq!(config.buffer, 100_000);
        assert_eq!(config.workers, 8);
        assert_eq!(config.stats_interval(), Duration::from_secs(30));
        assert!(config.database.is_none());
        assert!(config.redis.is_none());
        assert!(config.asn_data.is_none());
    }

    #[test]
    fn collectors_split_on_commas() {
        let config =
            Config::try_parse_from(["bgp-radar", "--collectors", "rrc00,rrc11,rrc23"]).unwrap();
        assert_eq!(config.collectors, vec!["rrc00", "rrc11", "rrc23"]);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(Config::try_parse_from(["bgp-radar", "--bogus"]).is_err());
        assert!(Config::try_parse_from(["bgp-radar", "--workers", "eight"]).is_err());
    }
}
