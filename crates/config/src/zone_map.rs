//! CIDR-to-zone map, loaded from `ip-rules.txt` (§4.11, §6): lines of
//! `<CIDR>  <zone>  # comment`, IPv4 and IPv6, resolved by longest-prefix
//! match.

use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;

use crate::error::ConfigError;

struct ZoneRule {
    network: IpNet,
    zone: String,
}

/// Maps a client IP address to a zone label for the zone-affinity load
/// balancer (§4.7, §4.11).
#[derive(Default)]
pub struct ZoneMap {
    rules: Vec<ZoneRule>,
}

impl ZoneMap {
    /// An empty map; every lookup returns `None`.
    #[must_use]
    pub fn empty() -> Self {
        ZoneMap::default()
    }

    /// Parses the `<CIDR> <zone> [# comment]` rules in `text`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if a non-blank, non-comment line is
    /// missing its zone column or carries an unparsable CIDR.
    pub fn parse(file_name: &str, text: &str) -> Result<Self, ConfigError> {
        let mut rules = Vec::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let mut columns = line.split_whitespace();
            let cidr = columns.next().ok_or_else(|| ConfigError::Parse {
                file: file_name.to_string(),
                line: index + 1,
                reason: "expected a CIDR column".to_string(),
            })?;
            let zone = columns.next().ok_or_else(|| ConfigError::Parse {
                file: file_name.to_string(),
                line: index + 1,
                reason: "expected a zone column after the CIDR".to_string(),
            })?;
            let network: IpNet = cidr.parse().map_err(|err| ConfigError::Parse {
                file: file_name.to_string(),
                line: index + 1,
                reason: format!("invalid CIDR {cidr:?}: {err}"),
            })?;
            rules.push(ZoneRule {
                network,
                zone: zone.to_string(),
            });
        }
        Ok(ZoneMap { rules })
    }

    /// Loads and parses the zone map at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] on a malformed line.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Resolves `addr` to a zone by longest-prefix match; `None` if no rule
    /// covers it.
    #[must_use]
    pub fn lookup(&self, addr: IpAddr) -> Option<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.network.contains(&addr))
            .max_by_key(|rule| rule.network.prefix_len())
            .map(|rule| rule.zone.as_str())
    }

    /// Number of loaded rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if no rules were loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins_over_a_broader_rule() {
        let map = ZoneMap::parse(
            "ip-rules.txt",
            "10.0.0.0/8    default   # broad\n10.0.1.0/24   inner     # narrower\n",
        )
        .unwrap();

        let broad_hit: IpAddr = "10.0.2.1".parse().unwrap();
        assert_eq!(map.lookup(broad_hit), Some("default"));

        let narrow_hit: IpAddr = "10.0.1.5".parse().unwrap();
        assert_eq!(map.lookup(narrow_hit), Some("inner"));
    }

    #[test]
    fn ipv6_rules_are_supported() {
        let map = ZoneMap::parse("ip-rules.txt", "2001:db8::/32 east\n").unwrap();
        let addr: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(map.lookup(addr), Some("east"));
    }

    #[test]
    fn unmatched_address_resolves_to_none() {
        let map = ZoneMap::parse("ip-rules.txt", "10.0.0.0/8 east\n").unwrap();
        let addr: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(map.lookup(addr), None);
    }

    #[test]
    fn blank_lines_and_full_line_comments_are_skipped() {
        let map = ZoneMap::parse("ip-rules.txt", "\n# just a comment\n\n10.0.0.0/8 east\n").unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn missing_zone_column_is_a_parse_error() {
        let err = ZoneMap::parse("ip-rules.txt", "10.0.0.0/8\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }
}
