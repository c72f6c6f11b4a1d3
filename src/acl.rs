//! Access-control list: ordered CIDR entries with first-match semantics.
//!
//! Corresponds to spec.md §3 "Access-control list" and §6 "ACL syntax".
//! Entries are parsed once at configuration time via `ipnet` (the same
//! "ecosystem crate over hand-rolled bit twiddling" choice this pack makes
//! consistently for parsing concerns) and matched with a simple linear
//! scan — ACLs are operator-authored and small, so a trie offers nothing
//! here.

use std::net::IpAddr;

use ipnet::IpNet;

/// What an ACL entry decides for addresses it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// A single `allow`/`deny` CIDR rule.
#[derive(Debug, Clone)]
pub struct AclEntry {
    pub net: IpNet,
    pub decision: Decision,
}

/// Whether an empty list admits or rejects everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPolicy {
    Allow,
    Deny,
}

/// An ordered set of CIDR rules, evaluated first-match-wins.
#[derive(Debug, Clone)]
pub struct Acl {
    entries: Vec<AclEntry>,
    default: DefaultPolicy,
}

impl Acl {
    pub fn new(default: DefaultPolicy) -> Self {
        Self { entries: Vec::new(), default }
    }

    pub fn push(&mut self, entry: AclEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<AclEntry> {
        self.entries
    }

    /// Parse a single CIDR string with an explicit allow/deny decision,
    /// e.g. `"10.0.0.0/8"`. Returns the parsed [`IpNet`] or an error string
    /// suitable for [`crate::error::UsageError::InvalidCidr`].
    pub fn parse_cidr(s: &str) -> Result<IpNet, String> {
        s.parse::<IpNet>()
            .or_else(|_| {
                // Bare IP with no prefix means "exactly this host".
                s.parse::<IpAddr>()
                    .map(IpNet::from)
                    .map_err(|_| format!("invalid CIDR: {s}"))
            })
    }

    /// Evaluate `addr` against the list. First entry that contains `addr`
    /// wins; an empty list falls back to [`Self::default`].
    pub fn evaluate(&self, addr: IpAddr) -> Decision {
        for entry in &self.entries {
            if entry.net.contains(&addr) {
                return entry.decision;
            }
        }
        match self.default {
            DefaultPolicy::Allow => Decision::Allow,
            DefaultPolicy::Deny => Decision::Deny,
        }
    }

    pub fn allows(&self, addr: IpAddr) -> bool {
        self.evaluate(addr) == Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_list_default_allow_admits_all() {
        let acl = Acl::new(DefaultPolicy::Allow);
        assert!(acl.allows(ip("1.2.3.4")));
    }

    #[test]
    fn empty_list_default_deny_rejects_all() {
        let acl = Acl::new(DefaultPolicy::Deny);
        assert!(!acl.allows(ip("1.2.3.4")));
    }

    #[test]
    fn first_match_wins() {
        let mut acl = Acl::new(DefaultPolicy::Deny);
        acl.push(AclEntry { net: "10.0.0.0/8".parse().unwrap(), decision: Decision::Deny });
        acl.push(AclEntry { net: "10.0.0.0/24".parse().unwrap(), decision: Decision::Allow });
        // The broader deny entry comes first, so the narrower allow never fires.
        assert!(!acl.allows(ip("10.0.0.5")));
    }

    #[test]
    fn narrower_allow_before_broader_deny_wins() {
        let mut acl = Acl::new(DefaultPolicy::Deny);
        acl.push(AclEntry { net: "10.0.0.0/24".parse().unwrap(), decision: Decision::Allow });
        acl.push(AclEntry { net: "10.0.0.0/8".parse().unwrap(), decision: Decision::Deny });
        assert!(acl.allows(ip("10.0.0.5")));
        assert!(!acl.allows(ip("10.1.0.5")));
    }

    #[test]
    fn bare_host_matches_exactly() {
        let net = Acl::parse_cidr("192.168.1.1").unwrap();
        assert_eq!(net, IpNet::from(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
    }

    #[test]
    fn ipv6_cidr_parses() {
        let net = Acl::parse_cidr("::1/128").unwrap();
        assert!(net.contains(&ip("::1")));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Acl::parse_cidr("not-an-address").is_err());
    }
}
