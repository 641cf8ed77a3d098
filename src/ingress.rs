//! SSH ingress policy for the bastion's load balancer targets
//!
//! Exactly one of two modes applies: an explicit IPv4 CIDR allow-list, or
//! open to every IPv4 source. A configuration choosing neither is rejected
//! before anything is rendered.

use serde::Serialize;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::BastionError;

/// SSH port exposed through the load balancer listener
pub const SSH_PORT: u16 = 22;

/// An IPv4 network in `a.b.c.d/n` notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl Ipv4Cidr {
    /// 0.0.0.0/0
    pub const ANY: Ipv4Cidr = Ipv4Cidr {
        addr: Ipv4Addr::UNSPECIFIED,
        prefix: 0,
    };
}

impl FromStr for Ipv4Cidr {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BastionError::Config(format!("invalid IPv4 CIDR '{}'", s));

        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }

        Ok(Self { addr, prefix })
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// A single TCP ingress rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngressRule {
    pub protocol: &'static str,
    pub port: u16,
    pub source: String,
}

/// Which sources may reach the bastion on port 22
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressPolicy {
    AllowList(Vec<Ipv4Cidr>),
    OpenToInternet,
}

impl IngressPolicy {
    /// Choose the policy from the two config knobs
    ///
    /// A non-empty allow-list wins over `open_to_internet`.
    pub fn from_config(
        allowed_cidrs: &[String],
        open_to_internet: bool,
    ) -> Result<Self, BastionError> {
        if !allowed_cidrs.is_empty() {
            let cidrs = allowed_cidrs
                .iter()
                .map(|c| c.parse())
                .collect::<Result<Vec<Ipv4Cidr>, _>>()?;
            return Ok(Self::AllowList(cidrs));
        }

        if open_to_internet {
            return Ok(Self::OpenToInternet);
        }

        Err(BastionError::Config(
            "Either allowed_cidrs or open_to_internet must be set".to_string(),
        ))
    }

    /// Ingress rules implied by this policy
    pub fn rules(&self) -> Vec<IngressRule> {
        let sources = match self {
            Self::AllowList(cidrs) => cidrs.clone(),
            Self::OpenToInternet => vec![Ipv4Cidr::ANY],
        };

        sources
            .into_iter()
            .map(|cidr| IngressRule {
                protocol: "tcp",
                port: SSH_PORT,
                source: cidr.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        let cidr: Ipv4Cidr = "10.1.0.0/16".parse().unwrap();
        assert_eq!(cidr.addr, Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(cidr.prefix, 16);
        assert_eq!(cidr.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_parse_cidr_invalid() {
        for bad in ["10.0.0.0", "10.0.0.0/33", "10.0.0/8", "::1/128", "a.b.c.d/8", "10.0.0.0/x"] {
            assert!(bad.parse::<Ipv4Cidr>().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_allow_list_rules() {
        let policy = IngressPolicy::from_config(
            &["203.0.113.0/24".to_string(), "198.51.100.7/32".to_string()],
            false,
        )
        .unwrap();

        let rules = policy.rules();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.port == 22 && r.protocol == "tcp"));
        assert_eq!(rules[0].source, "203.0.113.0/24");
        assert_eq!(rules[1].source, "198.51.100.7/32");
    }

    #[test]
    fn test_allow_list_wins_over_open() {
        let policy = IngressPolicy::from_config(&["192.0.2.0/24".to_string()], true).unwrap();
        assert!(matches!(policy, IngressPolicy::AllowList(_)));
    }

    #[test]
    fn test_open_to_internet() {
        let policy = IngressPolicy::from_config(&[], true).unwrap();
        assert_eq!(policy, IngressPolicy::OpenToInternet);
        assert_eq!(policy.rules()[0].source, "0.0.0.0/0");
    }

    #[test]
    fn test_neither_mode_is_error() {
        let err = IngressPolicy::from_config(&[], false).unwrap_err();
        assert!(matches!(err, BastionError::Config(_)));
    }

    #[test]
    fn test_bad_cidr_in_list_is_error() {
        assert!(IngressPolicy::from_config(&["nope".to_string()], true).is_err());
    }
}
