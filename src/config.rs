//! Process-lifetime configuration (spec §3). Validated once at
//! construction; everything else in the engine treats it as immutable.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::ConfigError;

/// Testing-only knobs, mirroring the source's `testing` sub-config.
#[derive(Debug, Clone, Default)]
pub struct TestingConfig {
    /// Enable multicast loopback on the outside send socket so that a
    /// locally-proxied datagram can be observed by a test listening on the
    /// same host/interface.
    pub multicast_loopback: bool,
    /// Wire a query observed on `out` directly into the report path,
    /// short-circuiting the real network for integration tests.
    pub connect_query_to_report: bool,
    /// When set, the unicast/multicast receive loops read from this
    /// in-process test source instead of opening real raw sockets.
    pub membership_reports_reader: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub in_name: Option<String>,
    pub out_name: Option<String>,
    pub alt_out_name: Option<String>,

    pub unicast_dst: Ipv4Addr,

    pub proxy_out_to_in: bool,
    pub proxy_in_to_out: bool,
    pub unicast_proxy_in_to_out: bool,

    pub query_notify: bool,
    pub membership_reports_from_network: bool,
    pub membership_reports_to_network: bool,
    pub unicast_membership_reports: bool,
    pub leave_to_network: bool,

    pub socket_read_deadline: Duration,
    pub channel_size: usize,

    pub gratuitous: Duration,
    pub query_time: Duration,

    pub testing: TestingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            in_name: None,
            out_name: None,
            alt_out_name: None,
            unicast_dst: Ipv4Addr::UNSPECIFIED,
            proxy_out_to_in: false,
            proxy_in_to_out: false,
            unicast_proxy_in_to_out: false,
            query_notify: false,
            membership_reports_from_network: false,
            membership_reports_to_network: false,
            unicast_membership_reports: false,
            leave_to_network: false,
            socket_read_deadline: Duration::from_secs(10),
            channel_size: 64,
            gratuitous: Duration::from_secs(0),
            query_time: Duration::from_secs(0),
            testing: TestingConfig::default(),
        }
    }
}

impl Config {
    /// Validate flag combinations that would otherwise be silently inert
    /// (spec §9 "Configuration coherence").
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.in_name.is_none() && self.out_name.is_none() {
            return Err(ConfigError::NoInterfaces);
        }
        if self.alt_out_name.is_some() && self.out_name.is_none() {
            return Err(ConfigError::AltOutsideWithoutOutside);
        }
        if self.unicast_proxy_in_to_out && self.in_name.is_none() {
            return Err(ConfigError::UnicastProxyWithoutInside);
        }
        if self.out_name.is_none() {
            if self.membership_reports_to_network {
                return Err(ConfigError::InertWithoutOutside("membership_reports_to_network"));
            }
            if self.leave_to_network {
                return Err(ConfigError::InertWithoutOutside("leave_to_network"));
            }
            if self.query_notify {
                return Err(ConfigError::InertWithoutOutside("query_notify"));
            }
            if self.proxy_in_to_out {
                return Err(ConfigError::InertWithoutOutside("proxy_in_to_out"));
            }
        }
        if self.in_name.is_none() && self.proxy_out_to_in {
            return Err(ConfigError::InertWithoutOutside("proxy_out_to_in"));
        }
        if self.channel_size == 0 {
            return Err(ConfigError::ZeroChannelSize);
        }
        Ok(())
    }

    pub fn has_alt_out(&self) -> bool {
        self.alt_out_name.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inert_membership_reports_to_network() {
        let cfg = Config {
            in_name: Some("a".into()),
            membership_reports_to_network: true,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InertWithoutOutside("membership_reports_to_network"))
        ));
    }

    #[test]
    fn rejects_alt_out_without_out() {
        let cfg = Config {
            in_name: Some("a".into()),
            alt_out_name: Some("c".into()),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::AltOutsideWithoutOutside)));
    }

    #[test]
    fn accepts_minimal_valid_config() {
        let cfg = Config {
            in_name: Some("a".into()),
            out_name: Some("b".into()),
            query_notify: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
