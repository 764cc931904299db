//! Configuration coherence scenarios (spec §9 "Configuration coherence",
//! §8 precondition checks exercised through the public `Config` API).

use igmp_agent::{Config, ConfigError};

fn minimal(in_name: Option<&str>, out_name: Option<&str>) -> Config {
    Config {
        in_name: in_name.map(str::to_string),
        out_name: out_name.map(str::to_string),
        ..Config::default()
    }
}

#[test]
fn rejects_config_with_neither_interface() {
    let cfg = minimal(None, None);
    assert!(matches!(cfg.validate(), Err(ConfigError::NoInterfaces)));
}

#[test]
fn accepts_in_only_config() {
    let cfg = minimal(Some("a"), None);
    assert!(cfg.validate().is_ok());
}

#[test]
fn accepts_out_only_config() {
    let cfg = minimal(None, Some("b"));
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_alt_out_without_out() {
    let mut cfg = minimal(Some("a"), None);
    cfg.alt_out_name = Some("c".to_string());
    assert!(matches!(cfg.validate(), Err(ConfigError::AltOutsideWithoutOutside)));
}

#[test]
fn accepts_alt_out_with_out() {
    let mut cfg = minimal(Some("a"), Some("b"));
    cfg.alt_out_name = Some("c".to_string());
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_unicast_proxy_without_inside() {
    let mut cfg = minimal(None, Some("b"));
    cfg.unicast_proxy_in_to_out = true;
    assert!(matches!(cfg.validate(), Err(ConfigError::UnicastProxyWithoutInside)));
}

#[test]
fn rejects_outside_only_features_without_out_name() {
    for (flip, name) in [
        (
            (|c: &mut Config| c.membership_reports_to_network = true) as fn(&mut Config),
            "membership_reports_to_network",
        ),
        ((|c: &mut Config| c.leave_to_network = true) as fn(&mut Config), "leave_to_network"),
        ((|c: &mut Config| c.query_notify = true) as fn(&mut Config), "query_notify"),
        ((|c: &mut Config| c.proxy_in_to_out = true) as fn(&mut Config), "proxy_in_to_out"),
    ] {
        let mut cfg = minimal(Some("a"), None);
        flip(&mut cfg);
        match cfg.validate() {
            Err(ConfigError::InertWithoutOutside(inert)) => assert_eq!(inert, name),
            other => panic!("expected InertWithoutOutside(\"{name}\"), got {other:?}"),
        }
    }
}

#[test]
fn rejects_proxy_out_to_in_without_inside() {
    let mut cfg = minimal(None, Some("b"));
    cfg.proxy_out_to_in = true;
    assert!(matches!(cfg.validate(), Err(ConfigError::InertWithoutOutside("proxy_out_to_in"))));
}

#[test]
fn rejects_zero_channel_size() {
    let mut cfg = minimal(Some("a"), Some("b"));
    cfg.channel_size = 0;
    assert!(matches!(cfg.validate(), Err(ConfigError::ZeroChannelSize)));
}

#[test]
fn full_feature_config_validates() {
    let mut cfg = minimal(Some("a"), Some("b"));
    cfg.alt_out_name = Some("c".to_string());
    cfg.proxy_out_to_in = true;
    cfg.proxy_in_to_out = true;
    cfg.unicast_proxy_in_to_out = true;
    cfg.query_notify = true;
    cfg.membership_reports_from_network = true;
    cfg.membership_reports_to_network = true;
    cfg.unicast_membership_reports = true;
    cfg.leave_to_network = true;
    assert!(cfg.validate().is_ok());
}
