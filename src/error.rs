//! Error taxonomy (spec §7): `ConfigError` and `OsError` are fatal at
//! construction; `ParseError` (see [`crate::codec`]) and queue-full
//! conditions are contained to a single packet and only counted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{0}` enabled but no `out_name` interface configured")]
    InertWithoutOutside(&'static str),
    #[error("`alt_out_name` set but `out_name` is not")]
    AltOutsideWithoutOutside,
    #[error("`unicast_proxy_in_to_out` enabled but no `in_name` interface configured")]
    UnicastProxyWithoutInside,
    #[error("`channel_size` must be greater than zero")]
    ZeroChannelSize,
    #[error("no interface configured for either side")]
    NoInterfaces,
}

#[derive(Debug, Error)]
pub enum OsError {
    #[error("failed to resolve interface `{iface}`: {source}")]
    ResolveInterface {
        iface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open raw socket for {side}: {source}")]
    OpenSocket {
        side: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to join multicast group {group} on {side}: {source}")]
    JoinMulticast {
        side: &'static str,
        group: std::net::Ipv4Addr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set socket option on {side}: {source}")]
    SetSockOpt {
        side: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("write to {side} timed out")]
    WriteTimeout { side: &'static str },
    #[error("write to {side} failed: {source}")]
    Write {
        side: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Returned by `Engine::new`; construction fatally errors on either variant,
/// per spec §4.I ("partial startup is not allowed").
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Os(#[from] OsError),
}
