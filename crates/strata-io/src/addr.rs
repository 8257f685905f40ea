//! Peer address parsing.
//!
//! Accepts `host`, `host:port`, `[host]` and `[host]:port`. Bare hosts are
//! IPv4 literals, bracketed hosts IPv6 literals; no name resolution happens.
//! A missing port defaults to [`DEFAULT_PORT`].

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::IoError;

/// Port used when the address does not name one.
pub const DEFAULT_PORT: u16 = 8080;

/// Scanner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    /// Inside `[...]`.
    BracketHost,
    /// Just past `]`; only `:` or end may follow.
    AfterBracket,
    BareHost,
    Port,
}

/// Host and port slices located by [`split`].
struct Parts<'a> {
    host: &'a str,
    bracketed: bool,
    port: Option<&'a str>,
}

fn split(address: &str) -> Result<Parts<'_>, &'static str> {
    let mut state = State::Start;
    let mut host_start = 0;
    let mut host_end = address.len();
    let mut port_start = None;

    for (i, c) in address.char_indices() {
        state = match (state, c) {
            (State::Start, '[') => {
                host_start = i + 1;
                State::BracketHost
            }
            (State::Start, ':') => return Err("missing host"),
            (State::Start, _) => State::BareHost,
            (State::BracketHost, ']') => {
                host_end = i;
                State::AfterBracket
            }
            (State::AfterBracket, ':') | (State::BareHost, ':') => {
                if state == State::BareHost {
                    host_end = i;
                }
                port_start = Some(i + 1);
                State::Port
            }
            (State::AfterBracket, _) => return Err("unexpected characters after ']'"),
            (s @ (State::BracketHost | State::BareHost | State::Port), _) => s,
        };
    }

    match state {
        State::Start => Err("empty address"),
        State::BracketHost => Err("unterminated '['"),
        State::AfterBracket | State::BareHost | State::Port => Ok(Parts {
            host: &address[host_start..host_end],
            bracketed: host_start > 0,
            port: port_start.map(|start| &address[start..]),
        }),
    }
}

/// Parses `address`, defaulting the port to [`DEFAULT_PORT`].
pub fn parse(address: &str) -> Result<SocketAddr, IoError> {
    parse_with_default_port(address, DEFAULT_PORT)
}

/// Parses `address`, defaulting the port to `default_port`.
pub fn parse_with_default_port(address: &str, default_port: u16) -> Result<SocketAddr, IoError> {
    let invalid = |reason| IoError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let parts = split(address).map_err(invalid)?;
    let port = match parts.port {
        None => default_port,
        Some("") => return Err(invalid("empty port")),
        Some(p) => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
    };

    if parts.bracketed {
        let ip: Ipv6Addr = parts
            .host
            .parse()
            .map_err(|_| invalid("invalid IPv6 address"))?;
        Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)))
    } else {
        let ip: Ipv4Addr = parts
            .host
            .parse()
            .map_err(|_| invalid("invalid IPv4 address"))?;
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }
}
