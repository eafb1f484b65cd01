#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	/// Parsed `quic://host:port` bind endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct QuicEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl QuicEndpoint {
		/// Parse `quic://host:port`; IPv6 hosts must be bracketed.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			let rest = s
				.strip_prefix("quic://")
				.ok_or_else(|| format!("expected quic://host:port, got: {s:?}"))?;

			if rest.contains(['/', '?', '#']) {
				return Err(format!("endpoint must not carry a path/query/fragment: {s:?}"));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("missing :port in endpoint: {s:?}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("missing host in endpoint: {s:?}"));
			}
			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!("IPv6 hosts must be bracketed, e.g. quic://[::1]:9410: {s:?}"));
			}

			match port_str.trim().parse::<u16>() {
				Ok(port) if port > 0 => Ok(Self {
					host: host.to_string(),
					port,
				}),
				_ => Err(format!("invalid port (expected 1..=65535): {s:?}")),
			}
		}

		/// `host:port` form, IPv6 brackets preserved.
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Convert to `SocketAddr` when the host is an IP literal.
		pub fn socket_addr(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("host is not an IP literal: {}", self.host))
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_ipv4_and_bracketed_ipv6() {
			let v4 = QuicEndpoint::parse("quic://127.0.0.1:9410").unwrap();
			assert_eq!(v4.hostport(), "127.0.0.1:9410");
			assert_eq!(v4.socket_addr().unwrap().to_string(), "127.0.0.1:9410");

			let v6 = QuicEndpoint::parse("quic://[::1]:9410").unwrap();
			assert_eq!(v6.hostport(), "[::1]:9410");
			assert!(v6.socket_addr().is_ok());
		}

		#[test]
		fn dns_hosts_parse_but_do_not_resolve_here() {
			let e = QuicEndpoint::parse("quic://parley.example.com:443").unwrap();
			assert_eq!(e.port, 443);
			assert!(e.socket_addr().is_err());
		}

		#[test]
		fn rejects_junk() {
			assert!(QuicEndpoint::parse("").is_err());
			assert!(QuicEndpoint::parse("tcp://127.0.0.1:9410").is_err());
			assert!(QuicEndpoint::parse("quic://127.0.0.1").is_err());
			assert!(QuicEndpoint::parse("quic://127.0.0.1:0").is_err());
			assert!(QuicEndpoint::parse("quic://::1:9410").is_err());
			assert!(QuicEndpoint::parse("quic://127.0.0.1:9410/path").is_err());
		}
	}
}

pub mod time {
	use std::time::{Duration, SystemTime, UNIX_EPOCH};

	/// Current Unix time in milliseconds.
	#[inline]
	pub fn unix_ms_now() -> i64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or(Duration::from_secs(0))
			.as_millis() as i64
	}

	/// Current Unix time in seconds.
	#[inline]
	pub fn unix_secs_now() -> u64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or(Duration::from_secs(0))
			.as_secs()
	}
}
