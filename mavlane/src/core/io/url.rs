use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::consts::{
    DEFAULT_BAUD_RATE, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT, DEFAULT_UDP_HOST, DEFAULT_UDP_PORT,
};
use crate::prelude::*;

/// <sup>[`serde`](https://serde.rs)</sup>
/// Parsed connection `URL`.
///
/// Supported forms:
///
/// * `udp://[host][:port]` binds a UDP socket and learns peers from incoming traffic (defaults to
///   `0.0.0.0:14540`),
/// * `tcp://[host][:port]` connects to a TCP server (defaults to `127.0.0.1:5760`),
/// * `serial://<device-path>[:baudrate]` opens a serial port (default baud rate is `57600`),
/// * `serial_flowcontrol://<device-path>[:baudrate]` same with hardware flow control.
///
/// ```rust
/// use mavlane::core::io::ConnectionUrl;
///
/// let url: ConnectionUrl = "udp://:14550".parse().unwrap();
/// assert_eq!(url, ConnectionUrl::Udp { host: "0.0.0.0".into(), port: 14550 });
///
/// assert!("udp://:70000".parse::<ConnectionUrl>().is_err());
/// assert!("ftp://localhost".parse::<ConnectionUrl>().is_err());
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionUrl {
    /// UDP socket.
    Udp {
        /// Host to bind to.
        host: String,
        /// Port to bind to.
        port: u16,
    },
    /// TCP client.
    Tcp {
        /// Server host.
        host: String,
        /// Server port.
        port: u16,
    },
    /// Serial port.
    Serial {
        /// Device path.
        path: String,
        /// Baud rate.
        baud_rate: u32,
        /// Hardware flow control.
        flow_control: bool,
    },
}

const UDP_SCHEME: &str = "udp";
const TCP_SCHEME: &str = "tcp";
const SERIAL_SCHEME: &str = "serial";
const SERIAL_FLOW_CONTROL_SCHEME: &str = "serial_flowcontrol";

impl FromStr for ConnectionUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing `://` after protocol"))?;

        match scheme {
            UDP_SCHEME => {
                let (host, port) = parse_host_port(rest, DEFAULT_UDP_HOST, DEFAULT_UDP_PORT)
                    .map_err(|reason| invalid(&reason))?;
                Ok(ConnectionUrl::Udp { host, port })
            }
            TCP_SCHEME => {
                let (host, port) = parse_host_port(rest, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)
                    .map_err(|reason| invalid(&reason))?;
                Ok(ConnectionUrl::Tcp { host, port })
            }
            SERIAL_SCHEME | SERIAL_FLOW_CONTROL_SCHEME => {
                let (path, baud_rate) = parse_serial(rest).map_err(|reason| invalid(&reason))?;
                Ok(ConnectionUrl::Serial {
                    path,
                    baud_rate,
                    flow_control: scheme == SERIAL_FLOW_CONTROL_SCHEME,
                })
            }
            other => Err(invalid(&format!("unknown protocol `{other}`"))),
        }
    }
}

impl Display for ConnectionUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionUrl::Udp { host, port } => write!(f, "{UDP_SCHEME}://{host}:{port}"),
            ConnectionUrl::Tcp { host, port } => write!(f, "{TCP_SCHEME}://{host}:{port}"),
            ConnectionUrl::Serial {
                path,
                baud_rate,
                flow_control,
            } => {
                let scheme = if *flow_control {
                    SERIAL_FLOW_CONTROL_SCHEME
                } else {
                    SERIAL_SCHEME
                };
                write!(f, "{scheme}://{path}:{baud_rate}")
            }
        }
    }
}

fn parse_host_port(
    rest: &str,
    default_host: &str,
    default_port: u16,
) -> std::result::Result<(String, u16), String> {
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host, port),
        None => (rest, ""),
    };

    if !host.is_empty() && is_digits(host) {
        return Err(format!("host `{host}` looks like a port, use `:{host}`"));
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
        return Err(format!("invalid host `{host}`"));
    }

    let host = if host.is_empty() {
        default_host.to_string()
    } else {
        host.to_string()
    };

    let port = if port.is_empty() {
        default_port
    } else {
        if !is_digits(port) {
            return Err(format!("port `{port}` is not a number"));
        }
        let port: u32 = port.parse().map_err(|_| format!("port `{port}` is too large"))?;
        if port > u16::MAX as u32 {
            return Err(format!("port {port} is out of range"));
        }
        port as u16
    };

    Ok((host, port))
}

fn parse_serial(rest: &str) -> std::result::Result<(String, u32), String> {
    let (path, baud_rate) = match rest.split_once(':') {
        Some((path, baud_rate)) => (path, baud_rate),
        None => (rest, ""),
    };

    if path.is_empty() {
        return Err("missing device path".to_string());
    }
    let is_windows_port = path
        .strip_prefix("COM")
        .map(|num| !num.is_empty() && is_digits(num))
        .unwrap_or(false);
    if !path.starts_with('/') && !is_windows_port {
        return Err(format!(
            "device path `{path}` must be absolute or a `COM<number>` port"
        ));
    }

    let baud_rate = if baud_rate.is_empty() {
        DEFAULT_BAUD_RATE
    } else {
        if !is_digits(baud_rate) {
            return Err(format!("baud rate `{baud_rate}` is not a number"));
        }
        baud_rate
            .parse()
            .map_err(|_| format!("baud rate `{baud_rate}` is too large"))?
    };

    Ok((path.to_string(), baud_rate))
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Result<ConnectionUrl> {
        url.parse()
    }

    #[test]
    fn udp_defaults() {
        assert_eq!(
            parse("udp://").unwrap(),
            ConnectionUrl::Udp {
                host: "0.0.0.0".into(),
                port: 14540
            }
        );
        assert_eq!(
            parse("udp://:14550").unwrap(),
            ConnectionUrl::Udp {
                host: "0.0.0.0".into(),
                port: 14550
            }
        );
        assert_eq!(
            parse("udp://127.0.0.1").unwrap(),
            ConnectionUrl::Udp {
                host: "127.0.0.1".into(),
                port: 14540
            }
        );
    }

    #[test]
    fn tcp_host_and_port() {
        assert_eq!(
            parse("tcp://192.168.1.12:5790").unwrap(),
            ConnectionUrl::Tcp {
                host: "192.168.1.12".into(),
                port: 5790
            }
        );
        assert_eq!(
            parse("tcp://").unwrap(),
            ConnectionUrl::Tcp {
                host: "127.0.0.1".into(),
                port: 5760
            }
        );
    }

    #[test]
    fn serial_paths() {
        assert_eq!(
            parse("serial:///dev/ttyACM0:921600").unwrap(),
            ConnectionUrl::Serial {
                path: "/dev/ttyACM0".into(),
                baud_rate: 921600,
                flow_control: false
            }
        );
        assert_eq!(
            parse("serial_flowcontrol://COM3").unwrap(),
            ConnectionUrl::Serial {
                path: "COM3".into(),
                baud_rate: 57600,
                flow_control: true
            }
        );
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in [
            "udp:14540",
            "udpx://:14540",
            "udp://14540",
            "udp://:port",
            "udp://:65536",
            "tcp://host:-1",
            "tcp://:99999999999",
            "serial://",
            "serial://ttyUSB0",
            "serial://COM:57600",
            "serial:///dev/ttyUSB0:fast",
        ] {
            assert!(
                matches!(parse(url), Err(Error::InvalidUrl { .. })),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn display_is_normalised() {
        let url = parse("udp://:14550").unwrap();
        assert_eq!(url.to_string(), "udp://0.0.0.0:14550");
        assert_eq!(parse(&url.to_string()).unwrap(), url);
    }
}
