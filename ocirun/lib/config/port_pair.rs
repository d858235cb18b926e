//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::OcirunError;

/// A single `-p host[:container]` port mapping.
///
/// `-p 8080:80` maps host port 8080 to container port 80; `-p 80` maps
/// 80 to 80 on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    /// The port the host listens on.
    host: u16,

    /// The port the container listens on.
    container: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PortPair {
    /// Creates a `PortPair` mapping the same port on both sides.
    pub fn same(port: u16) -> Self {
        Self {
            host: port,
            container: port,
        }
    }

    /// Creates a `PortPair` mapping distinct host and container ports.
    pub fn distinct(host: u16, container: u16) -> Self {
        Self { host, container }
    }

    /// Returns the host-side port.
    pub fn host(&self) -> u16 {
        self.host
    }

    /// Returns the container-side port.
    pub fn container(&self) -> u16 {
        self.container
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for PortPair {
    type Err = OcirunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(OcirunError::InvalidPortPair(s.to_string()));
        }

        if let Some((host, container)) = s.split_once(':') {
            if host.is_empty() || container.is_empty() {
                return Err(OcirunError::InvalidPortPair(s.to_string()));
            }

            let host = host
                .parse()
                .map_err(|_| OcirunError::InvalidPortPair(s.to_string()))?;
            let container = container
                .parse()
                .map_err(|_| OcirunError::InvalidPortPair(s.to_string()))?;

            return Ok(Self { host, container });
        }

        let port = s
            .parse()
            .map_err(|_| OcirunError::InvalidPortPair(s.to_string()))?;

        Ok(Self::same(port))
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.container {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{}:{}", self.host, self.container)
        }
    }
}

impl Serialize for PortPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PortPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_same_port() {
        let pair: PortPair = "80".parse().unwrap();
        assert_eq!(pair.host(), 80);
        assert_eq!(pair.container(), 80);
        assert_eq!(pair.to_string(), "80");
    }

    #[test]
    fn test_parse_distinct_ports() {
        let pair: PortPair = "8080:80".parse().unwrap();
        assert_eq!(pair.host(), 8080);
        assert_eq!(pair.container(), 80);
        assert_eq!(pair.to_string(), "8080:80");
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<PortPair>().is_err());
        assert!(":80".parse::<PortPair>().is_err());
        assert!("80:".parse::<PortPair>().is_err());
        assert!("not-a-port".parse::<PortPair>().is_err());
    }
}
