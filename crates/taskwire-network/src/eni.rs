//! Elastic network interface descriptor.
//!
//! The task model owns this value; the builders only read it.

use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use taskwire_common::{TaskwireError, TaskwireResult};

/// One IPv4 address assigned to an elastic interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EniIpv4Address {
    /// Dotted-quad address, without a prefix length.
    pub address: String,
    /// Whether this is the interface's primary address.
    #[serde(default)]
    pub primary: bool,
}

impl EniIpv4Address {
    /// A primary address.
    pub fn primary(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            primary: true,
        }
    }

    /// A secondary address.
    pub fn secondary(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            primary: false,
        }
    }
}

/// Elastic network interface attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticInterface {
    /// Interface identifier.
    pub id: String,
    /// MAC address.
    pub mac_address: String,
    /// Subnet gateway in CIDR form, e.g. `10.0.0.1/24`.
    #[serde(rename = "subnetGatewayIPV4Address")]
    pub subnet_gateway_cidr: String,
    /// Assigned IPv4 addresses in attachment order.
    #[serde(rename = "ipv4Addresses", default)]
    pub ipv4_addresses: Vec<EniIpv4Address>,
}

impl ElasticInterface {
    /// The single primary address.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::MalformedInput`] when no address, or more
    /// than one, is marked primary.
    pub fn primary_ipv4(&self) -> TaskwireResult<Ipv4Addr> {
        let mut primaries = self.ipv4_addresses.iter().filter(|a| a.primary);
        let primary = primaries.next().ok_or_else(|| {
            TaskwireError::malformed(format!("eni {} has no primary ipv4 address", self.id))
        })?;
        if primaries.next().is_some() {
            return Err(TaskwireError::malformed(format!(
                "eni {} has more than one primary ipv4 address",
                self.id
            )));
        }
        parse_host(&primary.address)
    }

    /// The secondary address used for the bridge.
    ///
    /// When several non-primary addresses exist the first one in attachment
    /// order is used, so the choice follows the order the task model reports.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::MalformedInput`] when there is no secondary
    /// address.
    pub fn secondary_ipv4(&self) -> TaskwireResult<Ipv4Addr> {
        let secondary = self
            .ipv4_addresses
            .iter()
            .find(|a| !a.primary)
            .ok_or_else(|| {
                TaskwireError::malformed(format!(
                    "eni {} has no secondary ipv4 address",
                    self.id
                ))
            })?;
        parse_host(&secondary.address)
    }

    /// Subnet gateway address and subnet prefix length.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::MalformedInput`] if the gateway is not an
    /// IPv4 CIDR.
    pub fn subnet_gateway(&self) -> TaskwireResult<(Ipv4Addr, u8)> {
        let network = Ipv4Network::from_str(&self.subnet_gateway_cidr).map_err(|e| {
            TaskwireError::malformed(format!(
                "eni {} subnet gateway '{}' is not an ipv4 cidr: {e}",
                self.id, self.subnet_gateway_cidr
            ))
        })?;
        if !self.subnet_gateway_cidr.contains('/') {
            return Err(TaskwireError::malformed(format!(
                "eni {} subnet gateway '{}' has no prefix length",
                self.id, self.subnet_gateway_cidr
            )));
        }
        Ok((network.ip(), network.prefix()))
    }
}

fn parse_host(address: &str) -> TaskwireResult<Ipv4Addr> {
    address
        .parse()
        .map_err(|_| TaskwireError::malformed(format!("'{address}' is not an ipv4 address")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eni(addresses: Vec<EniIpv4Address>) -> ElasticInterface {
        ElasticInterface {
            id: "eni-12345678".to_string(),
            mac_address: "02:7b:64:49:b1:40".to_string(),
            subnet_gateway_cidr: "172.31.1.1/20".to_string(),
            ipv4_addresses: addresses,
        }
    }

    #[test]
    fn primary_and_secondary() {
        let eni = eni(vec![
            EniIpv4Address::secondary("172.31.21.41"),
            EniIpv4Address::primary("172.31.21.40"),
        ]);
        assert_eq!(eni.primary_ipv4().unwrap(), Ipv4Addr::new(172, 31, 21, 40));
        assert_eq!(eni.secondary_ipv4().unwrap(), Ipv4Addr::new(172, 31, 21, 41));
    }

    #[test]
    fn duplicate_primary_rejected() {
        let eni = eni(vec![
            EniIpv4Address::primary("172.31.21.40"),
            EniIpv4Address::primary("172.31.21.41"),
        ]);
        assert!(matches!(
            eni.primary_ipv4(),
            Err(TaskwireError::MalformedInput { .. })
        ));
    }

    #[test]
    fn missing_primary_rejected() {
        let eni = eni(vec![EniIpv4Address::secondary("172.31.21.41")]);
        assert!(eni.primary_ipv4().is_err());
    }

    #[test]
    fn first_secondary_wins() {
        let eni = eni(vec![
            EniIpv4Address::primary("172.31.21.40"),
            EniIpv4Address::secondary("172.31.21.43"),
            EniIpv4Address::secondary("172.31.21.42"),
        ]);
        assert_eq!(eni.secondary_ipv4().unwrap(), Ipv4Addr::new(172, 31, 21, 43));
    }

    #[test]
    fn subnet_gateway_split() {
        let eni = eni(vec![]);
        assert_eq!(
            eni.subnet_gateway().unwrap(),
            (Ipv4Addr::new(172, 31, 1, 1), 20)
        );
    }

    #[test]
    fn subnet_gateway_requires_prefix() {
        let mut eni = eni(vec![]);
        eni.subnet_gateway_cidr = "172.31.1.1".to_string();
        assert!(eni.subnet_gateway().is_err());

        eni.subnet_gateway_cidr = "not-an-address/20".to_string();
        assert!(eni.subnet_gateway().is_err());
    }

    #[test]
    fn deserialize_descriptor() {
        let json = r#"{
            "id": "eni-1",
            "macAddress": "02:7b:64:49:b1:40",
            "subnetGatewayIPV4Address": "10.0.0.1/24",
            "ipv4Addresses": [
                {"address": "10.0.0.120", "primary": true},
                {"address": "10.0.0.150"}
            ]
        }"#;
        let eni: ElasticInterface = serde_json::from_str(json).unwrap();
        assert_eq!(eni.ipv4_addresses.len(), 2);
        assert!(!eni.ipv4_addresses[1].primary);
    }
}
