//! VPN address derivation.
//!
//! `address(network, index)` is the network with its last octet replaced
//! by `index`. Only IPv4 /24 networks and indices `1..=254` are valid.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use quark_core::{Error, Result};

pub const MIN_INDEX: u32 = 1;
pub const MAX_INDEX: u32 = 254;

pub fn vpn_address(network: &Ipv4Network, index: u32) -> Result<Ipv4Addr> {
    if network.prefix() != 24 {
        return Err(Error::validation(format!(
            "vpn network {network} must have a /24 prefix"
        )));
    }
    if !(MIN_INDEX..=MAX_INDEX).contains(&index) {
        return Err(Error::validation(format!(
            "instance index {index} is outside {MIN_INDEX}..={MAX_INDEX}"
        )));
    }
    let [a, b, c, _] = network.network().octets();
    Ok(Ipv4Addr::new(a, b, c, index as u8))
}

/// Index of `address` within `network`, if it is a valid instance address.
pub fn vpn_index(network: &Ipv4Network, address: Ipv4Addr) -> Option<u32> {
    if network.prefix() != 24 || !network.contains(address) {
        return None;
    }
    let index = u32::from(address.octets()[3]);
    (MIN_INDEX..=MAX_INDEX).contains(&index).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quark_core::ErrorKind;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn replaces_last_octet() {
        let n = net("10.0.0.0/24");
        for i in [1u32, 2, 100, 254] {
            assert_eq!(vpn_address(&n, i).unwrap().to_string(), format!("10.0.0.{i}"));
        }
    }

    #[test]
    fn host_bits_in_network_are_ignored() {
        let n = net("192.168.35.17/24");
        assert_eq!(vpn_address(&n, 3).unwrap(), Ipv4Addr::new(192, 168, 35, 3));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let n = net("10.0.0.0/24");
        assert_eq!(vpn_address(&n, 0).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(vpn_address(&n, 255).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn rejects_other_prefixes() {
        assert_eq!(
            vpn_address(&net("10.0.0.0/16"), 1).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            vpn_address(&net("10.0.0.0/25"), 1).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn index_lookup() {
        let n = net("192.168.35.0/24");
        assert_eq!(vpn_index(&n, Ipv4Addr::new(192, 168, 35, 7)), Some(7));
        assert_eq!(vpn_index(&n, Ipv4Addr::new(192, 168, 36, 7)), None);
        assert_eq!(vpn_index(&n, Ipv4Addr::new(192, 168, 35, 255)), None);
    }
}
