//! Address Allocator
//!
//! Addresses are handed out lowest first. Offset 0 of a range is the network
//! address and offset 1 the server's gateway address, so the first client
//! gets offset 2. The IPv4 broadcast address is never assigned.
//!
//! Occupancy is recomputed from the Session Store on every call; the only
//! local state is the set of addresses reserved by transactions that have
//! not yet written their session row.

use chrono::Utc;
use dashmap::DashMap;
use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::debug;
use vportal_config::Profile;
use vportal_db::SessionStore;
use vportal_proto::{AddressFamily, VpnProtocol};

use crate::error::ConnectError;

type PoolKey = (String, VpnProtocol);

/// One address of each family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedAddresses {
    pub four: Ipv4Addr,
    pub six: Ipv6Addr,
}

pub struct AddressAllocator {
    store: Arc<dyn SessionStore>,
    reserved: DashMap<PoolKey, HashSet<IpAddr>>,
}

impl AddressAllocator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            reserved: DashMap::new(),
        }
    }

    /// Reserve the lowest free address of `family` in the profile's range for `protocol`
    ///
    /// Callers serialize allocation per (profile, protocol) and release the
    /// reservation once the address is claimed by a session row, or on abort.
    pub async fn allocate(
        &self,
        profile: &Profile,
        protocol: VpnProtocol,
        family: AddressFamily,
    ) -> Result<IpAddr, ConnectError> {
        let range = profile.range(protocol).ok_or_else(|| {
            ConnectError::InvalidRequest(format!(
                "profile {} does not support {}",
                profile.profile_id, protocol
            ))
        })?;
        let network = range.network(family);

        let now = Utc::now();
        let mut occupied: HashSet<IpAddr> = self
            .store
            .list_by_profile(&profile.profile_id)
            .await?
            .into_iter()
            .filter(|s| s.protocol == protocol && !s.is_expired(now))
            .map(|s| match family {
                AddressFamily::V4 => IpAddr::V4(s.ip_four),
                AddressFamily::V6 => IpAddr::V6(s.ip_six),
            })
            .collect();

        let key = (profile.profile_id.clone(), protocol);
        let mut reserved = self.reserved.entry(key).or_default();
        occupied.extend(reserved.iter().copied());

        let address = lowest_free(network, &occupied).ok_or_else(|| {
            ConnectError::NoAddressAvailable {
                profile_id: profile.profile_id.clone(),
                protocol,
                family,
            }
        })?;
        reserved.insert(address);

        debug!(
            profile_id = %profile.profile_id,
            protocol = %protocol,
            address = %address,
            "Reserved address"
        );
        Ok(address)
    }

    /// Reserve one IPv4 and one IPv6 address; nothing stays reserved on failure
    pub async fn allocate_pair(
        &self,
        profile: &Profile,
        protocol: VpnProtocol,
    ) -> Result<AllocatedAddresses, ConnectError> {
        let four = self.allocate(profile, protocol, AddressFamily::V4).await?;
        let six = match self.allocate(profile, protocol, AddressFamily::V6).await {
            Ok(six) => six,
            Err(e) => {
                self.release(&profile.profile_id, protocol, four);
                return Err(e);
            }
        };

        match (four, six) {
            (IpAddr::V4(four), IpAddr::V6(six)) => Ok(AllocatedAddresses { four, six }),
            _ => {
                self.release(&profile.profile_id, protocol, four);
                self.release(&profile.profile_id, protocol, six);
                Err(ConnectError::StorageFailure(
                    "address family mismatch in profile range".to_string(),
                ))
            }
        }
    }

    pub fn release(&self, profile_id: &str, protocol: VpnProtocol, address: IpAddr) {
        let key = (profile_id.to_string(), protocol);
        if let Some(mut reserved) = self.reserved.get_mut(&key) {
            reserved.remove(&address);
        }
    }

    pub fn release_pair(&self, profile_id: &str, protocol: VpnProtocol, addresses: AllocatedAddresses) {
        self.release(profile_id, protocol, IpAddr::V4(addresses.four));
        self.release(profile_id, protocol, IpAddr::V6(addresses.six));
    }

    /// Number of addresses currently reserved by in-flight transactions
    pub fn reserved_count(&self) -> usize {
        self.reserved.iter().map(|entry| entry.value().len()).sum()
    }
}

/// First and last assignable host offsets of `network`
fn host_offsets(network: IpNetwork) -> (u128, u128) {
    let (bits, v4) = match network {
        IpNetwork::V4(_) => (32u32, true),
        IpNetwork::V6(_) => (128u32, false),
    };
    let host_bits = bits - u32::from(network.prefix());
    let last = if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    };

    // Skip the IPv4 broadcast address
    let last = if v4 { last - 1 } else { last };
    (2, last)
}

fn address_at(network: IpNetwork, offset: u128) -> IpAddr {
    match network {
        IpNetwork::V4(net) => {
            let base = u32::from(net.network()) as u128;
            IpAddr::V4(Ipv4Addr::from((base + offset) as u32))
        }
        IpNetwork::V6(net) => {
            let base = u128::from(net.network());
            IpAddr::V6(Ipv6Addr::from(base.wrapping_add(offset)))
        }
    }
}

/// Lowest host address of `network` not in `occupied`
///
/// Visits at most `occupied.len() + 1` candidates.
fn lowest_free(network: IpNetwork, occupied: &HashSet<IpAddr>) -> Option<IpAddr> {
    let (first, last) = host_offsets(network);
    let mut offset = first;
    loop {
        if offset > last {
            return None;
        }
        let candidate = address_at(network, offset);
        if !occupied.contains(&candidate) {
            return Some(candidate);
        }
        offset = offset.checked_add(1)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_client_skips_network_and_gateway() {
        let free = lowest_free(net("10.44.44.0/24"), &HashSet::new());
        assert_eq!(free, Some(ip("10.44.44.2")));

        let free = lowest_free(net("fd44::/64"), &HashSet::new());
        assert_eq!(free, Some(ip("fd44::2")));
    }

    #[test]
    fn test_lowest_free_slot_is_reused() {
        let occupied: HashSet<_> = [ip("10.44.44.2"), ip("10.44.44.4")].into_iter().collect();
        assert_eq!(
            lowest_free(net("10.44.44.0/24"), &occupied),
            Some(ip("10.44.44.3"))
        );
    }

    #[test]
    fn test_ipv4_broadcast_never_assigned() {
        // /30: network .0, gateway .1, client .2, broadcast .3
        let occupied: HashSet<_> = [ip("10.0.0.2")].into_iter().collect();
        assert_eq!(lowest_free(net("10.0.0.0/30"), &occupied), None);

        let full: HashSet<_> = (2..=254).map(|i| ip(&format!("10.1.1.{i}"))).collect();
        assert_eq!(lowest_free(net("10.1.1.0/24"), &full), None);
    }

    #[test]
    fn test_ipv6_small_range() {
        // /126: offsets 2 and 3 are assignable
        let occupied: HashSet<_> = [ip("fd00::2")].into_iter().collect();
        assert_eq!(lowest_free(net("fd00::/126"), &occupied), Some(ip("fd00::3")));

        let occupied: HashSet<_> = [ip("fd00::2"), ip("fd00::3")].into_iter().collect();
        assert_eq!(lowest_free(net("fd00::/126"), &occupied), None);
    }

    #[test]
    fn test_host_offsets() {
        assert_eq!(host_offsets(net("10.0.0.0/24")), (2, 254));
        assert_eq!(host_offsets(net("fd00::/120")), (2, 255));
        assert_eq!(host_offsets(net("::/0")), (2, u128::MAX));
    }
}
