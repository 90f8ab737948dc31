use std::net::IpAddr;

/// One row of a virtual network's DHCP lease table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Lower-case hardware address.
    pub mac: String,
    pub ip: IpAddr,
    pub hostname: Option<String>,
}

impl Lease {
    pub fn matches_mac(&self, mac: &str) -> bool {
        self.mac.eq_ignore_ascii_case(mac)
    }
}

/// Parse the table printed by `virsh net-dhcp-leases`.
///
/// Rows are `<date> <time> <mac> <protocol> <ip>/<prefix> <hostname> <client id>`.
/// Header, separator and malformed rows are skipped.
pub(crate) fn parse_leases(output: &str) -> Vec<Lease> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            let mac = fields[2];
            if mac.len() != 17 || mac.matches(':').count() != 5 {
                return None;
            }
            let ip = fields[4].split('/').next()?.parse().ok()?;
            let hostname = fields
                .get(5)
                .filter(|hostname| **hostname != "-")
                .map(|hostname| (*hostname).to_owned());
            Some(Lease {
                mac: mac.to_ascii_lowercase(),
                ip,
                hostname,
            })
        })
        .collect()
}
