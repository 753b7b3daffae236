/// Reserved node id that addresses every device on the network at once.
/// Never valid as a frame's source.
pub const BROADCAST_ID: u8 = 0xFF;

/// Maps a 6-byte hardware address to the one-byte node id used on the wire,
/// mirroring `device-table`'s fixed identifier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub mac: [u8; 6],
    pub node: u8,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    entries: Vec<Identifier>,
}

impl IdentityTable {
    pub fn new(entries: Vec<Identifier>) -> Self {
        IdentityTable { entries }
    }

    pub fn lookup_mac(&self, mac: [u8; 6]) -> Option<Identifier> {
        self.entries.iter().copied().find(|e| e.mac == mac)
    }

    pub fn lookup_node(&self, node: u8) -> Option<Identifier> {
        self.entries.iter().copied().find(|e| e.node == node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> IdentityTable {
        IdentityTable::new(vec![
            Identifier {
                mac: [0, 1, 2, 3, 4, 5],
                node: 0x01,
            },
            Identifier {
                mac: [0, 1, 2, 3, 4, 6],
                node: 0x02,
            },
        ])
    }

    #[test]
    fn lookup_by_mac_finds_matching_node() {
        let table = sample_table();
        assert_eq!(table.lookup_mac([0, 1, 2, 3, 4, 6]).unwrap().node, 0x02);
    }

    #[test]
    fn lookup_by_node_finds_matching_mac() {
        let table = sample_table();
        assert_eq!(
            table.lookup_node(0x01).unwrap().mac,
            [0, 1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn unknown_lookups_return_none() {
        let table = sample_table();
        assert!(table.lookup_node(0x99).is_none());
    }
}
