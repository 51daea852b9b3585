//! Piece possession bitfield
//!
//! Bit `i` (MSB-first within each byte) records whether piece `i` is held.

/// Compact set of piece indices a peer claims to have
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bytes: Vec<u8>,
}

impl Bitfield {
    /// All-zero bitfield sized for `piece_count` pieces
    pub fn new(piece_count: usize) -> Self {
        Self {
            bytes: vec![0u8; Self::byte_len(piece_count)],
        }
    }

    /// Wrap the raw payload of a `bitfield` message
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Whether the piece at `index` is set. Indices beyond the stored bytes
    /// read as unset, so a short bitfield from a peer never panics.
    pub fn has_piece(&self, index: usize) -> bool {
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        match self.bytes.get(byte_index) {
            Some(byte) => (byte >> bit_index) & 1 == 1,
            None => false,
        }
    }

    /// Mark the piece at `index` as held. Returns `false`, leaving the
    /// bitfield untouched, if `index` is beyond the stored bytes.
    pub fn set_piece(&mut self, index: usize) -> bool {
        let bit_index = 7 - (index % 8);
        match self.bytes.get_mut(index / 8) {
            Some(byte) => {
                *byte |= 1 << bit_index;
                true
            }
            None => false,
        }
    }

    /// Number of bytes a bitfield for `piece_count` pieces occupies
    pub fn byte_len(piece_count: usize) -> usize {
        piece_count.div_ceil(8)
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_all_clear() {
        let bitfield = Bitfield::new(20);
        assert_eq!(bitfield.as_bytes().len(), 3);
        assert!((0..20).all(|i| !bitfield.has_piece(i)));
        assert_eq!(bitfield.count(), 0);
    }

    #[test]
    fn test_new_rounds_up() {
        assert_eq!(Bitfield::new(0).as_bytes().len(), 0);
        assert_eq!(Bitfield::new(8).as_bytes().len(), 1);
        assert_eq!(Bitfield::new(9).as_bytes().len(), 2);
    }

    #[test]
    fn test_set_only_touches_one_bit() {
        for target in 0..24 {
            let mut bitfield = Bitfield::new(24);
            bitfield.set_piece(target);
            for i in 0..24 {
                assert_eq!(bitfield.has_piece(i), i == target, "target {} index {}", target, i);
            }
        }
    }

    #[test]
    fn test_msb_first_layout() {
        let mut bitfield = Bitfield::new(16);
        bitfield.set_piece(0);
        bitfield.set_piece(9);
        assert_eq!(bitfield.as_bytes(), &[0b1000_0000, 0b0100_0000]);
    }

    #[test]
    fn test_from_peer_bytes() {
        let bitfield = Bitfield::from_bytes(vec![0b1010_0000]);
        assert!(bitfield.has_piece(0));
        assert!(!bitfield.has_piece(1));
        assert!(bitfield.has_piece(2));
        assert!(!bitfield.has_piece(100));
        assert_eq!(bitfield.count(), 2);
    }

    #[test]
    fn test_set_beyond_storage_is_ignored() {
        let mut bitfield = Bitfield::new(1);
        assert!(!bitfield.set_piece(u32::MAX as usize));
        assert!(!bitfield.set_piece(8));
        assert_eq!(bitfield.as_bytes(), &[0]);

        assert!(bitfield.set_piece(0));
        assert_eq!(bitfield.count(), 1);
    }
}
