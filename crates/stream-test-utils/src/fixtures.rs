//! Byte fixtures for recordings.

use bytes::Bytes;

/// `len` bytes whose value encodes their offset, shifted by `seed`.
///
/// Any misplaced byte in a download or playback shows up as a mismatch
/// against the same call.
pub fn patterned_bytes(len: usize, seed: u8) -> Bytes {
    (0..len)
        .map(|i| (i % 251) as u8 ^ seed)
        .collect::<Vec<u8>>()
        .into()
}

/// `patterned_bytes(len, seed)` split into consecutive pieces of `piece`
/// bytes (the last may be shorter).
pub fn patterned_pieces(len: usize, seed: u8, piece: usize) -> Vec<Bytes> {
    let all = patterned_bytes(len, seed);
    (0..len)
        .step_by(piece.max(1))
        .map(|start| all.slice(start..(start + piece).min(len)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterned_bytes_are_deterministic() {
        assert_eq!(patterned_bytes(40, 3), patterned_bytes(40, 3));
        assert_ne!(patterned_bytes(40, 3), patterned_bytes(40, 4));
    }

    #[test]
    fn test_pieces_cover_the_whole_pattern() {
        let pieces = patterned_pieces(40, 7, 16);
        let lens: Vec<usize> = pieces.iter().map(Bytes::len).collect();
        assert_eq!(lens, vec![16, 16, 8]);

        let joined: Vec<u8> = pieces.iter().flat_map(|p| p.iter().copied()).collect();
        assert_eq!(Bytes::from(joined), patterned_bytes(40, 7));
    }
}
