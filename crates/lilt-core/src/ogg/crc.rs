//! Ogg page checksum (CRC-32, polynomial 0x04c11db7, no reflection, no xor)

const POLY: u32 = 0x04c1_1db7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a checksum over `bytes`
#[inline]
pub fn update(mut crc: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        crc = (crc << 8) ^ TABLE[(((crc >> 24) as u8) ^ b) as usize];
    }
    crc
}

/// Checksum a page whose header checksum field (bytes 22..26) is zeroed
pub fn checksum(bytes: &[u8]) -> u32 {
    update(0, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-32/MPEG-2 without init/xorout, the variant Ogg uses
        assert_eq!(checksum(b"123456789"), 0x89a1_897f);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data = b"OggS page bytes";
        let split = update(update(0, &data[..5]), &data[5..]);
        assert_eq!(split, checksum(data));
    }
}
