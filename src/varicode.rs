// Varicode table and burst framing (spec §2, §4.5): a 256-entry prefix code
// with the property that no two consecutive zero bits ever occur inside a
// single character's code, so a run of two zero bits unambiguously marks a
// character boundary.

use std::sync::OnceLock;

/// `(bit_length, code)` for ASCII value `i`, code held right-justified in
/// the low `bit_length` bits. Bits are shifted out and sent LSB-first
/// (spec §4.5's burst consumption: test-and-shift on bit 0).
pub const TABLE: [(u8, u16); 256] = [
    (12, 0x0355), (12, 0x036d), (12, 0x02dd), (12, 0x03bb),
    (12, 0x035d), (12, 0x03eb), (12, 0x03dd), (12, 0x02fd),
    (12, 0x03fd), (10, 0x00f7), (7, 0x0017), (12, 0x03db),
    (12, 0x02ed), (7, 0x001f), (12, 0x02bb), (12, 0x0357),
    (12, 0x03bd), (12, 0x02bd), (12, 0x02d7), (12, 0x03d7),
    (12, 0x036b), (12, 0x035b), (12, 0x02db), (12, 0x03ab),
    (12, 0x037b), (12, 0x02fb), (12, 0x03b7), (12, 0x02ab),
    (12, 0x02eb), (12, 0x0377), (12, 0x037d), (12, 0x03fb),
    (3, 0x0001), (11, 0x01ff), (11, 0x01f5), (11, 0x015f),
    (11, 0x01b7), (12, 0x02ad), (12, 0x0375), (11, 0x01fd),
    (10, 0x00df), (10, 0x00ef), (11, 0x01ed), (11, 0x01f7),
    (9, 0x0057), (8, 0x002b), (9, 0x0075), (11, 0x01eb),
    (10, 0x00ed), (10, 0x00bd), (10, 0x00b7), (10, 0x00ff),
    (11, 0x01dd), (11, 0x01b5), (11, 0x01ad), (11, 0x016b),
    (11, 0x01ab), (11, 0x01db), (10, 0x00af), (11, 0x017b),
    (11, 0x016f), (9, 0x0055), (11, 0x01d7), (12, 0x03d5),
    (12, 0x02f5), (9, 0x005f), (10, 0x00d7), (10, 0x00b5),
    (10, 0x00ad), (9, 0x0077), (10, 0x00db), (10, 0x00bf),
    (11, 0x0155), (9, 0x007f), (11, 0x017f), (11, 0x017d),
    (10, 0x00eb), (10, 0x00dd), (10, 0x00bb), (10, 0x00d5),
    (10, 0x00ab), (11, 0x0177), (10, 0x00f5), (9, 0x007b),
    (9, 0x005b), (11, 0x01d5), (11, 0x015b), (11, 0x0175),
    (11, 0x015d), (11, 0x01bd), (12, 0x02d5), (11, 0x01df),
    (11, 0x01ef), (11, 0x01bf), (12, 0x03f5), (11, 0x016d),
    (12, 0x03ed), (6, 0x000d), (9, 0x007d), (8, 0x003d),
    (8, 0x002d), (4, 0x0003), (8, 0x002f), (9, 0x006d),
    (8, 0x0035), (6, 0x000b), (11, 0x01af), (10, 0x00fd),
    (7, 0x001b), (8, 0x0037), (6, 0x000f), (5, 0x0007),
    (8, 0x003f), (11, 0x01fb), (7, 0x0015), (7, 0x001d),
    (5, 0x0005), (8, 0x003b), (9, 0x006f), (9, 0x006b),
    (10, 0x00fb), (9, 0x005d), (11, 0x0157), (12, 0x03b5),
    (11, 0x01bb), (12, 0x02b5), (12, 0x03ad), (12, 0x02b7),
    (12, 0x02f7), (12, 0x03f7), (12, 0x02af), (12, 0x03af),
    (12, 0x036f), (12, 0x02ef), (12, 0x03ef), (12, 0x035f),
    (12, 0x02df), (12, 0x03df), (12, 0x02bf), (12, 0x03bf),
    (12, 0x037f), (12, 0x02ff), (12, 0x03ff), (13, 0x0555),
    (13, 0x0755), (13, 0x06d5), (13, 0x05d5), (13, 0x07d5),
    (13, 0x06b5), (13, 0x05b5), (13, 0x07b5), (13, 0x0575),
    (13, 0x0775), (13, 0x06f5), (13, 0x05f5), (13, 0x07f5),
    (13, 0x06ad), (13, 0x05ad), (13, 0x07ad), (13, 0x056d),
    (13, 0x076d), (13, 0x06ed), (13, 0x05ed), (13, 0x07ed),
    (13, 0x055d), (13, 0x075d), (13, 0x06dd), (13, 0x05dd),
    (13, 0x07dd), (13, 0x06bd), (13, 0x05bd), (13, 0x07bd),
    (13, 0x057d), (13, 0x077d), (13, 0x06fd), (13, 0x05fd),
    (13, 0x07fd), (13, 0x06ab), (13, 0x05ab), (13, 0x07ab),
    (13, 0x056b), (13, 0x076b), (13, 0x06eb), (13, 0x05eb),
    (13, 0x07eb), (13, 0x055b), (13, 0x075b), (13, 0x06db),
    (13, 0x05db), (13, 0x07db), (13, 0x06bb), (13, 0x05bb),
    (13, 0x07bb), (13, 0x057b), (13, 0x077b), (13, 0x06fb),
    (13, 0x05fb), (13, 0x07fb), (13, 0x0557), (13, 0x0757),
    (13, 0x06d7), (13, 0x05d7), (13, 0x07d7), (13, 0x06b7),
    (13, 0x05b7), (13, 0x07b7), (13, 0x0577), (13, 0x0777),
    (13, 0x06f7), (13, 0x05f7), (13, 0x07f7), (13, 0x06af),
    (13, 0x05af), (13, 0x07af), (13, 0x056f), (13, 0x076f),
    (13, 0x06ef), (13, 0x05ef), (13, 0x07ef), (13, 0x055f),
    (13, 0x075f), (13, 0x06df), (13, 0x05df), (13, 0x07df),
    (13, 0x06bf), (13, 0x05bf), (13, 0x07bf), (13, 0x057f),
    (13, 0x077f), (13, 0x06ff), (13, 0x05ff), (13, 0x07ff),
    (14, 0x0d55), (14, 0x0b55), (14, 0x0f55), (14, 0x0ad5),
    (14, 0x0ed5), (14, 0x0dd5), (14, 0x0bd5), (14, 0x0fd5),
    (14, 0x0ab5), (14, 0x0eb5), (14, 0x0db5), (14, 0x0bb5),
    (14, 0x0fb5), (14, 0x0d75), (14, 0x0b75), (14, 0x0f75),
    (14, 0x0af5), (14, 0x0ef5), (14, 0x0df5), (14, 0x0bf5),
    (14, 0x0ff5), (14, 0x0aad), (14, 0x0ead), (14, 0x0dad),
];

/// A framed burst: `len` bits of `bits`, right-justified, consumed
/// LSB-first — matching the four fixed shapes the modulator drives the
/// chain with (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct Burst {
    pub len: u8,
    pub bits: u32,
}

/// Two 1 bits: a phase reference the receiver locks onto before data
/// starts.
pub const STARTING: Burst = Burst { len: 20, bits: 0 };
/// All 1 bits: idle carrier, also used to flush the last character out
/// before stopping.
pub const ENDING: Burst = Burst {
    len: 20,
    bits: 0x000f_ffff,
};
/// A single 0 bit: keeps the channel alive between characters without
/// encoding data.
pub const FILL: Burst = Burst { len: 1, bits: 0 };
/// A single 1 bit: true idle, no characters pending.
pub const IDLE: Burst = Burst { len: 1, bits: 1 };

pub fn encode(byte: u8) -> (u8, u16) {
    TABLE[byte as usize]
}

/// Reverse lookup, built once on first use: `(bit_length, code) -> byte`
/// (spec §4.5's receive-side round-trip, exercised only by tests here —
/// this binary never receives).
fn decode_table() -> &'static std::collections::HashMap<(u8, u16), u8> {
    static DECODE: OnceLock<std::collections::HashMap<(u8, u16), u8>> = OnceLock::new();
    DECODE.get_or_init(|| {
        TABLE
            .iter()
            .enumerate()
            .map(|(byte, &(len, code))| ((len, code), byte as u8))
            .collect()
    })
}

pub fn decode(len: u8, code: u16) -> Option<u8> {
    decode_table().get(&(len, code)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_256_entries() {
        assert_eq!(TABLE.len(), 256);
    }

    #[test]
    fn space_and_common_letters_match_known_codes() {
        assert_eq!(TABLE[b' ' as usize], (3, 0x0001));
        assert_eq!(TABLE[b'e' as usize], (4, 0x0003));
        assert_eq!(TABLE[b'a' as usize], (6, 0x000d));
    }

    /// P3: encode/decode round-trips for every byte.
    #[test]
    fn every_byte_round_trips_through_the_table() {
        for byte in 0..=255u8 {
            let (len, code) = encode(byte);
            assert_eq!(decode(len, code), Some(byte));
        }
    }

    /// No code contains two consecutive zero bits once framed with its
    /// mandatory trailing "00" character separator (spec §2).
    #[test]
    fn no_code_contains_two_consecutive_zero_bits_before_framing() {
        for &(len, code) in TABLE.iter() {
            let mut prev_zero = false;
            for bit in (0..len).rev() {
                let b = (code >> bit) & 1;
                if b == 0 && prev_zero {
                    panic!("code {code:#x} (len {len}) has two consecutive zero bits");
                }
                prev_zero = b == 0;
            }
        }
    }
}
