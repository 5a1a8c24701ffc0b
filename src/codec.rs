//! Fixed-width binary decoding for log topics and ABI data words.
//!
//! Every numeric field of the pool events lives in a 32-byte word, either an
//! indexed topic or a slot of the unindexed data buffer. The helpers here pull
//! typed values out of those words and are the only place that knows about
//! two's-complement sign extension, in particular for 24-bit ticks.
//!
//! All functions are pure. Fallible ones return [`MonitorResult`] with a
//! [`MonitorError::DecodingError`] when the buffer is too short or a padded
//! field carries non-zero high bytes.

use alloy::primitives::aliases::U160;
use alloy::primitives::{Address, B256, I256, U256};

use crate::error::{MonitorError, MonitorResult};

/// Size of one ABI word (and of one topic) in bytes.
pub const WORD_SIZE: usize = 32;

/// Byte width of an `int24` tick.
pub const TICK_WIDTH: usize = 3;

/// Interpret the last `width` bytes of `bytes` as a big-endian two's-complement
/// integer of `width * 8` bits.
///
/// `width` must be between 1 and 8 so the value fits an `i64`.
///
/// # Errors
///
/// Returns a decoding error if `width` is out of range or `bytes` holds fewer
/// than `width` bytes.
///
/// # Example
///
/// ```
/// use v3_pool_stream::codec::decode_signed_be;
///
/// assert_eq!(decode_signed_be(&[0xff, 0xff, 0x88], 3).unwrap(), -120);
/// assert_eq!(decode_signed_be(&[0x00, 0x7f, 0xff, 0xff], 3).unwrap(), 8_388_607);
/// ```
pub fn decode_signed_be(bytes: &[u8], width: usize) -> MonitorResult<i64> {
    if width == 0 || width > 8 {
        return Err(MonitorError::decoding(
            format!("signed width must be 1..=8 bytes, got {width}"),
            None,
        ));
    }
    if bytes.len() < width {
        return Err(MonitorError::decoding(
            format!(
                "need {width} bytes for a signed integer, buffer has {}",
                bytes.len()
            ),
            None,
        ));
    }

    let field = &bytes[bytes.len() - width..];
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(field);

    // Left-align the field, then an arithmetic shift restores the sign.
    Ok(i64::from_be_bytes(raw) >> (8 * (8 - width)))
}

/// Sign-extend a 3-byte big-endian field into an `i32`.
const fn int24_from_be(b: [u8; TICK_WIDTH]) -> i32 {
    i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8
}

/// Decode an `int24` tick stored in the low 3 bytes of an indexed topic.
///
/// Bit 23 of the field is the sign bit; the 29 high bytes of the topic are
/// ignored.
#[must_use]
pub const fn decode_tick_from_topic(topic: &B256) -> i32 {
    let b = topic.0;
    int24_from_be([b[29], b[30], b[31]])
}

/// Decode an `int24` tick stored in the low 3 bytes of a 32-byte data slot.
///
/// # Errors
///
/// Returns a decoding error unless `slot` is exactly one word long.
pub fn decode_tick_from_slot(slot: &[u8]) -> MonitorResult<i32> {
    if slot.len() != WORD_SIZE {
        return Err(MonitorError::decoding(
            format!("tick slot must be {WORD_SIZE} bytes, got {}", slot.len()),
            None,
        ));
    }
    Ok(int24_from_be([slot[29], slot[30], slot[31]]))
}

/// Address carried in the low 20 bytes of an indexed topic.
#[must_use]
pub fn address_from_topic(topic: &B256) -> Address {
    Address::from_word(*topic)
}

/// Borrow the `index`-th 32-byte word of an ABI data buffer.
///
/// # Errors
///
/// Returns a decoding error if the buffer ends before that word does.
pub fn word_at(data: &[u8], index: usize) -> MonitorResult<&[u8; WORD_SIZE]> {
    let start = index * WORD_SIZE;
    data.get(start..start + WORD_SIZE)
        .and_then(|w| <&[u8; WORD_SIZE]>::try_from(w).ok())
        .ok_or_else(|| {
            MonitorError::decoding(
                format!("data word {index} out of range ({} bytes)", data.len()),
                None,
            )
        })
}

/// Decode an `int256` word.
#[must_use]
pub fn decode_int256(word: &[u8; WORD_SIZE]) -> I256 {
    I256::from_raw(U256::from_be_bytes(*word))
}

/// Decode a `uint256` word.
#[must_use]
pub fn decode_uint256(word: &[u8; WORD_SIZE]) -> U256 {
    U256::from_be_bytes(*word)
}

/// Decode a `uint160` word, rejecting non-zero padding.
///
/// # Errors
///
/// Returns a decoding error if any of the 12 high bytes is set.
pub fn decode_uint160(word: &[u8; WORD_SIZE]) -> MonitorResult<U160> {
    check_padding(word, 20, "uint160")?;
    Ok(U160::from_be_slice(&word[12..]))
}

/// Decode a `uint128` word, rejecting non-zero padding.
///
/// # Errors
///
/// Returns a decoding error if any of the 16 high bytes is set.
pub fn decode_uint128(word: &[u8; WORD_SIZE]) -> MonitorResult<u128> {
    check_padding(word, 16, "uint128")?;
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn check_padding(word: &[u8; WORD_SIZE], width: usize, ty: &str) -> MonitorResult<()> {
    if word[..WORD_SIZE - width].iter().any(|b| *b != 0) {
        return Err(MonitorError::decoding(
            format!("{ty} word has non-zero padding"),
            None,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;

    fn tick_word(tick: i32) -> [u8; WORD_SIZE] {
        // ABI encoding sign-extends across the whole word.
        I256::try_from(tick).map_or([0u8; WORD_SIZE], |v| v.to_be_bytes::<WORD_SIZE>())
    }

    #[test]
    fn test_decode_signed_be_int24_full_range() {
        for value in -(1i32 << 23)..(1i32 << 23) {
            let bytes = value.to_be_bytes();
            let decoded = decode_signed_be(&bytes[1..], 3);
            assert_eq!(decoded.ok(), Some(i64::from(value)), "value {value}");
        }
    }

    #[test]
    fn test_decode_signed_be_reads_trailing_bytes() {
        // Leading bytes are ignored, only the last `width` matter.
        let mut word = [0xAAu8; WORD_SIZE];
        word[29..].copy_from_slice(&[0x80, 0x00, 0x00]);
        assert_eq!(decode_signed_be(&word, 3).ok(), Some(-8_388_608));

        assert_eq!(decode_signed_be(&[0x7f], 1).ok(), Some(127));
        assert_eq!(decode_signed_be(&[0x80], 1).ok(), Some(-128));
        assert_eq!(decode_signed_be(&[0xff; 8], 8).ok(), Some(-1));
    }

    #[test]
    fn test_decode_signed_be_rejects_short_buffer() {
        let err = decode_signed_be(&[0x01, 0x02], 3);
        assert!(matches!(err, Err(MonitorError::DecodingError { .. })));
    }

    #[test]
    fn test_decode_signed_be_rejects_bad_width() {
        assert!(decode_signed_be(&[0u8; 16], 0).is_err());
        assert!(decode_signed_be(&[0u8; 16], 9).is_err());
    }

    #[test]
    fn test_decode_tick_from_topic() {
        let negative = b256!("0xfffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe20");
        assert_eq!(decode_tick_from_topic(&negative), -480);

        let positive = b256!("0x00000000000000000000000000000000000000000000000000000000000d89b4");
        assert_eq!(decode_tick_from_topic(&positive), 887_220);
    }

    #[test]
    fn test_decode_tick_from_topic_ignores_high_bytes() {
        // Only bit 23 of the 3-byte field decides the sign.
        let topic = b256!("0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffff7fffff");
        assert_eq!(decode_tick_from_topic(&topic), 8_388_607);
    }

    #[test]
    fn test_decode_tick_from_slot_matches_topic() {
        for tick in [-887_272, -120, -1, 0, 1, 60, 887_272] {
            let word = tick_word(tick);
            assert_eq!(decode_tick_from_slot(&word).ok(), Some(tick));
            assert_eq!(decode_tick_from_topic(&B256::from(word)), tick);
        }
    }

    #[test]
    fn test_decode_tick_from_slot_rejects_wrong_size() {
        assert!(decode_tick_from_slot(&[0u8; 31]).is_err());
        assert!(decode_tick_from_slot(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_address_from_topic() {
        let topic = b256!("0x000000000000000000000000e592427a0aece92de3edee1f18e0157c05861564");
        assert_eq!(
            address_from_topic(&topic).to_checksum(None),
            "0xE592427A0AEce92De3Edee1F18E0157C05861564"
        );
    }

    #[test]
    fn test_word_at_bounds() {
        let data = [0u8; 64];
        assert!(word_at(&data, 0).is_ok());
        assert!(word_at(&data, 1).is_ok());
        assert!(word_at(&data, 2).is_err());
    }

    #[test]
    fn test_decode_int256_negative() {
        let word = [0xffu8; WORD_SIZE];
        assert_eq!(decode_int256(&word), I256::MINUS_ONE);
    }

    #[test]
    fn test_decode_uint128_padding() {
        let mut word = [0u8; WORD_SIZE];
        word[31] = 42;
        assert_eq!(decode_uint128(&word).ok(), Some(42));

        word[15] = 1;
        assert!(decode_uint128(&word).is_err());
    }

    #[test]
    fn test_decode_uint160_padding() {
        let mut word = [0u8; WORD_SIZE];
        word[12] = 1;
        assert_eq!(decode_uint160(&word).ok(), Some(U160::from(1u8) << 152));

        word[11] = 1;
        assert!(decode_uint160(&word).is_err());
    }
}
