//! page/crc — CRC-32C (Castagnoli), единственная чексумма формата.
//!
//! Полином 0x1EDC6F41 (reflected), init/final-xor 0xFFFFFFFF; реализация —
//! crate crc32c (аппаратное ускорение где доступно). Эталонный вектор:
//! "123456789" -> 0xE3069283.

#[inline]
pub fn crc32c(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}
