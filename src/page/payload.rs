//! page/payload — кодек 224-байтового payload: дельты, затем qvals.
//!
//! Раскладка: delta-полоса (count байт при dt_bits=8, иначе 2*count LE),
//! сразу за ней qval-полоса (2*count LE, int16 two's-complement), хвост до
//! 224 байт — 0xFF (NOR-чистый). CRC payload'а считается по всем 224 байтам,
//! включая паддинг.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::PAYLOAD_BYTES;

/// Закодировать полосы в dst; возвращает число занятых байт.
/// count и ширину полос валидирует вызывающий код (fit-test билдера).
pub fn encode_payload(
    dst: &mut [u8; PAYLOAD_BYTES],
    dt_bits: u8,
    deltas: &[u32],
    qvals: &[i16],
) -> usize {
    debug_assert_eq!(deltas.len(), qvals.len());

    let mut off = 0usize;
    if dt_bits == 8 {
        for &d in deltas {
            dst[off] = d as u8;
            off += 1;
        }
    } else {
        for &d in deltas {
            LittleEndian::write_u16(&mut dst[off..off + 2], d as u16);
            off += 2;
        }
    }
    for &q in qvals {
        LittleEndian::write_u16(&mut dst[off..off + 2], q as u16);
        off += 2;
    }
    debug_assert!(off <= PAYLOAD_BYTES);
    dst[off..].fill(0xFF);
    off
}

/// Обратная операция; count и dt_bits приходят из проверенного заголовка.
pub fn decode_payload(
    src: &[u8; PAYLOAD_BYTES],
    dt_bits: u8,
    deltas: &mut [u32],
    qvals: &mut [i16],
) -> usize {
    debug_assert_eq!(deltas.len(), qvals.len());

    let mut off = 0usize;
    if dt_bits == 8 {
        for d in deltas.iter_mut() {
            *d = src[off] as u32;
            off += 1;
        }
    } else {
        for d in deltas.iter_mut() {
            *d = LittleEndian::read_u16(&src[off..off + 2]) as u32;
            off += 2;
        }
    }
    for q in qvals.iter_mut() {
        *q = LittleEndian::read_u16(&src[off..off + 2]) as i16;
        off += 2;
    }
    off
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt8_roundtrip_and_padding() {
        let deltas = [0u32, 10, 255, 3];
        let qvals = [-32768i16, -1, 0, 32767];
        let mut buf = [0u8; PAYLOAD_BYTES];
        let used = encode_payload(&mut buf, 8, &deltas, &qvals);
        assert_eq!(used, 4 + 8);
        assert!(buf[used..].iter().all(|&b| b == 0xFF));

        let mut d = [0u32; 4];
        let mut q = [0i16; 4];
        let read = decode_payload(&buf, 8, &mut d, &mut q);
        assert_eq!(read, used);
        assert_eq!(d, deltas);
        assert_eq!(q, qvals);
    }

    #[test]
    fn dt16_roundtrip() {
        let deltas = [0u32, 300, 65535];
        let qvals = [5i16, -7, 1000];
        let mut buf = [0u8; PAYLOAD_BYTES];
        let used = encode_payload(&mut buf, 16, &deltas, &qvals);
        assert_eq!(used, 6 + 6);

        let mut d = [0u32; 3];
        let mut q = [0i16; 3];
        decode_payload(&buf, 16, &mut d, &mut q);
        assert_eq!(d, deltas);
        assert_eq!(q, qvals);
    }

    #[test]
    fn single_row_block() {
        // count=1: deltas[0] обязан быть 0, dt8
        let mut buf = [0u8; PAYLOAD_BYTES];
        let used = encode_payload(&mut buf, 8, &[0], &[-5]);
        assert_eq!(used, 3);

        let mut d = [9u32; 1];
        let mut q = [0i16; 1];
        decode_payload(&buf, 8, &mut d, &mut q);
        assert_eq!(d[0], 0);
        assert_eq!(q[0], -5);
    }

    #[test]
    fn reencode_is_bit_identical() {
        let deltas: Vec<u32> = (0..50).map(|i| (i * 7) % 256).collect();
        let qvals: Vec<i16> = (0..50).map(|i| (i as i16) * -13).collect();
        let mut a = [0u8; PAYLOAD_BYTES];
        encode_payload(&mut a, 8, &deltas, &qvals);

        let mut d = vec![0u32; 50];
        let mut q = vec![0i16; 50];
        decode_payload(&a, 8, &mut d, &mut q);

        let mut b = [0u8; PAYLOAD_BYTES];
        encode_payload(&mut b, 8, &d, &q);
        assert_eq!(a[..], b[..]);
    }
}
