//! page/header — 32-байтовый заголовок блока: pack/unpack + header CRC.
//!
//! Заголовок публикуется вторым program'ом страницы (header-last commit);
//! блок существует тогда и только тогда, когда magic и header CRC сходятся.
//! unpack дополнительно отбраковывает count/dt_bits, не помещающиеся в
//! 224 байта payload или в 74 строки стейджинга: даже заголовок с валидным
//! CRC не должен позволить переполнить буферы декодера.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    BLOCK_MAGIC, HDR_CRC_COVERED, HDR_OFF_BIAS, HDR_OFF_COUNT, HDR_OFF_DT_BITS, HDR_OFF_HEADER_CRC,
    HDR_OFF_MAGIC, HDR_OFF_PAYLOAD_CRC, HDR_OFF_SCALE, HDR_OFF_SERIES, HDR_OFF_T0, HEADER_BYTES,
    PAYLOAD_BYTES, STAGE_CAP,
};
use crate::page::crc::crc32c;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockHeader {
    pub series: u16,
    pub count: u16,
    pub t0_ms: u32,
    pub dt_bits: u8, // 8 или 16
    pub bias: f32,
    pub scale: f32,
    pub payload_crc: u32,
    pub header_crc: u32,
}

/// Сколько байт payload занимают count строк при данной ширине дельт.
#[inline]
pub fn payload_used(count: u16, dt_bits: u8) -> usize {
    let c = count as usize;
    c * (dt_bits as usize / 8) + c * 2
}

/// Сериализовать заголовок; header_crc считается по байтам 0..28.
pub fn pack_header(out: &mut [u8; HEADER_BYTES], h: &BlockHeader) {
    out.fill(0xFF);
    LittleEndian::write_u32(&mut out[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 4], BLOCK_MAGIC);
    LittleEndian::write_u16(&mut out[HDR_OFF_SERIES..HDR_OFF_SERIES + 2], h.series);
    LittleEndian::write_u16(&mut out[HDR_OFF_COUNT..HDR_OFF_COUNT + 2], h.count);
    LittleEndian::write_u32(&mut out[HDR_OFF_T0..HDR_OFF_T0 + 4], h.t0_ms);
    out[HDR_OFF_DT_BITS] = h.dt_bits;
    // байты 13..16 остаются 0xFF (pad)
    LittleEndian::write_f32(&mut out[HDR_OFF_BIAS..HDR_OFF_BIAS + 4], h.bias);
    LittleEndian::write_f32(&mut out[HDR_OFF_SCALE..HDR_OFF_SCALE + 4], h.scale);
    LittleEndian::write_u32(
        &mut out[HDR_OFF_PAYLOAD_CRC..HDR_OFF_PAYLOAD_CRC + 4],
        h.payload_crc,
    );
    let hc = crc32c(&out[..HDR_CRC_COVERED]);
    LittleEndian::write_u32(&mut out[HDR_OFF_HEADER_CRC..HDR_OFF_HEADER_CRC + 4], hc);
}

/// Разобрать и проверить заголовок. None — magic/CRC mismatch или
/// неправдоподобные count/dt_bits; дальше страница не инспектируется.
pub fn unpack_header(raw: &[u8; HEADER_BYTES]) -> Option<BlockHeader> {
    if LittleEndian::read_u32(&raw[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 4]) != BLOCK_MAGIC {
        return None;
    }
    let stored = LittleEndian::read_u32(&raw[HDR_OFF_HEADER_CRC..HDR_OFF_HEADER_CRC + 4]);
    if crc32c(&raw[..HDR_CRC_COVERED]) != stored {
        return None;
    }

    let h = BlockHeader {
        series: LittleEndian::read_u16(&raw[HDR_OFF_SERIES..HDR_OFF_SERIES + 2]),
        count: LittleEndian::read_u16(&raw[HDR_OFF_COUNT..HDR_OFF_COUNT + 2]),
        t0_ms: LittleEndian::read_u32(&raw[HDR_OFF_T0..HDR_OFF_T0 + 4]),
        dt_bits: raw[HDR_OFF_DT_BITS],
        bias: LittleEndian::read_f32(&raw[HDR_OFF_BIAS..HDR_OFF_BIAS + 4]),
        scale: LittleEndian::read_f32(&raw[HDR_OFF_SCALE..HDR_OFF_SCALE + 4]),
        payload_crc: LittleEndian::read_u32(&raw[HDR_OFF_PAYLOAD_CRC..HDR_OFF_PAYLOAD_CRC + 4]),
        header_crc: stored,
    };

    if h.dt_bits != 8 && h.dt_bits != 16 {
        return None;
    }
    if h.count == 0
        || h.count as usize > STAGE_CAP
        || payload_used(h.count, h.dt_bits) > PAYLOAD_BYTES
    {
        return None;
    }
    Some(h)
}
