//! page/footer — запись футера сегмента (56 B внутри 256 B страницы).
//!
//! Футер пишется в последнюю страницу сегмента ровно один раз, на rollover.
//! CRC-32C считается по всей записи с обнулённым полем crc.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    FOOTER_MAGIC, FOOTER_OFF_BITMAP, FOOTER_OFF_BLOCK_COUNT, FOOTER_OFF_CRC, FOOTER_OFF_SEQNO,
    FOOTER_OFF_T_MAX, FOOTER_OFF_T_MIN, FOOTER_RECORD_BYTES, PAGE_BYTES, SERIES_BITMAP_BYTES,
};
use crate::page::crc::crc32c;

#[derive(Debug, Clone, Copy)]
pub struct SegFooter {
    pub seg_seqno: u32,
    pub t_min: u32,
    pub t_max: u32,
    pub block_count: u32,
    pub series_bitmap: [u8; SERIES_BITMAP_BYTES],
}

/// Собрать образ страницы футера: запись с CRC + 0xFF-хвост.
pub fn pack_footer_page(f: &SegFooter) -> [u8; PAGE_BYTES as usize] {
    let mut page = [0xFFu8; PAGE_BYTES as usize];
    let rec = &mut page[..FOOTER_RECORD_BYTES];
    LittleEndian::write_u32(&mut rec[0..4], FOOTER_MAGIC);
    LittleEndian::write_u32(&mut rec[FOOTER_OFF_SEQNO..FOOTER_OFF_SEQNO + 4], f.seg_seqno);
    LittleEndian::write_u32(&mut rec[FOOTER_OFF_T_MIN..FOOTER_OFF_T_MIN + 4], f.t_min);
    LittleEndian::write_u32(&mut rec[FOOTER_OFF_T_MAX..FOOTER_OFF_T_MAX + 4], f.t_max);
    LittleEndian::write_u32(
        &mut rec[FOOTER_OFF_BLOCK_COUNT..FOOTER_OFF_BLOCK_COUNT + 4],
        f.block_count,
    );
    rec[FOOTER_OFF_BITMAP..FOOTER_OFF_BITMAP + SERIES_BITMAP_BYTES]
        .copy_from_slice(&f.series_bitmap);
    // crc по записи с обнулённым полем crc
    LittleEndian::write_u32(&mut rec[FOOTER_OFF_CRC..FOOTER_OFF_CRC + 4], 0);
    let crc = crc32c(&rec[..FOOTER_RECORD_BYTES]);
    LittleEndian::write_u32(&mut rec[FOOTER_OFF_CRC..FOOTER_OFF_CRC + 4], crc);
    page
}

/// Разобрать футер из образа страницы. None — нет magic или CRC не сошёлся.
pub fn unpack_footer_page(page: &[u8; PAGE_BYTES as usize]) -> Option<SegFooter> {
    if LittleEndian::read_u32(&page[0..4]) != FOOTER_MAGIC {
        return None;
    }
    let stored = LittleEndian::read_u32(&page[FOOTER_OFF_CRC..FOOTER_OFF_CRC + 4]);
    let mut rec = [0u8; FOOTER_RECORD_BYTES];
    rec.copy_from_slice(&page[..FOOTER_RECORD_BYTES]);
    rec[FOOTER_OFF_CRC..FOOTER_OFF_CRC + 4].fill(0);
    if crc32c(&rec) != stored {
        return None;
    }

    let mut bitmap = [0u8; SERIES_BITMAP_BYTES];
    bitmap.copy_from_slice(&page[FOOTER_OFF_BITMAP..FOOTER_OFF_BITMAP + SERIES_BITMAP_BYTES]);
    Some(SegFooter {
        seg_seqno: LittleEndian::read_u32(&page[FOOTER_OFF_SEQNO..FOOTER_OFF_SEQNO + 4]),
        t_min: LittleEndian::read_u32(&page[FOOTER_OFF_T_MIN..FOOTER_OFF_T_MIN + 4]),
        t_max: LittleEndian::read_u32(&page[FOOTER_OFF_T_MAX..FOOTER_OFF_T_MAX + 4]),
        block_count: LittleEndian::read_u32(
            &page[FOOTER_OFF_BLOCK_COUNT..FOOTER_OFF_BLOCK_COUNT + 4],
        ),
        series_bitmap: bitmap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let mut bitmap = [0u8; SERIES_BITMAP_BYTES];
        bitmap[0] = 0b0000_0110; // серии 1 и 2
        let f = SegFooter {
            seg_seqno: 17,
            t_min: 1000,
            t_max: 9999,
            block_count: 15,
            series_bitmap: bitmap,
        };
        let page = pack_footer_page(&f);
        assert!(page[FOOTER_RECORD_BYTES..].iter().all(|&b| b == 0xFF));

        let got = unpack_footer_page(&page).expect("valid footer");
        assert_eq!(got.seg_seqno, 17);
        assert_eq!(got.t_min, 1000);
        assert_eq!(got.t_max, 9999);
        assert_eq!(got.block_count, 15);
        assert_eq!(got.series_bitmap, bitmap);
    }

    #[test]
    fn rejects_erased_and_torn() {
        let erased = [0xFFu8; PAGE_BYTES as usize];
        assert!(unpack_footer_page(&erased).is_none());

        let f = SegFooter {
            seg_seqno: 1,
            t_min: 0,
            t_max: 5,
            block_count: 1,
            series_bitmap: [0u8; SERIES_BITMAP_BYTES],
        };
        let mut page = pack_footer_page(&f);
        page[FOOTER_OFF_T_MAX] ^= 0xA5;
        assert!(unpack_footer_page(&page).is_none());
    }
}
