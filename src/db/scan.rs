//! db/scan — range-итератор с zone-map pruning и запрос последней точки.
//!
//! Итератор держит только неизменяемые ссылки (summary-массив + носитель)
//! и постраничные SoA-буферы декода; по одной строке за next(). Сегменты
//! обходятся по возрастанию seg_seqno — после оборота кольца физический
//! порядок слотов не совпадает с временным, а строки обязаны выходить в
//! порядке вставки.
//!
//! Изоляция повреждений: невалидный заголовок бросает остаток сегмента
//! (граница rollover'а), битый payload CRC учитывается и тоже бросает
//! сегмент; чужая серия пропускается без проверки payload CRC.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::consts::{
    DATA_PAGES_PER_SEG, HEADER_BYTES, MAX_SERIES, PAGE_BYTES, PAYLOAD_BYTES, STAGE_CAP,
};
use crate::db::core::Db;
use crate::errors::DbError;
use crate::flash::{Clock, Flash};
use crate::metrics::record_iter_page_read;
use crate::page::{crc32c, unpack_header};
use crate::ring::{delta_lane_last_ts, SegSummary};
use crate::util::{bitmap_has, ts_in_range, windows_overlap};

pub struct RangeIter<'a, F: Flash> {
    flash: &'a F,
    segs: &'a [SegSummary],
    crc_errors: &'a AtomicU32,

    series: u16,
    t0: u32,
    t1: u32,

    // сегментный курсор: последний посещённый ключ (seqno, slot)
    last_seen: Option<(u32, usize)>,
    cur_slot: Option<usize>,
    page_in_seg: u32,

    // декодированный блок (SoA)
    row_idx: usize,
    count_in_block: usize,
    times: [u32; STAGE_CAP],
    values: [f32; STAGE_CAP],

    // жёсткий потолок: seg_count*15 + 1 страниц за прогон
    pages_left: u64,
}

impl<'a, F: Flash> RangeIter<'a, F> {
    fn new(
        flash: &'a F,
        segs: &'a [SegSummary],
        crc_errors: &'a AtomicU32,
        series: u16,
        t0: u32,
        t1: u32,
    ) -> Self {
        Self {
            flash,
            segs,
            crc_errors,
            series,
            t0,
            t1,
            last_seen: None,
            cur_slot: None,
            page_in_seg: 0,
            row_idx: 0,
            count_in_block: 0,
            times: [0; STAGE_CAP],
            values: [0.0; STAGE_CAP],
            pages_left: segs.len() as u64 * DATA_PAGES_PER_SEG as u64 + 1,
        }
    }

    /// Следующий сегмент по возрастанию (seqno, slot) с учётом pruning.
    fn advance_segment(&mut self) -> Option<usize> {
        loop {
            let mut best: Option<(u32, usize)> = None;
            for (i, s) in self.segs.iter().enumerate() {
                if !s.valid {
                    continue;
                }
                let key = (s.seg_seqno, i);
                if let Some(last) = self.last_seen {
                    if key <= last {
                        continue;
                    }
                }
                if best.map_or(true, |b| key < b) {
                    best = Some(key);
                }
            }
            let (seq, slot) = best?;
            self.last_seen = Some((seq, slot));

            let s = &self.segs[slot];
            if s.block_count == 0 || !bitmap_has(&s.series_bitmap, self.series) {
                continue;
            }
            if !windows_overlap(s.t_min, s.t_max, self.t0, self.t1) {
                continue;
            }
            self.page_in_seg = 0;
            self.cur_slot = Some(slot);
            return Some(slot);
        }
    }

    /// Загрузить следующий подходящий блок в SoA-буферы.
    fn load_next_block(&mut self) -> bool {
        'segments: loop {
            let slot = match self.cur_slot {
                Some(s) => s,
                None => match self.advance_segment() {
                    Some(s) => s,
                    None => return false,
                },
            };

            while self.page_in_seg < DATA_PAGES_PER_SEG {
                if self.pages_left == 0 {
                    return false;
                }
                self.pages_left -= 1;

                let addr = self.segs[slot].addr_first + self.page_in_seg * PAGE_BYTES;
                let mut page = [0u8; PAGE_BYTES as usize];
                if self.flash.read(addr, &mut page).is_err() {
                    // нечитаемая страница бросает сегмент, как и битый заголовок
                    self.cur_slot = None;
                    self.page_in_seg = 0;
                    continue 'segments;
                }
                record_iter_page_read();

                let mut hdr = [0u8; HEADER_BYTES];
                hdr.copy_from_slice(&page[PAYLOAD_BYTES..]);
                let h = match unpack_header(&hdr) {
                    Some(h) => h,
                    None => {
                        // граница rollover'а или рваный заголовок
                        self.cur_slot = None;
                        self.page_in_seg = 0;
                        continue 'segments;
                    }
                };
                self.page_in_seg += 1;

                if h.series != self.series {
                    continue; // payload CRC чужой серии не проверяется
                }

                let mut payload = [0u8; PAYLOAD_BYTES];
                payload.copy_from_slice(&page[..PAYLOAD_BYTES]);
                if crc32c(&payload) != h.payload_crc {
                    self.crc_errors.fetch_add(1, Ordering::Relaxed);
                    self.cur_slot = None;
                    self.page_in_seg = 0;
                    continue 'segments;
                }

                // SoA-декод: префикс-сумма дельт + развёртка Fixed16
                let n = h.count as usize;
                let mut deltas = [0u32; STAGE_CAP];
                let mut qvals = [0i16; STAGE_CAP];
                crate::page::decode_payload(&payload, h.dt_bits, &mut deltas[..n], &mut qvals[..n]);
                let mut t = h.t0_ms;
                for i in 0..n {
                    t = t.wrapping_add(deltas[i]);
                    self.times[i] = t;
                    self.values[i] = h.bias + h.scale * qvals[i] as f32;
                }
                self.count_in_block = n;
                self.row_idx = 0;
                return true;
            }

            // сегмент исчерпан штатно
            self.cur_slot = None;
            self.page_in_seg = 0;
        }
    }
}

impl<'a, F: Flash> Iterator for RangeIter<'a, F> {
    type Item = (u32, f32);

    fn next(&mut self) -> Option<(u32, f32)> {
        loop {
            while self.row_idx < self.count_in_block {
                let i = self.row_idx;
                self.row_idx += 1;
                let t = self.times[i];
                if ts_in_range(t, self.t0, self.t1) {
                    return Some((t, self.values[i]));
                }
            }
            if !self.load_next_block() {
                return None;
            }
        }
    }
}

impl<F: Flash, C: Clock> Db<F, C> {
    /// Открыть итератор по [t0_ms..t1_ms] для серии (wrap-aware окно).
    pub fn query(&self, series: u16, t0_ms: u32, t1_ms: u32) -> Result<RangeIter<'_, F>> {
        if series >= MAX_SERIES {
            return Err(anyhow!(DbError::InvalidArgument("series out of 0..=255")));
        }
        Ok(RangeIter::new(
            &self.ring.flash,
            &self.ring.segs,
            &self.ring.crc_errors,
            series,
            t0_ms,
            t1_ms,
        ))
    }

    /// Последняя точка серии: summary по убыванию seqno, страницы 14..0,
    /// реконструируется только финальная строка новейшего блока.
    pub fn latest(&self, series: u16) -> Result<Option<(u32, f32)>> {
        if series >= MAX_SERIES {
            return Err(anyhow!(DbError::InvalidArgument("series out of 0..=255")));
        }

        let segs = &self.ring.segs;
        let mut cursor: Option<(u32, usize)> = None;
        loop {
            let mut best: Option<(u32, usize)> = None;
            for (i, s) in segs.iter().enumerate() {
                if !s.valid || s.block_count == 0 || !bitmap_has(&s.series_bitmap, series) {
                    continue;
                }
                let key = (s.seg_seqno, i);
                if let Some(c) = cursor {
                    if key >= c {
                        continue;
                    }
                }
                if best.map_or(true, |b| key > b) {
                    best = Some(key);
                }
            }
            let (seq, slot) = match best {
                Some(b) => b,
                None => return Ok(None),
            };
            cursor = Some((seq, slot));

            for p in (0..DATA_PAGES_PER_SEG).rev() {
                let addr = segs[slot].addr_first + p * PAGE_BYTES;
                let mut hdr = [0u8; HEADER_BYTES];
                if self
                    .ring
                    .flash
                    .read(addr + PAYLOAD_BYTES as u32, &mut hdr)
                    .is_err()
                {
                    continue;
                }
                let h = match unpack_header(&hdr) {
                    Some(h) => h,
                    None => continue,
                };
                if h.series != series {
                    continue;
                }

                let mut payload = [0u8; PAYLOAD_BYTES];
                if self.ring.flash.read(addr, &mut payload).is_err() {
                    continue;
                }
                if crc32c(&payload) != h.payload_crc {
                    self.ring.note_crc_error();
                    continue;
                }

                let last_ts = delta_lane_last_ts(&h, &payload);
                let n = h.count as usize;
                let q_off = if h.dt_bits == 8 { n } else { 2 * n };
                let q_at = q_off + 2 * (n - 1);
                let q = LittleEndian::read_u16(&payload[q_at..q_at + 2]) as i16;
                return Ok(Some((last_ts, h.bias + h.scale * q as f32)));
            }
            // в этом сегменте блока серии не нашлось — смотрим старше
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::sim::{ManualClock, MemFlash};

    fn open_db() -> Db<MemFlash, ManualClock> {
        let flash = MemFlash::new(256 * 1024).unwrap();
        Db::open(flash, ManualClock::new(0), StoreConfig::default()).unwrap()
    }

    #[test]
    fn range_filter_is_inclusive_and_ordered() {
        let mut db = open_db();
        for i in 0..200u32 {
            db.write(1, i * 10, i as f32).unwrap();
        }
        db.flush().unwrap();

        let rows: Vec<(u32, f32)> = db.query(1, 100, 500).unwrap().collect();
        assert!(!rows.is_empty());
        assert_eq!(rows.first().unwrap().0, 100);
        assert_eq!(rows.last().unwrap().0, 500);
        for w in rows.windows(2) {
            assert!(w[0].0 < w[1].0, "rows must come out in insertion order");
        }
    }

    #[test]
    fn query_skips_foreign_series() {
        let mut db = open_db();
        for i in 0..50u32 {
            db.write(2, i * 10, 1.0).unwrap();
            // смена серии закрывает блок, поэтому серии лежат в разных блоках
            db.write(7, i * 10 + 1, -1.0).unwrap();
        }
        db.flush().unwrap();

        let only7: Vec<_> = db.query(7, 0, 10_000).unwrap().collect();
        assert_eq!(only7.len(), 50);
        assert!(only7.iter().all(|&(_, v)| v < 0.0));
    }

    #[test]
    fn latest_returns_newest_row() {
        let mut db = open_db();
        for i in 0..300u32 {
            db.write(3, i * 10, i as f32).unwrap();
        }
        db.flush().unwrap();

        let (ts, v) = db.latest(3).unwrap().expect("series has data");
        assert_eq!(ts, 2990);
        assert!((v - 299.0).abs() <= 1.0);
        assert!(db.latest(42).unwrap().is_none());
    }

    #[test]
    fn empty_window_yields_nothing() {
        let mut db = open_db();
        for i in 0..20u32 {
            db.write(1, i * 10, 0.0).unwrap();
        }
        db.flush().unwrap();
        assert_eq!(db.query(1, 5000, 9000).unwrap().count(), 0);
    }
}
