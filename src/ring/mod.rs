//! ring — менеджер кольца сегментов: голова, zone map, publish, GC.
//!
//! Publish одного блока — header-last commit:
//!   1) program страницы: payload в 0..224, 0xFF в области заголовка;
//!   2) program той же страницы: 0xFF в payload, 32 B заголовка в хвосте.
//!      NOR 1→0 AND сохраняет payload и добавляет биты заголовка; блок
//!      опубликован тогда и только тогда, когда заголовок верифицируется.
//!   3) сдвиг головы, live-обновление summary, rollover на 15-й странице.
//!
//! GC вызывается перед каждой записью: watermark 10% (warn) / 5% (busy),
//! жертва — самый старый seg_seqno, квота <= 2 erase за окно 1000 мс.

pub mod recover;

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::consts::{
    DATA_PAGES_PER_SEG, GC_BUSY_FREE_PCT, GC_ERASE_QUOTA, GC_WARN_FREE_PCT, GC_WINDOW_MS,
    HEADER_BYTES, HINT_BLOCK_CADENCE, HINT_MS_CADENCE, META_RESERVED, PAGE_BYTES, PAYLOAD_BYTES,
    SEG_BYTES, SERIES_BITMAP_BYTES, TS_NONE,
};
use crate::errors::DbError;
use crate::flash::{seg_count, Clock, Flash};
use crate::meta::{save_head_hint, Snapshot};
use crate::metrics::{
    record_block_published, record_gc_erase, record_gc_quota_stall, record_segment_finalized,
};
use crate::page::{crc32c, pack_footer_page, pack_header, unpack_header, BlockHeader, SegFooter};
use crate::util::{align_down, bitmap_set};

const PAGE: usize = PAGE_BYTES as usize;

/// Zone map: одна запись на физический слот сегмента.
#[derive(Debug, Clone)]
pub struct SegSummary {
    pub addr_first: u32,
    pub seg_seqno: u32,
    pub t_min: u32,
    pub t_max: u32,
    pub block_count: u32,
    pub series_bitmap: [u8; SERIES_BITMAP_BYTES],
    pub valid: bool,
}

impl SegSummary {
    pub fn empty(addr_first: u32, seg_seqno: u32) -> Self {
        Self {
            addr_first,
            seg_seqno,
            t_min: TS_NONE,
            t_max: 0,
            block_count: 0,
            series_bitmap: [0; SERIES_BITMAP_BYTES],
            valid: true,
        }
    }

    fn invalid(addr_first: u32) -> Self {
        Self {
            valid: false,
            ..Self::empty(addr_first, 0)
        }
    }

    /// Вобрать опубликованный блок: t_min/t_max из заголовка и дельт,
    /// qvals не декодируются.
    pub fn fold_block(&mut self, h: &BlockHeader, last_ts: u32) {
        if h.t0_ms < self.t_min {
            self.t_min = h.t0_ms;
        }
        if last_ts > self.t_max {
            self.t_max = last_ts;
        }
        self.block_count += 1;
        bitmap_set(&mut self.series_bitmap, h.series);
    }

    /// Сброс после erase: слот свободен, seqno переназначится при заходе головы.
    pub fn reset_stats(&mut self) {
        self.t_min = TS_NONE;
        self.t_max = 0;
        self.block_count = 0;
        self.series_bitmap = [0; SERIES_BITMAP_BYTES];
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RingHead {
    pub addr: u32,
    pub page_index: u32, // внутри сегмента, [0..15]
    pub seg_seqno: u32,
}

#[derive(Debug)]
pub struct Ring<F: Flash, C: Clock> {
    pub flash: F,
    pub clock: C,
    pub seg_count: u32,
    pub segs: Vec<SegSummary>,
    pub head: RingHead,
    pub tail_seqno: u32,
    pub epoch_id: u32,

    // per-handle счётчики (контракт info)
    pub blocks_written: u32,
    pub crc_errors: AtomicU32, // атомарный: инкремент из read-path (&self)
    pub gc_warn_events: u32,
    pub gc_busy_events: u32,
    pub recovery_truncations: u32,

    // каденс head-hint
    blocks_since_hint: u32,
    last_hint_ms: u64,

    // квота erase GC
    gc_window_start: u64,
    gc_erased_in_window: u32,
}

impl<F: Flash, C: Clock> Ring<F, C> {
    pub fn new(flash: F, clock: C) -> Result<Self> {
        let total = flash.size_bytes();
        if total % 4096 != 0 || total < META_RESERVED + SEG_BYTES {
            return Err(anyhow!(DbError::InvalidArgument(
                "flash must be a multiple of 4096 and hold the metadata region plus one segment"
            )));
        }
        let sc = seg_count(&flash);
        let segs = (0..sc).map(|i| SegSummary::invalid(i * SEG_BYTES)).collect();
        let now = clock.millis();
        Ok(Self {
            flash,
            clock,
            seg_count: sc,
            segs,
            head: RingHead {
                addr: 0,
                page_index: 0,
                seg_seqno: 1,
            },
            tail_seqno: 1,
            epoch_id: 0,
            blocks_written: 0,
            crc_errors: AtomicU32::new(0),
            gc_warn_events: 0,
            gc_busy_events: 0,
            recovery_truncations: 0,
            blocks_since_hint: 0,
            last_hint_ms: now,
            gc_window_start: now,
            gc_erased_in_window: 0,
        })
    }

    #[inline]
    pub fn usable_bytes(&self) -> u32 {
        self.seg_count * SEG_BYTES
    }

    #[inline]
    pub fn crc_error_count(&self) -> u32 {
        self.crc_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn note_crc_error(&self) {
        self.crc_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Опубликовать готовый блок (header-last).
    pub fn publish_block(
        &mut self,
        h: &BlockHeader,
        payload: &[u8; PAYLOAD_BYTES],
    ) -> Result<()> {
        // Голова может стоять на странице футера после восстановления
        // полного сегмента: сначала rollover, потом запись.
        if self.head.page_index >= DATA_PAGES_PER_SEG {
            self.finalize_and_rotate()?;
        }

        let page_addr = self.head.addr;

        // 1) payload, заголовок остаётся стёртым
        let mut page = [0xFFu8; PAGE];
        page[..PAYLOAD_BYTES].copy_from_slice(payload);
        self.flash
            .program_256(page_addr, &page)
            .context("program payload")?;

        // 2) только заголовок (payload-биты нетронуты: 0xFF & x = x)
        let mut hdr = [0u8; HEADER_BYTES];
        pack_header(&mut hdr, h);
        page.fill(0xFF);
        page[PAYLOAD_BYTES..].copy_from_slice(&hdr);
        self.flash
            .program_256(page_addr, &page)
            .context("program header")?;

        self.blocks_written += 1;
        record_block_published();

        // 3) live-обновление zone map
        let seg_idx = (page_addr / SEG_BYTES) as usize;
        let last_ts = delta_lane_last_ts(h, payload);
        let sm = &mut self.segs[seg_idx];
        if !sm.valid {
            *sm = SegSummary::empty(seg_idx as u32 * SEG_BYTES, self.head.seg_seqno);
        }
        sm.fold_block(h, last_ts);

        self.head.page_index += 1;
        self.head.addr += PAGE_BYTES;

        if self.head.page_index >= DATA_PAGES_PER_SEG {
            self.finalize_and_rotate()?;
        }

        // 4) head-hint: каждые 64 блока или раз в 2000 мс
        self.blocks_since_hint += 1;
        let now = self.clock.millis();
        if self.blocks_since_hint >= HINT_BLOCK_CADENCE
            || now.saturating_sub(self.last_hint_ms) >= HINT_MS_CADENCE
        {
            // best-effort: битый hint просто не сократит следующий probe
            if let Err(e) = save_head_hint(&mut self.flash, self.head.addr, self.head.seg_seqno) {
                warn!("head hint save failed: {e:#}");
            }
            self.blocks_since_hint = 0;
            self.last_hint_ms = now;
        }

        Ok(())
    }

    /// Запечатать текущий сегмент футером и перейти к следующему слоту.
    pub fn finalize_and_rotate(&mut self) -> Result<()> {
        let base = align_down(self.head.addr, SEG_BYTES);
        let footer_addr = base + DATA_PAGES_PER_SEG * PAGE_BYTES;

        // Голова, восстановленная на уже запечатанном сегменте, не должна
        // программировать футер второй раз: AND с другой записью его порвёт.
        let mut existing = [0u8; PAGE];
        let already_sealed = self
            .flash
            .read(footer_addr, &mut existing)
            .ok()
            .map(|_| crate::page::unpack_footer_page(&existing).is_some())
            .unwrap_or(false);

        if !already_sealed {
            // Футер агрегируется повторным сканом страниц сегмента: только
            // CRC-чистые блоки попадают в сводку.
            let mut footer = SegFooter {
                seg_seqno: self.head.seg_seqno,
                t_min: TS_NONE,
                t_max: 0,
                block_count: 0,
                series_bitmap: [0; SERIES_BITMAP_BYTES],
            };
            for p in 0..DATA_PAGES_PER_SEG {
                let (h, payload) = match read_clean_block(&self.flash, base + p * PAGE_BYTES)? {
                    Some(v) => v,
                    None => break,
                };
                if h.t0_ms < footer.t_min {
                    footer.t_min = h.t0_ms;
                }
                let last_ts = delta_lane_last_ts(&h, &payload);
                if last_ts > footer.t_max {
                    footer.t_max = last_ts;
                }
                footer.block_count += 1;
                bitmap_set(&mut footer.series_bitmap, h.series);
            }

            let page = pack_footer_page(&footer);
            self.flash
                .program_256(footer_addr, &page)
                .context("program segment footer")?;
            record_segment_finalized();
        }

        // Переход к следующему слоту: erase-then-use.
        let next_base = (base + SEG_BYTES) % self.usable_bytes();
        self.flash.erase_4k(next_base).context("erase next segment")?;
        self.head.seg_seqno += 1;
        self.head.addr = next_base;
        self.head.page_index = 0;

        let idx = (next_base / SEG_BYTES) as usize;
        self.segs[idx] = SegSummary::empty(next_base, self.head.seg_seqno);

        debug!(
            "rotate: seq={} -> slot {} (base {:#x})",
            self.head.seg_seqno, idx, next_base
        );
        Ok(())
    }

    /// Реклейм самого старого сегмента при падении свободного места ниже 10%.
    /// Квота <= 2 erase за окно 1000 мс: blocking-режим ждёт конца окна,
    /// non-blocking возвращает Busy.
    pub fn gc_reclaim_if_needed(&mut self, non_blocking: bool) -> Result<()> {
        let used = self
            .segs
            .iter()
            .filter(|s| s.valid && s.block_count > 0)
            .count() as u32;
        let free = self.seg_count - used;

        if free * 100 < GC_WARN_FREE_PCT * self.seg_count {
            self.gc_warn_events += 1;
        }
        if free * 100 < GC_BUSY_FREE_PCT * self.seg_count {
            self.gc_busy_events += 1;
        }
        if free * 100 >= GC_WARN_FREE_PCT * self.seg_count {
            return Ok(());
        }

        // окно квоты
        let now = self.clock.millis();
        if now.saturating_sub(self.gc_window_start) >= GC_WINDOW_MS {
            self.gc_window_start = now;
            self.gc_erased_in_window = 0;
        }
        if self.gc_erased_in_window >= GC_ERASE_QUOTA {
            record_gc_quota_stall();
            if non_blocking {
                self.gc_busy_events += 1;
                return Err(anyhow!(DbError::Busy));
            }
            while self.clock.millis().saturating_sub(self.gc_window_start) < GC_WINDOW_MS {
                std::hint::spin_loop();
            }
            self.gc_window_start = self.clock.millis();
            self.gc_erased_in_window = 0;
        }

        // жертва — минимальный seg_seqno среди живых
        let mut oldest_idx: Option<usize> = None;
        let mut oldest_seq = u32::MAX;
        for (i, s) in self.segs.iter().enumerate() {
            if s.valid && s.block_count > 0 && s.seg_seqno < oldest_seq {
                oldest_seq = s.seg_seqno;
                oldest_idx = Some(i);
            }
        }
        let idx = match oldest_idx {
            Some(i) => i,
            None => return Ok(()), // нечего реклеймить
        };

        let base = idx as u32 * SEG_BYTES;
        self.flash.erase_4k(base).context("gc erase")?;
        self.segs[idx].reset_stats();
        self.gc_erased_in_window += 1;
        if oldest_seq != u32::MAX && oldest_seq + 1 > self.tail_seqno {
            self.tail_seqno = oldest_seq + 1;
        }
        record_gc_erase();
        debug!("gc: reclaimed slot {idx} (seq {oldest_seq})");
        Ok(())
    }

    /// Снимок текущего состояния головы/хвоста для persist'а.
    pub fn current_snapshot(&self) -> Snapshot {
        let mut oldest = u32::MAX;
        for s in &self.segs {
            if s.valid && s.block_count > 0 && s.seg_seqno < oldest {
                oldest = s.seg_seqno;
            }
        }
        if oldest == u32::MAX {
            oldest = self.head.seg_seqno;
        }
        Snapshot {
            epoch_id: self.epoch_id,
            seg_seq_head: self.head.seg_seqno,
            seg_seq_tail: oldest,
            head_addr: self.head.addr,
        }
    }
}

/// Последний таймстемп блока: t0 + сумма дельт, qvals не читаются.
pub(crate) fn delta_lane_last_ts(h: &BlockHeader, payload: &[u8; PAYLOAD_BYTES]) -> u32 {
    let mut t = h.t0_ms;
    let count = h.count as usize;
    if h.dt_bits == 8 {
        for &d in &payload[..count] {
            t = t.wrapping_add(d as u32);
        }
    } else {
        for i in 0..count {
            t = t.wrapping_add(LittleEndian::read_u16(&payload[2 * i..2 * i + 2]) as u32);
        }
    }
    t
}

/// Прочитать страницу и вернуть блок, если заголовок и payload CRC-чистые.
/// Ошибка чтения драйвера в скан-путях равна невалидной странице.
pub(crate) fn read_clean_block<F: Flash>(
    flash: &F,
    addr: u32,
) -> Result<Option<(BlockHeader, [u8; PAYLOAD_BYTES])>> {
    let mut page = [0u8; PAGE];
    if let Err(e) = flash.read(addr, &mut page) {
        warn!("read at {addr:#x} failed during scan: {e:#}");
        return Ok(None);
    }
    let mut hdr = [0u8; HEADER_BYTES];
    hdr.copy_from_slice(&page[PAYLOAD_BYTES..]);
    let h = match unpack_header(&hdr) {
        Some(h) => h,
        None => return Ok(None),
    };
    let mut payload = [0u8; PAYLOAD_BYTES];
    payload.copy_from_slice(&page[..PAYLOAD_BYTES]);
    if crc32c(&payload) != h.payload_crc {
        return Ok(None);
    }
    Ok(Some((h, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::encode_payload;
    use crate::sim::{ManualClock, MemFlash};

    fn test_ring(segs: u32) -> Ring<MemFlash, ManualClock> {
        let flash = MemFlash::new(segs * SEG_BYTES + META_RESERVED).unwrap();
        Ring::new(flash, ManualClock::new(0)).unwrap()
    }

    fn make_block(series: u16, t0: u32, vals: &[i16]) -> (BlockHeader, [u8; PAYLOAD_BYTES]) {
        let deltas: Vec<u32> = (0..vals.len() as u32).map(|i| if i == 0 { 0 } else { 10 }).collect();
        let mut payload = [0u8; PAYLOAD_BYTES];
        encode_payload(&mut payload, 8, &deltas, vals);
        let h = BlockHeader {
            series,
            count: vals.len() as u16,
            t0_ms: t0,
            dt_bits: 8,
            bias: 0.0,
            scale: 1.0,
            payload_crc: crc32c(&payload),
            header_crc: 0,
        };
        (h, payload)
    }

    #[test]
    fn publish_is_header_last_and_readable() {
        let mut ring = test_ring(4);
        let (h, payload) = make_block(3, 100, &[1, 2, 3]);
        ring.publish_block(&h, &payload).unwrap();

        let got = read_clean_block(&ring.flash, 0).unwrap().expect("published");
        assert_eq!(got.0.series, 3);
        assert_eq!(got.0.count, 3);
        assert_eq!(got.1[..], payload[..]);

        assert_eq!(ring.head.page_index, 1);
        assert_eq!(ring.head.addr, PAGE_BYTES);
        let sm = &ring.segs[0];
        assert!(sm.valid);
        assert_eq!(sm.block_count, 1);
        assert_eq!(sm.t_min, 100);
        assert_eq!(sm.t_max, 120);
    }

    #[test]
    fn rollover_writes_footer_and_erases_next() {
        let mut ring = test_ring(4);
        for i in 0..DATA_PAGES_PER_SEG {
            let (h, p) = make_block(1, i * 1000, &[0, 1]);
            ring.publish_block(&h, &p).unwrap();
        }
        // после 15 блоков голова в слоте 1, seq 2
        assert_eq!(ring.head.seg_seqno, 2);
        assert_eq!(ring.head.page_index, 0);
        assert_eq!(ring.head.addr, SEG_BYTES);

        // футер сегмента 0 на месте и агрегирует все 15 блоков
        let mut page = [0u8; PAGE];
        ring.flash
            .read(DATA_PAGES_PER_SEG * PAGE_BYTES, &mut page)
            .unwrap();
        let f = crate::page::unpack_footer_page(&page).expect("footer");
        assert_eq!(f.seg_seqno, 1);
        assert_eq!(f.block_count, DATA_PAGES_PER_SEG);
        assert_eq!(f.t_min, 0);
    }

    /// Полный ринг вручную: каждый слот помечен как занятый.
    fn mark_all_used(ring: &mut Ring<MemFlash, ManualClock>) {
        for (i, s) in ring.segs.iter_mut().enumerate() {
            *s = SegSummary::empty(i as u32 * SEG_BYTES, i as u32 + 1);
            s.block_count = 1;
        }
    }

    #[test]
    fn gc_reclaims_oldest_segment() {
        let mut ring = test_ring(4);
        // free=0 -> watermark <10%, реклейм обязателен
        mark_all_used(&mut ring);
        ring.gc_reclaim_if_needed(false).unwrap();
        // жертва — минимальный seqno (слот 0, seq 1)
        assert_eq!(ring.segs[0].block_count, 0);
        assert_eq!(ring.segs[0].t_min, TS_NONE);
        assert_eq!(ring.segs[0].t_max, 0);
        assert!(ring.segs[1].block_count > 0);
        assert_eq!(ring.tail_seqno, 2);
        assert!(ring.gc_warn_events >= 1);
    }

    #[test]
    fn gc_busy_when_quota_exhausted() {
        let mut ring = test_ring(4);
        mark_all_used(&mut ring);
        ring.gc_erased_in_window = GC_ERASE_QUOTA;
        ring.gc_window_start = 0; // часы стоят на 0 — окно активно

        let err = ring.gc_reclaim_if_needed(true).unwrap_err();
        assert!(crate::errors::is_busy(&err));
        assert!(ring.gc_busy_events >= 1);

        // после конца окна квота сброшена, erase проходит
        ring.clock.advance(GC_WINDOW_MS);
        ring.gc_reclaim_if_needed(true).unwrap();
        assert_eq!(ring.segs[0].block_count, 0);
    }

    #[test]
    fn gc_noop_when_plenty_free() {
        let mut ring = test_ring(4);
        // один занятый слот из четырёх: free 75%, watermark не достигнут
        ring.segs[2] = SegSummary::empty(2 * SEG_BYTES, 5);
        ring.segs[2].block_count = 3;
        ring.gc_reclaim_if_needed(false).unwrap();
        assert_eq!(ring.segs[2].block_count, 3);
        assert_eq!(ring.gc_warn_events, 0);
    }
}
