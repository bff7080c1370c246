//! ring/recover — восстановление состояния кольца на открытии.
//!
//! Порядок (ровно один раз, до первой записи):
//!   1) footer sweep: последняя страница каждого слота -> zone map;
//!   2) посев головы: снапшот, иначе лучший футер, иначе пустое устройство;
//!   3) head-hint probe: валидный hint в пределах кольца переопределяет
//!      адрес и seqno головы (hint свежее снапшота по каденсу записи);
//!   4) tail probe: страницы головного сегмента по порядку до первой
//!      невалидной; CRC-чистые страницы попутно вливаются в summary слота,
//!      чтобы блоки до сбоя остались видимыми запросам;
//!   5) жёсткий потолок просмотра: seg_count*15 + 1 страниц.
//!
//! Гарантия: теряется не больше блока в первой невалидной странице.

use anyhow::Result;
use log::{debug, info, warn};

use crate::consts::{DATA_PAGES_PER_SEG, PAGE_BYTES, SEG_BYTES};
use crate::flash::{Clock, Flash};
use crate::meta::{load_head_hint, Snapshot};
use crate::metrics::record_recovery_page_scanned;
use crate::page::unpack_footer_page;
use crate::ring::{delta_lane_last_ts, read_clean_block, Ring, SegSummary};
use crate::util::align_down;

const PAGE: usize = PAGE_BYTES as usize;

pub fn scan_and_recover<F: Flash, C: Clock>(
    ring: &mut Ring<F, C>,
    snap: Option<&Snapshot>,
) -> Result<()> {
    let mut budget = PageBudget::new(ring.seg_count);

    // --- 1) footer sweep -----------------------------------------------------
    let mut any_footer = false;
    let mut best_idx = 0usize;
    let mut best_seq = 0u32;
    for i in 0..ring.seg_count {
        if !budget.spend() {
            break;
        }
        let base = i * SEG_BYTES;
        let mut page = [0u8; PAGE];
        if ring
            .flash
            .read(base + DATA_PAGES_PER_SEG * PAGE_BYTES, &mut page)
            .is_err()
        {
            continue;
        }
        if let Some(f) = unpack_footer_page(&page) {
            let sm = &mut ring.segs[i as usize];
            sm.addr_first = base;
            sm.seg_seqno = f.seg_seqno;
            sm.t_min = f.t_min;
            sm.t_max = f.t_max;
            sm.block_count = f.block_count;
            sm.series_bitmap = f.series_bitmap;
            sm.valid = true;
            if !any_footer || f.seg_seqno > best_seq {
                any_footer = true;
                best_seq = f.seg_seqno;
                best_idx = i as usize;
            }
        }
    }

    // --- 2) посев головы -----------------------------------------------------
    if let Some(s) = snap {
        if s.head_addr < ring.usable_bytes() {
            ring.head.addr = s.head_addr;
            ring.head.page_index = (s.head_addr % SEG_BYTES) / PAGE_BYTES;
            ring.head.seg_seqno = s.seg_seq_head;
            ring.tail_seqno = s.seg_seq_tail;
            ring.epoch_id = s.epoch_id;
            debug!(
                "recovery: seeded from snapshot (head_seq={}, addr={:#x})",
                s.seg_seq_head, s.head_addr
            );
        } else {
            warn!(
                "recovery: snapshot head addr {:#x} out of ring, ignoring snapshot",
                s.head_addr
            );
            seed_without_snapshot(ring, any_footer, best_idx, best_seq);
        }
    } else {
        seed_without_snapshot(ring, any_footer, best_idx, best_seq);
    }

    // --- 3) head-hint probe --------------------------------------------------
    match load_head_hint(&ring.flash) {
        Ok(Some((addr, seq))) if addr < ring.usable_bytes() => {
            ring.head.addr = addr;
            ring.head.page_index = (addr % SEG_BYTES) / PAGE_BYTES;
            ring.head.seg_seqno = seq;
            debug!("recovery: head hint applied (addr={addr:#x}, seq={seq})");
        }
        Ok(_) => {}
        Err(e) => warn!("recovery: head hint unreadable: {e:#}"),
    }

    // --- 4) tail probe (с шагом вперёд) --------------------------------------
    // Головной сегмент сканируется с нуля, CRC-чистые страницы вливаются в
    // summary слота: у незапечатанного сегмента нет футера, а его блоки
    // обязаны остаться видимыми запросам после reopen.
    //
    // Hint и футерный посев могут отставать от настоящей головы на десятки
    // блоков: probe, упёршийся в полный запечатанный сегмент, шагает в
    // следующий слот, пока цепочка футеров продолжается строго по seqno.
    // Разрыв цепочки (футер старой эпохи кольца) оставляет голову на
    // странице 15 — rollover на первой записи стирает следующий слот сам.
    let mut walked = 0u32;
    loop {
        walked += 1;
        let base = align_down(ring.head.addr, SEG_BYTES);
        let slot = (base / SEG_BYTES) as usize;
        let seed_seq = if ring.segs[slot].valid {
            ring.segs[slot].seg_seqno
        } else {
            ring.head.seg_seqno
        };
        ring.segs[slot] = SegSummary::empty(base, seed_seq);

        let mut first_free_page = 0u32;
        let mut had_valid = false;
        let mut broke = false;
        for p in 0..DATA_PAGES_PER_SEG {
            if !budget.spend() {
                broke = false;
                first_free_page = p;
                break;
            }
            match read_clean_block(&ring.flash, base + p * PAGE_BYTES)? {
                Some((h, payload)) => {
                    let last_ts = delta_lane_last_ts(&h, &payload);
                    ring.segs[slot].fold_block(&h, last_ts);
                    had_valid = true;
                    first_free_page = p + 1;
                }
                None => {
                    first_free_page = p;
                    broke = true;
                    break;
                }
            }
        }
        if broke && had_valid {
            ring.recovery_truncations += 1;
        }
        if broke && !page_is_erased(ring, base + first_free_page * PAGE_BYTES) {
            // Рваная (частично запрограммированная) страница. Писать по ней
            // нельзя — второй program по грязным байтам порвёт и следующий
            // блок; писать после неё бессмысленно — итератор бросает сегмент
            // на невалидном заголовке и не увидит хвост. Сегмент закрывается
            // досрочно: голова на странице футера, первый publish допишет
            // футер по валидному префиксу и сделает rollover.
            budget.spend();
            first_free_page = DATA_PAGES_PER_SEG;
        }
        ring.head.page_index = first_free_page;
        ring.head.addr = base + first_free_page * PAGE_BYTES;

        if first_free_page < DATA_PAGES_PER_SEG || walked >= ring.seg_count || budget.is_empty() {
            break;
        }

        // Сегмент полон. Продолжаем, только если он запечатан, а сосед —
        // либо его прямое продолжение (seqno+1), либо ещё не запечатан.
        let sealed_seq = match read_footer_seq(ring, base) {
            Some(s) => s,
            None => break, // полон, но без футера: rollover допишет его сам
        };
        let next_base = (base + SEG_BYTES) % ring.usable_bytes();
        match read_footer_seq(ring, next_base) {
            Some(next_seq) if next_seq != sealed_seq + 1 => break, // старый виток кольца
            _ => {
                ring.head.addr = next_base;
                ring.head.page_index = 0;
                ring.head.seg_seqno = sealed_seq + 1;
                debug!("recovery: probe walked into next slot (seq {})", sealed_seq + 1);
            }
        }
    }

    info!(
        "recovery: head seq={} addr={:#x} page={} ({} truncation(s), {} valid summaries)",
        ring.head.seg_seqno,
        ring.head.addr,
        ring.head.page_index,
        ring.recovery_truncations,
        ring.segs.iter().filter(|s| s.valid).count()
    );
    Ok(())
}

/// Страница полностью стёрта (0xFF)? Ошибка чтения считается «не стёрта».
fn page_is_erased<F: Flash, C: Clock>(ring: &Ring<F, C>, addr: u32) -> bool {
    let mut page = [0u8; PAGE];
    match ring.flash.read(addr, &mut page) {
        Ok(()) => page.iter().all(|&b| b == 0xFF),
        Err(_) => false,
    }
}

/// seqno валидного футера слота, если он есть.
fn read_footer_seq<F: Flash, C: Clock>(ring: &Ring<F, C>, base: u32) -> Option<u32> {
    let mut page = [0u8; PAGE];
    ring.flash
        .read(base + DATA_PAGES_PER_SEG * PAGE_BYTES, &mut page)
        .ok()?;
    unpack_footer_page(&page).map(|f| f.seg_seqno)
}

fn seed_without_snapshot<F: Flash, C: Clock>(
    ring: &mut Ring<F, C>,
    any_footer: bool,
    best_idx: usize,
    best_seq: u32,
) {
    if any_footer {
        // Лучший футер — отправная точка probe'а; head seqno уже следующий.
        ring.head.seg_seqno = best_seq + 1;
        ring.head.addr = ring.segs[best_idx].addr_first;
        ring.head.page_index = 0;
        ring.tail_seqno = best_seq.saturating_sub(ring.seg_count - 1).max(1);
        debug!("recovery: seeded from footer sweep (best_seq={best_seq}, slot={best_idx})");
    } else {
        // Пустое или частично записанное устройство: probe сегмента 0
        // соберёт его summary с нуля.
        ring.head.seg_seqno = 1;
        ring.head.addr = 0;
        ring.head.page_index = 0;
        ring.tail_seqno = 1;
        debug!("recovery: no footers, probing segment 0");
    }
}

/// Потолок просмотра страниц: seg_count*15 + 1.
struct PageBudget {
    left: u64,
}

impl PageBudget {
    fn new(seg_count: u32) -> Self {
        Self {
            left: seg_count as u64 * DATA_PAGES_PER_SEG as u64 + 1,
        }
    }

    fn spend(&mut self) -> bool {
        if self.left == 0 {
            warn!("recovery: page scan budget exhausted, stopping at last valid position");
            return false;
        }
        self.left -= 1;
        record_recovery_page_scanned();
        true
    }

    fn is_empty(&self) -> bool {
        self.left == 0
    }
}
