//! meta — A/B снапшоты и head-hint в зарезервированной области флеша.
//!
//! Раскладка региона (верхние 32 KiB устройства, LE):
//!   [sector A: snapshot][sector B: snapshot][sector hint][reserved ...]
//!
//! Snapshot record (24 B, offset 0 сектора, остаток страницы 0xFF):
//!   u32 version       = 1
//!   u32 epoch_id
//!   u32 seg_seq_head
//!   u32 seg_seq_tail
//!   u32 head_addr     -- абсолютный адрес следующей свободной страницы
//!   u32 crc           -- CRC-32C записи с обнулённым полем crc
//!
//! Head hint (12 B): u32 addr, u32 seq, u32 crc — advisory-указатель головы,
//! пишется по каденсу, чтобы укоротить tail probe на открытии.
//!
//! Политика:
//! - save: erase сектора, затем один program 256 B. Рваная запись оставляет
//!   второй сектор пары нетронутым, а рваный читается как invalid по CRC.
//! - load: страница из одних 0xFF = "missing"; из двух валидных побеждает
//!   больший seg_seq_head.
//! - Выбор сектора — по чётности seg_seq_head (нечётный -> A).

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::consts::{
    HINT_RECORD_BYTES, META_HINT_OFF, META_RESERVED, META_SNAP_A_OFF, META_SNAP_B_OFF, PAGE_BYTES,
    SNAPSHOT_RECORD_BYTES, SNAPSHOT_VERSION,
};
use crate::flash::Flash;
use crate::metrics::{record_hint_save, record_meta_crc_reject, record_snapshot_save};
use crate::page::crc32c;

const PAGE: usize = PAGE_BYTES as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub epoch_id: u32,
    pub seg_seq_head: u32,
    pub seg_seq_tail: u32,
    pub head_addr: u32,
}

#[inline]
fn meta_base<F: Flash>(flash: &F) -> u32 {
    flash.size_bytes() - META_RESERVED
}

/// CRC записи с обнулённым последним полем (crc на хвосте записи).
fn record_crc(rec: &[u8]) -> u32 {
    let mut tmp = [0u8; SNAPSHOT_RECORD_BYTES];
    let n = rec.len();
    tmp[..n].copy_from_slice(rec);
    tmp[n - 4..n].fill(0);
    crc32c(&tmp[..n])
}

fn is_erased(page: &[u8]) -> bool {
    page.iter().all(|&b| b == 0xFF)
}

// -------- Snapshot --------

fn parse_snapshot(page: &[u8; PAGE]) -> Option<Snapshot> {
    if is_erased(page) {
        return None;
    }
    let rec = &page[..SNAPSHOT_RECORD_BYTES];
    let stored = LittleEndian::read_u32(&rec[20..24]);
    if record_crc(rec) != stored {
        record_meta_crc_reject();
        return None;
    }
    if LittleEndian::read_u32(&rec[0..4]) != SNAPSHOT_VERSION {
        return None;
    }
    Some(Snapshot {
        epoch_id: LittleEndian::read_u32(&rec[4..8]),
        seg_seq_head: LittleEndian::read_u32(&rec[8..12]),
        seg_seq_tail: LittleEndian::read_u32(&rec[12..16]),
        head_addr: LittleEndian::read_u32(&rec[16..20]),
    })
}

/// Прочитать новейший валидный снапшот из пары A/B; None — нет ни одного.
pub fn load_snapshot<F: Flash>(flash: &F) -> Result<Option<Snapshot>> {
    let base = meta_base(flash);
    let mut page = [0u8; PAGE];

    flash
        .read(base + META_SNAP_A_OFF, &mut page)
        .context("read snapshot A")?;
    let a = parse_snapshot(&page);

    flash
        .read(base + META_SNAP_B_OFF, &mut page)
        .context("read snapshot B")?;
    let b = parse_snapshot(&page);

    let picked = match (a, b) {
        (Some(a), Some(b)) => {
            // новее тот, у кого больше seg_seq_head
            Some(if a.seg_seq_head >= b.seg_seq_head { a } else { b })
        }
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    if let Some(s) = picked {
        debug!(
            "meta: snapshot loaded (head_seq={}, tail_seq={}, epoch={})",
            s.seg_seq_head, s.seg_seq_tail, s.epoch_id
        );
    }
    Ok(picked)
}

/// Сохранить снапшот в сектор по чётности seg_seq_head (нечётный -> A).
pub fn save_snapshot<F: Flash>(flash: &mut F, snap: &Snapshot) -> Result<()> {
    let mut page = [0xFFu8; PAGE];
    {
        let rec = &mut page[..SNAPSHOT_RECORD_BYTES];
        LittleEndian::write_u32(&mut rec[0..4], SNAPSHOT_VERSION);
        LittleEndian::write_u32(&mut rec[4..8], snap.epoch_id);
        LittleEndian::write_u32(&mut rec[8..12], snap.seg_seq_head);
        LittleEndian::write_u32(&mut rec[12..16], snap.seg_seq_tail);
        LittleEndian::write_u32(&mut rec[16..20], snap.head_addr);
        LittleEndian::write_u32(&mut rec[20..24], 0);
        let crc = crc32c(&rec[..SNAPSHOT_RECORD_BYTES]);
        LittleEndian::write_u32(&mut rec[20..24], crc);
    }

    let off = if snap.seg_seq_head & 1 == 1 {
        META_SNAP_A_OFF
    } else {
        META_SNAP_B_OFF
    };
    let base = meta_base(flash);
    flash.erase_4k(base + off).context("erase snapshot sector")?;
    flash
        .program_256(base + off, &page)
        .context("program snapshot record")?;
    record_snapshot_save();
    Ok(())
}

// -------- Head hint --------

/// Прочитать head-hint: Some((addr, seq)) либо None, если сектор пуст/битый.
pub fn load_head_hint<F: Flash>(flash: &F) -> Result<Option<(u32, u32)>> {
    let base = meta_base(flash);
    let mut page = [0u8; PAGE];
    flash
        .read(base + META_HINT_OFF, &mut page)
        .context("read head hint")?;
    if is_erased(&page) {
        return Ok(None);
    }
    let rec = &page[..HINT_RECORD_BYTES];
    let stored = LittleEndian::read_u32(&rec[8..12]);
    if record_crc(rec) != stored {
        record_meta_crc_reject();
        return Ok(None);
    }
    Ok(Some((
        LittleEndian::read_u32(&rec[0..4]),
        LittleEndian::read_u32(&rec[4..8]),
    )))
}

/// Сохранить head-hint (erase + один program).
pub fn save_head_hint<F: Flash>(flash: &mut F, addr: u32, seq: u32) -> Result<()> {
    let mut page = [0xFFu8; PAGE];
    {
        let rec = &mut page[..HINT_RECORD_BYTES];
        LittleEndian::write_u32(&mut rec[0..4], addr);
        LittleEndian::write_u32(&mut rec[4..8], seq);
        LittleEndian::write_u32(&mut rec[8..12], 0);
        let crc = crc32c(&rec[..HINT_RECORD_BYTES]);
        LittleEndian::write_u32(&mut rec[8..12], crc);
    }
    let base = meta_base(flash);
    flash
        .erase_4k(base + META_HINT_OFF)
        .context("erase head hint sector")?;
    flash
        .program_256(base + META_HINT_OFF, &page)
        .context("program head hint")?;
    record_hint_save();
    Ok(())
}
