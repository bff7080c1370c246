//! Lightweight global metrics for EmberDB.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Flash I/O (reads / programs / erases)
//! - Ring (published blocks, finalized segments, GC erases, quota stalls)
//! - Metadata (snapshot/hint saves и отвергнутые по CRC записи)
//! - Recovery / iterator (просмотренные страницы)
//!
//! Счётчики процессные и не заменяют per-handle статистику Db::info():
//! та обязана переживать только время жизни хэндла и отдаётся API-контрактом.

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Flash I/O -----
static FLASH_READS: AtomicU64 = AtomicU64::new(0);
static FLASH_PROGRAMS: AtomicU64 = AtomicU64::new(0);
static FLASH_ERASES: AtomicU64 = AtomicU64::new(0);

// ----- Ring -----
static BLOCKS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static SEGMENTS_FINALIZED: AtomicU64 = AtomicU64::new(0);
static GC_ERASES: AtomicU64 = AtomicU64::new(0);
static GC_QUOTA_STALLS: AtomicU64 = AtomicU64::new(0);

// ----- Metadata -----
static SNAPSHOT_SAVES: AtomicU64 = AtomicU64::new(0);
static HINT_SAVES: AtomicU64 = AtomicU64::new(0);
static META_CRC_REJECTS: AtomicU64 = AtomicU64::new(0);

// ----- Recovery / iterator -----
static RECOVERY_PAGES_SCANNED: AtomicU64 = AtomicU64::new(0);
static ITER_PAGES_READ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub flash_reads: u64,
    pub flash_programs: u64,
    pub flash_erases: u64,

    pub blocks_published: u64,
    pub segments_finalized: u64,
    pub gc_erases: u64,
    pub gc_quota_stalls: u64,

    pub snapshot_saves: u64,
    pub hint_saves: u64,
    pub meta_crc_rejects: u64,

    pub recovery_pages_scanned: u64,
    pub iter_pages_read: u64,
}

impl MetricsSnapshot {
    /// Средняя заполненность финализированных сегментов (блоков на сегмент).
    pub fn avg_blocks_per_segment(&self) -> f64 {
        if self.segments_finalized == 0 {
            0.0
        } else {
            self.blocks_published as f64 / self.segments_finalized as f64
        }
    }
}

// ----- Recorders (Flash) -----
pub fn record_flash_read() {
    FLASH_READS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_flash_program() {
    FLASH_PROGRAMS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_flash_erase() {
    FLASH_ERASES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Ring) -----
pub fn record_block_published() {
    BLOCKS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_segment_finalized() {
    SEGMENTS_FINALIZED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_gc_erase() {
    GC_ERASES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_gc_quota_stall() {
    GC_QUOTA_STALLS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Metadata) -----
pub fn record_snapshot_save() {
    SNAPSHOT_SAVES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_hint_save() {
    HINT_SAVES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_meta_crc_reject() {
    META_CRC_REJECTS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Recovery / iterator) -----
pub fn record_recovery_page_scanned() {
    RECOVERY_PAGES_SCANNED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_iter_page_read() {
    ITER_PAGES_READ.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        flash_reads: FLASH_READS.load(Ordering::Relaxed),
        flash_programs: FLASH_PROGRAMS.load(Ordering::Relaxed),
        flash_erases: FLASH_ERASES.load(Ordering::Relaxed),

        blocks_published: BLOCKS_PUBLISHED.load(Ordering::Relaxed),
        segments_finalized: SEGMENTS_FINALIZED.load(Ordering::Relaxed),
        gc_erases: GC_ERASES.load(Ordering::Relaxed),
        gc_quota_stalls: GC_QUOTA_STALLS.load(Ordering::Relaxed),

        snapshot_saves: SNAPSHOT_SAVES.load(Ordering::Relaxed),
        hint_saves: HINT_SAVES.load(Ordering::Relaxed),
        meta_crc_rejects: META_CRC_REJECTS.load(Ordering::Relaxed),

        recovery_pages_scanned: RECOVERY_PAGES_SCANNED.load(Ordering::Relaxed),
        iter_pages_read: ITER_PAGES_READ.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    FLASH_READS.store(0, Ordering::Relaxed);
    FLASH_PROGRAMS.store(0, Ordering::Relaxed);
    FLASH_ERASES.store(0, Ordering::Relaxed);

    BLOCKS_PUBLISHED.store(0, Ordering::Relaxed);
    SEGMENTS_FINALIZED.store(0, Ordering::Relaxed);
    GC_ERASES.store(0, Ordering::Relaxed);
    GC_QUOTA_STALLS.store(0, Ordering::Relaxed);

    SNAPSHOT_SAVES.store(0, Ordering::Relaxed);
    HINT_SAVES.store(0, Ordering::Relaxed);
    META_CRC_REJECTS.store(0, Ordering::Relaxed);

    RECOVERY_PAGES_SCANNED.store(0, Ordering::Relaxed);
    ITER_PAGES_READ.store(0, Ordering::Relaxed);
}
