//! db/core — структура Db, статистика и закрытие.
//!
//! Db владеет всем мутабельным состоянием (writer-owned RAM): кольцом,
//! билдером и конфигом. Запросы берут &self, запись — &mut self; тем самым
//! однопоточный контракт ядра закреплён borrow-checker'ом.

use crate::config::StoreConfig;
use crate::db::builder::BlockBuilder;
use crate::flash::{Clock, Flash};
use crate::ring::Ring;

#[derive(Debug)]
pub struct Db<F: Flash, C: Clock> {
    pub(crate) ring: Ring<F, C>,
    pub(crate) builder: BlockBuilder,
    pub(crate) cfg: StoreConfig,

    // отслеживание эпохи (wrap u32-времени); персистится только в снапшотах
    pub(crate) last_ts_observed: Option<u32>,
    pub(crate) last_commit_ms: u64,
}

/// Лёгкая статистика для телеметрии и тестов.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub seg_seq_head: u32,
    pub seg_seq_tail: u32,
    pub blocks_written: u32,
    pub crc_errors: u32,
    pub gc_warn_events: u32,
    pub gc_busy_events: u32,
    pub recovery_truncations: u32,
    pub quant_saturations: u32,
}

impl<F: Flash, C: Clock> Db<F, C> {
    pub fn info(&self) -> Stats {
        Stats {
            seg_seq_head: self.ring.head.seg_seqno,
            seg_seq_tail: self.ring.tail_seqno,
            blocks_written: self.ring.blocks_written,
            crc_errors: self.ring.crc_error_count(),
            gc_warn_events: self.ring.gc_warn_events,
            gc_busy_events: self.ring.gc_busy_events,
            recovery_truncations: self.ring.recovery_truncations,
            quant_saturations: self.builder.quant_saturations(),
        }
    }

    /// Число сегментных слотов кольца.
    pub fn seg_count(&self) -> u32 {
        self.ring.seg_count
    }

    /// Текущая эпоха (инкрементируется на большом откате времени назад).
    pub fn epoch_id(&self) -> u32 {
        self.ring.epoch_id
    }

    /// Закрыть базу и вернуть носитель. Незафлашенный блок отбрасывается —
    /// как и при обрыве питания, долговечен только опубликованный заголовок.
    pub fn close(self) -> F {
        self.ring.flash
    }
}
