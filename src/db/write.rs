//! db/write — путь записи: write/flush/snapshot_save и учёт эпохи.
//!
//! Порядок write: GC (может ждать окно квоты или вернуть Busy) -> учёт
//! wrap'а времени -> билдер (закрывшийся блок публикуется немедленно) ->
//! опциональное закрытие по commit_interval_ms.

use anyhow::{anyhow, Context, Result};

use crate::consts::MAX_SERIES;
use crate::db::core::Db;
use crate::errors::DbError;
use crate::flash::{Clock, Flash};
use crate::meta::save_snapshot;

impl<F: Flash, C: Clock> Db<F, C> {
    /// Принять один семпл. Может блокироваться на flash-операциях и (под
    /// GC-давлением) до ~1 с; в non-blocking режиме вместо ожидания — Busy.
    pub fn write(&mut self, series: u16, ts_ms: u32, value: f32) -> Result<()> {
        if series >= MAX_SERIES {
            return Err(anyhow!(DbError::InvalidArgument("series out of 0..=255")));
        }

        self.ring
            .gc_reclaim_if_needed(self.cfg.gc_non_blocking)
            .context("gc before write")?;

        // Эпоха: большой откат назад (> половины диапазона u32) — это wrap.
        if let Some(last) = self.last_ts_observed {
            if ts_ms < last && last - ts_ms > 0x8000_0000 {
                self.ring.epoch_id += 1;
            }
        }
        self.last_ts_observed = Some(ts_ms);

        if let Some(fin) = self.builder.push(series, ts_ms, value) {
            self.ring.publish_block(&fin.header, &fin.payload)?;
            self.last_commit_ms = self.ring.clock.millis();
        }

        // Каденс по времени: не держать хвост открытым дольше интервала.
        if self.cfg.commit_interval_ms > 0 && !self.builder.is_empty() {
            let now = self.ring.clock.millis();
            if now.saturating_sub(self.last_commit_ms) >= self.cfg.commit_interval_ms as u64 {
                self.flush()?;
            }
        }

        Ok(())
    }

    /// Принудительно опубликовать открытый блок (header-last).
    pub fn flush(&mut self) -> Result<()> {
        if let Some(fin) = self.builder.close() {
            self.ring.publish_block(&fin.header, &fin.payload)?;
            self.last_commit_ms = self.ring.clock.millis();
        }
        Ok(())
    }

    /// Сохранить A/B снапшот (голова/хвост/эпоха) — ограничивает время
    /// следующего восстановления.
    pub fn snapshot_save(&mut self) -> Result<()> {
        let snap = self.ring.current_snapshot();
        save_snapshot(&mut self.ring.flash, &snap).context("save snapshot")
    }
}
