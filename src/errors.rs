//! Типизированные виды ошибок ядра.
//!
//! Конвенция: публичный API возвращает anyhow::Result; там, где вызывающему
//! коду важно различить вид (Busy в non-blocking GC, NoSpace на open),
//! в цепочку кладётся DbError, достижимый через err.downcast_ref::<DbError>().

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DbError {
    /// Серия вне 0..=255, неверный размер буфера, невыровненный адрес.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Квота GC исчерпана в non-blocking режиме; повторить позже.
    #[error("gc erase quota exhausted (non-blocking mode)")]
    Busy,

    /// Workspace-бюджет не вмещает рабочие массивы на open.
    #[error("workspace budget too small: need {need} bytes, have {have}")]
    NoSpace { need: usize, have: usize },

    /// CRC/magic mismatch при чтении страницы или записи метаданных.
    #[error("integrity check failed: {0}")]
    Integrity(&'static str),

    /// Драйвер флеша вернул ошибку.
    #[error("flash i/o failed: {0}")]
    Io(&'static str),
}

/// true, если ошибка (в т.ч. обёрнутая anyhow-контекстом) — Busy.
pub fn is_busy(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<DbError>(), Some(DbError::Busy))
}
