#![allow(non_snake_case)]

//! EmberDB — встраиваемый append-only лог временных рядов поверх QSPI NOR
//! (erase 4 KiB / program 256 B / программирование 1→0).
//!
//! Ядро однопоточное: один писатель, которому принадлежит вся мутабельная
//! память; запросы идут между записями. Долговечность — header-last commit:
//! при обрыве питания теряется максимум последний незакоммиченный блок.

// Базовые модули
pub mod config;
pub mod consts;
pub mod errors;
pub mod metrics;

// Капабилити носителя/часов и host-симуляторы
pub mod flash;
pub mod sim;

// Байтовый слой и метаданные
pub mod meta;
pub mod page; // src/page/{mod,crc,header,payload,footer}.rs

// Кольцо сегментов и восстановление
pub mod ring; // src/ring/{mod,recover}.rs

// Фасад
pub mod db; // src/db/{mod,core,open,builder,write,scan}.rs

// Утилиты (wrap-aware время, битмапы)
pub mod util;

// Удобные реэкспорты
pub use config::{StoreBuilder, StoreConfig};
pub use db::{Db, RangeIter, Stats};
pub use errors::{is_busy, DbError};
pub use flash::{Clock, Flash};
pub use meta::Snapshot;
pub use sim::{FileFlash, ManualClock, MemFlash, SysClock};
