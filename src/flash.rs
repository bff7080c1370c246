//! flash — capability-интерфейсы носителя и часов.
//!
//! Ядро не владеет железом: embedding передаёт драйвер NOR-флеша и
//! монотонные часы. Контракт драйвера:
//! - read: выровненное чтение произвольной длины, отражает все прошлые
//!   успешные program/erase;
//! - erase_4k: адрес кратен 4096, сектор становится 0xFF;
//! - program_256: адрес кратен 256, бит-wise AND с содержимым (1→0 only),
//!   повторные programs одной страницы легальны;
//! - size_bytes: кратно 4096 и >= META_RESERVED + 4096.

use anyhow::Result;

use crate::consts::{META_RESERVED, PAGE_BYTES, SEG_BYTES};

pub trait Flash {
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<()>;
    fn erase_4k(&mut self, addr: u32) -> Result<()>;
    fn program_256(&mut self, addr: u32, src: &[u8; PAGE_BYTES as usize]) -> Result<()>;
    fn size_bytes(&self) -> u32;
}

pub trait Clock {
    /// Монотонные миллисекунды; используются только для квоты GC и каденса
    /// head-hint, на флеш не попадают.
    fn millis(&self) -> u64;
}

/// Байты кольца (без metadata region наверху устройства).
#[inline]
pub fn usable_bytes<F: Flash>(flash: &F) -> u32 {
    let total = flash.size_bytes();
    if total > META_RESERVED {
        total - META_RESERVED
    } else {
        total
    }
}

/// Количество сегментных слотов кольца.
#[inline]
pub fn seg_count<F: Flash>(flash: &F) -> u32 {
    usable_bytes(flash) / SEG_BYTES
}
