//! Общие константы форматов (geometry, block header, footer, metadata region).
//!
//! Вся геометрия фиксирована форматом v1: сегмент 4 KiB = 15 страниц данных
//! + 1 страница футера, страница 256 B = 224 B payload + 32 B header.
//! Byte order везде little-endian.

// -------- Geometry --------
pub const SEG_BYTES: u32 = 4096;
pub const PAGE_BYTES: u32 = 256;
pub const PAGES_PER_SEG: u32 = SEG_BYTES / PAGE_BYTES; // 16
pub const DATA_PAGES_PER_SEG: u32 = PAGES_PER_SEG - 1; // последняя страница — футер
pub const PAYLOAD_BYTES: usize = 224;
pub const HEADER_BYTES: usize = 32;

// -------- Series --------
pub const MAX_SERIES: u16 = 256; // dense u8 space
pub const SERIES_BITMAP_BYTES: usize = 32; // 256 bit

// -------- Staging cap --------
// 74 слота достаточно: минимальная стоимость строки 3 байта (dt8 + qval),
// 74*3 = 222 <= 224, а 75-я строка уже не проходит fit-test.
pub const STAGE_CAP: usize = 74;

// -------- Metadata region (top of flash) --------
// 8 секторов по 4 KiB: [A][B][hint][reserved...]
pub const META_RESERVED: u32 = 32768;
pub const META_SNAP_A_OFF: u32 = 0;
pub const META_SNAP_B_OFF: u32 = 4096;
pub const META_HINT_OFF: u32 = 8192;

// -------- Block header (32 B, LE) --------
// Layout:
// [magic u32 = 'BLK1']
// [series u16]
// [count u16]
// [t0_ms u32]
// [dt_bits u8]       -- 8 или 16
// [pad 3 x 0xFF]
// [bias f32]
// [scale f32]        -- строго > 0, clamp floor 1e-9
// [payload_crc u32]  -- CRC-32C по всем 224 байтам payload
// [header_crc u32]   -- CRC-32C по байтам 0..28
pub const BLOCK_MAGIC: u32 = 0x424C_4B31; // 'BLK1'
pub const HDR_OFF_MAGIC: usize = 0;
pub const HDR_OFF_SERIES: usize = 4;
pub const HDR_OFF_COUNT: usize = 6;
pub const HDR_OFF_T0: usize = 8;
pub const HDR_OFF_DT_BITS: usize = 12;
pub const HDR_OFF_BIAS: usize = 16;
pub const HDR_OFF_SCALE: usize = 20;
pub const HDR_OFF_PAYLOAD_CRC: usize = 24;
pub const HDR_OFF_HEADER_CRC: usize = 28;
pub const HDR_CRC_COVERED: usize = 28; // header CRC покрывает первые 28 байт

// -------- Segment footer record (56 B внутри 256 B страницы, LE) --------
// Layout:
// [magic u32 = 'SFG1']
// [seg_seqno u32]
// [t_min u32]
// [t_max u32]
// [block_count u32]
// [series_bitmap 32 B]
// [crc u32]          -- CRC-32C по записи с обнулённым полем crc
pub const FOOTER_MAGIC: u32 = 0x5346_4731; // 'SFG1'
pub const FOOTER_RECORD_BYTES: usize = 56;
pub const FOOTER_OFF_SEQNO: usize = 4;
pub const FOOTER_OFF_T_MIN: usize = 8;
pub const FOOTER_OFF_T_MAX: usize = 12;
pub const FOOTER_OFF_BLOCK_COUNT: usize = 16;
pub const FOOTER_OFF_BITMAP: usize = 20;
pub const FOOTER_OFF_CRC: usize = 52;

// -------- Snapshot / head hint records --------
// Snapshot (24 B): [version u32 = 1][epoch_id u32][seg_seq_head u32]
//                  [seg_seq_tail u32][head_addr u32][crc u32]
// Head hint (12 B): [addr u32][seq u32][crc u32]
pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_RECORD_BYTES: usize = 24;
pub const HINT_RECORD_BYTES: usize = 12;

// -------- GC / hint cadence --------
pub const GC_WARN_FREE_PCT: u32 = 10;
pub const GC_BUSY_FREE_PCT: u32 = 5;
pub const GC_ERASE_QUOTA: u32 = 2; // erases per window
pub const GC_WINDOW_MS: u64 = 1000;
pub const HINT_BLOCK_CADENCE: u32 = 64;
pub const HINT_MS_CADENCE: u64 = 2000;

// Пустой t_min (стёртый сегмент): все биты в 1.
pub const TS_NONE: u32 = 0xFFFF_FFFF;
