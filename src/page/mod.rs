//! page — байтовый слой страниц: CRC-32C, заголовок блока, payload, футер.

pub mod crc;
pub mod footer;
pub mod header;
pub mod payload;

pub use crc::crc32c;
pub use footer::{pack_footer_page, unpack_footer_page, SegFooter};
pub use header::{pack_header, payload_used, unpack_header, BlockHeader};
pub use payload::{decode_payload, encode_payload};
