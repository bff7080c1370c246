//! Переполнение u32-миллисекунд: wrap-aware окна запросов и учёт эпохи.

use anyhow::Result;

use EmberDB::config::StoreConfig;
use EmberDB::db::Db;
use EmberDB::sim::{MemFlash, SysClock};

#[test]
fn query_window_across_u32_wrap() -> Result<()> {
    let flash = MemFlash::new(256 * 1024)?;
    let mut db = Db::open(flash, SysClock::new(), StoreConfig::default())?;

    // 100 строк шагом 10 через границу 2^32: i=52 перепрыгивает ноль
    let start = 0xFFFF_FE00u32;
    for i in 0..100u32 {
        db.write(1, start.wrapping_add(i * 10), i as f32)?;
    }
    db.flush()?;
    assert_eq!(db.epoch_id(), 1, "wrap must bump the epoch");

    // «перевёрнутое» окно: от 0xFFFF_FF00 до 0x200
    let rows: Vec<(u32, f32)> = db.query(1, 0xFFFF_FF00, 0x200)?.collect();
    // до wrap: i=26..=51 (26 строк), после: i=52..=99 (48 строк)
    assert_eq!(rows.len(), 74);
    for &(ts, _) in &rows {
        let in_window = ts >= 0xFFFF_FF00 || ts <= 0x200;
        assert!(in_window, "ts {ts:#x} outside wrapped window");
    }

    // окно целиком после wrap не захватывает старые метки
    let after: Vec<_> = db.query(1, 0, 0x200)?.collect();
    assert_eq!(after.len(), 48);
    assert!(after.iter().all(|&(ts, _)| ts <= 0x200));
    Ok(())
}

#[test]
fn epoch_survives_snapshot_roundtrip() -> Result<()> {
    let flash = MemFlash::new(256 * 1024)?;
    let mut db = Db::open(flash, SysClock::new(), StoreConfig::default())?;

    db.write(2, 0xFFFF_FFF0, 1.0)?;
    db.write(2, 0x10, 2.0)?; // wrap
    db.flush()?;
    assert_eq!(db.epoch_id(), 1);
    db.snapshot_save()?;
    let flash = db.close();

    let db = Db::open(flash, SysClock::new(), StoreConfig::default())?;
    assert_eq!(db.epoch_id(), 1, "epoch is persisted only via snapshots");

    let (ts, v) = db.latest(2)?.expect("data");
    assert_eq!(ts, 0x10);
    assert!((v - 2.0).abs() < 1e-3);
    Ok(())
}
