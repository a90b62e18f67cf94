//! Accessors over the RocksDB engine

use bach_db::{DbBridge, DbError, FixedLayoutAccessor, SerializableAccessor, TX_READ_WRITE};
use bach_db_rocksdb::{DbConfig, RocksAdapter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Receipt {
    tx_hash: [u8; 32],
    gas_used: u64,
    success: bool,
    logs: Vec<Vec<u8>>,
}

fn open_bridge(dir: &TempDir) -> Arc<DbBridge> {
    let bridge = Arc::new(DbBridge::new(Arc::new(RocksAdapter::default())));
    bridge.open(dir.path().to_str().unwrap()).unwrap();
    bridge
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let bridge = open_bridge(&dir);
        let heights = FixedLayoutAccessor::<u64, [u8; 32]>::open(&bridge, "block_index").unwrap();
        bridge.begin_transaction(TX_READ_WRITE).unwrap();
        for h in 0..5u64 {
            heights.set(&h, &[h as u8; 32]).unwrap();
        }
        bridge.commit_transaction().unwrap();
    }

    let bridge = open_bridge(&dir);
    let heights = FixedLayoutAccessor::<u64, [u8; 32]>::open(&bridge, "block_index").unwrap();
    assert_eq!(heights.size().unwrap(), 5);
    assert_eq!(*heights.index(&3).unwrap(), [3u8; 32]);
}

#[test]
fn test_aborted_writes_never_reach_disk() {
    let dir = TempDir::new().unwrap();
    {
        let bridge = open_bridge(&dir);
        let accounts = SerializableAccessor::<String, u64>::open(&bridge, "accounts").unwrap();
        accounts.set(&"alice".to_string(), &100).unwrap();

        accounts.begin_transaction(TX_READ_WRITE).unwrap();
        accounts.set(&"alice".to_string(), &150).unwrap();
        accounts.set(&"bob".to_string(), &1).unwrap();
        assert_eq!(accounts.size().unwrap(), 2);
        accounts.abort_transaction();
    }

    let bridge = open_bridge(&dir);
    let accounts = SerializableAccessor::<String, u64>::open(&bridge, "accounts").unwrap();
    assert_eq!(*accounts.index(&"alice".to_string()).unwrap(), 100);
    assert!(accounts.get(&"bob".to_string()).unwrap().is_none());
    assert_eq!(accounts.size().unwrap(), 1);
}

#[test]
fn test_commit_spans_tables() {
    let dir = TempDir::new().unwrap();
    let bridge = open_bridge(&dir);
    let receipts = SerializableAccessor::<[u8; 32], Receipt>::open(&bridge, "receipts").unwrap();
    let meta = SerializableAccessor::<String, u64>::open(&bridge, "meta").unwrap();

    let receipt = Receipt {
        tx_hash: [0xab; 32],
        gas_used: 21_000,
        success: true,
        logs: vec![vec![1, 2, 3]],
    };

    bridge.begin_transaction(TX_READ_WRITE).unwrap();
    receipts.set(&receipt.tx_hash, &receipt).unwrap();
    meta.set(&"latest_block".to_string(), &42).unwrap();
    bridge.commit_transaction().unwrap();

    assert_eq!(*receipts.index(&[0xab; 32]).unwrap(), receipt);
    assert_eq!(*meta.index(&"latest_block".to_string()).unwrap(), 42);
    assert_eq!(receipts.size().unwrap(), receipts.size_no_cache().unwrap());
}

#[test]
fn test_enumerate_in_key_order() {
    let dir = TempDir::new().unwrap();
    let bridge = open_bridge(&dir);
    let table = SerializableAccessor::<String, u32>::open(&bridge, "names").unwrap();
    for (i, name) in ["carol", "alice", "bob"].iter().enumerate() {
        table.set(&name.to_string(), &(i as u32)).unwrap();
    }

    let mut keys = Vec::new();
    table
        .enumerate_keys(|_, k| {
            keys.push(k.clone());
            true
        })
        .unwrap();
    assert_eq!(keys, vec!["alice", "bob", "carol"]);
}

#[test]
fn test_clear_inside_transaction() {
    let dir = TempDir::new().unwrap();
    let bridge = open_bridge(&dir);
    let table = FixedLayoutAccessor::<u32, u64>::open(&bridge, "t").unwrap();
    for i in 0..10u32 {
        table.set(&i, &(i as u64)).unwrap();
    }

    table.begin_transaction(TX_READ_WRITE).unwrap();
    table.clear().unwrap();
    table.set(&100, &100).unwrap();
    assert_eq!(table.size().unwrap(), 1);
    table.commit_transaction().unwrap();

    assert_eq!(table.size().unwrap(), 1);
    assert!(table.get(&0).unwrap().is_none());
}

#[test]
fn test_other_thread_reads_committed_size() {
    let dir = TempDir::new().unwrap();
    let bridge = open_bridge(&dir);
    let table = FixedLayoutAccessor::<u64, u64>::open(&bridge, "t").unwrap();
    for i in 0..3u64 {
        table.set(&i, &i).unwrap();
    }

    let started = Barrier::new(2);
    let stopped = Barrier::new(2);
    let finished = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            table.begin_transaction(TX_READ_WRITE).unwrap();
            started.wait();
            for i in 3..20u64 {
                table.set(&i, &i).unwrap();
                assert_eq!(table.size().unwrap(), i + 1);
            }
            finished.store(true, Ordering::SeqCst);
            stopped.wait();
            table.commit_transaction().unwrap();
        });

        s.spawn(|| {
            started.wait();
            while !finished.load(Ordering::SeqCst) {
                let size = table.size().unwrap();
                assert_eq!(size, 3);
                // writes from a non-owning thread are declined
                assert!(matches!(table.set(&999, &999), Err(DbError::Adapter("set"))));
            }
            stopped.wait();
        });
    });

    assert_eq!(table.size().unwrap(), 20);
}

#[test]
fn test_concurrent_bind_same_table() {
    let dir = TempDir::new().unwrap();
    let bridge = open_bridge(&dir);
    let start = Barrier::new(4);

    let ids: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    start.wait();
                    let table = FixedLayoutAccessor::<u64, u64>::open(&bridge, "headers").unwrap();
                    table.table_id()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_custom_config() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig::from_toml_str("max_open_files = 64\nmax_write_buffer_number = 2\n").unwrap();
    let adapter = Arc::new(RocksAdapter::new(config.clone()));
    assert_eq!(adapter.config(), &config);

    let bridge = Arc::new(DbBridge::new(adapter));
    bridge.open(dir.path().to_str().unwrap()).unwrap();
    let table = FixedLayoutAccessor::<u64, u64>::open(&bridge, "t").unwrap();
    table.set(&1, &1).unwrap();
    assert_eq!(table.size().unwrap(), 1);
}

#[test]
fn test_missing_directory_without_create() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig {
        create_if_missing: false,
        ..DbConfig::default()
    };
    let bridge = DbBridge::new(Arc::new(RocksAdapter::new(config)));
    let path = dir.path().join("absent");
    assert!(matches!(
        bridge.open(path.to_str().unwrap()),
        Err(DbError::Adapter("open"))
    ));
    assert!(!bridge.is_open());
}
