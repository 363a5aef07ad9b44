//! Two openers of one file, standing in for two processes.

mod common;

use common::{commit, fetch, init_tracing, window, TwoProcesses, BASE, PAGE};
use cryptmap_core::{
    CoreError, EncryptedFileMapping, MappingConfig, SharedFile, WriteMarker, WriteObserver,
    DECRYPT_RETRY_LIMIT,
};
use cryptmap_storage::{layout, EncryptionKey, FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn iv_check_picks_up_foreign_commit() {
    let procs = TwoProcesses::new();
    let mut ours = window(&procs.first, 3);
    {
        let lock = procs.first.lock();
        commit(&mut ours, &lock, BASE, &[1u8; 3 * PAGE]);
    }

    let mut theirs = window(&procs.second, 3);
    {
        let lock = procs.second.lock();
        commit(&mut theirs, &lock, BASE + 2 * PAGE, &[2u8; PAGE]);
    }

    let lock = procs.first.lock();
    let before = ours.decryption_count();
    assert_eq!(fetch(&mut ours, &lock, BASE + 2 * PAGE, 4), [1u8; 4], "no check requested yet");

    ours.mark_pages_for_iv_check();
    assert!((0..3).all(|local| ours.page_state(local).is_stale_iv()));

    assert_eq!(fetch(&mut ours, &lock, BASE + 2 * PAGE, 4), [2u8; 4]);
    assert_eq!(ours.decryption_count(), before + 1);
    assert!(!ours.page_state(2).is_stale_iv());
    assert!(ours.page_state(0).is_stale_iv());

    let stats = procs.first.stats();
    assert_eq!(stats.iv_checks(), 1);
    assert_eq!(stats.iv_mismatches(), 1);
}

#[test]
fn unchanged_iv_skips_decryption() {
    let procs = TwoProcesses::new();
    let mut ours = window(&procs.first, 2);
    let lock = procs.first.lock();
    commit(&mut ours, &lock, BASE, &[9u8; 2 * PAGE]);
    let before = ours.decryption_count();

    ours.mark_pages_for_iv_check();
    assert_eq!(fetch(&mut ours, &lock, BASE, 2 * PAGE), vec![9u8; 2 * PAGE]);

    assert_eq!(ours.decryption_count(), before);
    assert_eq!(procs.first.stats().iv_checks(), 2);
    assert_eq!(procs.first.stats().iv_mismatches(), 0);
}

#[test]
fn iv_check_skips_pages_being_written() {
    let procs = TwoProcesses::new();
    let mut ours = window(&procs.first, 2);
    let lock = procs.first.lock();
    commit(&mut ours, &lock, BASE, &[4u8; 2 * PAGE]);

    ours.read_barrier(&lock, BASE, 1, None, true).unwrap();
    ours.mark_pages_for_iv_check();
    assert!(!ours.page_state(0).is_stale_iv());
    assert!(ours.page_state(1).is_stale_iv());
}

#[test]
fn file_backed_processes_see_each_other() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.cmap");
    let key = EncryptionKey::generate();

    let writer = SharedFile::open(Arc::new(FileBackend::open(&path).unwrap()), &key).unwrap();
    let mut w = window(&writer, 2);
    {
        let lock = writer.lock();
        commit(&mut w, &lock, BASE + 100, b"from disk");
        w.sync(&lock);
    }

    let reader = SharedFile::open(Arc::new(FileBackend::open(&path).unwrap()), &key).unwrap();
    let mut r = window(&reader, 2);
    {
        let lock = reader.lock();
        assert_eq!(fetch(&mut r, &lock, BASE + 100, 9), b"from disk");
    }

    {
        let lock = writer.lock();
        commit(&mut w, &lock, BASE + 100, b"rewritten");
        w.sync(&lock);
    }

    let lock = reader.lock();
    r.mark_pages_for_iv_check();
    assert_eq!(fetch(&mut r, &lock, BASE + 100, 9), b"rewritten");
    assert!(reader.data_size().unwrap() >= PAGE as u64);
}

#[test]
fn corrupted_ciphertext_fails_decryption() {
    let procs = TwoProcesses::new();
    let mut ours = window(&procs.first, 1);
    {
        let lock = procs.first.lock();
        commit(&mut ours, &lock, BASE, b"precious");
    }
    procs.backend.corrupt_byte(layout::block_offset(0) + 3);

    let mut theirs = window(&procs.second, 1);
    let lock = procs.second.lock();
    let err = theirs.read_barrier(&lock, BASE, 8, None, false).unwrap_err();
    assert!(err.is_decryption_failure());
    assert!(matches!(err, CoreError::DecryptionFailed { page: 0, .. }));
    assert_eq!(procs.second.stats().decrypt_retries(), 0);
}

#[test]
fn wrong_key_fails_decryption() {
    let procs = TwoProcesses::new();
    let mut ours = window(&procs.first, 1);
    {
        let lock = procs.first.lock();
        commit(&mut ours, &lock, BASE, b"secret");
    }

    let backend: Arc<dyn StorageBackend> = procs.backend.clone();
    let intruder = SharedFile::open(backend, &EncryptionKey::generate()).unwrap();
    let mut m = window(&intruder, 1);
    let lock = intruder.lock();
    let err = m.read_barrier(&lock, BASE, 6, None, false).unwrap_err();
    assert!(err.is_decryption_failure());
}

#[derive(Default)]
struct Recorder {
    opened: Mutex<Vec<usize>>,
    modified: Mutex<Vec<usize>>,
    marks: Mutex<Vec<Option<u64>>>,
    writer_active: AtomicBool,
}

impl WriteObserver for Recorder {
    fn page_opened_for_write(&self, page_in_file: usize) {
        self.opened.lock().push(page_in_file);
    }

    fn page_modified(&self, page_in_file: usize) {
        self.modified.lock().push(page_in_file);
    }

    fn concurrent_writer_active(&self) -> bool {
        self.writer_active.load(Ordering::SeqCst)
    }
}

impl WriteMarker for Recorder {
    fn mark(&self, file_pos: u64) {
        self.marks.lock().push(Some(file_pos));
    }

    fn unmark(&self) {
        self.marks.lock().push(None);
    }
}

#[test]
fn observer_and_marker_follow_writes() {
    let procs = TwoProcesses::new();
    let recorder = Arc::new(Recorder::default());
    let mut m = EncryptedFileMapping::new(
        Arc::clone(&procs.first),
        MappingConfig::default(),
        2 * PAGE,
        BASE,
        3 * PAGE,
    )
    .unwrap()
    .with_observer(recorder.clone())
    .with_marker(recorder.clone());

    let lock = procs.first.lock();
    m.read_barrier(&lock, BASE, 2 * PAGE, None, true).unwrap();
    m.write_barrier(BASE + PAGE, 1);
    m.flush(&lock);

    assert_eq!(*recorder.opened.lock(), vec![2, 3]);
    assert_eq!(*recorder.modified.lock(), vec![3]);
    assert_eq!(*recorder.marks.lock(), vec![Some(3 * PAGE as u64), None]);

    // Already writable: no second notification.
    m.read_barrier(&lock, BASE, 1, None, true).unwrap();
    assert_eq!(recorder.opened.lock().len(), 2);
}

#[test]
fn torn_reads_are_retried_while_a_writer_is_active() {
    let procs = TwoProcesses::new();
    let mut ours = window(&procs.first, 1);
    {
        let lock = procs.first.lock();
        commit(&mut ours, &lock, BASE, b"torn");
    }
    procs.backend.corrupt_byte(layout::block_offset(0));

    let recorder = Arc::new(Recorder::default());
    recorder.writer_active.store(true, Ordering::SeqCst);
    let mut theirs = window(&procs.second, 1).with_observer(recorder.clone());
    let lock = procs.second.lock();

    let err = theirs.read_barrier(&lock, BASE, 4, None, false).unwrap_err();
    assert!(err.is_decryption_failure());
    assert_eq!(
        procs.second.stats().decrypt_retries(),
        (DECRYPT_RETRY_LIMIT - 1) as u64
    );

    // The writer finishes and the block is whole again.
    procs.backend.corrupt_byte(layout::block_offset(0));
    recorder.writer_active.store(false, Ordering::SeqCst);
    assert_eq!(fetch(&mut theirs, &lock, BASE, 4), b"torn");
}

#[test]
fn concurrent_threads_share_a_file() {
    let procs = TwoProcesses::new();
    let file = Arc::clone(&procs.first);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let file = Arc::clone(&file);
            std::thread::spawn(move || {
                let mut m = EncryptedFileMapping::new(
                    Arc::clone(&file),
                    MappingConfig::default(),
                    t * 2 * PAGE,
                    BASE,
                    2 * PAGE,
                )
                .unwrap();
                let lock = file.lock();
                commit(&mut m, &lock, BASE + 7, &[t as u8 + 1; PAGE]);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut all = window(&procs.second, 8);
    let lock = procs.second.lock();
    for t in 0..4 {
        let addr = BASE + t * 2 * PAGE + 7;
        assert_eq!(fetch(&mut all, &lock, addr, PAGE), vec![t as u8 + 1; PAGE]);
    }
}
