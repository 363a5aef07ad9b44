//! Reclaim tests over whole chunks.

mod common;

use common::{commit, fetch, open_file, window, BASE, PAGE};
use cryptmap_core::PAGES_PER_CHUNK;

#[test]
fn idle_chunk_is_released_and_skipped() {
    let file = open_file();
    let mut m = window(&file, 2 * PAGES_PER_CHUNK);
    let lock = file.lock();

    // Pages of chunk 0 are read; the first page of chunk 1 is being written.
    m.read_barrier(&lock, BASE, PAGES_PER_CHUNK * PAGE, None, true).unwrap();
    m.write_barrier(BASE, PAGES_PER_CHUNK * PAGE);
    m.flush(&lock);
    let dirty_addr = BASE + PAGES_PER_CHUNK * PAGE;
    m.read_barrier(&lock, dirty_addr, 1, None, true).unwrap();
    m.write_bytes(dirty_addr, b"x");
    m.write_barrier(dirty_addr, 1);

    let (mut progress, mut saved) = (0, 0);
    m.reclaim_untouched(&lock, &mut progress, &mut saved);
    assert_eq!(saved, 0, "first pass only clears Touched");
    assert_eq!(progress, m.end_index());

    progress = 0;
    m.reclaim_untouched(&lock, &mut progress, &mut saved);
    assert_eq!(saved, PAGES_PER_CHUNK * PAGE);
    assert!((0..PAGES_PER_CHUNK).all(|local| m.page_state(local).is_clean()));
    assert!((0..PAGES_PER_CHUNK).all(|local| !m.is_resident(local)));
    assert!(m.page_state(PAGES_PER_CHUNK).is_dirty());
    assert!(m.is_resident(PAGES_PER_CHUNK));
    assert_eq!(m.resident_pages(), 1);
    assert_eq!(file.stats().pages_reclaimed(), PAGES_PER_CHUNK as u64);

    // Chunk 0 is skipped and costs nothing against the scan limit.
    progress = 0;
    m.reclaim_untouched(&lock, &mut progress, &mut saved);
    assert_eq!(saved, PAGES_PER_CHUNK * PAGE);
    assert_eq!(progress, m.end_index());

    m.flush(&lock);
}

#[test]
fn skipped_chunk_reawakens_on_read() {
    let file = open_file();
    let mut m = window(&file, PAGES_PER_CHUNK + 1);
    let lock = file.lock();
    commit(&mut m, &lock, BASE + 5 * PAGE, b"warm");

    let mut saved = 0;
    for _ in 0..2 {
        let mut progress = 0;
        m.reclaim_untouched(&lock, &mut progress, &mut saved);
    }
    assert_eq!(saved, PAGE);
    assert_eq!(m.resident_pages(), 0);

    assert_eq!(fetch(&mut m, &lock, BASE + 5 * PAGE, 4), b"warm");
    assert!(m.is_resident(5));

    for _ in 0..2 {
        let mut progress = 0;
        m.reclaim_untouched(&lock, &mut progress, &mut saved);
    }
    assert_eq!(saved, 2 * PAGE);
    assert!(!m.is_resident(5));
}

#[test]
fn data_round_trips_through_reclaim() {
    let file = open_file();
    let mut m = window(&file, 8);
    let lock = file.lock();

    let data: Vec<u8> = (0..5 * PAGE).map(|i| (i % 239) as u8).collect();
    commit(&mut m, &lock, BASE + 512, &data);
    let decrypted_before = m.decryption_count();

    let mut saved = 0;
    for _ in 0..2 {
        let mut progress = 0;
        m.reclaim_untouched(&lock, &mut progress, &mut saved);
    }
    assert_eq!(m.resident_pages(), 0);
    assert_eq!(saved, 6 * PAGE);

    assert_eq!(fetch(&mut m, &lock, BASE + 512, data.len()), data);
    assert_eq!(m.decryption_count(), decrypted_before + 6);
}

#[test]
fn recently_read_page_survives_one_pass() {
    let file = open_file();
    let mut m = window(&file, 2);
    let lock = file.lock();
    commit(&mut m, &lock, BASE, &[3u8; 2 * PAGE]);

    let mut saved = 0;
    let mut progress = 0;
    m.reclaim_untouched(&lock, &mut progress, &mut saved);

    // Page 1 is used again between the passes.
    fetch(&mut m, &lock, BASE + PAGE, 1);
    progress = 0;
    m.reclaim_untouched(&lock, &mut progress, &mut saved);

    assert!(!m.is_resident(0));
    assert!(m.is_resident(1));
    assert_eq!(saved, PAGE);
}
