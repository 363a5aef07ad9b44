//! Debug cross-check of decrypted memory against the ciphertext image.
//!
//! Compiled into debug builds and builds with the `validate` feature only.

use super::EncryptedFileMapping;
use crate::shared::FileLock;
use cryptmap_storage::BLOCK_SIZE;
use tracing::error;

impl EncryptedFileMapping {
    /// Re-decrypts every committed, current page and compares it with memory.
    ///
    /// Pages whose on-disk IVs moved on since they were decrypted are skipped:
    /// another process committed a newer version, which the next IV check
    /// will pick up.
    ///
    /// # Panics
    ///
    /// Panics on any mismatch or read failure.
    pub fn validate(&self, lock: &FileLock<'_>) {
        self.check_lock(lock);

        let mut scratch = vec![0u8; BLOCK_SIZE];
        for (local, state) in self.states.iter().enumerate() {
            if !state.is_up_to_date() || !state.is_committed() || state.is_stale_iv() {
                continue;
            }
            let page_in_file = self.first_page + local;
            let Some(slot) = &self.slots[local] else {
                panic!("up-to-date page {page_in_file} has no plaintext");
            };

            let first_block = self.first_block_of(local);
            for (i, plaintext) in slot.data.chunks(BLOCK_SIZE).enumerate() {
                let block = first_block + i as u64;
                let on_disk = match lock.read_iv(block) {
                    Ok(iv) => iv,
                    Err(e) => panic!("validation could not read IV of block {block}: {e}"),
                };
                if on_disk != slot.ivs[i] {
                    continue;
                }
                if let Err(e) = lock.read_block(block, &mut scratch) {
                    panic!("validation could not decrypt block {block}: {e}");
                }
                if scratch != plaintext {
                    error!(page = page_in_file, block, "decrypted page diverges from ciphertext");
                    panic!("page {page_in_file} diverges from committed ciphertext in block {block}");
                }
            }
        }
    }
}
