//! Credential store.
//!
//! Sole owner of the persisted [`Credentials`]. Every save rewrites the whole
//! reserved block, so a partially updated field can never survive a reset.

use tracing::{error, info, warn};

use crate::credentials::{Credentials, REGION_SIZE, USED_LEN};
use crate::region::{ByteRegion, StorageError};

/// Load/save/wipe of the three credential slots.
///
/// The store assumes a single logical writer. On multi-tasking platforms all
/// access goes through the device control loop (see [`crate::transport`]).
#[derive(Debug)]
pub struct CredentialStore<R: ByteRegion> {
    region: R,
}

impl<R: ByteRegion> CredentialStore<R> {
    pub fn new(region: R) -> Self {
        Self { region }
    }

    /// Access the underlying region.
    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }

    /// Read the three slots.
    ///
    /// Never fails: a read fault is logged and yields empty credentials.
    pub fn load(&self) -> Credentials {
        let mut buf = [0u8; USED_LEN];
        if let Err(e) = self.region.read(0, &mut buf) {
            warn!("Failed to read stored credentials: {}", e);
            return Credentials::default();
        }

        let credentials = Credentials::decode(&buf);
        info!(
            "Loaded credentials: network '{}', device '{}'",
            credentials.network_name, credentials.device_id
        );
        credentials
    }

    /// Persist `credentials`, truncating each field to the slot size.
    ///
    /// Returns the copy that was actually written.
    pub fn save(&mut self, credentials: &Credentials) -> Result<Credentials, StorageError> {
        let stored = credentials.truncated();
        if stored != *credentials {
            warn!("Credential fields truncated to slot size");
        }

        let mut block = vec![0u8; self.block_len()];
        stored.encode_into(&mut block);
        self.write_block(&block)?;

        info!("Saved credentials for network '{}'", stored.network_name);
        Ok(stored)
    }

    /// Zero the whole reserved block.
    pub fn wipe(&mut self) -> Result<(), StorageError> {
        let block = vec![0u8; self.block_len()];
        self.write_block(&block)?;
        info!("Stored credentials cleared");
        Ok(())
    }

    fn block_len(&self) -> usize {
        REGION_SIZE.min(self.region.size())
    }

    /// Write and commit `block`. On failure the previous contents are staged
    /// back, so `load` keeps returning what is actually persisted.
    fn write_block(&mut self, block: &[u8]) -> Result<(), StorageError> {
        let mut previous = vec![0u8; block.len()];
        let snapshot = match self.region.read(0, &mut previous) {
            Ok(()) => Some(previous),
            Err(e) => {
                warn!("Could not snapshot credential block before write: {}", e);
                None
            }
        };

        let result = self
            .region
            .write(0, block)
            .and_then(|()| self.region.commit());
        if let Err(ref e) = result {
            error!("Persistent storage fault: {}", e);
            if let Some(previous) = snapshot {
                if let Err(e) = self.region.write(0, &previous) {
                    error!("Could not restore staged credential block: {}", e);
                }
            }
        }
        result
    }
}
