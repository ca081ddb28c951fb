//! The credential block in NVS flash.
//!
//! NVS has no byte-addressed storage, so the region is kept in RAM the way an
//! emulated EEPROM is: reads and writes hit the cache, `commit` writes the
//! whole block as one blob.

use cloudlink_core::credentials::REGION_SIZE;
use cloudlink_core::region::check_bounds;
use cloudlink_core::{ByteRegion, StorageError};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{info, warn};

const BLOB_KEY: &str = "credentials";

pub struct NvsRegion {
    nvs: EspNvs<NvsDefault>,
    cache: Vec<u8>,
}

impl NvsRegion {
    /// Open `namespace` and load the stored block, if any.
    pub fn open(partition: EspDefaultNvsPartition, namespace: &str) -> Result<Self, StorageError> {
        let nvs = EspNvs::new(partition, namespace, true)
            .map_err(|e| StorageError::Read(format!("open namespace {}: {}", namespace, e)))?;

        let mut cache = vec![0u8; REGION_SIZE];
        let mut buf = vec![0u8; REGION_SIZE];
        match nvs.get_blob(BLOB_KEY, &mut buf) {
            Ok(Some(stored)) => {
                let len = stored.len().min(REGION_SIZE);
                cache[..len].copy_from_slice(&stored[..len]);
                info!("Loaded {} byte credential block from NVS", len);
            }
            Ok(None) => info!("No credential block in NVS yet"),
            Err(e) => warn!("Could not read credential block, starting empty: {}", e),
        }

        Ok(Self { nvs, cache })
    }
}

impl ByteRegion for NvsRegion {
    fn size(&self) -> usize {
        self.cache.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.cache.len())?;
        buf.copy_from_slice(&self.cache[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.cache.len())?;
        self.cache[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.nvs
            .set_blob(BLOB_KEY, &self.cache)
            .map_err(|e| StorageError::Commit(e.to_string()))
    }
}
