//! NVS storage adapter.
//!
//! One namespace (`fieldnode`) on the default NVS partition; the
//! configuration blob lives under a single key and every commit is
//! atomic per ESP-IDF `nvs_commit()`.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::info;

use crate::error::{Error, StorageError};
use crate::ports::StoragePort;
use crate::Result;

const NAMESPACE: &str = "fieldnode";

pub struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStorage {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, NAMESPACE, true)
            .map_err(|_| Error::Init("nvs namespace open failed"))?;
        info!("NVS namespace '{NAMESPACE}' opened");
        Ok(Self { nvs })
    }
}

impl StoragePort for NvsStorage {
    fn load(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.nvs.get_blob(key, buf) {
            Ok(Some(blob)) => Ok(Some(blob.len())),
            Ok(None) => Ok(None),
            Err(_) => Err(StorageError::IoError.into()),
        }
    }

    fn save(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.nvs
            .set_blob(key, value)
            .map_err(|_| StorageError::IoError.into())
    }
}
