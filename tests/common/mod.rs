// tests/common/mod.rs
//
// Shared fixtures: a provider wired to the in-memory backend.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::Arc;

use s3fs_lite::memory_client::{MemoryClientFactory, MemoryObjectClient};
use s3fs_lite::{FsConfig, OpenOption, S3FileSystemProvider, S3Path};

pub const BUCKET: &str = "example";
pub const REGION: &str = "eu-west-1";

pub struct Fixture {
    pub provider: S3FileSystemProvider,
    pub factory: Arc<MemoryClientFactory>,
    pub backend: Arc<MemoryObjectClient>,
}

impl Fixture {
    pub fn path(&self, key: &str) -> S3Path {
        self.provider
            .get_path(&format!("s3://{BUCKET}/{key}"))
            .expect("path for key")
    }

    pub fn seed(&self, key: &str, data: &'static [u8]) {
        self.backend.put_bytes(BUCKET, key, data);
    }

    pub fn write(&self, key: &str, data: &[u8], options: &[OpenOption]) -> s3fs_lite::Result<()> {
        let mut writer = self.provider.open_write(&self.path(key), options)?;
        writer.write_all(data)?;
        writer.close()
    }

    pub fn read(&self, key: &str) -> s3fs_lite::Result<Vec<u8>> {
        let mut reader = self.provider.open_read(&self.path(key), &[])?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        reader.close()?;
        Ok(out)
    }
}

pub fn config() -> FsConfig {
    FsConfig { worker_threads: 2, ..FsConfig::default() }
}

pub fn fixture_with(config: FsConfig) -> Fixture {
    let backend = Arc::new(MemoryObjectClient::new());
    backend.create_bucket(BUCKET, REGION);
    let factory = Arc::new(MemoryClientFactory::new(Arc::clone(&backend)));
    let provider =
        S3FileSystemProvider::with_factory(config, factory.clone()).expect("provider");
    Fixture { provider, factory, backend }
}

pub fn fixture() -> Fixture {
    fixture_with(config())
}
