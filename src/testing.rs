//! Shared unit-test doubles: a flat real-memory image and a RAM-backed SAN
//! device.

use std::vec::Vec;

use crate::block::{BlockError, SanDevice};
use crate::realmode::RealMemory;

impl RealMemory for Vec<u8> {
    fn read(&self, phys: u32, buf: &mut [u8]) {
        let start = phys as usize;
        buf.copy_from_slice(&self[start..start + buf.len()]);
    }

    fn write(&mut self, phys: u32, buf: &[u8]) {
        let start = phys as usize;
        self[start..start + buf.len()].copy_from_slice(buf);
    }
}

/// RAM-backed SAN device. Reads past the backing data return zeroes, so a
/// large capacity can be simulated with a short prefix.
pub struct TestDisk {
    pub data: Vec<u8>,
    pub block_size: usize,
    pub capacity: u64,
    pub cdrom: bool,
}

impl TestDisk {
    pub fn new(data: Vec<u8>, block_size: usize) -> Self {
        assert_eq!(data.len() % block_size, 0);
        let capacity = (data.len() / block_size) as u64;
        TestDisk {
            data,
            block_size,
            capacity,
            cdrom: false,
        }
    }

    pub fn hdd_with_sector0(sector0: &[u8], capacity: u64) -> Self {
        let mut disk = TestDisk::new(sector0.to_vec(), 512);
        disk.capacity = capacity;
        disk
    }

    pub fn cdrom(data: Vec<u8>) -> Self {
        let mut disk = TestDisk::new(data, 2048);
        disk.cdrom = true;
        disk
    }
}

impl SanDevice for TestDisk {
    fn read(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let blocks = (buf.len() / self.block_size) as u64;
        if lba + blocks > self.capacity {
            return Err(BlockError::OutOfRange);
        }
        let start = lba as usize * self.block_size;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.data.get(start + i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&mut self, lba: u64, buf: &[u8]) -> Result<(), BlockError> {
        let blocks = (buf.len() / self.block_size) as u64;
        if lba + blocks > self.capacity {
            return Err(BlockError::OutOfRange);
        }
        let start = lba as usize * self.block_size;
        if self.data.len() < start + buf.len() {
            self.data.resize(start + buf.len(), 0);
        }
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BlockError> {
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), BlockError> {
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn is_cdrom(&self) -> bool {
        self.cdrom
    }
}
