//! Boundary to the lighting bus.
//!
//! The bus accepts contiguous writes starting at a fixture's DMX address. The
//! wire protocol lives behind [`FixtureBus`]; this crate ships an in-memory
//! universe and a recording bus.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;

use crate::{fixture::UNIVERSE_SIZE, OculizerError, Result};

/// A sink for fixture values.
pub trait FixtureBus: Send {
    /// Writes `values` to consecutive addresses starting at the 1-based
    /// `start_address`.
    fn write(&mut self, start_address: u16, values: &[u8]) -> Result<()>;

    /// Called once at the end of every tick.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: FixtureBus + ?Sized> FixtureBus for Box<B> {
    fn write(&mut self, start_address: u16, values: &[u8]) -> Result<()> {
        (**self).write(start_address, values)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

fn check_range(start_address: u16, len: usize) -> Result<usize> {
    let offset = (start_address as usize)
        .checked_sub(1)
        .ok_or_else(|| OculizerError::BusWrite {
            address: start_address,
            reason: "addresses start at 1".into(),
        })?;
    if offset + len > UNIVERSE_SIZE {
        return Err(OculizerError::BusWrite {
            address: start_address,
            reason: format!("{len} values overrun the {UNIVERSE_SIZE}-slot universe"),
        });
    }
    Ok(offset)
}

/// A 512-slot DMX frame held in memory. Clones share the same frame, so one
/// handle can be given to the controller while another inspects it.
#[derive(Debug, Clone)]
pub struct DmxUniverse {
    data: Arc<Mutex<[u8; UNIVERSE_SIZE]>>,
}

impl DmxUniverse {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new([0; UNIVERSE_SIZE])),
        }
    }

    pub fn snapshot(&self) -> [u8; UNIVERSE_SIZE] {
        *self.data.lock()
    }

    /// Value at the 1-based `address`, or `None` outside the universe.
    pub fn channel(&self, address: u16) -> Option<u8> {
        let index = (address as usize).checked_sub(1)?;
        self.data.lock().get(index).copied()
    }

    pub fn range(&self, start_address: u16, len: usize) -> Option<Vec<u8>> {
        let offset = check_range(start_address, len).ok()?;
        Some(self.data.lock()[offset..offset + len].to_vec())
    }

    pub fn blackout(&self) {
        *self.data.lock() = [0; UNIVERSE_SIZE];
    }
}

impl Default for DmxUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureBus for DmxUniverse {
    fn write(&mut self, start_address: u16, values: &[u8]) -> Result<()> {
        let offset = check_range(start_address, values.len())?;
        self.data.lock()[offset..offset + values.len()].copy_from_slice(values);
        Ok(())
    }
}

/// One write seen by a [`RecordingBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub address: u16,
    pub values: Vec<u8>,
}

#[derive(Debug, Default)]
struct Recording {
    writes: Vec<RecordedWrite>,
    flushes: usize,
    rejected: HashSet<u16>,
}

/// Keeps an ordered log of every write. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.inner.lock().writes.clone()
    }

    /// Writes to `address`, oldest first.
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|write| write.address == address)
            .map(|write| write.values.clone())
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.inner.lock().flushes
    }

    pub fn clear(&self) {
        self.inner.lock().writes.clear();
    }

    /// Makes every later write to `address` fail, as a misbehaving controller would.
    pub fn reject(&self, address: u16) {
        self.inner.lock().rejected.insert(address);
    }
}

impl FixtureBus for RecordingBus {
    fn write(&mut self, start_address: u16, values: &[u8]) -> Result<()> {
        check_range(start_address, values.len())?;
        let mut inner = self.inner.lock();
        if inner.rejected.contains(&start_address) {
            return Err(OculizerError::BusWrite {
                address: start_address,
                reason: "rejected by controller".into(),
            });
        }
        inner.writes.push(RecordedWrite {
            address: start_address,
            values: values.to_vec(),
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.lock().flushes += 1;
        Ok(())
    }
}
