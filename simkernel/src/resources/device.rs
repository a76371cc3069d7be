//! I/O Device Registry
//!
//! Devices are grouped into pools by name. Processes waiting for a busy
//! pool queue on the pool's wait list, which is keyed by name rather than
//! by individual device.

use crate::types::{Pcb, Pid};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// How to reach a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    /// Pool name
    pub name: String,
    /// Network address, unique per device
    pub address: String,
}

impl std::fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// Registry entry for one device
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub endpoint: DeviceEndpoint,
    pub is_free: bool,
    pub pid_occupying: Option<Pid>,
}

/// Outcome of asking for a device
#[derive(Debug)]
pub enum Claim {
    /// A free device was reserved for the caller
    Granted(DeviceEndpoint),
    /// Every device in the pool is busy; the caller was queued
    Queued,
    /// No device with that name ever connected
    UnknownDevice,
}

/// Outcome of freeing a device
#[derive(Debug)]
pub enum Release {
    /// Nobody was waiting; the device is free
    Free,
    /// The device was handed to the next waiter and stays busy
    Handoff(DeviceEndpoint, Arc<Pcb>),
    /// No device at that address
    UnknownDevice,
}

#[derive(Debug, Default)]
struct DeviceTable {
    devices: Vec<DeviceRecord>,
    waiting: HashMap<String, VecDeque<Arc<Pcb>>>,
}

impl DeviceTable {
    /// Hand the device at `index` to the next waiter of its pool, or free it
    fn drain_one(&mut self, index: usize) -> Release {
        let name = self.devices[index].endpoint.name.clone();
        let next = self.waiting.get_mut(&name).and_then(|q| q.pop_front());

        let record = &mut self.devices[index];
        match next {
            Some(pcb) => {
                record.is_free = false;
                record.pid_occupying = Some(pcb.pid());
                debug!("Device {} handed to waiting process {}", record.endpoint, pcb.pid());
                Release::Handoff(record.endpoint.clone(), pcb)
            }
            None => {
                record.is_free = true;
                record.pid_occupying = None;
                Release::Free
            }
        }
    }
}

/// Thread-safe device registry with per-pool wait lists
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    table: Mutex<DeviceTable>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and drain its pool's wait list into it
    pub fn register(&self, name: &str, address: &str) -> Release {
        let mut table = self.table.lock();

        let index = match table.devices.iter().position(|d| d.endpoint.address == address) {
            Some(index) => {
                table.devices[index].endpoint.name = name.to_string();
                index
            }
            None => {
                table.devices.push(DeviceRecord {
                    endpoint: DeviceEndpoint {
                        name: name.to_string(),
                        address: address.to_string(),
                    },
                    is_free: true,
                    pid_occupying: None,
                });
                info!("Device {} connected at {}", name, address);
                table.devices.len() - 1
            }
        };

        if !table.devices[index].is_free {
            return Release::Free;
        }
        table.drain_one(index)
    }

    /// Reserve a free device from the pool `name` for `pcb`, or queue it.
    /// Checking and queueing happen under one lock so a concurrent release
    /// cannot slip in between.
    pub fn claim_or_wait(&self, name: &str, pcb: &Arc<Pcb>) -> Claim {
        let mut table = self.table.lock();

        if !table.devices.iter().any(|d| d.endpoint.name == name) {
            return Claim::UnknownDevice;
        }

        if let Some(record) = table.devices.iter_mut().find(|d| d.endpoint.name == name && d.is_free) {
            record.is_free = false;
            record.pid_occupying = Some(pcb.pid());
            return Claim::Granted(record.endpoint.clone());
        }

        table
            .waiting
            .entry(name.to_string())
            .or_default()
            .push_back(Arc::clone(pcb));
        Claim::Queued
    }

    /// Free the device at `address`, handing it to the next waiter if any
    pub fn release(&self, address: &str) -> Release {
        let mut table = self.table.lock();
        match table.devices.iter().position(|d| d.endpoint.address == address) {
            Some(index) => table.drain_one(index),
            None => Release::UnknownDevice,
        }
    }

    /// Pids waiting on the pool `name`, in queue order
    pub fn waiting(&self, name: &str) -> Vec<Pid> {
        self.table
            .lock()
            .waiting
            .get(name)
            .map(|q| q.iter().map(|p| p.pid()).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.table.lock().devices.clone()
    }
}
