//! The page directory: maps a resident `Vpid` to its frame index in the buffer
//! pool. Kept as its own module, an indirection layer between page identity and
//! physical location, backed by a plain locked hash map.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::Vpid;

pub struct MapTable {
    slots: Mutex<HashMap<Vpid, usize>>,
}

impl MapTable {
    pub fn new(capacity: usize) -> MapTable {
        MapTable {
            slots: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn lookup(&self, vpid: Vpid) -> Option<usize> {
        self.slots.lock().expect("map table mutex poisoned").get(&vpid).copied()
    }

    pub fn bind(&self, vpid: Vpid, frame_idx: usize) {
        self.slots
            .lock()
            .expect("map table mutex poisoned")
            .insert(vpid, frame_idx);
    }

    pub fn unbind(&self, vpid: Vpid) {
        self.slots.lock().expect("map table mutex poisoned").remove(&vpid);
    }
}
