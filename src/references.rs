//! Identity preservation for shared and dynamic values.
//!
//! While tracking is enabled every nullable or dynamic value is preceded by a
//! one-byte marker:
//!
//! - [`MARKER_NULL`]: no value.
//! - [`MARKER_VALUE`]: a value body follows; its marker offset becomes its handle.
//! - [`MARKER_BACKREF`]: a packed offset of an earlier marker follows.

use std::any::Any;
use std::collections::HashMap;

use crate::Dynamic;

pub const MARKER_NULL: u8 = 0;
pub const MARKER_VALUE: u8 = 1;
pub const MARKER_BACKREF: u8 = 2;

/// A value materialized while reading, kept both type-erased and typed so a
/// backreference can resolve it through either a dynamic or a typed slot.
pub(crate) struct Instance {
    pub dynamic: Dynamic,
    /// Holds a `Shared<T>` of the concrete type.
    pub typed: Box<dyn Any>,
}

pub(crate) struct ReferenceTable {
    depth: usize,
    /// allocation address -> (marker offset, handle keeping the allocation alive)
    written: HashMap<usize, (u64, Box<dyn Any>)>,
    read: HashMap<u64, Instance>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        ReferenceTable {
            depth: 0,
            written: HashMap::new(),
            read: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn enable(&mut self) {
        self.depth += 1;
    }

    pub fn disable(&mut self) {
        if self.depth == 0 {
            log::warn!("identity tracking disabled more times than it was enabled");
            return;
        }
        self.depth -= 1;
    }

    /// Forgets every recorded value. The nesting depth is kept.
    pub fn clear(&mut self) {
        self.written.clear();
        self.read.clear();
    }

    pub fn offset_of(&self, address: usize) -> Option<u64> {
        self.written.get(&address).map(|(offset, _)| *offset)
    }

    pub fn record_written(&mut self, address: usize, offset: u64, pin: Box<dyn Any>) {
        self.written.insert(address, (offset, pin));
    }

    pub fn record_read(&mut self, offset: u64, instance: Instance) {
        self.read.insert(offset, instance);
    }

    pub fn resolve(&self, offset: u64) -> Option<&Instance> {
        self.read.get(&offset)
    }
}
