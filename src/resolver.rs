//! Logical address resolution.
//!
//! Two lookups share one contract: a linear scan of the catalog and a dense
//! [`ShortcutTable`] indexed by logical number. Both hand back the immutable
//! dummy sentinel whenever resolution fails, so callers always hold a valid
//! entry reference.

use crate::catalog::{dummy_entry, Catalog, DeviceEntry};
use crate::error::{MeError, Result};

/// Outcome of resolving a logical device number.
#[derive(Debug, Clone, Copy)]
pub enum Resolution<'a> {
    /// Bound entry that may be forwarded to its backend.
    Ready(&'a DeviceEntry),
    /// Bound entry whose board is unplugged; cached fields are still readable.
    Unplugged(&'a DeviceEntry),
    /// Out of range or unbound number.
    Invalid(i32),
}

impl<'a> Resolution<'a> {
    /// The resolved entry, or the dummy sentinel on failure.
    pub fn entry(&self) -> &'a DeviceEntry {
        match self {
            Self::Ready(entry) | Self::Unplugged(entry) => entry,
            Self::Invalid(_) => dummy_entry(),
        }
    }

    /// Entry usable for forwarding calls, or the resolution error.
    pub fn into_result(self) -> Result<&'a DeviceEntry> {
        match self {
            Self::Ready(entry) => Ok(entry),
            Self::Unplugged(entry) => Err(MeError::DeviceUnplugged(entry.logical_no)),
            Self::Invalid(number) => Err(MeError::InvalidDevice(number)),
        }
    }

    fn classify(entry: &'a DeviceEntry) -> Self {
        if entry.plug.is_reachable() {
            Self::Ready(entry)
        } else {
            Self::Unplugged(entry)
        }
    }
}

/// Anything that maps logical numbers to catalog entries.
pub trait Lookup {
    /// Resolve `logical_no`.
    fn resolve(&self, logical_no: i32) -> Resolution<'_>;
}

impl Catalog {
    /// Resolve by scanning storage order for a matching bound number.
    pub fn resolve(&self, logical_no: i32) -> Resolution<'_> {
        if logical_no < 0 || logical_no > self.max_number() {
            return Resolution::Invalid(logical_no);
        }
        self.devices()
            .iter()
            .find(|entry| entry.logical_no == logical_no)
            .map_or(Resolution::Invalid(logical_no), Resolution::classify)
    }

    /// Build the dense lookup table for this catalog.
    pub fn shortcut(&self) -> ShortcutTable<'_> {
        ShortcutTable::build(self)
    }
}

impl Lookup for Catalog {
    fn resolve(&self, logical_no: i32) -> Resolution<'_> {
        Catalog::resolve(self, logical_no)
    }
}

/// Dense logical-number index over a catalog.
///
/// Slots without a bound entry point at the dummy sentinel. The table borrows
/// the catalog, so it cannot outlive a rebuild of the catalog.
#[derive(Debug)]
pub struct ShortcutTable<'a> {
    slots: Vec<&'a DeviceEntry>,
}

impl<'a> ShortcutTable<'a> {
    /// Build a table of `max_number + 1` slots.
    ///
    /// On an unverified catalog with a repeated logical number the first
    /// entry in storage order keeps the slot, as with the linear scan.
    pub fn build(catalog: &'a Catalog) -> Self {
        let size = usize::try_from(catalog.max_number() + 1).unwrap_or(0);
        let mut slots = vec![dummy_entry(); size];
        for entry in catalog.devices() {
            let slot = usize::try_from(entry.logical_no)
                .ok()
                .and_then(|index| slots.get_mut(index));
            if let Some(slot) = slot.filter(|slot| slot.is_dummy()) {
                *slot = entry;
            }
        }
        Self { slots }
    }

    /// Indexed lookup with the same contract as [`Catalog::resolve`].
    pub fn resolve(&self, logical_no: i32) -> Resolution<'a> {
        let Ok(index) = usize::try_from(logical_no) else {
            return Resolution::Invalid(logical_no);
        };
        match self.slots.get(index) {
            Some(entry) if !entry.is_dummy() => Resolution::classify(entry),
            _ => Resolution::Invalid(logical_no),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Release the table.
    pub fn clean(self) {}
}

impl Lookup for ShortcutTable<'_> {
    fn resolve(&self, logical_no: i32) -> Resolution<'_> {
        ShortcutTable::resolve(self, logical_no)
    }
}
