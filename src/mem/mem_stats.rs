use enum_map::{Enum, EnumMap};
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum_macros::{Display, EnumIter};

use crate::util::conversions::bytes_to_formatted_string;

/// The kind of memory an allocation is accounted against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, EnumIter, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SpaceType {
    Object,
    NonMovableObject,
    Humongous,
    Internal,
}

impl SpaceType {
    /// Is this space part of the managed heap?
    pub fn is_heap_space(self) -> bool {
        !matches!(self, SpaceType::Internal)
    }
}

/// Allocation statistics of the managed heap.
#[derive(Default)]
pub struct MemStats {
    allocated: EnumMap<SpaceType, AtomicUsize>,
    freed: EnumMap<SpaceType, AtomicUsize>,
    objects_allocated: EnumMap<SpaceType, AtomicUsize>,
    objects_freed: EnumMap<SpaceType, AtomicUsize>,
    peak_footprint: EnumMap<SpaceType, AtomicUsize>,
}

impl MemStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allocate_object(&self, size: usize, space: SpaceType) {
        let allocated = self.allocated[space].fetch_add(size, Ordering::Relaxed) + size;
        self.objects_allocated[space].fetch_add(1, Ordering::Relaxed);
        let footprint = allocated.saturating_sub(self.freed[space].load(Ordering::Relaxed));
        self.peak_footprint[space].fetch_max(footprint, Ordering::Relaxed);
    }

    pub fn record_free_object(&self, size: usize, space: SpaceType) {
        self.freed[space].fetch_add(size, Ordering::Relaxed);
        self.objects_freed[space].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_allocated(&self, space: SpaceType) -> usize {
        self.allocated[space].load(Ordering::Relaxed)
    }

    pub fn get_freed(&self, space: SpaceType) -> usize {
        self.freed[space].load(Ordering::Relaxed)
    }

    pub fn get_footprint(&self, space: SpaceType) -> usize {
        self.get_allocated(space).saturating_sub(self.get_freed(space))
    }

    pub fn get_peak_footprint(&self, space: SpaceType) -> usize {
        self.peak_footprint[space].load(Ordering::Relaxed)
    }

    /// Bytes currently used by managed objects in all heap spaces.
    pub fn get_footprint_heap(&self) -> usize {
        self.allocated
            .iter()
            .filter(|(space, _)| space.is_heap_space())
            .map(|(space, _)| self.get_footprint(space))
            .sum()
    }

    pub fn get_total_objects_allocated(&self) -> usize {
        self.objects_allocated
            .values()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }

    pub fn get_total_objects_freed(&self) -> usize {
        self.objects_freed
            .values()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }

    /// A human readable summary, one line per space.
    pub fn get_statistics(&self) -> String {
        let mut statistics = String::new();
        for (space, _) in self.allocated.iter() {
            let _ = writeln!(
                statistics,
                "{}: allocated {} ({} objects), freed {} ({} objects), peak {}",
                space,
                bytes_to_formatted_string(self.get_allocated(space)),
                self.objects_allocated[space].load(Ordering::Relaxed),
                bytes_to_formatted_string(self.get_freed(space)),
                self.objects_freed[space].load(Ordering::Relaxed),
                bytes_to_formatted_string(self.get_peak_footprint(space)),
            );
        }
        statistics
    }
}
