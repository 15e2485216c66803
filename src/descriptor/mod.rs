//! Descriptor heaps and slot allocation
//!
//! A [`DescriptorHeap`] hands out slots from a fixed-capacity native heap. Slots
//! are issued in strictly increasing order and are never returned: the heap is
//! sized up front from [`DescriptorBudgets`] and lives as long as the renderer.
//!
//! Slot `i` of a heap lives at `base + i * stride`, both on the CPU side and,
//! for shader-visible heaps, on the GPU side.
//!
//! Allocation is single-writer. Recording threads that need descriptors must
//! go through the owner of the heap.

use crate::backend::{
    BackendResult, DescriptorHeapInfo, DescriptorHeapKind, DescriptorView, GraphicsBackend,
    NativeHeap,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor heap '{heap}' exhausted: capacity {capacity}, requested slot {requested}")]
    HeapExhausted {
        heap: &'static str,
        capacity: u32,
        requested: u32,
    },
    #[error("slot {index} was never allocated from descriptor heap '{heap}'")]
    UnallocatedSlot { heap: &'static str, index: u32 },
}

/// A slot issued by a [`DescriptorHeap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    pub index: u32,
    pub cpu: u64,
    pub gpu: Option<u64>,
}

impl DescriptorHandle {
    pub fn is_shader_visible(&self) -> bool {
        self.gpu.is_some()
    }
}

/// Fixed-capacity, allocate-only descriptor heap
#[derive(Debug)]
pub struct DescriptorHeap {
    kind: DescriptorHeapKind,
    info: DescriptorHeapInfo,
    capacity: u32,
    next_index: u32,
}

impl DescriptorHeap {
    /// Create the native heap and wrap it
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> BackendResult<Self> {
        let info = backend.create_descriptor_heap(kind, capacity, shader_visible)?;
        log::debug!(
            "Created {} descriptor heap: {} slots, stride {}, shader visible: {}",
            kind.name(),
            capacity,
            info.stride,
            info.gpu_base.is_some()
        );
        Ok(Self::from_info(kind, capacity, info))
    }

    /// Wrap an already created native heap
    pub fn from_info(kind: DescriptorHeapKind, capacity: u32, info: DescriptorHeapInfo) -> Self {
        Self {
            kind,
            info,
            capacity,
            next_index: 0,
        }
    }

    /// Issue the next free slot.
    ///
    /// Running out of slots is a configuration error: the heap was sized too
    /// small for the scene. It is logged and returned; callers treat it as fatal.
    pub fn allocate(&mut self) -> Result<DescriptorHandle, DescriptorError> {
        if self.next_index >= self.capacity {
            log::error!(
                "Descriptor heap '{}' is exhausted ({} slots)",
                self.kind.name(),
                self.capacity
            );
            return Err(DescriptorError::HeapExhausted {
                heap: self.kind.name(),
                capacity: self.capacity,
                requested: self.next_index,
            });
        }

        let index = self.next_index;
        self.next_index += 1;
        log::trace!("Allocated {} descriptor {}", self.kind.name(), index);
        Ok(self.handle_for(index))
    }

    /// Issue `count` consecutive slots, returning the first.
    ///
    /// Either all slots are issued or none are.
    pub fn allocate_range(&mut self, count: u32) -> Result<DescriptorHandle, DescriptorError> {
        let end = self.next_index.saturating_add(count);
        if count == 0 || end > self.capacity {
            log::error!(
                "Descriptor heap '{}' cannot fit {} more slots ({} of {} used)",
                self.kind.name(),
                count,
                self.next_index,
                self.capacity
            );
            return Err(DescriptorError::HeapExhausted {
                heap: self.kind.name(),
                capacity: self.capacity,
                requested: end.saturating_sub(1),
            });
        }

        let first = self.next_index;
        self.next_index = end;
        Ok(self.handle_for(first))
    }

    /// Handle of an already issued slot
    pub fn handle_at(&self, index: u32) -> Result<DescriptorHandle, DescriptorError> {
        if index >= self.next_index {
            return Err(DescriptorError::UnallocatedSlot {
                heap: self.kind.name(),
                index,
            });
        }
        Ok(self.handle_for(index))
    }

    /// Recover the slot index of a handle from its CPU address
    pub fn index_of(&self, handle: &DescriptorHandle) -> Option<u32> {
        let offset = handle.cpu.checked_sub(self.info.cpu_base)?;
        let stride = u64::from(self.info.stride);
        if stride == 0 || offset % stride != 0 {
            return None;
        }
        let index = u32::try_from(offset / stride).ok()?;
        (index < self.next_index).then_some(index)
    }

    /// Write a view into an issued slot
    pub fn write<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        handle: &DescriptorHandle,
        view: &DescriptorView,
    ) -> crate::RendererResult<()> {
        let index = self
            .index_of(handle)
            .ok_or(DescriptorError::UnallocatedSlot {
                heap: self.kind.name(),
                index: handle.index,
            })?;
        backend.write_descriptor(self.info.heap, index, view)?;
        Ok(())
    }

    fn handle_for(&self, index: u32) -> DescriptorHandle {
        let offset = u64::from(index) * u64::from(self.info.stride);
        DescriptorHandle {
            index,
            cpu: self.info.cpu_base + offset,
            gpu: self.info.gpu_base.map(|base| base + offset),
        }
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn native(&self) -> NativeHeap {
        self.info.heap
    }

    pub fn is_shader_visible(&self) -> bool {
        self.info.gpu_base.is_some()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn allocated(&self) -> u32 {
        self.next_index
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.next_index
    }
}

/// Slot budgets for the four heaps the renderer creates at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBudgets {
    pub cbv_srv_uav: u32,
    pub sampler: u32,
    pub rtv: u32,
    pub dsv: u32,
}

impl Default for DescriptorBudgets {
    fn default() -> Self {
        Self {
            cbv_srv_uav: 1024 * 512,
            sampler: 1024,
            rtv: 128,
            dsv: 128,
        }
    }
}

/// The renderer's descriptor heaps
#[derive(Debug)]
pub struct DescriptorHeaps {
    pub cbv_srv_uav: DescriptorHeap,
    pub sampler: DescriptorHeap,
    pub rtv: DescriptorHeap,
    pub dsv: DescriptorHeap,
}

impl DescriptorHeaps {
    /// Create all heaps. Resource-view and sampler heaps are shader visible.
    pub fn new<B: GraphicsBackend>(backend: &mut B, budgets: &DescriptorBudgets) -> BackendResult<Self> {
        Ok(Self {
            cbv_srv_uav: DescriptorHeap::create(
                backend,
                DescriptorHeapKind::CbvSrvUav,
                budgets.cbv_srv_uav,
                true,
            )?,
            sampler: DescriptorHeap::create(
                backend,
                DescriptorHeapKind::Sampler,
                budgets.sampler,
                true,
            )?,
            rtv: DescriptorHeap::create(backend, DescriptorHeapKind::Rtv, budgets.rtv, false)?,
            dsv: DescriptorHeap::create(backend, DescriptorHeapKind::Dsv, budgets.dsv, false)?,
        })
    }

    /// Heaps that shader-visible descriptor tables point into
    pub fn shader_visible(&self) -> [NativeHeap; 2] {
        [self.cbv_srv_uav.native(), self.sampler.native()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(capacity: u32, shader_visible: bool) -> DescriptorHeap {
        DescriptorHeap::from_info(
            DescriptorHeapKind::CbvSrvUav,
            capacity,
            DescriptorHeapInfo {
                heap: NativeHeap(1),
                cpu_base: 0x1000,
                gpu_base: shader_visible.then_some(0x8000_0000),
                stride: 32,
            },
        )
    }

    #[test]
    fn test_indices_are_sequential() {
        let mut heap = heap(16, false);
        let indices: Vec<u32> = (0..16).map(|_| heap.allocate().unwrap().index).collect();
        assert_eq!(indices, (0..16).collect::<Vec<_>>());
        assert_eq!(heap.remaining(), 0);
    }

    #[test]
    fn test_addresses_follow_stride() {
        let mut heap = heap(4, true);
        heap.allocate().unwrap();
        let second = heap.allocate().unwrap();

        assert_eq!(second.cpu, 0x1000 + 32);
        assert_eq!(second.gpu, Some(0x8000_0000 + 32));
    }

    #[test]
    fn test_cpu_only_heap_has_no_gpu_address() {
        let mut heap = heap(4, false);
        let handle = heap.allocate().unwrap();
        assert!(!handle.is_shader_visible());
    }

    #[test]
    fn test_exhaustion_on_capacity_plus_one() {
        let mut heap = heap(3, false);
        for _ in 0..3 {
            heap.allocate().unwrap();
        }

        let err = heap.allocate().unwrap_err();
        assert_eq!(
            err,
            DescriptorError::HeapExhausted {
                heap: "cbv_srv_uav",
                capacity: 3,
                requested: 3,
            }
        );
        // The failing call does not consume a slot
        assert_eq!(heap.allocated(), 3);
    }

    #[test]
    fn test_range_is_all_or_nothing() {
        let mut heap = heap(8, true);
        let first = heap.allocate_range(3).unwrap();
        assert_eq!(first.index, 0);
        assert!(heap.allocate_range(6).is_err());
        assert_eq!(heap.allocated(), 3);
        assert_eq!(heap.allocate().unwrap().index, 3);
    }

    #[test]
    fn test_index_of_round_trips_issued_slots_only() {
        let mut heap = heap(8, false);
        let a = heap.allocate().unwrap();
        let b = heap.allocate().unwrap();

        assert_eq!(heap.index_of(&a), Some(0));
        assert_eq!(heap.index_of(&b), Some(1));

        let never_issued = DescriptorHandle {
            index: 5,
            cpu: 0x1000 + 5 * 32,
            gpu: None,
        };
        assert_eq!(heap.index_of(&never_issued), None);
        assert!(heap.handle_at(5).is_err());
    }
}
