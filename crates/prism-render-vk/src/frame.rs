// SPDX-License-Identifier: CEPL-1.0
//! Per-swapchain-image frame slots and the acquire-semaphore free list.

use ash::prelude::VkResult;
use ash::vk;

use crate::gpu::Gpu;

/// Synchronization and recording state tied to one swapchain image index.
///
/// Every handle is `None` when not held, so [`retire_slot`] can run any
/// number of times.
#[derive(Debug, Default)]
pub struct FrameSlot {
    /// Signals when the last submission for this index has finished.
    pub fence: Option<vk::Fence>,
    pub command_pool: Option<vk::CommandPool>,
    pub command_buffer: Option<vk::CommandBuffer>,
    /// Signaled by the presentation engine once the image may be written.
    pub acquire_semaphore: Option<vk::Semaphore>,
    /// Signaled by the submission once the image may be presented.
    pub release_semaphore: Option<vk::Semaphore>,
}

impl FrameSlot {
    pub fn is_empty(&self) -> bool {
        self.fence.is_none()
            && self.command_pool.is_none()
            && self.command_buffer.is_none()
            && self.acquire_semaphore.is_none()
            && self.release_semaphore.is_none()
    }
}

/// Destroys everything `slot` holds and nulls each field.
pub fn retire_slot<G: Gpu + ?Sized>(gpu: &G, slot: &mut FrameSlot) {
    if let Some(fence) = slot.fence.take() {
        gpu.destroy_fence(fence);
    }
    if let Some(buffer) = slot.command_buffer.take() {
        // A buffer without its pool was already freed along with the pool.
        if let Some(pool) = slot.command_pool {
            gpu.free_command_buffer(pool, buffer);
        }
    }
    if let Some(pool) = slot.command_pool.take() {
        gpu.destroy_command_pool(pool);
    }
    if let Some(sem) = slot.acquire_semaphore.take() {
        gpu.destroy_semaphore(sem);
    }
    if let Some(sem) = slot.release_semaphore.take() {
        gpu.destroy_semaphore(sem);
    }
}

fn fill_slot<G: Gpu + ?Sized>(gpu: &G, slot: &mut FrameSlot) -> VkResult<()> {
    slot.fence = Some(gpu.create_fence(true)?);
    let pool = gpu.create_command_pool()?;
    slot.command_pool = Some(pool);
    slot.command_buffer = Some(gpu.allocate_command_buffer(pool)?);
    Ok(())
}

/// One [`FrameSlot`] per swapchain image, indexed by image index.
#[derive(Debug, Default)]
pub struct FramePool {
    slots: Vec<FrameSlot>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut FrameSlot> {
        self.slots.get_mut(index)
    }

    /// Replaces every slot with `image_count` fresh ones.
    ///
    /// Fences start signaled so the first acquisition of each index does not
    /// block. Semaphores are created lazily by the presenter.
    pub fn resize<G: Gpu + ?Sized>(&mut self, gpu: &G, image_count: usize) -> VkResult<()> {
        self.destroy(gpu);
        self.slots.reserve(image_count);
        for _ in 0..image_count {
            let mut slot = FrameSlot::default();
            if let Err(e) = fill_slot(gpu, &mut slot) {
                retire_slot(gpu, &mut slot);
                return Err(e);
            }
            self.slots.push(slot);
        }
        tracing::debug!("frame pool: {} slots", image_count);
        Ok(())
    }

    /// Retires slots `[0, count)` in place, leaving them empty.
    pub fn retire_first<G: Gpu + ?Sized>(&mut self, gpu: &G, count: usize) {
        let n = count.min(self.slots.len());
        for slot in &mut self.slots[..n] {
            retire_slot(gpu, slot);
        }
    }

    /// Retires every slot in reverse creation order and empties the pool.
    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for slot in self.slots.iter_mut().rev() {
            retire_slot(gpu, slot);
        }
        self.slots.clear();
    }
}

/// Stack of acquire semaphores not owned by any [`FrameSlot`].
#[derive(Debug, Default)]
pub struct SemaphoreRecycler {
    free: Vec<vk::Semaphore>,
}

impl SemaphoreRecycler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops a recycled semaphore, or creates one when the list is empty.
    pub fn acquire_semaphore<G: Gpu + ?Sized>(&mut self, gpu: &G) -> VkResult<vk::Semaphore> {
        match self.free.pop() {
            Some(sem) => Ok(sem),
            None => gpu.create_semaphore(),
        }
    }

    /// The caller gives up ownership; `sem` must have no pending signal.
    pub fn release_to_pool(&mut self, sem: vk::Semaphore) {
        debug_assert!(!self.free.contains(&sem), "semaphore recycled twice");
        self.free.push(sem);
    }

    pub fn free(&self) -> &[vk::Semaphore] {
        &self.free
    }

    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for sem in self.free.drain(..) {
            gpu.destroy_semaphore(sem);
        }
    }
}
