//! Device-resident buffers fed through a staging buffer.
//!
//! A [`DynamicBuffer`] tracks capacity and the used prefix; the bytes
//! themselves live in a [`BufferStorage`]. On the GPU that is a
//! [`DeviceStorage`]: a device-local buffer plus an equally sized
//! host-visible staging buffer, both registered with the context's deletion
//! queue when created.

use crate::context::DeviceContext;
use crate::deletion::{OwnedResource, ResourceHandle};
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Backing memory behind a [`DynamicBuffer`].
pub trait BufferStorage {
    /// What the storage needs to reach the device.
    type Context: ?Sized;

    /// Copy `data` into staging memory at `offset` and queue its transfer to
    /// the same offset in device memory. The range is already bounds-checked.
    fn stage(&mut self, ctx: &Self::Context, offset: u64, data: &[u8]) -> Result<()>;

    /// Replace device memory with an allocation of `new_capacity` bytes,
    /// carrying over bytes `[0, live_bytes)`.
    fn grow(&mut self, ctx: &Self::Context, new_capacity: u64, live_bytes: u64) -> Result<()>;
}

/// Device-local buffer plus staging buffer, owned by the deletion queue.
pub struct DeviceStorage {
    device: ResourceHandle,
    staging: ResourceHandle,
    device_buffer: vk::Buffer,
    usage: vk::BufferUsageFlags,
    name: String,
}

impl DeviceStorage {
    /// Allocate both buffers and register them for teardown.
    pub fn new(
        ctx: &DeviceContext,
        capacity: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self> {
        let usage = usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;

        let device_buffer = allocate_device(ctx, capacity, usage, name)?;
        let device_handle = device_buffer.buffer;
        let device = ctx.push_resource(OwnedResource::Buffer(device_buffer));

        let staging_buffer = allocate_staging(ctx, capacity, name)?;
        let staging = ctx.push_resource(OwnedResource::Buffer(staging_buffer));

        Ok(Self {
            device,
            staging,
            device_buffer: device_handle,
            usage,
            name: name.to_string(),
        })
    }

    /// Handle of the current device buffer.
    pub const fn buffer(&self) -> vk::Buffer {
        self.device_buffer
    }
}

fn allocate_device(
    ctx: &DeviceContext,
    capacity: u64,
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    ctx.allocator()
        .lock()
        .create_buffer(capacity, usage, MemoryLocation::GpuOnly, name)
}

fn allocate_staging(ctx: &DeviceContext, capacity: u64, name: &str) -> Result<GpuBuffer> {
    ctx.allocator().lock().create_buffer(
        capacity,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        &format!("{name} staging"),
    )
}

/// Allocate two resources, handing the first to `release` if the second fails.
fn allocate_pair<T>(
    first: impl FnOnce() -> Result<T>,
    second: impl FnOnce() -> Result<T>,
    release: impl FnOnce(T),
) -> Result<(T, T)> {
    let first = first()?;
    match second() {
        Ok(second) => Ok((first, second)),
        Err(e) => {
            release(first);
            Err(e)
        }
    }
}

impl BufferStorage for DeviceStorage {
    type Context = DeviceContext;

    fn stage(&mut self, ctx: &DeviceContext, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let staging_buffer = {
            let queue = ctx.deletion_queue();
            let staging = queue
                .get(self.staging)
                .and_then(OwnedResource::as_buffer)
                .ok_or_else(|| GpuError::ResourceNotFound(format!("{} staging", self.name)))?;
            staging.write_bytes(offset, data)?;
            staging.buffer
        };

        let region = vk::BufferCopy {
            src_offset: offset,
            dst_offset: offset,
            size: data.len() as u64,
        };
        ctx.record_copy(staging_buffer, self.device_buffer, region)
    }

    fn grow(&mut self, ctx: &DeviceContext, new_capacity: u64, live_bytes: u64) -> Result<()> {
        // Queued staging copies still target the old buffer
        ctx.flush_transfers()?;

        let (new_device, new_staging) = allocate_pair(
            || allocate_device(ctx, new_capacity, self.usage, &self.name),
            || allocate_staging(ctx, new_capacity, &self.name),
            |mut orphan| {
                if let Err(e) = ctx.allocator().lock().free_buffer(&mut orphan) {
                    tracing::error!("Failed to free {} after staging allocation failed: {e}", self.name);
                }
            },
        )?;
        let new_device_handle = new_device.buffer;

        let (old_device, old_staging) = {
            let mut queue = ctx.deletion_queue();
            let old_device = queue.replace(self.device, OwnedResource::Buffer(new_device))?;
            let old_staging = queue.replace(self.staging, OwnedResource::Buffer(new_staging))?;
            (old_device, old_staging)
        };
        let old_device_handle = self.device_buffer;
        self.device_buffer = new_device_handle;

        let copied = if live_bytes > 0 {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: live_bytes,
            };
            ctx.execute_single_time(|device, cmd| {
                // SAFETY: Both buffers are live until the wait below
                unsafe { device.cmd_copy_buffer(cmd, old_device_handle, new_device_handle, &[region]) };
                Ok(())
            })
        } else {
            Ok(())
        };

        // In-flight frames may still read the outgoing buffer
        let idle = ctx.wait_idle();

        let mut freed = Ok(());
        for old in [old_device, old_staging] {
            if let OwnedResource::Buffer(mut buffer) = old {
                let result = ctx.allocator().lock().free_buffer(&mut buffer);
                if freed.is_ok() {
                    freed = result;
                }
            }
        }

        copied?;
        idle?;
        freed?;

        tracing::info!("Grew {} to {} bytes ({} live)", self.name, new_capacity, live_bytes);
        Ok(())
    }
}

/// A device buffer with a used prefix that can be updated in place or appended to.
pub struct DynamicBuffer<S: BufferStorage = DeviceStorage> {
    storage: S,
    capacity: u64,
    used_size: u64,
    generation: u64,
}

impl DynamicBuffer<DeviceStorage> {
    /// Create a device buffer and staging buffer of `capacity` bytes.
    pub fn new(
        ctx: &DeviceContext,
        capacity: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(GpuError::InvalidState(format!(
                "{name}: dynamic buffer capacity must be non-zero"
            )));
        }

        let storage = DeviceStorage::new(ctx, capacity, usage, name)?;
        Ok(Self::with_storage(storage, capacity))
    }

    /// Handle of the current device buffer. Changes when the buffer grows.
    pub const fn buffer(&self) -> vk::Buffer {
        self.storage.buffer()
    }
}

impl<S: BufferStorage> DynamicBuffer<S> {
    /// Wrap existing storage of `capacity` bytes with nothing used yet.
    pub const fn with_storage(storage: S, capacity: u64) -> Self {
        Self {
            storage,
            capacity,
            used_size: 0,
            generation: 0,
        }
    }

    /// Total bytes available without growing.
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes claimed by appends and reservations.
    pub const fn used_size(&self) -> u64 {
        self.used_size
    }

    /// Incremented every time the device buffer is replaced.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The backing storage.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Overwrite `data.len()` bytes at `offset`.
    ///
    /// Fails without writing anything when `offset + data.len()` exceeds the
    /// capacity. The copy to device memory is queued, not submitted.
    pub fn update_range(&mut self, ctx: &S::Context, offset: u64, data: &[u8]) -> Result<()> {
        let length = data.len() as u64;
        match offset.checked_add(length) {
            Some(end) if end <= self.capacity => self.storage.stage(ctx, offset, data),
            _ => Err(GpuError::OutOfBounds {
                offset,
                length,
                capacity: self.capacity,
            }),
        }
    }

    /// Write `data` after the used prefix, growing first if it does not fit.
    ///
    /// Returns the offset the data was written at.
    pub fn append_data(&mut self, ctx: &S::Context, data: &[u8]) -> Result<u64> {
        let offset = self.used_size;
        let required = self.required_size(data.len() as u64)?;
        self.ensure_capacity(ctx, required)?;

        self.update_range(ctx, offset, data)?;
        self.used_size = required;
        Ok(offset)
    }

    /// Claim `length` bytes after the used prefix without writing them.
    ///
    /// Returns the offset of the claimed range.
    pub fn reserve(&mut self, ctx: &S::Context, length: u64) -> Result<u64> {
        let offset = self.used_size;
        let required = self.required_size(length)?;
        self.ensure_capacity(ctx, required)?;

        self.used_size = required;
        Ok(offset)
    }

    /// Give back everything past `len` bytes of the used prefix.
    ///
    /// Undoes appends or reservations that a caller could not complete. The
    /// bytes stay in place until overwritten; capacity is unchanged.
    pub fn truncate(&mut self, len: u64) {
        self.used_size = self.used_size.min(len);
    }

    /// Grow so that at least `required` bytes fit. Returns whether it grew.
    ///
    /// Capacity at least doubles on growth; bytes in the used prefix are kept.
    pub fn ensure_capacity(&mut self, ctx: &S::Context, required: u64) -> Result<bool> {
        if required <= self.capacity {
            return Ok(false);
        }

        let new_capacity = required.max(self.capacity.saturating_mul(2));
        self.storage.grow(ctx, new_capacity, self.used_size)?;
        self.capacity = new_capacity;
        self.generation += 1;
        Ok(true)
    }

    fn required_size(&self, length: u64) -> Result<u64> {
        self.used_size
            .checked_add(length)
            .ok_or(GpuError::OutOfBounds {
                offset: self.used_size,
                length,
                capacity: self.capacity,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Host-memory stand-in for device + staging buffers. Copies stay
    /// pending until flushed, like the real transfer batch.
    #[derive(Default)]
    struct HostStorage {
        device: Vec<u8>,
        staging: Vec<u8>,
        pending: Vec<(u64, u64)>,
        staged_writes: usize,
        grows: usize,
    }

    impl HostStorage {
        fn with_capacity(capacity: u64) -> Self {
            Self {
                device: vec![0; capacity as usize],
                staging: vec![0; capacity as usize],
                ..Self::default()
            }
        }

        fn flush(&mut self) {
            for (offset, size) in self.pending.drain(..) {
                let range = offset as usize..(offset + size) as usize;
                self.device[range.clone()].copy_from_slice(&self.staging[range]);
            }
        }
    }

    impl BufferStorage for HostStorage {
        type Context = ();

        fn stage(&mut self, _ctx: &(), offset: u64, data: &[u8]) -> Result<()> {
            let start = offset as usize;
            self.staging[start..start + data.len()].copy_from_slice(data);
            self.pending.push((offset, data.len() as u64));
            self.staged_writes += 1;
            Ok(())
        }

        fn grow(&mut self, _ctx: &(), new_capacity: u64, live_bytes: u64) -> Result<()> {
            self.flush();
            let mut device = vec![0; new_capacity as usize];
            device[..live_bytes as usize].copy_from_slice(&self.device[..live_bytes as usize]);
            self.device = device;
            self.staging = vec![0; new_capacity as usize];
            self.grows += 1;
            Ok(())
        }
    }

    fn host_buffer(capacity: u64) -> DynamicBuffer<HostStorage> {
        DynamicBuffer::with_storage(HostStorage::with_capacity(capacity), capacity)
    }

    #[test]
    fn update_past_capacity_fails_without_writing() {
        let mut buffer = host_buffer(16);

        let err = buffer.update_range(&(), 15, &[1, 2]).unwrap_err();

        assert!(matches!(
            err,
            GpuError::OutOfBounds {
                offset: 15,
                length: 2,
                capacity: 16
            }
        ));
        assert_eq!(buffer.storage().staged_writes, 0);
        assert!(buffer.storage().staging.iter().all(|&b| b == 0));
    }

    #[test]
    fn update_with_overflowing_offset_fails() {
        let mut buffer = host_buffer(16);
        assert!(buffer.update_range(&(), u64::MAX, &[1]).is_err());
        assert_eq!(buffer.storage().staged_writes, 0);
    }

    #[test]
    fn update_ending_at_capacity_succeeds() {
        let mut buffer = host_buffer(16);
        buffer.update_range(&(), 14, &[7, 8]).unwrap();
        assert_eq!(buffer.used_size(), 0);
        assert_eq!(&buffer.storage().staging[14..], &[7, 8]);
    }

    #[test]
    fn append_advances_used_size() {
        let mut buffer = host_buffer(16);
        assert_eq!(buffer.append_data(&(), &[1, 2, 3]).unwrap(), 0);
        assert_eq!(buffer.append_data(&(), &[4, 5]).unwrap(), 3);
        assert_eq!(buffer.used_size(), 5);
        assert_eq!(buffer.generation(), 0);
    }

    #[test]
    fn growth_preserves_bytes_written_before_it() {
        let mut buffer = host_buffer(8);
        let first: Vec<u8> = (1..=6).collect();
        let second: Vec<u8> = (7..=12).collect();

        buffer.append_data(&(), &first).unwrap();
        // Left pending on purpose: growth must carry it over
        buffer.append_data(&(), &second).unwrap();

        assert_eq!(buffer.storage().grows, 1);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.generation(), 1);

        let mut storage = buffer.storage;
        storage.flush();
        let expected: Vec<u8> = (1..=12).collect();
        assert_eq!(&storage.device[..12], expected.as_slice());
    }

    #[test]
    fn growth_takes_required_size_when_larger_than_double() {
        let mut buffer = host_buffer(4);
        buffer.append_data(&(), &[0; 40]).unwrap();
        assert_eq!(buffer.capacity(), 40);
        assert_eq!(buffer.used_size(), 40);
    }

    #[test]
    fn reserve_claims_without_writing() {
        let mut buffer = host_buffer(8);
        assert_eq!(buffer.reserve(&(), 4).unwrap(), 0);
        assert_eq!(buffer.reserve(&(), 4).unwrap(), 4);
        assert_eq!(buffer.reserve(&(), 4).unwrap(), 8);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.storage().staged_writes, 0);
    }

    #[test]
    fn truncate_rolls_back_an_append() {
        let mut buffer = host_buffer(16);
        buffer.append_data(&(), &[1, 2, 3, 4]).unwrap();
        let mark = buffer.used_size();
        buffer.append_data(&(), &[5, 6]).unwrap();

        buffer.truncate(mark);
        assert_eq!(buffer.used_size(), 4);
        assert_eq!(buffer.append_data(&(), &[9]).unwrap(), 4);

        // Never extends the used prefix
        buffer.truncate(100);
        assert_eq!(buffer.used_size(), 5);
    }

    #[test]
    fn failed_second_allocation_releases_the_first() {
        let released = std::cell::Cell::new(None);
        let result = allocate_pair(
            || Ok(7u32),
            || Err(GpuError::AllocationFailed("staging".into())),
            |orphan| released.set(Some(orphan)),
        );

        assert!(matches!(result, Err(GpuError::AllocationFailed(_))));
        assert_eq!(released.get(), Some(7));
    }

    #[test]
    fn failed_first_allocation_skips_the_second() {
        let mut second_ran = false;
        let result: Result<(u32, u32)> = allocate_pair(
            || Err(GpuError::AllocationFailed("device".into())),
            || {
                second_ran = true;
                Ok(1)
            },
            |_| panic!("nothing to release"),
        );

        assert!(result.is_err());
        assert!(!second_ran);
    }

    #[test]
    fn successful_pair_releases_nothing() {
        let pair = allocate_pair(|| Ok(1u32), || Ok(2u32), |_| panic!("nothing to release")).unwrap();
        assert_eq!(pair, (1, 2));
    }

    #[test]
    fn ensure_capacity_is_noop_when_it_fits() {
        let mut buffer = host_buffer(8);
        assert!(!buffer.ensure_capacity(&(), 8).unwrap());
        assert!(buffer.ensure_capacity(&(), 9).unwrap());
        assert_eq!(buffer.capacity(), 16);
    }
}
