//! Purpose: Owned byte arena with bounds-checked plain, ordered and atomic access at byte offsets.
//! Exports: `AtomicBuffer`, `CACHE_LINE_LENGTH`.
//! Role: The single place that touches raw memory; every other module goes through these methods.
//! Invariants: Multi-byte values are little-endian on every host, including atomic words.
//! Invariants: Out-of-range or misaligned access panics like slice indexing; it never reads past the arena.
//! Invariants: Views share one region through `Arc`; the region outlives every view.
use std::alloc::{self, Layout};
use std::fs::File;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use memmap2::MmapMut;

use crate::core::error::{Error, ErrorKind};

pub const CACHE_LINE_LENGTH: usize = 64;

enum Backing {
    Heap(Layout),
    Mapped(MmapMut),
}

struct Region {
    base: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// The region is only reached through `AtomicBuffer`, whose methods use atomics for
// shared words and rely on the claim protocol for disjoint plain writes.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Drop for Region {
    fn drop(&mut self) {
        if let Backing::Heap(layout) = self.backing {
            unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}

#[derive(Clone)]
pub struct AtomicBuffer {
    region: Arc<Region>,
    offset: usize,
    capacity: usize,
}

impl AtomicBuffer {
    /// Allocates a zeroed, cache-line aligned heap arena.
    pub fn allocate(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("buffer capacity must be non-zero"));
        }
        let layout = Layout::from_size_align(capacity, CACHE_LINE_LENGTH).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("buffer capacity exceeds address space")
                .with_source(err)
        })?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Ok(Self::from_region(Region {
            base,
            len: capacity,
            backing: Backing::Heap(layout),
        }))
    }

    /// Maps `file` read-write; the whole file becomes the arena.
    pub fn map_file(file: &File) -> Result<Self, Error> {
        let mut mmap = unsafe {
            MmapMut::map_mut(file)
                .map_err(|err| Error::new(ErrorKind::Io).with_message("mmap failed").with_source(err))?
        };
        let len = mmap.len();
        let Some(base) = NonNull::new(mmap.as_mut_ptr()) else {
            return Err(Error::new(ErrorKind::Io).with_message("mmap returned a null mapping"));
        };
        if len == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("cannot map an empty file"));
        }
        Ok(Self::from_region(Region {
            base,
            len,
            backing: Backing::Mapped(mmap),
        }))
    }

    fn from_region(region: Region) -> Self {
        let capacity = region.len;
        Self {
            region: Arc::new(region),
            offset: 0,
            capacity,
        }
    }

    /// A sub-range sharing the same memory. `offset` must keep 8-byte alignment.
    pub fn view(&self, offset: usize, length: usize) -> Result<Self, Error> {
        let end = offset.checked_add(length);
        if end.is_none_or(|end| end > self.capacity) || length == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "view {offset}+{length} outside buffer of {} bytes",
                    self.capacity
                ))
                .with_offset(offset as u64));
        }
        if offset % 8 != 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("view offset must be 8-byte aligned")
                .with_offset(offset as u64));
        }
        Ok(Self {
            region: Arc::clone(&self.region),
            offset: self.offset + offset,
            capacity: length,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.region.backing, Backing::Mapped(_))
    }

    /// Flushes the backing mapping to its file; a no-op for heap arenas.
    pub fn flush(&self) -> Result<(), Error> {
        match &self.region.backing {
            Backing::Heap(_) => Ok(()),
            Backing::Mapped(mmap) => mmap.flush().map_err(|err| {
                Error::new(ErrorKind::Io).with_message("msync failed").with_source(err)
            }),
        }
    }

    #[inline]
    fn bounds_check(&self, index: usize, length: usize) {
        let in_range = index
            .checked_add(length)
            .is_some_and(|end| end <= self.capacity);
        assert!(
            in_range,
            "access {index}+{length} out of bounds for buffer of {} bytes",
            self.capacity
        );
    }

    #[inline]
    fn ptr_at(&self, index: usize) -> *mut u8 {
        // Bounds are checked by every caller before the pointer is formed.
        unsafe { self.region.base.as_ptr().add(self.offset + index) }
    }

    #[inline]
    fn atomic_i32(&self, index: usize) -> &AtomicI32 {
        self.bounds_check(index, 4);
        let ptr = self.ptr_at(index);
        assert!(ptr as usize % 4 == 0, "atomic i32 access at unaligned offset {index}");
        unsafe { AtomicI32::from_ptr(ptr.cast()) }
    }

    #[inline]
    fn atomic_i64(&self, index: usize) -> &AtomicI64 {
        self.bounds_check(index, 8);
        let ptr = self.ptr_at(index);
        assert!(ptr as usize % 8 == 0, "atomic i64 access at unaligned offset {index}");
        unsafe { AtomicI64::from_ptr(ptr.cast()) }
    }

    fn read_array<const N: usize>(&self, index: usize) -> [u8; N] {
        self.bounds_check(index, N);
        unsafe { ptr::read_unaligned(self.ptr_at(index).cast::<[u8; N]>()) }
    }

    fn write_array<const N: usize>(&self, index: usize, bytes: [u8; N]) {
        self.bounds_check(index, N);
        unsafe { ptr::write_unaligned(self.ptr_at(index).cast::<[u8; N]>(), bytes) };
    }

    pub fn get_u8(&self, index: usize) -> u8 {
        self.read_array::<1>(index)[0]
    }

    pub fn put_u8(&self, index: usize, value: u8) {
        self.write_array(index, [value]);
    }

    pub fn get_u16(&self, index: usize) -> u16 {
        u16::from_le_bytes(self.read_array(index))
    }

    pub fn put_u16(&self, index: usize, value: u16) {
        self.write_array(index, value.to_le_bytes());
    }

    pub fn get_i32(&self, index: usize) -> i32 {
        i32::from_le_bytes(self.read_array(index))
    }

    pub fn put_i32(&self, index: usize, value: i32) {
        self.write_array(index, value.to_le_bytes());
    }

    pub fn get_i64(&self, index: usize) -> i64 {
        i64::from_le_bytes(self.read_array(index))
    }

    pub fn put_i64(&self, index: usize, value: i64) {
        self.write_array(index, value.to_le_bytes());
    }

    /// Acquire load.
    pub fn get_i32_volatile(&self, index: usize) -> i32 {
        i32::from_le(self.atomic_i32(index).load(Ordering::Acquire))
    }

    /// Release store.
    pub fn put_i32_ordered(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value.to_le(), Ordering::Release);
    }

    /// Relaxed store, for words whose publication happens through a later release store.
    pub fn put_i32_relaxed(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value.to_le(), Ordering::Relaxed);
    }

    pub fn get_i64_volatile(&self, index: usize) -> i64 {
        i64::from_le(self.atomic_i64(index).load(Ordering::Acquire))
    }

    pub fn put_i64_ordered(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value.to_le(), Ordering::Release);
    }

    pub fn compare_and_set_i32(&self, index: usize, expected: i32, update: i32) -> bool {
        self.atomic_i32(index)
            .compare_exchange(
                expected.to_le(),
                update.to_le(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Atomically adds `delta` and returns the previous value.
    #[cfg(target_endian = "little")]
    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        self.atomic_i64(index).fetch_add(delta, Ordering::AcqRel)
    }

    /// Atomically adds `delta` and returns the previous value.
    #[cfg(target_endian = "big")]
    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        let previous = self
            .atomic_i64(index)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |stored| {
                Some(i64::from_le(stored).wrapping_add(delta).to_le())
            })
            .unwrap_or_else(|stored| stored);
        i64::from_le(previous)
    }

    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        self.bounds_check(index, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.ptr_at(index), src.len()) };
    }

    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        self.bounds_check(index, dst.len());
        unsafe { ptr::copy_nonoverlapping(self.ptr_at(index), dst.as_mut_ptr(), dst.len()) };
    }

    pub fn to_vec(&self, index: usize, length: usize) -> Vec<u8> {
        let mut out = vec![0u8; length];
        self.get_bytes(index, &mut out);
        out
    }

    pub fn set_memory(&self, index: usize, length: usize, value: u8) {
        self.bounds_check(index, length);
        unsafe { ptr::write_bytes(self.ptr_at(index), value, length) };
    }
}

impl std::fmt::Debug for AtomicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("offset", &self.offset)
            .field("capacity", &self.capacity)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
