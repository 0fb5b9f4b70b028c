//! Device memory.
//!
//! Global memory is a slice of 64-bit atomic words shared between the host handle
//! ([`DeviceBuffer`]) and the kernels ([`DevicePtr`]). Plain loads and stores are relaxed, which
//! is enough for kernels whose threads write disjoint cells within a launch; concurrent
//! read-modify-write of one cell must go through [`DevicePtr::atomic_add`].

use crate::{error::DeviceFault, utils::HarpFloat};

use std::{
    fmt,
    marker::PhantomData,
    mem::size_of,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

/// Allocation bookkeeping shared by a device and its buffers.
#[derive(Debug, Default)]
pub(crate) struct MemoryUsage {
    pub(crate) bytes: AtomicUsize,
    pub(crate) live: AtomicUsize,
}

/// Kernel-side view of a device buffer.
pub struct DevicePtr<T> {
    cells: Arc<[AtomicU64]>,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for DevicePtr<T> {
    fn clone(&self) -> Self {
        Self {
            cells: Arc::clone(&self.cells),
            _ty: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DevicePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:p}, len={})", self.cells.as_ptr(), self.cells.len())
    }
}

impl<T: HarpFloat> DevicePtr<T> {
    fn cell(&self, index: usize) -> Result<&AtomicU64, DeviceFault> {
        self.cells.get(index).ok_or(DeviceFault::IllegalAddress {
            index,
            len: self.cells.len(),
        })
    }

    pub fn load(&self, index: usize) -> Result<T, DeviceFault> {
        Ok(T::from_word(self.cell(index)?.load(Ordering::Relaxed)))
    }

    pub fn store(&self, index: usize, value: T) -> Result<(), DeviceFault> {
        self.cell(index)?.store(value.to_word(), Ordering::Relaxed);
        Ok(())
    }

    /// Atomically adds `value` to the cell at `index` and returns the previous value.
    ///
    /// Floating-point atomic add is a compare-and-swap loop on the cell's bit pattern.
    pub fn atomic_add(&self, index: usize, value: T) -> Result<T, DeviceFault> {
        let prev = self
            .cell(index)?
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some((T::from_word(word) + value).to_word())
            });
        let word = match prev {
            Ok(word) | Err(word) => word,
        };
        Ok(T::from_word(word))
    }
}

/// Host handle owning a device allocation.
///
/// The allocation is released when the handle is passed to
/// [`Device::dealloc_data`](super::Device::dealloc_data) or dropped; ownership makes a released
/// buffer impossible to reuse.
pub struct DeviceBuffer<T> {
    ptr: DevicePtr<T>,
    usage: Arc<MemoryUsage>,
}

impl<T: HarpFloat> DeviceBuffer<T> {
    pub(crate) fn zeroed(len: usize, usage: Arc<MemoryUsage>) -> Self {
        let zero = T::zero().to_word();
        let cells: Arc<[AtomicU64]> = (0..len).map(|_| AtomicU64::new(zero)).collect();
        usage.bytes.fetch_add(Self::bytes_for(len), Ordering::Relaxed);
        usage.live.fetch_add(1, Ordering::Relaxed);
        Self {
            ptr: DevicePtr {
                cells,
                _ty: PhantomData,
            },
            usage,
        }
    }

    /// Size in bytes accounted for `len` elements of `T`.
    pub(crate) fn bytes_for(len: usize) -> usize {
        len * size_of::<T>()
    }

    /// Kernel-side pointer to this buffer.
    pub fn as_device_ptr(&self) -> DevicePtr<T> {
        self.ptr.clone()
    }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        let bytes = self.ptr.cells.len() * size_of::<T>();
        self.usage.bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.usage.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    fn buffer(len: usize) -> DeviceBuffer<f64> {
        DeviceBuffer::zeroed(len, Arc::new(MemoryUsage::default()))
    }

    #[test]
    fn out_of_bounds_access_faults() {
        let buf = buffer(4);
        let ptr = buf.as_device_ptr();
        assert_eq!(ptr.load(3), Ok(0.0));
        assert_eq!(
            ptr.store(4, 1.0),
            Err(DeviceFault::IllegalAddress { index: 4, len: 4 })
        );
        assert!(ptr.atomic_add(17, 1.0).is_err());
    }

    #[test]
    fn concurrent_atomic_adds_are_not_lost() {
        let buf = buffer(1);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ptr = buf.as_device_ptr();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        ptr.atomic_add(0, 1.0).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.as_device_ptr().load(0), Ok(8000.0));
    }

    #[test]
    fn dropping_releases_the_allocation() {
        let usage = Arc::new(MemoryUsage::default());
        let buf = DeviceBuffer::<f32>::zeroed(10, Arc::clone(&usage));
        assert_eq!(usage.bytes.load(Ordering::Relaxed), 40);
        assert_eq!(usage.live.load(Ordering::Relaxed), 1);
        drop(buf);
        assert_eq!(usage.bytes.load(Ordering::Relaxed), 0);
        assert_eq!(usage.live.load(Ordering::Relaxed), 0);
    }
}
