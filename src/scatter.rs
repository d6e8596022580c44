//! Atomic scatter-add of cell-local tensors into a shared global vector.
use crate::error::LaunchError;
use crate::gather::CellTensor;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Floating-point scalars with a lock-free atomic addition.
///
/// # Safety
///
/// `Self::Atomic` must have the same size as `Self`, and it must be sound to reinterpret a
/// suitably aligned `&mut [Self]` as `&[Self::Atomic]` for the lifetime of the borrow.
pub unsafe trait AtomicScalar: Copy + Send + Sync + 'static {
    type Atomic: Send + Sync;

    /// Adds `value` to `target` as a single linearizable read-modify-write.
    fn atomic_add(target: &Self::Atomic, value: Self);

    fn atomic_load(target: &Self::Atomic) -> Self;
}

unsafe impl AtomicScalar for f64 {
    type Atomic = AtomicU64;

    #[inline]
    fn atomic_add(target: &AtomicU64, value: f64) {
        let mut current = target.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(current) + value).to_bits();
            match target.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn atomic_load(target: &AtomicU64) -> f64 {
        f64::from_bits(target.load(Ordering::Relaxed))
    }
}

unsafe impl AtomicScalar for f32 {
    type Atomic = AtomicU32;

    #[inline]
    fn atomic_add(target: &AtomicU32, value: f32) {
        let mut current = target.load(Ordering::Relaxed);
        loop {
            let new = (f32::from_bits(current) + value).to_bits();
            match target.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn atomic_load(target: &AtomicU32) -> f32 {
        f32::from_bits(target.load(Ordering::Relaxed))
    }
}

/// A mutable slice that many threads may add into concurrently.
///
/// Every element is only ever touched through [`AtomicScalar::atomic_add`], so concurrent
/// additions to the same index are race-free. The exclusive borrow of the underlying slice
/// guarantees that nobody reads the values non-atomically while the view is alive.
#[derive(Debug)]
pub struct AtomicSlice<'a, T: AtomicScalar> {
    data: &'a [T::Atomic],
}

impl<'a, T: AtomicScalar> AtomicSlice<'a, T> {
    pub fn from_mut_slice(slice: &'a mut [T]) -> Result<Self, LaunchError> {
        assert_eq!(size_of::<T>(), size_of::<T::Atomic>());
        if slice.as_ptr() as usize % align_of::<T::Atomic>() != 0 {
            return Err(LaunchError::MisalignedOutput);
        }
        let len = slice.len();
        let ptr = slice.as_mut_ptr() as *const T::Atomic;
        // SAFETY: size and alignment match, and the exclusive borrow of `slice` is held for 'a,
        // so all accesses during 'a go through the atomic type.
        let data = unsafe { std::slice::from_raw_parts(ptr, len) };
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn add(&self, index: usize, value: T) {
        T::atomic_add(&self.data[index], value);
    }

    pub fn load(&self, index: usize) -> T {
        T::atomic_load(&self.data[index])
    }
}

/// Adds the local tensor of `cell` into `output` at the indices given by the field dofmap.
#[inline]
pub fn scatter_add<T: AtomicScalar, const P: usize>(
    output: &AtomicSlice<T>,
    dofmap: &[usize],
    cell: usize,
    local: &CellTensor<T, P>,
) {
    let n = P * P * P;
    let cell_dofs = &dofmap[n * cell..n * (cell + 1)];
    for (&dof, &value) in cell_dofs.iter().zip(local.iter().flatten().flatten()) {
        output.add(dof, value);
    }
}
