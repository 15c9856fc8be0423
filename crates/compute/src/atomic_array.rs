use std::{
    fmt::Debug,
    mem::size_of,
    sync::atomic::{AtomicI64, Ordering},
};

use rayon::prelude::*;

use crate::Error;

/// Number of bits of an index that address a slot within a page.
pub const PAGE_SHIFT: u32 = 14;
/// Number of slots in a single page.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// A fixed-size array of 64-bit integers that can be read and written
/// concurrently from many threads.
///
/// The array is split into pages of [`PAGE_SIZE`] slots which are allocated
/// separately, so the total size is not limited by the largest contiguous
/// allocation the platform supports. Only the last page may be shorter.
///
/// Every operation is atomic for a single index. There is no ordering
/// guarantee between operations on different indices.
pub struct AtomicLongArray {
    pages: Box<[Box<[AtomicI64]>]>,
    size: u64,
}

impl AtomicLongArray {
    /// Creates an array of `size` slots that are initialized with `0`.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let array = AtomicLongArray::new(42);
    /// assert_eq!(array.size(), 42);
    /// assert_eq!(array.get(41), 0);
    /// ```
    pub fn new(size: u64) -> Self {
        Self::with_generator(size, |_| 0)
    }

    /// Creates an array of `size` slots where slot `i` is initialized with
    /// `generator(i)`.
    ///
    /// The pages are filled in parallel on the current rayon thread pool
    /// before this function returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let array = AtomicLongArray::with_generator(4, |i| i as i64 * 2);
    /// assert_eq!(array.to_vec(), vec![0, 2, 4, 6]);
    /// ```
    pub fn with_generator<F>(size: u64, generator: F) -> Self
    where
        F: Fn(u64) -> i64 + Send + Sync,
    {
        let page_count = page_count(size);
        let mut pages = Vec::with_capacity(page_count);

        (0..page_count)
            .into_par_iter()
            .map(|page_index| {
                let start = (page_index as u64) << PAGE_SHIFT;
                let end = u64::min(start + PAGE_SIZE as u64, size);
                (start..end)
                    .map(|index| AtomicI64::new(generator(index)))
                    .collect::<Box<[_]>>()
            })
            .collect_into_vec(&mut pages);

        Self {
            pages: pages.into_boxed_slice(),
            size,
        }
    }

    /// Returns the number of slots in the array.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of pages backing the array.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns the value at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not smaller than the size of the array.
    pub fn get(&self, index: u64) -> i64 {
        self.slot(index).load(Ordering::SeqCst)
    }

    /// Returns the value at `index` or an error if `index` is out of range.
    pub fn try_get(&self, index: u64) -> Result<i64, Error> {
        Ok(self.try_slot(index)?.load(Ordering::SeqCst))
    }

    /// Stores `value` at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not smaller than the size of the array.
    pub fn set(&self, index: u64, value: i64) {
        self.slot(index).store(value, Ordering::SeqCst)
    }

    /// Stores `value` at `index` or returns an error if `index` is out of range.
    pub fn try_set(&self, index: u64, value: i64) -> Result<(), Error> {
        self.try_slot(index)?.store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Stores `update` at `index` if the current value equals `expected`.
    ///
    /// Returns `true` if the value was updated.
    pub fn compare_and_set(&self, index: u64, expected: i64, update: i64) -> bool {
        self.slot(index)
            .compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Stores `update` at `index` if the current value equals `expected`.
    ///
    /// Returns the value that was witnessed at `index` before the operation.
    /// The update happened if and only if the returned value equals
    /// `expected`.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let array = AtomicLongArray::new(1);
    /// assert_eq!(array.compare_and_exchange(0, 0, 42), 0);
    /// assert_eq!(array.compare_and_exchange(0, 0, 1337), 42);
    /// assert_eq!(array.get(0), 42);
    /// ```
    pub fn compare_and_exchange(&self, index: u64, expected: i64, update: i64) -> i64 {
        match self.slot(index).compare_exchange(
            expected,
            update,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(witness) | Err(witness) => witness,
        }
    }

    /// Adds `delta` to the value at `index` and returns the previous value.
    pub fn get_and_add(&self, index: u64, delta: i64) -> i64 {
        self.slot(index).fetch_add(delta, Ordering::SeqCst)
    }

    /// Replaces the value at `index` with `f(value)` and returns the new value.
    ///
    /// `f` may be called more than once if other threads modify the same
    /// index concurrently.
    pub fn update<F>(&self, index: u64, f: F) -> i64
    where
        F: Fn(i64) -> i64,
    {
        let slot = self.slot(index);
        let mut current = slot.load(Ordering::SeqCst);
        loop {
            let next = f(current);
            match slot.compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(witness) => current = witness,
            }
        }
    }

    /// Copies the current values into a vector.
    pub fn to_vec(&self) -> Vec<i64> {
        self.pages
            .par_iter()
            .flat_map_iter(|page| page.iter().map(|value| value.load(Ordering::SeqCst)))
            .collect()
    }

    /// Returns the number of bytes occupied by this array.
    pub fn size_of(&self) -> u64 {
        Self::memory_estimation(self.size)
    }

    /// Returns the exact number of bytes an array of `size` slots occupies.
    ///
    /// The estimate consists of the array header, one boxed slice pointer per
    /// page and 8 bytes per slot.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// assert_eq!(AtomicLongArray::memory_estimation(100), 840);
    /// ```
    pub fn memory_estimation(size: u64) -> u64 {
        let header = size_of::<Self>() as u64;
        let page_pointers = page_count(size) as u64 * size_of::<Box<[AtomicI64]>>() as u64;
        let values = size * size_of::<AtomicI64>() as u64;
        header + page_pointers + values
    }

    /// Drops the array and returns the number of bytes that were released.
    pub fn release(self) -> u64 {
        self.size_of()
    }

    fn slot(&self, index: u64) -> &AtomicI64 {
        match self.try_slot(index) {
            Ok(slot) => slot,
            Err(e) => panic!("{e}"),
        }
    }

    fn try_slot(&self, index: u64) -> Result<&AtomicI64, Error> {
        if index >= self.size {
            return Err(Error::IndexOutOfRange {
                index,
                size: self.size,
            });
        }

        let page = (index >> PAGE_SHIFT) as usize;
        let offset = (index & PAGE_MASK) as usize;
        Ok(&self.pages[page][offset])
    }
}

impl Debug for AtomicLongArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicLongArray")
            .field("size", &self.size)
            .field("pages", &self.pages.len())
            .finish()
    }
}

fn page_count(size: u64) -> usize {
    ((size + PAGE_MASK) >> PAGE_SHIFT) as usize
}
