//! Tensor memory and scoped access to it.
//!
//! Host memory is an owned byte vector and is always accessible. Remote
//! memory lives behind a [`RemoteMemory`] backend and is only accessible
//! while mapped. [`ReadLock`] and [`WriteLock`] map on creation and unmap
//! when dropped, so every mapping taken during a transfer is released on
//! every exit path.

use crate::error::{Result, RuntimeError};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Requested access for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Device memory backend.
///
/// Implementations report a region they cannot map right now with
/// [`RuntimeError::AlreadyMapped`]. A null pointer is treated as a failed
/// mapping: callers release it with `unmap` and report
/// [`RuntimeError::NullBuffer`].
///
/// # Safety
///
/// [`ReadLock`] and [`WriteLock`] turn the pointer returned by `map` into a
/// byte slice, so implementations must uphold:
///
/// - A non-null pointer returned by `map` is valid for reads (and for writes
///   under [`AccessMode::Write`]) of `len()` bytes until the matching
///   `unmap`.
/// - `len()` does not change while a mapping is live.
/// - While a `Write` mapping is live, `map` fails for every other request;
///   while a `Read` mapping is live, a `Write` request fails. Nothing else
///   writes the mapped bytes during that time.
///
/// A backend that returns an arbitrary pointer needs `unsafe` to say so:
///
/// ```compile_fail
/// use tessera_runtime::{AccessMode, RemoteMemory};
///
/// #[derive(Debug)]
/// struct Dangling;
///
/// impl RemoteMemory for Dangling {
///     fn len(&self) -> usize {
///         1 << 20
///     }
///
///     fn map(&self, _mode: AccessMode) -> tessera_runtime::Result<*mut u8> {
///         Ok(8 as *mut u8)
///     }
///
///     fn unmap(&self) {}
/// }
/// ```
pub unsafe trait RemoteMemory: Send + Sync + fmt::Debug {
    /// Size of the region in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the region accessible from the host.
    fn map(&self, mode: AccessMode) -> Result<*mut u8>;

    /// Release the mapping taken by the last successful `map`.
    fn unmap(&self);
}

/// Storage behind a tensor.
#[derive(Debug, Clone)]
pub enum Memory {
    /// Host-resident bytes.
    Host(Vec<u8>),

    /// Backend-owned memory, shared between tensors that alias it.
    Remote(Arc<dyn RemoteMemory>),
}

impl Memory {
    /// Size of the storage in bytes.
    pub fn len(&self) -> usize {
        match self {
            Memory::Host(bytes) => bytes.len(),
            Memory::Remote(remote) => remote.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Memory::Remote(_))
    }

    /// Read access for the lifetime of the returned lock.
    pub fn lock_read(&self) -> Result<ReadLock<'_>> {
        ReadLock::new(self)
    }

    /// Write access for the lifetime of the returned lock.
    pub fn lock_write(&mut self) -> Result<WriteLock<'_>> {
        WriteLock::new(self)
    }
}

/// Map `remote`, turning a null pointer into an error after releasing it.
fn map_remote(remote: &dyn RemoteMemory, mode: AccessMode) -> Result<*mut u8> {
    let ptr = remote.map(mode)?;
    if ptr.is_null() {
        remote.unmap();
        return Err(RuntimeError::NullBuffer(format!(
            "{mode:?} mapping of {} bytes returned a null pointer",
            remote.len()
        )));
    }
    tracing::trace!(?mode, bytes = remote.len(), "mapped remote memory");
    Ok(ptr)
}

fn unmap_remote(remote: &dyn RemoteMemory) {
    remote.unmap();
    tracing::trace!(bytes = remote.len(), "unmapped remote memory");
}

/// Scoped read access to a [`Memory`].
pub struct ReadLock<'a> {
    ptr: *const u8,
    len: usize,
    remote: Option<&'a dyn RemoteMemory>,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> ReadLock<'a> {
    pub fn new(memory: &'a Memory) -> Result<Self> {
        match memory {
            Memory::Host(bytes) => Ok(Self {
                ptr: bytes.as_ptr(),
                len: bytes.len(),
                remote: None,
                _borrow: PhantomData,
            }),
            Memory::Remote(remote) => {
                let remote: &'a dyn RemoteMemory = &**remote;
                let ptr = map_remote(remote, AccessMode::Read)?;
                Ok(Self {
                    ptr,
                    len: remote.len(),
                    remote: Some(remote),
                    _borrow: PhantomData,
                })
            }
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is either a live host allocation borrowed for 'a, or
        // a non-null mapping of `len` bytes that the `RemoteMemory` contract
        // keeps valid and unwritten until this lock unmaps it in `Drop`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for ReadLock<'_> {
    fn drop(&mut self) {
        if let Some(remote) = self.remote {
            unmap_remote(remote);
        }
    }
}

/// Scoped write access to a [`Memory`].
pub struct WriteLock<'a> {
    ptr: *mut u8,
    len: usize,
    remote: Option<&'a dyn RemoteMemory>,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> WriteLock<'a> {
    pub fn new(memory: &'a mut Memory) -> Result<Self> {
        match memory {
            Memory::Host(bytes) => Ok(Self {
                ptr: bytes.as_mut_ptr(),
                len: bytes.len(),
                remote: None,
                _borrow: PhantomData,
            }),
            Memory::Remote(remote) => {
                let remote: &'a dyn RemoteMemory = &**remote;
                let ptr = map_remote(remote, AccessMode::Write)?;
                Ok(Self {
                    ptr,
                    len: remote.len(),
                    remote: Some(remote),
                    _borrow: PhantomData,
                })
            }
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: see `as_mut_slice`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is either a host allocation mutably borrowed for 'a,
        // or a non-null write mapping of `len` bytes that the `RemoteMemory`
        // contract keeps exclusive to this lock until `Drop`. `&mut self`
        // keeps the returned slice unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for WriteLock<'_> {
    fn drop(&mut self) {
        if let Some(remote) = self.remote {
            unmap_remote(remote);
        }
    }
}

/// Host-resident [`RemoteMemory`] backend.
///
/// Behaves like accelerator memory: contents are reachable only through a
/// mapping, and at most one mapping may be live at a time. Map and unmap
/// calls are counted so callers can check that every mapping was released.
pub struct StagingMemory {
    storage: Mutex<Box<[u8]>>,
    len: usize,
    mapped: AtomicBool,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
}

impl StagingMemory {
    /// Zero-filled region of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_bytes(vec![0u8; len])
    }

    /// Region initialized with `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            len: bytes.len(),
            storage: Mutex::new(bytes.into_boxed_slice()),
            mapped: AtomicBool::new(false),
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
        }
    }

    /// Overwrite the start of the region with `data`.
    pub fn upload(&self, data: &[u8]) -> Result<()> {
        let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_mapped() {
            return Err(RuntimeError::AlreadyMapped);
        }
        if data.len() > storage.len() {
            return Err(RuntimeError::BufferTooSmall {
                needed: data.len(),
                available: storage.len(),
            });
        }
        storage[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy of the whole region.
    pub fn read_back(&self) -> Result<Vec<u8>> {
        let storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_mapped() {
            return Err(RuntimeError::AlreadyMapped);
        }
        Ok(storage.to_vec())
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    /// Successful `map` calls so far.
    pub fn map_count(&self) -> usize {
        self.maps.load(Ordering::Relaxed)
    }

    /// `unmap` calls so far.
    pub fn unmap_count(&self) -> usize {
        self.unmaps.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for StagingMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingMemory")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

// SAFETY: the storage is a boxed slice that never reallocates and `len` is
// fixed at construction. `mapped` admits one mapping at a time, and `upload`
// and `read_back` refuse to touch the storage while it is set.
unsafe impl RemoteMemory for StagingMemory {
    fn len(&self) -> usize {
        self.len
    }

    fn map(&self, _mode: AccessMode) -> Result<*mut u8> {
        // The flag flips under the lock so `upload` and `read_back` never
        // touch the storage while a mapping is live
        let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        if self
            .mapped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::AlreadyMapped);
        }
        self.maps.fetch_add(1, Ordering::Relaxed);

        // The boxed slice never reallocates, so the pointer outlives the guard
        Ok(storage.as_mut_ptr())
    }

    fn unmap(&self) {
        self.unmaps.fetch_add(1, Ordering::Relaxed);
        self.mapped.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_locks_do_not_map() {
        let mut memory = Memory::Host(vec![1, 2, 3]);
        {
            let read = memory.lock_read().unwrap();
            assert_eq!(read.as_slice(), &[1, 2, 3]);
        }
        {
            let mut write = memory.lock_write().unwrap();
            write.as_mut_slice()[0] = 9;
        }
        let Memory::Host(bytes) = memory else {
            panic!("expected host memory");
        };
        assert_eq!(bytes, vec![9, 2, 3]);
    }

    #[test]
    fn test_remote_lock_unmaps_on_drop() {
        let staging = Arc::new(StagingMemory::from_bytes(vec![4, 5]));
        let mut memory = Memory::Remote(staging.clone());

        {
            let mut write = memory.lock_write().unwrap();
            assert!(staging.is_mapped());
            write.as_mut_slice()[1] = 7;
        }
        assert!(!staging.is_mapped());

        let read = memory.lock_read().unwrap();
        assert_eq!(read.as_slice(), &[4, 7]);
        drop(read);

        assert_eq!(staging.map_count(), 2);
        assert_eq!(staging.unmap_count(), 2);
        assert_eq!(staging.read_back().unwrap(), vec![4, 7]);
    }

    #[test]
    fn test_staging_rejects_second_mapping() {
        let staging = Arc::new(StagingMemory::new(8));
        let memory = Memory::Remote(staging.clone());

        let first = memory.lock_read().unwrap();
        assert!(matches!(
            memory.lock_read(),
            Err(RuntimeError::AlreadyMapped)
        ));
        assert!(matches!(staging.read_back(), Err(RuntimeError::AlreadyMapped)));
        drop(first);

        assert_eq!(staging.map_count(), 1);
        assert_eq!(staging.unmap_count(), 1);
        assert!(memory.lock_read().is_ok());
    }

    #[test]
    fn test_staging_upload() {
        let staging = StagingMemory::new(4);
        staging.upload(&[1, 2]).unwrap();
        assert_eq!(staging.read_back().unwrap(), vec![1, 2, 0, 0]);

        assert!(matches!(
            staging.upload(&[0; 5]),
            Err(RuntimeError::BufferTooSmall {
                needed: 5,
                available: 4
            })
        ));
    }

    #[derive(Debug, Default)]
    struct NullMemory {
        unmaps: AtomicUsize,
    }

    // SAFETY: never hands out a dereferenceable pointer.
    unsafe impl RemoteMemory for NullMemory {
        fn len(&self) -> usize {
            16
        }

        fn map(&self, _mode: AccessMode) -> Result<*mut u8> {
            Ok(std::ptr::null_mut())
        }

        fn unmap(&self) {
            self.unmaps.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_null_mapping_is_released() {
        let null = Arc::new(NullMemory::default());
        let memory = Memory::Remote(null.clone());

        assert!(matches!(
            memory.lock_read(),
            Err(RuntimeError::NullBuffer(_))
        ));
        assert_eq!(null.unmaps.load(Ordering::Relaxed), 1);
    }
}
