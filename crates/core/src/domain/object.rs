//! Reference-counted native object layer
//!
//! Every graph resource (element, pad, capability set, device) lives in a
//! heap-allocated control block with an atomic reference count, mirroring
//! the lifetime model of a driver-level media object. [`Handle`] is the
//! owning smart pointer over such a block; [`WeakHandle`] observes a block
//! without keeping its payload alive (used for parent back-references so
//! ownership never cycles).
//!
//! Ownership contract:
//! - construction with [`RefMode::HasRef`] adopts an existing reference
//! - construction with [`RefMode::NeedsRef`] acquires a new one
//! - clone acquires, move transfers, drop releases
//! - `release()` hands the reference back to the caller without decrementing
//!
//! All operations on an empty handle are safe no-ops.

use std::hash::{Hash, Hasher};
use std::mem::ManuallyDrop;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

/// Whether a raw pointer passed to [`Handle::from_raw`] already carries a
/// reference the handle should adopt, or whether one must be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMode {
    HasRef,
    NeedsRef,
}

/// Control block placed in front of every native payload.
///
/// The strong count owns the payload; the weak count owns the allocation.
/// All strong references collectively hold one weak reference, so the
/// allocation outlives the last upgradeable observer.
struct Header {
    strong: AtomicUsize,
    weak: AtomicUsize,
}

/// Heap layout of a native object: header plus payload.
///
/// The payload is `ManuallyDrop` so it can be destroyed when the strong
/// count reaches zero while the allocation survives until the weak count
/// does.
pub struct ObjectBox<T> {
    header: Header,
    value: ManuallyDrop<T>,
}

/// Owning, reference-counted handle to a native object.
pub struct Handle<T> {
    ptr: *const ObjectBox<T>,
}

/// Non-owning observer of a native object; upgradeable while the payload
/// is still alive.
pub struct WeakHandle<T> {
    ptr: *const ObjectBox<T>,
}

// SAFETY: the control block is only ever mutated through atomics, and the
// payload is reached through &T. Payloads guard their own interior
// mutability, which `T: Sync` certifies.
unsafe impl<T: Send + Sync> Send for Handle<T> {}
unsafe impl<T: Send + Sync> Sync for Handle<T> {}
unsafe impl<T: Send + Sync> Send for WeakHandle<T> {}
unsafe impl<T: Send + Sync> Sync for WeakHandle<T> {}

impl<T> Handle<T> {
    /// Allocate a fresh native object and return the sole owning handle.
    pub fn alloc(value: T) -> Self {
        let boxed = Box::new(ObjectBox {
            header: Header {
                strong: AtomicUsize::new(1),
                weak: AtomicUsize::new(1),
            },
            value: ManuallyDrop::new(value),
        });
        Handle {
            ptr: Box::into_raw(boxed),
        }
    }

    /// The empty handle. Holds nothing, releases nothing.
    pub const fn null() -> Self {
        Handle {
            ptr: std::ptr::null(),
        }
    }

    /// Wrap a raw native pointer.
    ///
    /// With [`RefMode::HasRef`] the handle adopts the reference the caller
    /// held; with [`RefMode::NeedsRef`] a new reference is acquired and the
    /// caller keeps theirs.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer previously obtained from
    /// [`Handle::release`] (or [`Handle::as_raw`] while a strong reference
    /// is provably held, for `NeedsRef`).
    pub unsafe fn from_raw(ptr: *const ObjectBox<T>, mode: RefMode) -> Self {
        if !ptr.is_null() && mode == RefMode::NeedsRef {
            (*ptr).header.strong.fetch_add(1, Ordering::Relaxed);
        }
        Handle { ptr }
    }

    /// Relinquish ownership to the caller without touching the count.
    ///
    /// The handle is left empty. Returns null if the handle was empty.
    pub fn release(mut self) -> *const ObjectBox<T> {
        std::mem::replace(&mut self.ptr, std::ptr::null())
    }

    /// The underlying pointer, for identity purposes only.
    pub fn as_raw(&self) -> *const ObjectBox<T> {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Borrow the payload, or `None` for the empty handle.
    pub fn get(&self) -> Option<&T> {
        if self.ptr.is_null() {
            None
        } else {
            // SAFETY: a non-null handle owns a strong reference, so the
            // payload has not been dropped.
            unsafe { Some(&*(*self.ptr).value) }
        }
    }

    /// Current strong count, 0 for the empty handle.
    ///
    /// Like any racy counter read this is a snapshot, reliable only when
    /// the caller knows which threads hold references.
    pub fn ref_count(&self) -> usize {
        if self.ptr.is_null() {
            0
        } else {
            // SAFETY: see `get`.
            unsafe { (*self.ptr).header.strong.load(Ordering::Acquire) }
        }
    }

    /// A non-owning observer of this object.
    pub fn downgrade(&self) -> WeakHandle<T> {
        if !self.ptr.is_null() {
            // SAFETY: see `get`.
            unsafe {
                (*self.ptr).header.weak.fetch_add(1, Ordering::Relaxed);
            }
        }
        WeakHandle { ptr: self.ptr }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        if !self.ptr.is_null() {
            // SAFETY: we hold a strong reference, so the block is alive.
            unsafe {
                (*self.ptr).header.strong.fetch_add(1, Ordering::Relaxed);
            }
        }
        Handle { ptr: self.ptr }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        // SAFETY: this handle owns one strong reference. Release ordering
        // publishes all payload writes to whichever thread performs the
        // destruction; the acquire fence on the destroying thread pairs
        // with it.
        unsafe {
            if (*self.ptr).header.strong.fetch_sub(1, Ordering::Release) == 1 {
                fence(Ordering::Acquire);
                let boxed = self.ptr as *mut ObjectBox<T>;
                ManuallyDrop::drop(&mut (*boxed).value);
                drop_weak(self.ptr);
            }
        }
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Handle::null()
    }
}

/// Identity comparison, not value comparison.
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ptr, other.ptr)
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.ptr as usize).hash(state);
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:p})", self.ptr)
    }
}

impl<T> WeakHandle<T> {
    pub const fn null() -> Self {
        WeakHandle {
            ptr: std::ptr::null(),
        }
    }

    /// Try to obtain a strong handle; fails once the payload is gone.
    pub fn upgrade(&self) -> Handle<T> {
        if self.ptr.is_null() {
            return Handle::null();
        }
        // SAFETY: we hold a weak reference, so the allocation (and thus the
        // header) is alive even if the payload is not.
        let strong = unsafe { &(*self.ptr).header.strong };
        let mut count = strong.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return Handle::null();
            }
            match strong.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Handle { ptr: self.ptr },
                Err(observed) => count = observed,
            }
        }
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        if !self.ptr.is_null() {
            // SAFETY: we hold a weak reference, so the header is alive.
            unsafe {
                (*self.ptr).header.weak.fetch_add(1, Ordering::Relaxed);
            }
        }
        WeakHandle { ptr: self.ptr }
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: this handle owns one weak reference.
            unsafe { drop_weak(self.ptr) }
        }
    }
}

impl<T> Default for WeakHandle<T> {
    fn default() -> Self {
        WeakHandle::null()
    }
}

/// Release one weak reference, deallocating the block on the last one.
///
/// # Safety
///
/// `ptr` must be alive and the caller must own one weak reference.
unsafe fn drop_weak<T>(ptr: *const ObjectBox<T>) {
    if (*ptr).header.weak.fetch_sub(1, Ordering::Release) == 1 {
        fence(Ordering::Acquire);
        // The payload was already destroyed when the strong count hit
        // zero; `ManuallyDrop` keeps the Box drop from running it again.
        drop(Box::from_raw(ptr as *mut ObjectBox<T>));
    }
}
