//! Handle-owning smart pointer.

use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::error::PoolResult;
use crate::handle::handle::Handle;
use crate::pool::PoolAllocator;
use crate::utils::Callsite;

/// Compile-time witness that a pointer to `Self` may be reinterpreted
/// as a pointer to `Dst`.
///
/// Used to gate cross-type [`PoolPtr::cast`] the way an upcast among
/// variants of a capability set would be: the implementor asserts the
/// two layouts are pointer-compatible.
///
/// # Safety
///
/// `Self` and `Dst` must have identical layout when viewed through the
/// shared storage (`#[repr(transparent)]` wrappers, identical
/// `#[repr(C)]` prefixes read only through the prefix, and so on).
pub unsafe trait CastsTo<Dst: ?Sized> {}

// Every type trivially casts to itself.
unsafe impl<T: ?Sized> CastsTo<T> for T {}

/// Value-typed owner of one [`Handle`] reference with a pointer-like
/// API.
///
/// Every `PoolPtr` references exactly one handle at all times — null
/// pointers share the process-wide null sentinel. Cloning adds a
/// reference; dropping removes one. The payload is released only by an
/// explicit [`free`](Self::free); dropping the last pointer first
/// trips the dangling-reference diagnostic instead.
///
/// The owning pool must outlive every `PoolPtr` created from it;
/// freeing through a pointer whose pool is gone is undefined behavior.
pub struct PoolPtr<T> {
    handle: NonNull<Handle>,
    _marker: PhantomData<*const T>,
}

impl<T> PoolPtr<T> {
    /// Wraps `handle`, taking one reference on it.
    fn from_handle(handle: NonNull<Handle>) -> Self {
        // SAFETY: callers only pass live handles: the sentinel, a
        // freshly created handle, or one we already hold a reference
        // to.
        unsafe { handle.as_ref() }.add_ref();
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    /// A null pointer sharing the null sentinel.
    #[must_use]
    pub fn null() -> Self {
        Self::from_handle(Handle::null())
    }

    /// Allocates `value` from `pool` and wraps it in a fresh handle
    /// with this pointer holding the first reference.
    #[must_use]
    #[track_caller]
    pub fn new_in(value: T, pool: &PoolAllocator<T>) -> Self {
        let callsite = Callsite::caller();
        let storage = pool.insert_with(value, callsite);
        let handle = Handle::create(pool, storage, callsite);
        Self::from_handle(handle)
    }

    /// The referenced handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        // SAFETY: holding a reference keeps the handle alive.
        unsafe { self.handle.as_ref() }
    }

    /// Whether the handle's storage is empty.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.handle().is_null()
    }

    /// Borrows the payload, or reports a dangling access when the
    /// storage has been freed while references remain.
    pub fn try_get(&self) -> PoolResult<&T> {
        let storage = self.handle().checked_storage()?;
        // SAFETY: non-null storage points at a live, aligned `T`
        // inside the owning pool.
        Ok(unsafe { storage.cast::<T>().as_ref() })
    }

    /// Mutably borrows the payload when this is the only reference.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.handle().ref_count() != 1 {
            return None;
        }
        let storage = NonNull::new(self.handle().raw_storage())?;
        // SAFETY: sole reference plus live storage; the borrow of
        // `self` keeps both exclusive.
        Some(unsafe { storage.cast::<T>().as_mut() })
    }

    /// Raw payload address; null once the storage was freed.
    #[must_use]
    pub fn as_ptr(&self) -> *mut T {
        self.handle().raw_storage().cast()
    }

    /// Returns the payload to its pool and rebinds this pointer to the
    /// null sentinel.
    ///
    /// Freeing an already-freed pointer or receiving a non-OK pool
    /// status is reported through the handle diagnostics; all steps
    /// run regardless and the first error is returned.
    #[track_caller]
    pub fn free(&mut self) -> PoolResult<()> {
        self.free_with(Callsite::caller())
    }

    /// [`free`](Self::free) with an explicit callsite.
    pub fn free_with(&mut self, callsite: Callsite) -> PoolResult<()> {
        let handle = self.handle();
        let freed = handle.free_payload_with(callsite);
        let removed = handle.remove_ref_with(callsite);
        self.handle = Handle::null();
        self.handle().add_ref();
        freed.and(removed)
    }

    /// Rebinds this pointer to the null sentinel, releasing its
    /// current reference.
    pub fn set_null(&mut self) {
        let _ = self.handle().remove_ref();
        self.handle = Handle::null();
        self.handle().add_ref();
    }

    /// Rebinds the same handle as a pointer to `U`.
    ///
    /// The conversion is proven at compile time by the
    /// [`CastsTo`] witness; both pointers share the handle and its
    /// reference count.
    #[must_use]
    pub fn cast<U>(&self) -> PoolPtr<U>
    where
        T: CastsTo<U>,
    {
        PoolPtr::from_handle(self.handle)
    }

    /// Runtime-checked cast: shares the handle when the payload is a
    /// `U`, otherwise returns a null pointer. A pointer with freed
    /// storage also yields null.
    #[must_use]
    pub fn downcast<U: Any>(&self) -> PoolPtr<U>
    where
        T: Any,
    {
        let storage = self.handle().raw_storage();
        if storage.is_null() {
            return PoolPtr::null();
        }
        // SAFETY: non-null storage points at a live `T`.
        let value: &T = unsafe { &*storage.cast::<T>() };
        if <dyn Any>::is::<U>(value) {
            PoolPtr::from_handle(self.handle)
        } else {
            PoolPtr::null()
        }
    }
}

impl<T> Clone for PoolPtr<T> {
    fn clone(&self) -> Self {
        Self::from_handle(self.handle)
    }
}

impl<T> Default for PoolPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Drop for PoolPtr<T> {
    fn drop(&mut self) {
        let _ = self.handle().remove_ref();
    }
}

/// Two pointers are equal iff they reference the same handle instance.
impl<T> PartialEq for PoolPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T> Eq for PoolPtr<T> {}

impl<T> Deref for PoolPtr<T> {
    type Target = T;

    /// Traps (panics) when the storage has been freed; the diagnostic
    /// is emitted to the handle sink first. Use
    /// [`try_get`](Self::try_get) for a fallible borrow.
    #[track_caller]
    fn deref(&self) -> &T {
        match self.try_get() {
            Ok(value) => value,
            Err(error) => panic!("dangling pool pointer dereference: {error}"),
        }
    }
}

impl<T> fmt::Debug for PoolPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolPtr")
            .field("handle", self.handle())
            .finish()
    }
}
