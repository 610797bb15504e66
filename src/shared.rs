//! Identity-bearing values.
//!
//! Reference identity is the identity of the shared allocation: two
//! [`Shared`] handles (or two [`Dynamic`] handles) refer to the same value iff
//! they point at the same `RefCell`.

use std::any::{type_name, Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// A shared, mutable value whose identity survives serialization when
/// identity tracking is enabled.
pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Address of the allocation behind a shared cell, used as its identity key.
pub(crate) fn address_of<T: ?Sized>(cell: &Rc<RefCell<T>>) -> usize {
    Rc::as_ptr(cell) as *const () as usize
}

/// A value whose concrete type is only known at runtime.
///
/// The concrete type must be registered with the
/// [`DynamicRegistry`](crate::DynamicRegistry) before it is serialized.
#[derive(Clone)]
pub struct Dynamic {
    value: Rc<RefCell<dyn Any>>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Dynamic {
    pub fn new<T: Any>(value: T) -> Self {
        Dynamic::from_shared(shared(value))
    }

    /// Wraps an existing shared value; both handles keep the same identity.
    pub fn from_shared<T: Any>(value: Shared<T>) -> Self {
        Dynamic {
            value,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the value as `T`, or `None` if it holds another type.
    ///
    /// # Panics
    /// Panics if the value is currently mutably borrowed.
    pub fn borrow<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.value.borrow(), |v| v.downcast_ref::<T>()).ok()
    }

    /// # Panics
    /// Panics if the value is currently borrowed.
    pub fn borrow_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.value.borrow_mut(), |v| v.downcast_mut::<T>()).ok()
    }

    /// Returns a copy of the value if it holds a `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.borrow::<T>().map(|v| v.clone())
    }

    /// True if both handles refer to the same allocation.
    pub fn ptr_eq(&self, other: &Dynamic) -> bool {
        self.address() == other.address()
    }

    /// True if this handle refers to the allocation behind `other`.
    pub fn is_same<T: Any>(&self, other: &Shared<T>) -> bool {
        self.address() == address_of(other)
    }

    pub(crate) fn address(&self) -> usize {
        address_of(&self.value)
    }

    pub(crate) fn cell(&self) -> &RefCell<dyn Any> {
        &self.value
    }
}

/// A placeholder holding `()`, overwritten when a value is read into it.
impl Default for Dynamic {
    fn default() -> Self {
        Dynamic::new(())
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dynamic")
            .field("type", &self.type_name)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}
