//! Traits for moving sets of components into the store.
//!
//! A [`Bundle`] is a statically-typed set of component values, implemented
//! for tuples of up to eight components. Bundles surrender their values
//! one at a time through a type-erased visitor so that the store can place
//! them into columns, command buffers or prefab templates without
//! monomorphising those containers.

use crate::storage::{
    archetype::{make_type_set, TypeSet},
    component::{Component, ComponentMeta, ComponentTypeId},
};
use std::mem::ManuallyDrop;

/// Clone-constructs a component value from `src` into `dst`.
pub type CloneFn = unsafe fn(dst: *mut u8, src: *const u8);

/// A statically-typed set of component values which can be moved into the
/// store.
pub trait Bundle {
    /// Returns the canonical type set of the bundle's component types.
    fn type_set() -> TypeSet;

    /// Visits every component value in the bundle, passing ownership of
    /// its bytes to the callback.
    ///
    /// The callback must move the bytes out (they will not be dropped by
    /// the bundle afterwards). Visitation order is the tuple's declaration
    /// order, not type-set order.
    fn for_each_raw(self, f: &mut dyn FnMut(ComponentTypeId, ComponentMeta, *mut u8));
}

/// A [`Bundle`] whose components are all clone-constructible, as required
/// by prefab templates.
pub trait CloneBundle: Bundle {
    /// Like [`Bundle::for_each_raw`], additionally passing each
    /// component's clone function.
    fn for_each_raw_with_clone(
        self,
        f: &mut dyn FnMut(ComponentTypeId, ComponentMeta, CloneFn, *mut u8),
    );
}

unsafe fn clone_raw<T: Clone>(dst: *mut u8, src: *const u8) {
    std::ptr::write(dst as *mut T, (*(src as *const T)).clone())
}

macro_rules! impl_bundle_tuple {
    ( $( $ty:ident ),* ) => {
        #[allow(non_snake_case)]
        impl<$( $ty: Component ),*> Bundle for ($( $ty, )*) {
            fn type_set() -> TypeSet {
                make_type_set([$( ComponentTypeId::of::<$ty>() ),*])
            }

            fn for_each_raw(self, f: &mut dyn FnMut(ComponentTypeId, ComponentMeta, *mut u8)) {
                let ($( $ty, )*) = self;
                $(
                    let mut $ty = ManuallyDrop::new($ty);
                    f(
                        ComponentTypeId::of::<$ty>(),
                        ComponentMeta::of::<$ty>(),
                        &mut *$ty as *mut $ty as *mut u8,
                    );
                )*
            }
        }

        #[allow(non_snake_case)]
        impl<$( $ty: Component + Clone ),*> CloneBundle for ($( $ty, )*) {
            fn for_each_raw_with_clone(
                self,
                f: &mut dyn FnMut(ComponentTypeId, ComponentMeta, CloneFn, *mut u8),
            ) {
                let ($( $ty, )*) = self;
                $(
                    let mut $ty = ManuallyDrop::new($ty);
                    f(
                        ComponentTypeId::of::<$ty>(),
                        ComponentMeta::of::<$ty>(),
                        clone_raw::<$ty>,
                        &mut *$ty as *mut $ty as *mut u8,
                    );
                )*
            }
        }
    };
}

macro_rules! bundle_tuple {
    ($head_ty:ident) => {
        impl_bundle_tuple!($head_ty);
    };
    ($head_ty:ident, $( $tail_ty:ident ),*) => (
        impl_bundle_tuple!($head_ty, $( $tail_ty ),*);
        bundle_tuple!($( $tail_ty ),*);
    );
}

bundle_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tuple_type_set_is_sorted() {
        struct First(#[allow(dead_code)] u8);
        struct Second(#[allow(dead_code)] u8);

        let set = <(Second, First)>::type_set();
        assert_eq!(set.len(), 2);
        assert!(set[0] < set[1]);
    }

    #[test]
    fn visitation_moves_values() {
        let mut seen = Vec::new();
        ("hello".to_string(), 7u32).for_each_raw(&mut |id, meta, ptr| {
            if id == ComponentTypeId::of::<String>() {
                let value = unsafe { std::ptr::read(ptr as *mut String) };
                assert_eq!(value, "hello");
            } else {
                assert_eq!(meta.size(), 4);
                let value = unsafe { std::ptr::read(ptr as *mut u32) };
                assert_eq!(value, 7);
            }
            seen.push(id);
        });
        assert_eq!(seen.len(), 2);
    }
}
