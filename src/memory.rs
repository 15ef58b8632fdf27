//! Memory-access instrumentation
//!
//! Counted pass-throughs for variable, field, and array-element accesses,
//! plus the compound-assignment entry points that chain a load, a simulated
//! arithmetic operation, and a store.
//!
//! Field access goes through descriptor tables: each instrumented type
//! registers a [`FieldTable`] (name to accessor function pointers over
//! `&dyn Any`) whose `parent` link forms the ancestor chain that name
//! resolution walks. Unresolvable names and accessor mismatches are logged
//! soft failures; the host program keeps running.

use std::any::Any;

use crate::numeric::{ArithOperator, Number, NumberKind};
use crate::reaper::TrackHandle;
use crate::registry::ObjId;
use crate::runtime::Runtime;

/// Kind of memory being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    Variable,
    Field,
    ArrayEl,
}

impl MemKind {
    /// Stable label used in operation counter keys (`loadFIELD`,
    /// `storeARRAYEL`, ...).
    pub fn label(&self) -> &'static str {
        match self {
            MemKind::Variable => "VARIABLE",
            MemKind::Field => "FIELD",
            MemKind::ArrayEl => "ARRAYEL",
        }
    }
}

/// A tracked local variable cell.
///
/// Registered stack-allocated at construction; dropping the slot releases
/// its death watch, closing out the variable's footprint.
#[derive(Debug)]
pub struct LocalSlot<T> {
    pub(crate) value: T,
    approx: bool,
    handle: TrackHandle,
}

impl<T> LocalSlot<T> {
    pub fn new(
        runtime: &Runtime,
        value: T,
        approx: bool,
        precise_size: u64,
        approx_size: u64,
    ) -> Self {
        let handle = runtime.mark_approximate(approx, false, precise_size, approx_size);
        Self {
            value,
            approx,
            handle,
        }
    }

    pub fn id(&self) -> ObjId {
        self.handle.id()
    }

    pub fn approx(&self) -> bool {
        self.approx
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

pub type FieldGetter = fn(&dyn Any) -> Option<Number>;
pub type FieldSetter = fn(&mut dyn Any, Number) -> bool;

/// Accessors for one named field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub get: FieldGetter,
    pub set: FieldSetter,
}

/// Field descriptors for one instrumented type, linked to its ancestor.
#[derive(Debug)]
pub struct FieldTable {
    pub type_name: &'static str,
    pub parent: Option<&'static FieldTable>,
    pub fields: &'static [FieldDescriptor],
}

impl FieldTable {
    /// Walk this type and its ancestors until a field named `name` is
    /// declared.
    pub fn resolve(&self, name: &str) -> Option<&FieldDescriptor> {
        let mut table = Some(self);
        while let Some(t) = table {
            if let Some(desc) = t.fields.iter().find(|d| d.name == name) {
                return Some(desc);
            }
            table = t.parent;
        }
        None
    }
}

impl Runtime {
    /// Counted load pass-through.
    pub fn load_value<T>(&self, value: T, approx: bool, kind: MemKind) -> T {
        self.counters()
            .count_operation(&format!("load{}", kind.label()), approx);
        value
    }

    /// Counted store pass-through.
    pub fn store_value<T>(&self, value: T, approx: bool, kind: MemKind) -> T {
        self.counters()
            .count_operation(&format!("store{}", kind.label()), approx);
        value
    }

    pub fn load_local<T: Clone>(&self, slot: &LocalSlot<T>, approx: bool) -> T {
        self.load_value(slot.value.clone(), approx, MemKind::Variable)
    }

    pub fn store_local<T: Clone>(&self, slot: &mut LocalSlot<T>, approx: bool, rhs: T) -> T {
        let value = self.store_value(rhs, approx, MemKind::Variable);
        slot.value = value.clone();
        value
    }

    /// Load an array element. Out-of-bounds access is a logged soft failure
    /// returning the element default.
    pub fn load_array<T: Clone + Default>(&self, array: &[T], index: usize, approx: bool) -> T {
        match array.get(index) {
            Some(value) => self.load_value(value.clone(), approx, MemKind::ArrayEl),
            None => {
                tracing::warn!(index, len = array.len(), "array load out of bounds");
                T::default()
            }
        }
    }

    /// Store an array element. Out-of-bounds access is a logged soft
    /// failure; the store is still counted, matching the store-then-access
    /// ordering of the counted pass-through.
    pub fn store_array<T: Clone>(&self, array: &mut [T], index: usize, approx: bool, rhs: T) -> T {
        let value = self.store_value(rhs, approx, MemKind::ArrayEl);
        match array.get_mut(index) {
            Some(slot) => *slot = value.clone(),
            None => {
                tracing::warn!(index, len = array.len(), "array store out of bounds");
            }
        }
        value
    }

    /// Load a named field, resolving the name against `table` and its
    /// ancestor chain.
    ///
    /// Returns `None` (logged) when no ancestor declares the field or the
    /// accessor rejects the target; the failure never propagates.
    pub fn load_field(
        &self,
        target: &dyn Any,
        table: &FieldTable,
        name: &str,
        approx: bool,
    ) -> Option<Number> {
        let Some(desc) = table.resolve(name) else {
            tracing::warn!(field = name, type_name = table.type_name, "field not found");
            return None;
        };
        let Some(value) = (desc.get)(target) else {
            tracing::warn!(field = name, type_name = table.type_name, "field access failed");
            return None;
        };
        Some(self.load_value(value, approx, MemKind::Field))
    }

    /// Store a named field. The store is counted before resolution, so a
    /// failed resolution still shows up in the operation counts.
    pub fn store_field(
        &self,
        target: &mut dyn Any,
        table: &FieldTable,
        name: &str,
        approx: bool,
        rhs: Number,
    ) -> Option<Number> {
        let value = self.store_value(rhs, approx, MemKind::Field);
        let Some(desc) = table.resolve(name) else {
            tracing::warn!(field = name, type_name = table.type_name, "field not found");
            return None;
        };
        if !(desc.set)(target, value) {
            tracing::warn!(field = name, type_name = table.type_name, "field access failed");
            return None;
        }
        Some(value)
    }

    /// Compound assignment on a local (`x += y`, `x++`). Returns the pre-
    /// or post-operation value per `return_old`.
    #[allow(clippy::too_many_arguments)]
    pub fn assignop_local(
        &self,
        slot: &mut LocalSlot<Number>,
        op: ArithOperator,
        rhs: Number,
        return_old: bool,
        kind: NumberKind,
        approx: bool,
    ) -> Number {
        let old = self.load_local(slot, approx);
        let new = self.binary_op(old, rhs, op, kind, approx);
        self.store_local(slot, approx, new);
        if return_old {
            old
        } else {
            new
        }
    }

    /// Compound assignment on an array element. The stored value is coerced
    /// to the element kind; the returned value is not.
    #[allow(clippy::too_many_arguments)]
    pub fn assignop_array(
        &self,
        array: &mut [Number],
        index: usize,
        op: ArithOperator,
        rhs: Number,
        return_old: bool,
        kind: NumberKind,
        approx: bool,
    ) -> Number {
        let old = self.load_array(array, index, approx);
        let new = self.binary_op(old, rhs, op, kind, approx);
        self.store_array(array, index, approx, new.coerce(kind));
        if return_old {
            old
        } else {
            new
        }
    }

    /// Compound assignment on a named field. Returns `None` when the field
    /// could not be loaded in the first place.
    #[allow(clippy::too_many_arguments)]
    pub fn assignop_field(
        &self,
        target: &mut dyn Any,
        table: &FieldTable,
        name: &str,
        op: ArithOperator,
        rhs: Number,
        return_old: bool,
        kind: NumberKind,
        approx: bool,
    ) -> Option<Number> {
        let old = self.load_field(target, table, name, approx)?;
        let new = self.binary_op(old, rhs, op, kind, approx);
        self.store_field(target, table, name, approx, new.coerce(kind));
        Some(if return_old { old } else { new })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Body {
        mass: f64,
    }

    struct Particle {
        body: Body,
        charge: i32,
    }

    fn get_mass(target: &dyn Any) -> Option<Number> {
        // Generated accessors handle every subtype declaring the field.
        if let Some(p) = target.downcast_ref::<Particle>() {
            return Some(Number::Double(p.body.mass));
        }
        target
            .downcast_ref::<Body>()
            .map(|b| Number::Double(b.mass))
    }

    fn set_mass(target: &mut dyn Any, value: Number) -> bool {
        if let Some(p) = target.downcast_mut::<Particle>() {
            p.body.mass = value.as_f64();
            return true;
        }
        if let Some(b) = target.downcast_mut::<Body>() {
            b.mass = value.as_f64();
            return true;
        }
        false
    }

    fn get_charge(target: &dyn Any) -> Option<Number> {
        target
            .downcast_ref::<Particle>()
            .map(|p| Number::Int(p.charge))
    }

    fn set_charge(target: &mut dyn Any, value: Number) -> bool {
        match target.downcast_mut::<Particle>() {
            Some(p) => {
                p.charge = value.as_i32();
                true
            }
            None => false,
        }
    }

    static BODY_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor {
        name: "mass",
        get: get_mass,
        set: set_mass,
    }];

    static BODY_TABLE: FieldTable = FieldTable {
        type_name: "Body",
        parent: None,
        fields: &BODY_FIELDS,
    };

    static PARTICLE_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor {
        name: "charge",
        get: get_charge,
        set: set_charge,
    }];

    static PARTICLE_TABLE: FieldTable = FieldTable {
        type_name: "Particle",
        parent: Some(&BODY_TABLE),
        fields: &PARTICLE_FIELDS,
    };

    fn particle() -> Particle {
        Particle {
            body: Body { mass: 1.5 },
            charge: 3,
        }
    }

    #[test]
    fn test_load_and_store_value_count_by_kind() {
        let rt = Runtime::new();
        rt.load_value(1, true, MemKind::Variable);
        rt.load_value(1, false, MemKind::ArrayEl);
        rt.store_value(1, true, MemKind::Field);

        let snap = rt.counters().snapshot();
        assert_eq!(snap.operations.get("loadVARIABLE"), Some(&[0, 1]));
        assert_eq!(snap.operations.get("loadARRAYEL"), Some(&[1, 0]));
        assert_eq!(snap.operations.get("storeFIELD"), Some(&[0, 1]));
        rt.shutdown_quiet();
    }

    #[test]
    fn test_local_slot_round_trip() {
        let rt = Runtime::new();
        let mut slot = LocalSlot::new(&rt, Number::Int(5), true, 0, 4);

        assert_eq!(rt.load_local(&slot, true), Number::Int(5));
        rt.store_local(&mut slot, true, Number::Int(9));
        assert_eq!(rt.load_local(&slot, true), Number::Int(9));
        assert!(rt.is_approximate(slot.id()));

        drop(slot);
        rt.shutdown_quiet();
    }

    #[test]
    fn test_field_resolution_walks_ancestor_chain() {
        let rt = Runtime::new();
        let p = particle();

        // "mass" is declared on Body, not Particle.
        let mass = rt.load_field(&p, &PARTICLE_TABLE, "mass", true);
        assert_eq!(mass, Some(Number::Double(1.5)));

        let charge = rt.load_field(&p, &PARTICLE_TABLE, "charge", false);
        assert_eq!(charge, Some(Number::Int(3)));
        rt.shutdown_quiet();
    }

    #[test]
    fn test_missing_field_is_soft_failure() {
        let rt = Runtime::new();
        let mut p = particle();

        assert_eq!(rt.load_field(&p, &PARTICLE_TABLE, "spin", true), None);
        assert_eq!(
            rt.store_field(&mut p, &PARTICLE_TABLE, "spin", true, Number::Int(1)),
            None
        );
        // The store was still counted before resolution failed.
        let snap = rt.counters().snapshot();
        assert_eq!(snap.operations.get("storeFIELD"), Some(&[0, 1]));
        assert!(snap.operations.get("loadFIELD").is_none());
        rt.shutdown_quiet();
    }

    #[test]
    fn test_accessor_type_mismatch_is_soft_failure() {
        let rt = Runtime::new();
        let not_a_particle = 42u32;
        assert_eq!(
            rt.load_field(&not_a_particle, &PARTICLE_TABLE, "charge", false),
            None
        );
        rt.shutdown_quiet();
    }

    #[test]
    fn test_store_field_writes_through() {
        let rt = Runtime::new();
        let mut p = particle();

        let stored = rt.store_field(&mut p, &PARTICLE_TABLE, "mass", true, Number::Double(2.5));
        assert_eq!(stored, Some(Number::Double(2.5)));
        assert_eq!(p.body.mass, 2.5);
        rt.shutdown_quiet();
    }

    #[test]
    fn test_array_access_round_trip() {
        let rt = Runtime::new();
        let mut arr = vec![Number::Int(1), Number::Int(2)];

        assert_eq!(rt.load_array(&arr, 1, true), Number::Int(2));
        rt.store_array(&mut arr, 0, true, Number::Int(7));
        assert_eq!(arr[0], Number::Int(7));
        rt.shutdown_quiet();
    }

    #[test]
    fn test_array_out_of_bounds_returns_default() {
        let rt = Runtime::new();
        let mut arr = vec![Number::Int(1)];

        assert_eq!(rt.load_array(&arr, 5, false), Number::Int(0));
        // Store out of bounds leaves the array untouched.
        rt.store_array(&mut arr, 5, false, Number::Int(9));
        assert_eq!(arr, vec![Number::Int(1)]);

        // Same ordering contract as the field path: a failed load is
        // uncounted, a store is counted before the access.
        let snap = rt.counters().snapshot();
        assert!(snap.operations.get("loadARRAYEL").is_none());
        assert_eq!(snap.operations.get("storeARRAYEL"), Some(&[1, 0]));
        rt.shutdown_quiet();
    }

    #[test]
    fn test_assignop_local_returns_old_or_new() {
        let rt = Runtime::new();
        let mut slot = LocalSlot::new(&rt, Number::Int(10), false, 4, 0);

        let pre = rt.assignop_local(
            &mut slot,
            ArithOperator::Plus,
            Number::Int(1),
            true,
            NumberKind::Int,
            false,
        );
        assert_eq!(pre, Number::Int(10)); // x++ yields the old value
        assert_eq!(*slot.value(), Number::Int(11));

        let post = rt.assignop_local(
            &mut slot,
            ArithOperator::Plus,
            Number::Int(4),
            false,
            NumberKind::Int,
            false,
        );
        assert_eq!(post, Number::Int(15)); // x += y yields the new value
        rt.shutdown_quiet();
    }

    #[test]
    fn test_assignop_array_coerces_stored_element() {
        let rt = Runtime::new();
        let mut arr = vec![Number::Double(1.0)];

        let new = rt.assignop_array(
            &mut arr,
            0,
            ArithOperator::Plus,
            Number::Double(2.5),
            false,
            NumberKind::Double,
            true,
        );
        assert_eq!(new, Number::Double(3.5));
        assert_eq!(arr[0], Number::Double(3.5));
        rt.shutdown_quiet();
    }

    #[test]
    fn test_assignop_field_counts_full_chain() {
        let rt = Runtime::new();
        let mut p = particle();

        let new = rt.assignop_field(
            &mut p,
            &PARTICLE_TABLE,
            "charge",
            ArithOperator::Multiply,
            Number::Int(4),
            false,
            NumberKind::Int,
            false,
        );
        assert_eq!(new, Some(Number::Int(12)));
        assert_eq!(p.charge, 12);

        let snap = rt.counters().snapshot();
        assert_eq!(snap.operations.get("loadFIELD"), Some(&[1, 0]));
        assert_eq!(snap.operations.get("storeFIELD"), Some(&[1, 0]));
        assert_eq!(snap.operations.get("INT*"), Some(&[1, 0]));
        rt.shutdown_quiet();
    }

    #[test]
    fn test_assignop_field_on_missing_field_returns_none() {
        let rt = Runtime::new();
        let mut p = particle();
        let result = rt.assignop_field(
            &mut p,
            &PARTICLE_TABLE,
            "spin",
            ArithOperator::Plus,
            Number::Int(1),
            false,
            NumberKind::Int,
            false,
        );
        assert_eq!(result, None);
        rt.shutdown_quiet();
    }
}
