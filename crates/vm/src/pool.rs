//! Temporary value pool.
//!
//! Opcode results are grid-sized allocations that churn on every
//! instruction; the pool recycles them across a VM context's lifetime.
//! One FIFO free-list per (type, cardinality) pair. The pool is owned by
//! the execution context and passed into each run — there is deliberately
//! no process-wide shared pool, so parallel workers each bring their own.

use crate::stack::StackEntry;
use crate::value::{value_ref, ShadingValue, ValueRef};
use std::collections::{HashMap, VecDeque};
use umbra_foundation::{StorageClass, VarType};

/// Free-lists of reusable temporaries.
#[derive(Default)]
pub struct ValuePool {
    free: HashMap<(VarType, StorageClass), VecDeque<ValueRef>>,
    hits: u64,
    misses: u64,
}

impl ValuePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a temporary of the requested shape, reusing a pooled instance
    /// when one is available. Varying temporaries are sized to `npoints`.
    pub fn get_temporary(
        &mut self,
        vtype: VarType,
        class: StorageClass,
        npoints: usize,
    ) -> ValueRef {
        if let Some(list) = self.free.get_mut(&(vtype, class)) {
            if let Some(value) = list.pop_front() {
                self.hits += 1;
                if class == StorageClass::Varying {
                    value.borrow_mut().promote(npoints);
                }
                return value;
            }
        }
        self.misses += 1;
        value_ref(ShadingValue::new(vtype, class, npoints))
    }

    /// Return a stack entry's value to the pool. Entries holding permanent
    /// storage are not pooled; releasing them is a no-op.
    pub fn release(&mut self, entry: StackEntry) {
        if !entry.temporary {
            return;
        }
        let (vtype, class) = {
            let v = entry.value.borrow();
            // Arrays are never allocated as temporaries; if one slips
            // through, dropping it is the safe answer.
            if matches!(&*v, ShadingValue::Array(_)) {
                return;
            }
            (v.vtype(), v.class())
        };
        self.free
            .entry((vtype, class))
            .or_default()
            .push_back(entry.value);
    }

    /// (reuse, fresh-allocation) counters, for diagnostics.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_round_trip_reuses_storage() {
        let mut pool = ValuePool::new();
        let a = pool.get_temporary(VarType::Float, StorageClass::Varying, 8);
        let raw = Rc::as_ptr(&a);
        pool.release(StackEntry::temporary(a));
        let b = pool.get_temporary(VarType::Float, StorageClass::Varying, 8);
        assert_eq!(Rc::as_ptr(&b), raw);
    }

    #[test]
    fn test_lists_are_per_shape() {
        let mut pool = ValuePool::new();
        let a = pool.get_temporary(VarType::Float, StorageClass::Uniform, 1);
        pool.release(StackEntry::temporary(a));
        // A different shape must not steal the pooled float.
        let c = pool.get_temporary(VarType::Color, StorageClass::Uniform, 1);
        assert_eq!(c.borrow().vtype(), VarType::Color);
        let f = pool.get_temporary(VarType::Float, StorageClass::Uniform, 1);
        assert_eq!(f.borrow().vtype(), VarType::Float);
        assert_eq!(pool.stats().0, 1);
    }

    #[test]
    fn test_permanent_entries_not_pooled() {
        let mut pool = ValuePool::new();
        let v = value_ref(ShadingValue::uniform_float(1.0));
        pool.release(StackEntry::permanent(v));
        let t = pool.get_temporary(VarType::Float, StorageClass::Uniform, 1);
        // Fresh allocation: the permanent handle was not captured.
        assert_eq!(pool.stats(), (0, 1));
        drop(t);
    }

    #[test]
    fn test_varying_resize_on_reuse() {
        let mut pool = ValuePool::new();
        let a = pool.get_temporary(VarType::Float, StorageClass::Varying, 4);
        pool.release(StackEntry::temporary(a));
        let b = pool.get_temporary(VarType::Float, StorageClass::Varying, 9);
        assert_eq!(b.borrow().size(), 9);
    }
}
