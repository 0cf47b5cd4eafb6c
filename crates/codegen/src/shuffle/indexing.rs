use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;
use stackify_ir::StackSlot;

pub const JUNK_INDEX: usize = 0;
pub const FUNCTION_RETURN_LABEL_INDEX: usize = 1;
const RESERVED: usize = 2;

/// Assigns every distinct slot a dense index so shuffling compares integers
/// instead of slot payloads. A map lives for one function at most; a function
/// has a single return label, so index 1 is reserved for it.
#[derive(Debug, Clone)]
pub struct IndexingMap {
    reserved: [StackSlot; RESERVED],
    slots: IndexSet<StackSlot, FxBuildHasher>,
}

impl IndexingMap {
    pub fn new() -> Self {
        Self {
            reserved: [StackSlot::Junk, StackSlot::Junk],
            slots: IndexSet::default(),
        }
    }

    pub fn index(&mut self, slot: &StackSlot) -> usize {
        match slot {
            StackSlot::Junk => JUNK_INDEX,
            StackSlot::FunctionReturnLabel(_) => {
                debug_assert!(
                    self.reserved[FUNCTION_RETURN_LABEL_INDEX].is_junk()
                        || &self.reserved[FUNCTION_RETURN_LABEL_INDEX] == slot,
                    "return labels of two functions in one indexing map"
                );
                self.reserved[FUNCTION_RETURN_LABEL_INDEX] = slot.clone();
                FUNCTION_RETURN_LABEL_INDEX
            }
            _ => {
                let index = match self.slots.get_index_of(slot) {
                    Some(index) => index,
                    None => self.slots.insert_full(slot.clone()).0,
                };
                index + RESERVED
            }
        }
    }

    pub fn index_stack(&mut self, stack: &[StackSlot]) -> Vec<usize> {
        stack.iter().map(|slot| self.index(slot)).collect()
    }

    /// Returns the slot of an index handed out by this map.
    pub fn slot(&self, index: usize) -> &StackSlot {
        if index < RESERVED {
            &self.reserved[index]
        } else {
            &self.slots[index - RESERVED]
        }
    }

    /// Number of indices handed out so far, including the reserved ones.
    pub fn len(&self) -> usize {
        self.slots.len() + RESERVED
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for IndexingMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;
    use stackify_ir::FuncRef;

    use super::*;

    #[test]
    fn reserved_indices() {
        let mut map = IndexingMap::new();
        let ret = StackSlot::FunctionReturnLabel(FuncRef::new(2));

        assert_eq!(map.index(&StackSlot::Junk), JUNK_INDEX);
        assert_eq!(map.index(&ret), FUNCTION_RETURN_LABEL_INDEX);
        assert_eq!(map.slot(FUNCTION_RETURN_LABEL_INDEX), &ret);
        assert!(map.is_empty());
    }

    #[test]
    fn lazy_and_stable() {
        let mut map = IndexingMap::new();
        let stack = vec![
            StackSlot::var("a"),
            StackSlot::lit(1u64),
            StackSlot::var("a"),
            StackSlot::Junk,
        ];

        assert_eq!(map.index_stack(&stack), vec![2, 3, 2, 0]);
        assert_eq!(map.index(&StackSlot::var("b")), 4);
        assert_eq!(map.index(&StackSlot::lit(1u64)), 3);
        assert_eq!(map.slot(4), &StackSlot::var("b"));
        assert_eq!(map.len(), 5);
    }
}
