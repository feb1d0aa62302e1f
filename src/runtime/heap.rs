use std::collections::VecDeque;
use std::fmt;

use crate::lang::value::{HeapRef, Value};

/// Occupancy at which the store reports itself ripe for collection.
pub const GC_THRESHOLD: usize = 8192;

/// Occupancy beyond which no further objects are created.
pub const MAX_OVERHEAD: usize = 16384;

/// Occupancy units charged per live object.
const OBJECT_OVERHEAD: usize = 16;

/// Growable list or, once frozen, a fixed-size tuple.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    items: Vec<Value>,
    frozen: bool,
    refs: u32,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Self {
            items,
            frozen: true,
            refs: 0,
        }
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self {
            items,
            frozen: false,
            refs: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn push(&mut self, value: Value) -> bool {
        if self.frozen {
            return false;
        }
        self.items.push(value);
        true
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.frozen {
            return None;
        }
        self.items.pop()
    }

    pub fn pop_front(&mut self) -> Option<Value> {
        if self.frozen || self.items.is_empty() {
            return None;
        }
        Some(self.items.remove(0))
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn memory_score(&self) -> usize {
        self.items.len() * OBJECT_OVERHEAD
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.frozen { ("(", ")") } else { ("[", "]") };
        write!(f, "{}", open)?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "{}", close)
    }
}

/// Every kind of object the heap store can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    Sequence(Sequence),
}

impl HeapObject {
    pub fn ref_count(&self) -> u32 {
        match self {
            HeapObject::Sequence(seq) => seq.refs,
        }
    }

    fn refs_mut(&mut self) -> &mut u32 {
        match self {
            HeapObject::Sequence(seq) => &mut seq.refs,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            HeapObject::Sequence(seq) => Some(seq),
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Sequence> {
        match self {
            HeapObject::Sequence(seq) => Some(seq),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            HeapObject::Sequence(seq) => seq.len(),
        }
    }
}

impl fmt::Display for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapObject::Sequence(seq) => write!(f, "{}", seq),
        }
    }
}

/// Slot table of heap objects with FIFO slot reuse.
#[derive(Debug, Default)]
pub struct HeapStore {
    objects: Vec<Option<HeapObject>>,
    free_slots: VecDeque<usize>,
    overhead: usize,
}

impl HeapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `object`, reusing the oldest released slot first.
    pub fn create(&mut self, object: HeapObject) -> Option<HeapRef> {
        if self.overhead + OBJECT_OVERHEAD > MAX_OVERHEAD {
            log::warn!("heap store is full ({} units)", self.overhead);
            return None;
        }

        let slot = self.free_slots.front().copied().unwrap_or(self.objects.len());
        let Ok(id) = HeapRef::try_from(slot) else {
            log::warn!("heap slot {} is out of reference range", slot);
            return None;
        };

        if self.free_slots.pop_front().is_some() {
            self.objects[slot] = Some(object);
        } else {
            self.objects.push(Some(object));
        }
        self.overhead += OBJECT_OVERHEAD;
        Some(id)
    }

    pub fn destroy(&mut self, id: HeapRef) -> bool {
        let slot = id as usize;
        match self.objects.get_mut(slot) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                self.free_slots.push_back(slot);
                self.overhead -= OBJECT_OVERHEAD;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: HeapRef) -> Option<&HeapObject> {
        self.objects.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: HeapRef) -> Option<&mut HeapObject> {
        self.objects.get_mut(id as usize).and_then(Option::as_mut)
    }

    pub fn retain(&mut self, id: HeapRef) -> bool {
        match self.get_mut(id) {
            Some(object) => {
                *object.refs_mut() += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference and destroys the object once none remain.
    pub fn release(&mut self, id: HeapRef) -> bool {
        let Some(object) = self.get_mut(id) else {
            return false;
        };
        let refs = object.refs_mut();
        *refs = refs.saturating_sub(1);
        if *refs == 0 {
            self.destroy(id);
        }
        true
    }

    pub fn is_ripe(&self) -> bool {
        self.overhead >= GC_THRESHOLD
    }

    pub fn overhead(&self) -> usize {
        self.overhead
    }

    pub fn live_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(items: &[i32]) -> HeapObject {
        HeapObject::Sequence(Sequence::list(items.iter().map(|n| Value::Int(*n)).collect()))
    }

    // ============================================================
    // Sequence
    // ============================================================

    #[test]
    fn test_list_push_pop() {
        let mut seq = Sequence::new();
        assert!(seq.push(Value::Int(1)));
        assert!(seq.push(Value::Int(2)));
        assert_eq!(seq.pop(), Some(Value::Int(2)));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_frozen_forbids_push_and_pop() {
        let mut seq = Sequence::tuple(vec![Value::Int(1)]);
        assert!(!seq.push(Value::Int(2)));
        assert_eq!(seq.pop(), None);
        assert!(seq.set(0, Value::Int(5)));
        assert_eq!(seq.get(0), Some(Value::Int(5)));
    }

    #[test]
    fn test_pop_front_keeps_reference_count() {
        let mut heap = HeapStore::new();
        let id = heap.create(list_of(&[4, 5])).expect("room");
        heap.retain(id);
        heap.retain(id);

        let seq = heap
            .get_mut(id)
            .and_then(HeapObject::as_sequence_mut)
            .expect("list");
        assert_eq!(seq.pop_front(), Some(Value::Int(4)));
        assert_eq!(seq.items(), &[Value::Int(5)]);

        assert_eq!(heap.get(id).map(HeapObject::ref_count), Some(2));
    }

    #[test]
    fn test_pop_front_refuses_frozen_and_empty() {
        let mut tuple = Sequence::tuple(vec![Value::Int(1)]);
        assert_eq!(tuple.pop_front(), None);
        assert_eq!(tuple.len(), 1);

        let mut empty = Sequence::new();
        assert_eq!(empty.pop_front(), None);
    }

    #[test]
    fn test_sequence_display() {
        let list = Sequence::list(vec![Value::Int(1), Value::Bool(true)]);
        assert_eq!(list.to_string(), "[1, true]");
        let tuple = Sequence::tuple(vec![Value::Int(1)]);
        assert_eq!(tuple.to_string(), "(1)");
    }

    // ============================================================
    // Store
    // ============================================================

    #[test]
    fn test_create_and_get() {
        let mut heap = HeapStore::new();
        let id = heap.create(list_of(&[1, 2])).expect("store has room");

        assert_eq!(heap.get(id).map(HeapObject::size), Some(2));
        assert_eq!(heap.live_count(), 1);
        assert_eq!(heap.overhead(), 16);
    }

    #[test]
    fn test_destroyed_slots_are_reused_oldest_first() {
        let mut heap = HeapStore::new();
        let a = heap.create(list_of(&[])).expect("room");
        let b = heap.create(list_of(&[])).expect("room");
        let _c = heap.create(list_of(&[])).expect("room");

        assert!(heap.destroy(b));
        assert!(heap.destroy(a));
        assert!(!heap.destroy(a));

        assert_eq!(heap.create(list_of(&[])), Some(b));
        assert_eq!(heap.create(list_of(&[])), Some(a));
        assert_eq!(heap.create(list_of(&[])), Some(3));
    }

    #[test]
    fn test_release_destroys_at_zero() {
        let mut heap = HeapStore::new();
        let id = heap.create(list_of(&[1])).expect("room");
        heap.retain(id);
        heap.retain(id);

        assert!(heap.release(id));
        assert!(heap.get(id).is_some());
        assert!(heap.release(id));
        assert!(heap.get(id).is_none());
        assert!(!heap.release(id));
    }

    #[test]
    fn test_ripeness_and_capacity() {
        let mut heap = HeapStore::new();
        for _ in 0..(GC_THRESHOLD / 16) - 1 {
            heap.create(list_of(&[])).expect("room");
        }
        assert!(!heap.is_ripe());
        heap.create(list_of(&[])).expect("room");
        assert!(heap.is_ripe());

        for _ in 0..(MAX_OVERHEAD - GC_THRESHOLD) / 16 {
            heap.create(list_of(&[])).expect("room");
        }
        assert_eq!(heap.create(list_of(&[])), None);
    }
}
