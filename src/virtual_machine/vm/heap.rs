use super::value::{StrHandle, Value};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::CellKind;
use std::collections::HashMap;

/// Largest element count a single `alloc` may request.
pub const MAX_CELL_LEN: usize = 1 << 20;

/// Arena size that triggers the first string sweep.
const STRING_SWEEP_MIN: usize = 256;

/// Generation-checked reference to a heap cell.
///
/// On the stack a handle is an `Int` packed as `(generation << 32) | index`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CellHandle {
    pub index: u32,
    pub generation: u32,
}

impl CellHandle {
    pub const fn pack(self) -> i64 {
        (((self.generation as u64) << 32) | self.index as u64) as i64
    }

    pub const fn unpack(raw: i64) -> Self {
        let raw = raw as u64;
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

/// Homogeneous cell contents, fixed at `alloc` time.
#[derive(Clone, Debug, Eq, PartialEq)]
enum CellData {
    Ints(Vec<i64>),
    Strs(Vec<String>),
}

impl CellData {
    fn len(&self) -> usize {
        match self {
            CellData::Ints(v) => v.len(),
            CellData::Strs(v) => v.len(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    data: Option<CellData>,
}

/// Runtime memory: the interned string arena plus typed cells.
///
/// Strings are deduplicated, so equal contents always share one
/// [`StrHandle`]. Strings nothing refers to any more are dropped by
/// [`Heap::sweep_strings`] and their slots reused. Cells are reused through
/// a free list; freeing bumps the slot generation so every outstanding
/// handle to it goes stale.
pub(super) struct Heap {
    strings: Vec<Option<String>>,
    string_ids: HashMap<String, StrHandle>,
    free_strings: Vec<u32>,
    /// Live string count at which the next sweep is due.
    sweep_at: usize,
    cells: Vec<Slot>,
    free: Vec<u32>,
}

impl Heap {
    pub(super) fn new() -> Self {
        Self {
            strings: Vec::new(),
            string_ids: HashMap::new(),
            free_strings: Vec::new(),
            sweep_at: STRING_SWEEP_MIN,
            cells: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Returns the handle of `s`, adding it to the arena if needed.
    pub(super) fn intern(&mut self, s: &str) -> StrHandle {
        if let Some(handle) = self.string_ids.get(s) {
            return *handle;
        }
        self.insert_string(s.to_string())
    }

    /// Same as [`Heap::intern`] for an owned string, avoiding a copy on insert.
    pub(super) fn intern_owned(&mut self, s: String) -> StrHandle {
        if let Some(handle) = self.string_ids.get(&s) {
            return *handle;
        }
        self.insert_string(s)
    }

    fn insert_string(&mut self, s: String) -> StrHandle {
        let handle = match self.free_strings.pop() {
            Some(index) => {
                self.strings[index as usize] = Some(s.clone());
                StrHandle(index)
            }
            None => {
                self.strings.push(Some(s.clone()));
                StrHandle(self.strings.len() as u32 - 1)
            }
        };
        self.string_ids.insert(s, handle);
        handle
    }

    /// Returns the contents of an interned string.
    pub(super) fn string(&self, handle: StrHandle) -> Result<&str, VMError> {
        self.strings
            .get(handle.0 as usize)
            .and_then(Option::as_deref)
            .ok_or_else(|| VMError::InvalidPointer {
                handle: handle.0 as i64,
                reason: "unknown string handle".to_string(),
            })
    }

    /// Number of distinct strings in the arena.
    pub(super) fn string_count(&self) -> usize {
        self.strings.len() - self.free_strings.len()
    }

    /// True once the arena has grown enough since the last sweep.
    pub(super) fn wants_sweep(&self) -> bool {
        self.string_count() >= self.sweep_at
    }

    /// Drops every string not listed in `live`, returning how many were freed.
    ///
    /// Handles outside `live` must not be used afterwards; their slots are
    /// handed out again by later interning.
    pub(super) fn sweep_strings(&mut self, live: impl IntoIterator<Item = StrHandle>) -> usize {
        let mut marked = vec![false; self.strings.len()];
        for handle in live {
            if let Some(mark) = marked.get_mut(handle.0 as usize) {
                *mark = true;
            }
        }

        let mut freed = 0;
        for (index, mark) in marked.into_iter().enumerate() {
            if mark {
                continue;
            }
            if let Some(s) = self.strings[index].take() {
                self.string_ids.remove(&s);
                self.free_strings.push(index as u32);
                freed += 1;
            }
        }

        self.sweep_at = STRING_SWEEP_MIN.max(self.string_count() * 2);
        freed
    }

    /// Number of live cells.
    pub(super) fn live_cells(&self) -> usize {
        self.cells.len() - self.free.len()
    }

    /// Allocates a zero-filled cell of `len` elements.
    pub(super) fn alloc(&mut self, kind: CellKind, len: usize) -> CellHandle {
        let data = match kind {
            CellKind::Int => CellData::Ints(vec![0; len]),
            CellKind::Str => CellData::Strs(vec![String::new(); len]),
        };

        if let Some(index) = self.free.pop() {
            let slot = &mut self.cells[index as usize];
            slot.data = Some(data);
            return CellHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.cells.len() as u32;
        self.cells.push(Slot {
            generation: 0,
            data: Some(data),
        });
        CellHandle {
            index,
            generation: 0,
        }
    }

    /// Releases the cell behind `raw`.
    pub(super) fn free(&mut self, raw: i64) -> Result<(), VMError> {
        let handle = CellHandle::unpack(raw);
        self.cell(raw)?;
        let slot = &mut self.cells[handle.index as usize];
        slot.data = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(())
    }

    /// Reads element `index` of the cell behind `raw`.
    ///
    /// String elements are interned into the arena.
    pub(super) fn load(&mut self, raw: i64, index: i64) -> Result<Value, VMError> {
        let cell = self.cell(raw)?;
        let i = element_index(raw, index, cell.len())?;
        match cell {
            CellData::Ints(v) => Ok(Value::Int(v[i])),
            CellData::Strs(v) => {
                let s = v[i].clone();
                Ok(Value::Str(self.intern_owned(s)))
            }
        }
    }

    /// Writes `value` into element `index` of the cell behind `raw`.
    ///
    /// Returns [`VMError::InvalidDataType`] if `value` does not match the cell kind.
    pub(super) fn store(
        &mut self,
        instr: &'static str,
        raw: i64,
        index: i64,
        value: Value,
    ) -> Result<(), VMError> {
        let text = match value {
            Value::Str(h) => Some(self.string(h)?.to_string()),
            Value::Int(_) => None,
        };
        let cell = self.cell_mut(raw)?;
        let i = element_index(raw, index, cell.len())?;
        match (cell, value, text) {
            (CellData::Ints(v), Value::Int(n), _) => v[i] = n,
            (CellData::Strs(v), Value::Str(_), Some(s)) => v[i] = s,
            (_, value, _) => {
                return Err(VMError::InvalidDataType {
                    instruction: instr,
                    actual: format!("{} in a cell of another kind", value.type_name()),
                });
            }
        }
        Ok(())
    }

    fn cell(&self, raw: i64) -> Result<&CellData, VMError> {
        let handle = CellHandle::unpack(raw);
        let slot = self
            .cells
            .get(handle.index as usize)
            .ok_or_else(|| invalid(raw, "no such cell"))?;
        if slot.generation != handle.generation {
            return Err(invalid(raw, "stale handle"));
        }
        slot.data.as_ref().ok_or_else(|| invalid(raw, "cell was freed"))
    }

    fn cell_mut(&mut self, raw: i64) -> Result<&mut CellData, VMError> {
        self.cell(raw)?;
        let handle = CellHandle::unpack(raw);
        self.cells[handle.index as usize]
            .data
            .as_mut()
            .ok_or_else(|| invalid(raw, "cell was freed"))
    }
}

fn invalid(raw: i64, reason: &str) -> VMError {
    VMError::InvalidPointer {
        handle: raw,
        reason: reason.to_string(),
    }
}

fn element_index(raw: i64, index: i64, len: usize) -> Result<usize, VMError> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| invalid(raw, &format!("index {index} outside cell of length {len}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_packing() {
        let handle = CellHandle {
            index: 7,
            generation: 3,
        };
        assert_eq!(handle.pack(), (3i64 << 32) | 7);
        assert_eq!(CellHandle::unpack(handle.pack()), handle);
    }

    #[test]
    fn interning_dedupes() {
        let mut heap = Heap::new();
        let a = heap.intern("abc");
        let b = heap.intern_owned("abc".to_string());
        let c = heap.intern("abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.string_count(), 2);
        assert_eq!(heap.string(c).unwrap(), "abd");
    }

    #[test]
    fn sweep_drops_unlisted_strings() {
        let mut heap = Heap::new();
        let keep = heap.intern("keep");
        let drop = heap.intern("drop");
        heap.intern("also dropped");

        assert_eq!(heap.sweep_strings([keep]), 2);
        assert_eq!(heap.string_count(), 1);
        assert_eq!(heap.string(keep).unwrap(), "keep");
        assert!(heap.string(drop).is_err());

        // Freed slots are reused and the old contents can be interned again.
        let again = heap.intern("drop");
        assert_eq!(heap.string_count(), 2);
        assert_eq!(heap.string(again).unwrap(), "drop");
        assert_eq!(heap.intern("keep"), keep);
        assert!(again.0 < 3);
    }

    #[test]
    fn sweep_threshold_follows_live_strings() {
        let mut heap = Heap::new();
        let handles: Vec<_> = (0..STRING_SWEEP_MIN)
            .map(|i| heap.intern(&i.to_string()))
            .collect();
        assert!(heap.wants_sweep());

        assert_eq!(heap.sweep_strings(handles.iter().copied()), 0);
        assert!(!heap.wants_sweep());
        assert_eq!(heap.sweep_at, STRING_SWEEP_MIN * 2);
    }

    #[test]
    fn cells_are_zero_filled() {
        let mut heap = Heap::new();
        let ints = heap.alloc(CellKind::Int, 3).pack();
        let strs = heap.alloc(CellKind::Str, 1).pack();
        assert_eq!(heap.load(ints, 2).unwrap(), Value::Int(0));
        let Value::Str(h) = heap.load(strs, 0).unwrap() else {
            panic!("expected string element");
        };
        assert_eq!(heap.string(h).unwrap(), "");
    }

    #[test]
    fn store_and_load() {
        let mut heap = Heap::new();
        let cell = heap.alloc(CellKind::Str, 2).pack();
        let hello = heap.intern("hello");
        heap.store("pset", cell, 1, Value::Str(hello)).unwrap();
        assert_eq!(heap.load(cell, 1).unwrap(), Value::Str(hello));
    }

    #[test]
    fn kind_mismatch() {
        let mut heap = Heap::new();
        let cell = heap.alloc(CellKind::Int, 1).pack();
        let s = heap.intern("x");
        assert!(matches!(
            heap.store("pset", cell, 0, Value::Str(s)),
            Err(VMError::InvalidDataType { .. })
        ));
    }

    #[test]
    fn index_out_of_range() {
        let mut heap = Heap::new();
        let cell = heap.alloc(CellKind::Int, 2).pack();
        assert!(matches!(heap.load(cell, 2), Err(VMError::InvalidPointer { .. })));
        assert!(matches!(heap.load(cell, -1), Err(VMError::InvalidPointer { .. })));
    }

    #[test]
    fn freed_handle_goes_stale_after_reuse() {
        let mut heap = Heap::new();
        let first = heap.alloc(CellKind::Int, 1).pack();
        heap.free(first).unwrap();
        assert!(matches!(heap.load(first, 0), Err(VMError::InvalidPointer { .. })));
        assert!(heap.free(first).is_err());

        let second = heap.alloc(CellKind::Int, 1);
        assert_eq!(second.index, 0);
        assert_eq!(second.generation, 1);
        assert!(heap.load(first, 0).is_err());
        assert_eq!(heap.load(second.pack(), 0).unwrap(), Value::Int(0));
        assert_eq!(heap.live_cells(), 1);
    }

    #[test]
    fn unknown_handle() {
        let mut heap = Heap::new();
        assert!(matches!(heap.free(42), Err(VMError::InvalidPointer { .. })));
    }
}
