//! The heap: object allocation, interning, and the tri-colour collector.
//!
//! All heap objects are owned here, threaded through an intrusive
//! "all objects" singly-linked list. Everything else in the crate only ever
//! holds a non-owning [`ObjHandle`] into this list.

use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::object::{
    Obj, ObjClosure, ObjData, ObjFunction, ObjHandle, ObjKind, ObjString, ObjUpvalue,
    UpvalueDescriptor, UpvalueState,
};
use crate::table::{hash_bytes, Table};
use crate::value::Value;

/// Anything that can hand the collector its current set of GC roots.
///
/// Implemented separately by the compiler (while functions are still being
/// built) and by the VM (the live stack, frames, globals, and open-upvalue
/// list), so the same `Heap` serves both phases without either one needing a
/// global singleton.
pub trait RootSource {
    fn mark_roots(&self, heap: &Heap, grey: &mut Vec<ObjHandle>);
}

/// Owns every heap object ever allocated and the string intern table.
pub struct Heap {
    all_objects: Option<NonNull<Obj>>,
    strings: Table<ObjHandle>,
    bytes_allocated: usize,
    next_gc: usize,
    pub stress_gc: bool,
    /// Total collections run; exposed for tests asserting the collector
    /// actually ran rather than just trusting the policy math.
    pub collections: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            all_objects: None,
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: 1024 * 1024,
            stress_gc: false,
            collections: 0,
        }
    }

    fn push(&mut self, obj: Obj) -> ObjHandle {
        let boxed = Box::new(obj);
        let ptr = Box::into_raw(boxed);
        let ptr = unsafe { NonNull::new_unchecked(ptr) };
        unsafe { ptr.as_ref() }.header.next.set(self.all_objects);
        self.all_objects = Some(ptr);
        self.bytes_allocated += std::mem::size_of::<Obj>();
        unsafe { ObjHandle::from_raw(ptr) }
    }

    /// Intern `text`, returning the canonical handle for it. If an equal
    /// string already exists it is reused; otherwise a new `ObjString` is
    /// allocated and registered.
    ///
    /// `roots` must report every currently-reachable root other than the
    /// string being built. There is nothing new to protect here since the
    /// string doesn't exist until this call returns, but a GC check still
    /// runs first so that allocating it never observes a stale threshold.
    pub fn intern_string(&mut self, text: &str, roots: &impl RootSource) -> ObjHandle {
        let hash = hash_bytes(text.as_bytes());
        if let Some(existing) = self.strings.find_string(text, hash) {
            return existing;
        }
        self.maybe_collect(roots);
        let handle = self.push(Obj::new(
            ObjKind::String,
            ObjData::String(ObjString {
                value: text.to_string(),
                hash,
            }),
        ));
        self.strings.set(handle, hash, handle);
        handle
    }

    pub fn alloc_function(&mut self, name: Option<ObjHandle>, roots: &impl RootSource) -> ObjHandle {
        self.maybe_collect(roots);
        self.push(Obj::new(
            ObjKind::Function,
            ObjData::Function(ObjFunction::new(name)),
        ))
    }

    pub fn alloc_closure(
        &mut self,
        function: ObjHandle,
        upvalues: Vec<ObjHandle>,
        roots: &impl RootSource,
    ) -> ObjHandle {
        self.maybe_collect(roots);
        self.push(Obj::new(
            ObjKind::Closure,
            ObjData::Closure(ObjClosure { function, upvalues }),
        ))
    }

    pub fn alloc_upvalue(&mut self, slot: usize, roots: &impl RootSource) -> ObjHandle {
        self.maybe_collect(roots);
        self.push(Obj::new(
            ObjKind::Upvalue,
            ObjData::Upvalue(ObjUpvalue::new_open(slot)),
        ))
    }

    pub fn chunk_mut<'a>(&self, function: ObjHandle) -> &'a mut Chunk {
        // Safety: callers hold the only live mutable borrow of a function's
        // chunk during compilation, guarded by the compiler's single-
        // threaded frame stack; the heap never moves or frees a reachable
        // object out from under a live reference.
        unsafe {
            let ptr = function.ptr().as_ptr();
            match &mut (*ptr).data {
                ObjData::Function(f) => &mut *(&mut f.chunk as *mut Chunk),
                _ => unreachable!("chunk_mut called on a non-function object"),
            }
        }
    }

    pub fn function_mut<'a>(&self, function: ObjHandle) -> &'a mut ObjFunction {
        unsafe {
            let ptr = function.ptr().as_ptr();
            match &mut (*ptr).data {
                ObjData::Function(f) => &mut *(f as *mut ObjFunction),
                _ => unreachable!("function_mut called on a non-function object"),
            }
        }
    }

    /// Fill in a closure's upvalue array for the `CLOSURE` opcode: each
    /// descriptor either captures a live local (delegating to
    /// `capture_upvalue`) or copies an already-resolved upvalue from the
    /// enclosing closure.
    pub fn capture_upvalues(
        &mut self,
        descriptors: &[UpvalueDescriptor],
        enclosing_closure: Option<ObjHandle>,
        open_upvalues: &mut Option<ObjHandle>,
        roots: &impl RootSource,
    ) -> Vec<ObjHandle> {
        descriptors
            .iter()
            .map(|d| {
                if d.is_local {
                    self.capture_upvalue(d.index as usize, open_upvalues, roots)
                } else {
                    enclosing_closure
                        .and_then(|c| c.as_closure())
                        .map(|c| c.upvalues[d.index as usize])
                        .expect("non-local upvalue descriptor requires an enclosing closure")
                }
            })
            .collect()
    }

    /// Find or create the open upvalue for stack slot `slot`. The open list
    /// is kept sorted by descending slot so a given slot is only ever
    /// captured once.
    fn capture_upvalue(
        &mut self,
        slot: usize,
        open_upvalues: &mut Option<ObjHandle>,
        roots: &impl RootSource,
    ) -> ObjHandle {
        let mut prev: Option<ObjHandle> = None;
        let mut cur = *open_upvalues;
        while let Some(handle) = cur {
            let up = handle.as_upvalue().expect("open-upvalue list entry");
            match up.slot() {
                Some(s) if s == slot => return handle,
                Some(s) if s < slot => break,
                _ => {}
            }
            prev = cur;
            cur = up.next_open.get();
        }

        let created = self.alloc_upvalue(slot, roots);
        created
            .as_upvalue()
            .unwrap()
            .next_open
            .set(cur);
        match prev {
            Some(p) => p.as_upvalue().unwrap().next_open.set(Some(created)),
            None => *open_upvalues = Some(created),
        }
        created
    }

    /// Close every open upvalue whose slot is `>= limit`, copying the stack
    /// value into the upvalue itself.
    pub fn close_upvalues(&self, stack: &[Value], open_upvalues: &mut Option<ObjHandle>, limit: usize) {
        while let Some(handle) = *open_upvalues {
            let up = handle.as_upvalue().expect("open-upvalue list entry");
            match up.slot() {
                Some(slot) if slot >= limit => {
                    up.close(stack[slot]);
                    *open_upvalues = up.next_open.get();
                }
                _ => break,
            }
        }
    }

    /// Run a collection if the allocation policy says to: either `stress_gc`
    /// forces a collection before every allocation, or bytes allocated has
    /// crossed `next_gc`, doubling the threshold afterwards.
    fn maybe_collect(&mut self, roots: &impl RootSource) {
        if self.stress_gc || self.bytes_allocated >= self.next_gc {
            self.collect(roots);
            self.next_gc = self.bytes_allocated.max(1024) * 2;
        }
    }

    pub fn collect(&mut self, roots: &impl RootSource) {
        let mut grey = Vec::new();
        roots.mark_roots(self, &mut grey);
        while let Some(obj) = grey.pop() {
            self.blacken(obj, &mut grey);
        }
        self.strings.delete_unmarked();
        self.sweep();
        self.collections += 1;
    }

    pub fn mark_value(&self, value: Value, grey: &mut Vec<ObjHandle>) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle, grey);
        }
    }

    pub fn mark_object(&self, handle: ObjHandle, grey: &mut Vec<ObjHandle>) {
        if handle.is_marked() {
            return;
        }
        handle.set_marked(true);
        grey.push(handle);
    }

    fn blacken(&self, handle: ObjHandle, grey: &mut Vec<ObjHandle>) {
        match handle.kind() {
            ObjKind::String => {}
            ObjKind::Function => {
                let f = handle.as_function().unwrap();
                if let Some(name) = f.name {
                    self.mark_object(name, grey);
                }
                for c in &f.chunk.constants {
                    self.mark_value(*c, grey);
                }
            }
            ObjKind::Closure => {
                let c = handle.as_closure().unwrap();
                self.mark_object(c.function, grey);
                for up in &c.upvalues {
                    self.mark_object(*up, grey);
                }
            }
            ObjKind::Upvalue => {
                let up = handle.as_upvalue().unwrap();
                if let UpvalueState::Closed(v) = up.state.get() {
                    self.mark_value(v, grey);
                }
            }
        }
    }

    fn sweep(&mut self) {
        let mut prev: Option<NonNull<Obj>> = None;
        let mut cur = self.all_objects;
        while let Some(ptr) = cur {
            let header = unsafe { &ptr.as_ref().header };
            let next = header.next.get();
            if header.marked.get() {
                header.marked.set(false);
                prev = Some(ptr);
                cur = next;
            } else {
                match prev {
                    Some(p) => unsafe { p.as_ref() }.header.next.set(next),
                    None => self.all_objects = next,
                }
                cur = next;
                self.bytes_allocated = self
                    .bytes_allocated
                    .saturating_sub(std::mem::size_of::<Obj>());
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }

    /// Number of live heap objects, for tests.
    pub fn live_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.all_objects;
        while let Some(ptr) = cur {
            count += 1;
            cur = unsafe { ptr.as_ref() }.header.next.get();
        }
        count
    }
}

impl Drop for Heap {
    /// Deterministic teardown: free every remaining heap object.
    fn drop(&mut self) {
        let mut cur = self.all_objects.take();
        while let Some(ptr) = cur {
            cur = unsafe { ptr.as_ref() }.header.next.get();
            unsafe {
                drop(Box::from_raw(ptr.as_ptr()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRoots;
    impl RootSource for NoRoots {
        fn mark_roots(&self, _heap: &Heap, _grey: &mut Vec<ObjHandle>) {}
    }

    #[test]
    fn interning_returns_the_same_handle_for_equal_content() {
        let mut heap = Heap::new();
        let a = heap.intern_string("hello", &NoRoots);
        let b = heap.intern_string("hello", &NoRoots);
        assert_eq!(a, b);
    }

    #[test]
    fn collect_with_no_roots_frees_everything() {
        let mut heap = Heap::new();
        heap.intern_string("a", &NoRoots);
        heap.intern_string("b", &NoRoots);
        assert_eq!(heap.live_count(), 2);
        heap.collect(&NoRoots);
        assert_eq!(heap.live_count(), 0);
    }

    struct KeepOne(ObjHandle);
    impl RootSource for KeepOne {
        fn mark_roots(&self, heap: &Heap, grey: &mut Vec<ObjHandle>) {
            heap.mark_object(self.0, grey);
        }
    }

    #[test]
    fn collect_keeps_rooted_strings_and_frees_the_rest() {
        let mut heap = Heap::new();
        let kept = heap.intern_string("kept", &NoRoots);
        heap.intern_string("discarded", &NoRoots);
        assert_eq!(heap.live_count(), 2);
        heap.collect(&KeepOne(kept));
        assert_eq!(heap.live_count(), 1);
        assert!(heap.strings.find_string("discarded", hash_bytes(b"discarded")).is_none());
    }
}
