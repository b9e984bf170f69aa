//! Mark/sweep heap.
//!
//! Objects live in an arena of slots addressed by [`ObjRef`]. Every live
//! object is also threaded onto a single intrusive allocation list through
//! [`Header::next`](object::Header), which the sweep phase walks.
//!
//! This crate is decoupled from the interpreter. Consumers provide a
//! [`RootProvider`] to supply live roots at collection time.

use object::{HeaderFlags, HeapObject, ObjRef, ObjectKind, Value};

// ── Public API types ──────────────────────────────────────────────────

/// Consumers implement this to provide GC roots.
///
/// Called at the start of every collection to discover live values from
/// interpreter state (operand stack, globals, frames, pinned builtins).
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(Value));
}

// ── Heap settings ─────────────────────────────────────────────────────

/// Collection policy.
#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Bytes allocated before the first collection is requested.
    pub initial_threshold: usize,
    /// After a collection the next threshold is `live bytes * growth_factor`
    /// (never below `initial_threshold`).
    pub growth_factor: usize,
    /// Request a collection at every allocation point.
    pub stress: bool,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            initial_threshold: 1024 * 1024, // 1 MB
            growth_factor: 2,
            stress: false,
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.initial_threshold == 0 {
            return Err("initial_threshold must be > 0");
        }
        if self.growth_factor < 2 {
            return Err("growth_factor must be at least 2");
        }
        Ok(())
    }
}

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects reclaimed.
    pub freed: usize,
    /// Sweep hooks run.
    pub finalized: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

// ── Heap ──────────────────────────────────────────────────────────────

pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free: Vec<u32>,
    /// Most recently allocated object, start of the allocation list.
    head: Option<ObjRef>,
    live: usize,
    bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<ObjRef>,
    collections: usize,
    settings: HeapSettings,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Self {
        debug_assert!(settings.validate().is_ok(), "invalid heap settings");
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            live: 0,
            bytes_allocated: 0,
            next_gc: settings.initial_threshold,
            gray: Vec::new(),
            collections: 0,
            settings,
        }
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    /// Number of live (not yet collected) objects.
    pub fn live_objects(&self) -> usize {
        self.live
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn collections(&self) -> usize {
        self.collections
    }

    /// Whether the allocation policy asks for a collection.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.settings.stress || self.bytes_allocated > self.next_gc
    }

    // ── allocation / access ──────────────────────────────────────────

    /// Allocate a new object and link it at the head of the allocation
    /// list. Never collects; callers run the collector at their own safe
    /// points.
    pub fn allocate(&mut self, class: ObjRef, kind: ObjectKind) -> ObjRef {
        self.insert(HeapObject::new(class, kind))
    }

    /// Link an already built object. Lets callers keep a pending object
    /// reachable through their roots while a collection runs.
    pub fn insert(&mut self, mut object: HeapObject) -> ObjRef {
        object.header.next = self.head;
        self.bytes_allocated += object.size_hint();

        let r = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(object);
                ObjRef::from_index(index)
            }
            None => {
                self.slots.push(Some(object));
                ObjRef::from_index((self.slots.len() - 1) as u32)
            }
        };
        self.head = Some(r);
        self.live += 1;
        r
    }

    #[inline(always)]
    pub fn get(&self, r: ObjRef) -> Option<&HeapObject> {
        self.slots.get(r.index()).and_then(Option::as_ref)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut HeapObject> {
        self.slots.get_mut(r.index()).and_then(Option::as_mut)
    }

    #[inline(always)]
    pub fn kind(&self, r: ObjRef) -> Option<&ObjectKind> {
        self.get(r).map(|o| &o.kind)
    }

    #[inline(always)]
    pub fn kind_mut(&mut self, r: ObjRef) -> Option<&mut ObjectKind> {
        self.get_mut(r).map(|o| &mut o.kind)
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.get(r).is_some()
    }

    /// Walk the allocation list, newest object first.
    pub fn objects(&self) -> impl Iterator<Item = (ObjRef, &HeapObject)> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let r = cursor?;
            let object = self.get(r)?;
            cursor = object.header.next;
            Some((r, object))
        })
    }

    // ── collection ──────────────────────────────────────────────────

    /// Full collection: mark from `roots`, then sweep.
    pub fn collect(&mut self, roots: &mut dyn RootProvider) -> GcStats {
        self.mark(roots);
        self.sweep()
    }

    #[inline]
    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.get(r).is_some_and(|o| o.header.is_marked())
    }

    /// Mark phase: everything reachable from `roots` ends up marked.
    pub fn mark(&mut self, roots: &mut dyn RootProvider) {
        let slots = &mut self.slots;
        let gray = &mut self.gray;
        roots.visit_roots(&mut |value| mark_value(slots, gray, value));

        let mut edges = Vec::new();
        while let Some(r) = self.gray.pop() {
            if let Some(object) = self.get(r) {
                object.trace(&mut |value| edges.push(value));
            }
            for value in edges.drain(..) {
                mark_value(&mut self.slots, &mut self.gray, value);
            }
        }
    }

    /// Sweep phase. Unmarked objects are unlinked, their sweep hooks run
    /// (while every dead object, classes included, is still resident), then
    /// their slots are released. Survivors are unmarked for the next cycle.
    pub fn sweep(&mut self) -> GcStats {
        let bytes_before = self.bytes_allocated;
        let mut dead = Vec::new();
        let mut live_bytes = 0;
        let mut prev: Option<ObjRef> = None;
        let mut cursor = self.head;

        while let Some(r) = cursor {
            let Some(object) = self.get_mut(r) else {
                log::error!("allocation list points at empty slot {r:?}");
                break;
            };
            let next = object.header.next;
            if object.header.is_marked() {
                object.header.set_marked(false);
                live_bytes += object.size_hint();
                prev = Some(r);
            } else {
                if let Some(p) = prev {
                    if let Some(prev_object) = self.get_mut(p) {
                        prev_object.header.next = next;
                    }
                } else {
                    self.head = next;
                }
                dead.push(r);
            }
            cursor = next;
        }

        let finalized = dead.iter().filter(|&&r| self.finalize(r)).count();

        for &r in &dead {
            if self.slots[r.index()].take().is_some() {
                self.free.push(r.index() as u32);
                self.live -= 1;
            }
        }

        self.bytes_allocated = live_bytes;
        self.next_gc = (live_bytes * self.settings.growth_factor)
            .max(self.settings.initial_threshold);
        self.collections += 1;

        let stats = GcStats {
            freed: dead.len(),
            finalized,
            bytes_before,
            bytes_after: live_bytes,
        };
        log::debug!(
            "gc #{}: freed {} objects, {} finalizers, {} -> {} bytes, next at {}",
            self.collections,
            stats.freed,
            stats.finalized,
            stats.bytes_before,
            stats.bytes_after,
            self.next_gc
        );
        stats
    }

    /// Run the class sweep hook of a dead instance. Returns whether a hook
    /// ran. The `FINALIZED` flag keeps a hook from running twice.
    fn finalize(&mut self, r: ObjRef) -> bool {
        let Some(object) = self.get(r) else {
            return false;
        };
        if !matches!(object.kind, ObjectKind::Instance(_))
            || object.header.flags.contains(HeaderFlags::FINALIZED)
        {
            return false;
        }
        let hook = match self.kind(object.header.class) {
            Some(ObjectKind::Class(class)) => class.layout.on_gc_sweep,
            _ => None,
        };
        let Some(hook) = hook else {
            return false;
        };
        let Some(object) = self.get_mut(r) else {
            return false;
        };
        object.header.flags.insert(HeaderFlags::FINALIZED);
        if let ObjectKind::Instance(instance) = &mut object.kind {
            hook(instance);
        }
        true
    }
}

fn mark_value(slots: &mut [Option<HeapObject>], gray: &mut Vec<ObjRef>, value: Value) {
    let Value::Object(r) = value else {
        return;
    };
    if let Some(Some(object)) = slots.get_mut(r.index()) {
        if !object.header.is_marked() {
            object.header.set_marked(true);
            gray.push(r);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use object::{Class, Instance, NativeData, Str};

    use super::*;

    /// A simple root provider that holds a list of values.
    struct TestRoots {
        roots: Vec<Value>,
    }

    impl TestRoots {
        fn new() -> Self {
            Self { roots: Vec::new() }
        }

        fn push(&mut self, value: Value) {
            self.roots.push(value);
        }
    }

    impl RootProvider for TestRoots {
        fn visit_roots(&mut self, visitor: &mut dyn FnMut(Value)) {
            for &root in &self.roots {
                visitor(root);
            }
        }
    }

    #[derive(Debug)]
    struct Counted {
        swept: Rc<Cell<u32>>,
        buffer: Option<Vec<u32>>,
    }

    impl NativeData for Counted {
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn core::any::Any {
            self
        }
    }

    fn counting_sweep(instance: &mut Instance) {
        if let Some(counted) = instance.native_mut::<Counted>() {
            counted.swept.set(counted.swept.get() + 1);
            counted.buffer.take();
        }
    }

    fn test_settings() -> HeapSettings {
        HeapSettings {
            initial_threshold: 4096,
            growth_factor: 2,
            stress: false,
        }
    }

    /// A heap with one self-classed class object, rooted.
    fn test_env() -> (Heap, TestRoots, ObjRef) {
        let mut heap = Heap::new(test_settings());
        let class = heap.allocate(ObjRef::PLACEHOLDER, ObjectKind::Class(Class::new("C")));
        heap.get_mut(class).unwrap().header.class = class;
        let mut roots = TestRoots::new();
        roots.push(Value::Object(class));
        (heap, roots, class)
    }

    fn instance(heap: &mut Heap, class: ObjRef) -> ObjRef {
        heap.allocate(class, ObjectKind::Instance(Instance::default()))
    }

    fn link(heap: &mut Heap, from: ObjRef, key: ObjRef, to: ObjRef) {
        let Some(ObjectKind::Instance(inst)) = heap.kind_mut(from) else {
            panic!("not an instance");
        };
        inst.fields.insert(key, Value::Object(to));
    }

    #[test]
    fn allocation_links_newest_first() {
        let (mut heap, _roots, class) = test_env();
        let a = instance(&mut heap, class);
        let b = instance(&mut heap, class);

        let order: Vec<ObjRef> = heap.objects().map(|(r, _)| r).collect();
        assert_eq!(order, vec![b, a, class]);
        assert_eq!(heap.live_objects(), 3);
        assert!(heap.bytes_allocated() > 0);
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let (mut heap, mut roots, class) = test_env();
        let kept = instance(&mut heap, class);
        let dropped = instance(&mut heap, class);
        roots.push(Value::Object(kept));

        let stats = heap.collect(&mut roots);
        assert_eq!(stats.freed, 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(dropped));
        assert!(!heap.is_marked(kept), "survivors are unmarked after sweep");
        assert_eq!(heap.objects().count(), 2);
    }

    #[test]
    fn references_keep_objects_alive() {
        let (mut heap, mut roots, class) = test_env();
        let key = heap.allocate(class, ObjectKind::Str(Str::new("next")));
        let a = instance(&mut heap, class);
        let b = instance(&mut heap, class);
        link(&mut heap, a, key, b);
        roots.push(Value::Object(a));

        let stats = heap.collect(&mut roots);
        assert_eq!(stats.freed, 0);
        assert!(heap.contains(b));
        assert!(heap.contains(key));
    }

    #[test]
    fn cycles_are_collected() {
        let (mut heap, mut roots, class) = test_env();
        let key = heap.allocate(class, ObjectKind::Str(Str::new("other")));
        roots.push(Value::Object(key));
        let a = instance(&mut heap, class);
        let b = instance(&mut heap, class);
        link(&mut heap, a, key, b);
        link(&mut heap, b, key, a);

        let stats = heap.collect(&mut roots);
        assert_eq!(stats.freed, 2);
        assert!(!heap.contains(a));
        assert!(!heap.contains(b));
    }

    #[test]
    fn freed_slots_are_reused() {
        let (mut heap, mut roots, class) = test_env();
        let dropped = instance(&mut heap, class);
        heap.collect(&mut roots);
        let reused = instance(&mut heap, class);
        assert_eq!(reused, dropped);
        assert_eq!(heap.live_objects(), 2);
    }

    #[test]
    fn sweep_hook_runs_exactly_once() {
        let (mut heap, mut roots, class) = test_env();
        let Some(ObjectKind::Class(c)) = heap.kind_mut(class) else {
            unreachable!()
        };
        c.layout.on_gc_sweep = Some(counting_sweep);

        let swept = Rc::new(Cell::new(0));
        let mut inst = Instance::default();
        inst.native = Some(Box::new(Counted {
            swept: Rc::clone(&swept),
            buffer: Some(vec![1, 2, 3]),
        }));
        heap.allocate(class, ObjectKind::Instance(inst));

        let stats = heap.collect(&mut roots);
        assert_eq!(stats.finalized, 1);
        assert_eq!(swept.get(), 1);

        heap.collect(&mut roots);
        assert_eq!(swept.get(), 1);
    }

    #[test]
    fn hook_runs_when_class_dies_with_instance() {
        let mut heap = Heap::new(test_settings());
        let mut class = Class::new("Doomed");
        class.layout.on_gc_sweep = Some(counting_sweep);
        let class = heap.allocate(ObjRef::PLACEHOLDER, ObjectKind::Class(class));
        heap.get_mut(class).unwrap().header.class = class;

        let swept = Rc::new(Cell::new(0));
        let mut inst = Instance::default();
        inst.native = Some(Box::new(Counted {
            swept: Rc::clone(&swept),
            buffer: None,
        }));
        heap.allocate(class, ObjectKind::Instance(inst));

        let stats = heap.collect(&mut TestRoots::new());
        assert_eq!(stats.freed, 2);
        assert_eq!(swept.get(), 1);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn class_edge_keeps_class_alive() {
        let mut heap = Heap::new(test_settings());
        let class = heap.allocate(ObjRef::PLACEHOLDER, ObjectKind::Class(Class::new("K")));
        heap.get_mut(class).unwrap().header.class = class;
        let inst = instance(&mut heap, class);
        let mut roots = TestRoots::new();
        roots.push(Value::Object(inst));

        assert_eq!(heap.collect(&mut roots).freed, 0);
        assert!(heap.contains(class));
    }

    #[test]
    fn threshold_and_stress_policy() {
        let (mut heap, mut roots, class) = test_env();
        assert!(!heap.should_collect());
        while !heap.should_collect() {
            let s = heap.allocate(class, ObjectKind::Str(Str::new("x".repeat(64))));
            roots.push(Value::Object(s));
        }
        let stats = heap.collect(&mut roots);
        assert_eq!(stats.freed, 0);
        assert!(!heap.should_collect());

        let stressed = Heap::new(HeapSettings {
            stress: true,
            ..test_settings()
        });
        assert!(stressed.should_collect());
    }

    #[test]
    fn settings_validation() {
        assert!(HeapSettings::default().validate().is_ok());
        let bad = HeapSettings {
            growth_factor: 1,
            ..HeapSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
