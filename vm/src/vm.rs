use std::collections::HashMap;
use std::io::{self, Write};

use heap::{GcStats, Heap, HeapSettings, RootProvider};
use object::{
    Class, ClassFlags, HeapObject, Instance, NativeFunction, ObjRef, ObjectKind,
    SpecialMethod, Str, Table, Value,
};

use crate::builtins::{self, Builtins, Names};
use crate::error::RuntimeError;
use crate::frame::CallFrame;
use crate::natives::{NativeClass, NativeMethod};

/// Interpreter limits and heap policy.
#[derive(Debug, Clone)]
pub struct VmSettings {
    /// Call depth at which a RecursionError is raised.
    pub max_frames: usize,
    pub heap: HeapSettings,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            max_frames: 1024,
            heap: HeapSettings::default(),
        }
    }
}

/// The virtual machine: heap, operand stack, call frames, globals and the
/// builtin classes.
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) globals: Table,
    /// Intern table. Weak: entries whose string was not marked are purged
    /// before every sweep.
    pub(crate) strings: HashMap<Box<str>, ObjRef, ahash::RandomState>,
    /// Open upvalues, ordered by stack slot.
    pub(crate) open_upvalues: Vec<ObjRef>,
    pub(crate) builtins: Builtins,
    pub(crate) names: Names,
    pub(crate) natives: Vec<NativeMethod>,
    /// Values an embedder is still assembling into a chunk.
    pub(crate) retained: Vec<Value>,
    pub(crate) out: Box<dyn Write>,
    pub(crate) err: Box<dyn Write>,
    pub(crate) settings: VmSettings,
}

struct VmRoots<'a> {
    stack: &'a [Value],
    frames: &'a [CallFrame],
    globals: &'a Table,
    open_upvalues: &'a [ObjRef],
    builtins: &'a Builtins,
    names: &'a Names,
    retained: &'a [Value],
    pending: Option<&'a HeapObject>,
}

impl RootProvider for VmRoots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(Value)) {
        self.stack.iter().for_each(|&v| visitor(v));
        for frame in self.frames {
            frame.trace(visitor);
        }
        for (&name, &value) in self.globals {
            visitor(Value::Object(name));
            visitor(value);
        }
        for &upvalue in self.open_upvalues {
            visitor(Value::Object(upvalue));
        }
        self.builtins.trace(visitor);
        self.names.trace(visitor);
        self.retained.iter().for_each(|&v| visitor(v));
        if let Some(object) = self.pending {
            object.trace(visitor);
        }
    }
}

impl Vm {
    pub fn new(settings: VmSettings) -> Result<Self, RuntimeError> {
        settings
            .heap
            .validate()
            .map_err(|e| RuntimeError::internal(format!("heap settings: {e}")))?;
        let mut vm = Self {
            heap: Heap::new(settings.heap.clone()),
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            globals: Table::default(),
            strings: HashMap::default(),
            open_upvalues: Vec::new(),
            builtins: Builtins::placeholder(),
            names: Names::placeholder(),
            natives: Vec::new(),
            retained: Vec::new(),
            out: Box::new(io::stdout()),
            err: Box::new(io::stderr()),
            settings,
        };
        builtins::bootstrap(&mut vm)?;
        Ok(vm)
    }

    /// Redirect script output (`Print`, top-level results).
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Redirect uncaught-error reports.
    pub fn set_error_output(&mut self, err: Box<dyn Write>) {
        self.err = err;
    }

    pub fn settings(&self) -> &VmSettings {
        &self.settings
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Current operand stack height.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        let key = self.strings.get(name)?;
        self.globals.get(key).copied()
    }

    // ── allocation ───────────────────────────────────────────────────

    /// Allocate an object, collecting first if the heap asks for it. The
    /// new object's own edges are rooted during that collection.
    pub(crate) fn alloc(&mut self, class: ObjRef, kind: ObjectKind) -> ObjRef {
        let object = HeapObject::new(class, kind);
        if self.heap.should_collect() {
            self.collect_with(Some(&object));
        }
        self.heap.insert(object)
    }

    /// Run a full collection now.
    pub fn collect(&mut self) -> GcStats {
        self.collect_with(None)
    }

    fn collect_with(&mut self, pending: Option<&HeapObject>) -> GcStats {
        let Vm {
            ref mut heap,
            ref stack,
            ref frames,
            ref globals,
            ref mut strings,
            ref open_upvalues,
            ref builtins,
            ref names,
            ref retained,
            ..
        } = *self;
        let mut roots = VmRoots {
            stack,
            frames,
            globals,
            open_upvalues,
            builtins,
            names,
            retained,
            pending,
        };
        heap.mark(&mut roots);
        strings.retain(|_, &mut r| heap.is_marked(r));
        heap.sweep()
    }

    /// The interned string object for `chars`.
    pub(crate) fn intern(&mut self, chars: &str) -> ObjRef {
        if let Some(&r) = self.strings.get(chars) {
            return r;
        }
        let r = self.alloc(self.builtins.str, ObjectKind::Str(Str::new(chars)));
        self.strings.insert(chars.into(), r);
        r
    }

    /// Intern a string and keep it alive until the next `interpret`.
    pub fn string(&mut self, chars: &str) -> Value {
        let r = self.intern(chars);
        self.retain(Value::Object(r))
    }

    /// Keep `value` alive until the next `interpret` hands the chunk
    /// referencing it to the interpreter.
    pub fn retain(&mut self, value: Value) -> Value {
        self.retained.push(value);
        value
    }

    // ── object access ───────────────────────────────────────────────

    pub(crate) fn object(&self, r: ObjRef) -> Result<&HeapObject, RuntimeError> {
        self.heap
            .get(r)
            .ok_or_else(|| RuntimeError::internal(format!("dangling handle {r:?}")))
    }

    pub(crate) fn kind(&self, r: ObjRef) -> Result<&ObjectKind, RuntimeError> {
        self.object(r).map(|o| &o.kind)
    }

    pub(crate) fn kind_mut(&mut self, r: ObjRef) -> Result<&mut ObjectKind, RuntimeError> {
        self.heap
            .kind_mut(r)
            .ok_or_else(|| RuntimeError::internal(format!("dangling handle {r:?}")))
    }

    pub(crate) fn class(&self, r: ObjRef) -> Result<&Class, RuntimeError> {
        match self.kind(r)? {
            ObjectKind::Class(class) => Ok(class),
            _ => Err(RuntimeError::internal(format!("{r:?} is not a class"))),
        }
    }

    pub(crate) fn class_mut(&mut self, r: ObjRef) -> Result<&mut Class, RuntimeError> {
        match self.kind_mut(r)? {
            ObjectKind::Class(class) => Ok(class),
            _ => Err(RuntimeError::internal(format!("{r:?} is not a class"))),
        }
    }

    pub(crate) fn as_class(&self, value: Value) -> Option<ObjRef> {
        let r = value.as_object()?;
        matches!(self.heap.kind(r), Some(ObjectKind::Class(_))).then_some(r)
    }

    pub(crate) fn as_instance_mut(&mut self, value: Value) -> Option<&mut Instance> {
        match self.heap.kind_mut(value.as_object()?) {
            Some(ObjectKind::Instance(instance)) => Some(instance),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self, value: Value) -> Option<&str> {
        match self.heap.kind(value.as_object()?) {
            Some(ObjectKind::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Class of any value, scalars included.
    pub(crate) fn class_of(&self, value: Value) -> ObjRef {
        match value {
            Value::None => self.builtins.none,
            Value::Boolean(_) => self.builtins.bool,
            Value::Integer(_) => self.builtins.int,
            Value::Floating(_) => self.builtins.float,
            Value::Object(r) => self
                .heap
                .get(r)
                .map_or(self.builtins.object, |o| o.header.class),
        }
    }

    pub(crate) fn type_name(&self, value: Value) -> String {
        match self.heap.kind(self.class_of(value)) {
            Some(ObjectKind::Class(class)) => class.name.clone(),
            _ => value.primitive_type_name().to_string(),
        }
    }

    /// Whether `class` is `base` or derives from it.
    pub(crate) fn is_subclass(&self, class: ObjRef, base: ObjRef) -> bool {
        let mut cursor = Some(class);
        while let Some(c) = cursor {
            if c == base {
                return true;
            }
            cursor = match self.heap.kind(c) {
                Some(ObjectKind::Class(class)) => class.superclass,
                _ => None,
            };
        }
        false
    }

    pub(crate) fn is_instance_of(&self, value: Value, class: ObjRef) -> bool {
        self.is_subclass(self.class_of(value), class)
    }

    /// Allocate an instance of `class` and install its native storage.
    /// `__init__` is not run.
    pub(crate) fn instantiate(&mut self, class: ObjRef) -> Result<ObjRef, RuntimeError> {
        let on_init = self.class(class)?.layout.on_init;
        let mut instance = Instance::default();
        if let Some(init) = on_init {
            init(&mut instance);
        }
        Ok(self.alloc(class, ObjectKind::Instance(instance)))
    }

    // ── classes ─────────────────────────────────────────────────────

    /// Resolve and cache the special methods of `class`.
    pub(crate) fn finalize_class(&mut self, class: ObjRef) -> Result<(), RuntimeError> {
        let mut resolved = [None; SpecialMethod::COUNT];
        for method in SpecialMethod::ALL {
            resolved[method as usize] =
                self.find_method(class, self.names.special(method));
        }
        let c = self.class_mut(class)?;
        for method in SpecialMethod::ALL {
            c.set_special(method, resolved[method as usize]);
        }
        c.flags |= ClassFlags::FINALIZED;
        log::debug!("finalized class '{}'", c.name);
        Ok(())
    }

    /// Re-resolve the special-method caches of every finalized class that
    /// is `class` or derives from it.
    pub(crate) fn refresh_special_methods(&mut self, class: ObjRef) -> Result<(), RuntimeError> {
        let stale: Vec<ObjRef> = self
            .heap
            .objects()
            .filter_map(|(r, object)| match &object.kind {
                ObjectKind::Class(c) if c.flags.contains(ClassFlags::FINALIZED) => Some(r),
                _ => None,
            })
            .filter(|&r| self.is_subclass(r, class))
            .collect();
        for r in stale {
            self.finalize_class(r)?;
        }
        Ok(())
    }

    /// Register a native class and its methods, and bind it as a global.
    pub fn define_native_class(&mut self, native: NativeClass) -> Result<ObjRef, RuntimeError> {
        let mut class = Class::new(native.name);
        class.superclass = Some(native.superclass.unwrap_or(self.builtins.object));
        class.layout = native.layout;
        class.flags = native.flags | ClassFlags::BUILTIN;
        let r = self.alloc(self.builtins.type_class, ObjectKind::Class(class));

        self.stack.push(Value::Object(r));
        for &method in native.methods {
            self.define_native_method(r, method)?;
        }
        let defined = self
            .finalize_class(r)
            .and_then(|()| self.define_global_class(r));
        self.stack.pop();
        defined?;
        Ok(r)
    }

    /// Attach a native method to `class`. The class must be rooted.
    pub fn define_native_method(
        &mut self,
        class: ObjRef,
        method: NativeMethod,
    ) -> Result<(), RuntimeError> {
        let index = self.natives.len();
        self.natives.push(method);
        let function = self.alloc(
            self.builtins.native_function,
            ObjectKind::NativeFunction(NativeFunction {
                name: method.name,
                arity: method.arity,
                index,
            }),
        );
        self.stack.push(Value::Object(function));
        let name = self.intern(method.name);
        self.stack.pop();
        self.class_mut(class)?
            .methods
            .insert(name, Value::Object(function));
        Ok(())
    }

    pub(crate) fn define_global_class(&mut self, class: ObjRef) -> Result<(), RuntimeError> {
        let name = self.class(class)?.name.clone();
        let key = self.intern(&name);
        self.globals.insert(key, Value::Object(class));
        Ok(())
    }
}
