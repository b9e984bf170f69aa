mod chunk;
mod class;
mod header;
mod objects;
mod value;

pub use chunk::{Chunk, ChunkBuilder};
pub use class::{
    Class, ClassFlags, InitHook, NativeData, NativeLayout, SpecialMethod,
    SweepHook,
};
pub use header::{Header, HeaderFlags, ObjectType};
pub use objects::{
    Arity, BoundMethod, Closure, Function, FunctionKind, Generator,
    GeneratorState, Handler, HandlerKind, HeapObject, Instance,
    NativeFunction, ObjectKind, Str, SuspendedFrame, Upvalue,
    UpvalueDescriptor,
};
pub use value::{ObjRef, Value};

/// Attribute / method table keyed by interned name.
pub type Table = std::collections::HashMap<ObjRef, Value, ahash::RandomState>;

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::{Instruction, Op, decode_at};

    // ── Value ──────────────────────────────────────────────────────

    #[test]
    fn falsey_values() {
        assert!(Value::None.is_falsey());
        assert!(Value::Boolean(false).is_falsey());
        assert!(Value::Integer(0).is_falsey());

        assert!(!Value::Boolean(true).is_falsey());
        assert!(!Value::Integer(-1).is_falsey());
        assert!(!Value::Floating(0.0).is_falsey());
        assert!(!Value::Object(ObjRef::from_index(0)).is_falsey());
    }

    #[test]
    fn scalar_equality_promotes_ints() {
        assert!(Value::Integer(1).scalar_eq(Value::Floating(1.0)));
        assert!(Value::Floating(2.0).scalar_eq(Value::Integer(2)));
        assert!(!Value::Integer(1).scalar_eq(Value::Boolean(true)));
        assert!(!Value::None.scalar_eq(Value::Boolean(false)));
    }

    #[test]
    fn identity_is_strict() {
        assert!(!Value::Integer(1).is_same(Value::Floating(1.0)));
        assert!(Value::Floating(f64::NAN).is_same(Value::Floating(f64::NAN)));
        let r = ObjRef::from_index(3);
        assert!(Value::Object(r).is_same(Value::Object(r)));
        assert!(!Value::Object(r).is_same(Value::Object(ObjRef::from_index(4))));
    }

    // ── Class ──────────────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct Counter(u32);

    impl NativeData for Counter {
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn core::any::Any {
            self
        }
    }

    fn install_counter(instance: &mut Instance) {
        instance.native = Some(Box::new(Counter::default()));
    }

    #[test]
    fn init_hook_installs_native_storage() {
        let mut class = Class::new("counter");
        class.layout = NativeLayout {
            alloc_size: size_of::<Counter>(),
            on_init: Some(install_counter),
            on_gc_sweep: None,
        };

        let mut instance = Instance::default();
        assert!(instance.native::<Counter>().is_none());
        (class.layout.on_init.unwrap())(&mut instance);
        instance.native_mut::<Counter>().unwrap().0 += 1;
        assert_eq!(instance.native::<Counter>().unwrap().0, 1);
    }

    #[test]
    fn special_methods_start_empty() {
        let mut class = Class::new("c");
        for method in SpecialMethod::ALL {
            assert_eq!(class.special(method), None);
        }
        class.set_special(SpecialMethod::Eq, Some(Value::Integer(1)));
        assert_eq!(class.special(SpecialMethod::Eq), Some(Value::Integer(1)));
        assert_eq!(SpecialMethod::Eq.name(), "__eq__");
    }

    #[test]
    fn arity_bounds() {
        assert!(Arity::Exact(2).accepts(2));
        assert!(!Arity::Exact(2).accepts(3));
        assert!(Arity::AtLeast(1).accepts(9));
        assert!(Arity::AtMost(2).accepts(0));
        assert!(!Arity::AtMost(2).accepts(3));
        assert!(Arity::Between(1, 3).accepts(3));
        assert!(!Arity::Between(1, 3).accepts(0));
        assert_eq!(Arity::Between(1, 3).to_string(), "1 to 3");
    }

    // ── Chunk ──────────────────────────────────────────────────────

    #[test]
    fn emit_constant_picks_long_form_past_256() {
        let mut b = ChunkBuilder::new("test");
        for n in 0..256 {
            b.add_constant(Value::Integer(n));
        }
        let idx = b.emit_constant(Value::Integer(256)).unwrap();
        b.emit(Op::Return);
        let chunk = b.finish();

        assert_eq!(idx, 256);
        assert_eq!(chunk.code()[0], Op::ConstantLong as u8);
        let (instruction, next) = decode_at(chunk.code(), 0).unwrap();
        assert_eq!(instruction, Instruction::Constant { idx: 256 });
        assert_eq!(chunk.constant(256), Some(Value::Integer(256)));
        assert_eq!(decode_at(chunk.code(), next).unwrap().0, Instruction::Return);
    }

    #[test]
    fn disassembly_lists_constants_and_lines() {
        let mut b = ChunkBuilder::new("script");
        b.set_line(1);
        b.emit_constant(Value::Integer(1)).unwrap();
        b.emit_constant(Value::Integer(2)).unwrap();
        b.set_line(2);
        b.emit(Op::Add);
        b.emit(Op::Return);
        let chunk = b.finish();

        let listing = chunk.disassemble(&|v| format!("{v:?}"));
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "== script ==");
        assert_eq!(lines[1], "0000    1 Constant #0 (Integer(1))");
        assert_eq!(lines[2], "0002    | Constant #1 (Integer(2))");
        assert_eq!(lines[3], "0004    2 Add");
        assert_eq!(chunk.line_at(4), 2);
    }

    // ── HeapObject ─────────────────────────────────────────────────

    #[test]
    fn trace_visits_class_and_fields() {
        let class = ObjRef::from_index(1);
        let key = ObjRef::from_index(2);
        let mut instance = Instance::default();
        instance.fields.insert(key, Value::Integer(5));
        let object = HeapObject::new(class, ObjectKind::Instance(instance));

        let mut seen = Vec::new();
        object.trace(&mut |v| seen.push(v));
        assert!(seen.contains(&Value::Object(class)));
        assert!(seen.contains(&Value::Object(key)));
        assert!(seen.contains(&Value::Integer(5)));
        assert_eq!(object.kind.object_type(), ObjectType::Instance);
    }
}
