//! Hand-assembled programs run by the `sable` binary and the interpreter
//! tests. Each builder interns what it needs through the VM, so the
//! chunk's constants stay alive until it runs.

use bytecode::{BuildError, Op};
use object::{Chunk, ChunkBuilder, FunctionKind, UpvalueDescriptor, Value};

use crate::vm::Vm;

pub type BuildFn = fn(&mut Vm) -> Result<Chunk, BuildError>;

pub struct Demo {
    pub name: &'static str,
    pub about: &'static str,
    pub build: BuildFn,
}

pub const DEMOS: &[Demo] = &[
    Demo {
        name: "arith",
        about: "1 + 2, result printed on return",
        build: arithmetic,
    },
    Demo {
        name: "concat",
        about: "\"a\" + 1",
        build: concatenation,
    },
    Demo {
        name: "globals",
        about: "define, update and print a global",
        build: globals,
    },
    Demo {
        name: "closure",
        about: "counter closure over a captured local",
        build: closure,
    },
    Demo {
        name: "class",
        about: "inheritance and super calls",
        build: classes,
    },
    Demo {
        name: "range",
        about: "for i in range(1, 4)",
        build: range_loop,
    },
    Demo {
        name: "generator",
        about: "generator yielding 1, 2, 3",
        build: generator,
    },
    Demo {
        name: "yield-from",
        about: "delegation with yield from",
        build: yield_from,
    },
    Demo {
        name: "try",
        about: "catch a NameError",
        build: try_except,
    },
    Demo {
        name: "with",
        about: "context manager enter and exit",
        build: with_demo,
    },
    Demo {
        name: "bigint",
        about: "bigint(0xffffff) + bigint(1)",
        build: bigint,
    },
    Demo {
        name: "error",
        about: "uncaught TypeError with line report",
        build: type_error,
    },
];

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|demo| demo.name == name)
}

fn name(vm: &mut Vm, b: &mut ChunkBuilder, chars: &str) -> u32 {
    let value = vm.string(chars);
    b.add_constant(value)
}

fn closure_of(
    vm: &mut Vm,
    b: &mut ChunkBuilder,
    name: &str,
    arity: usize,
    upvalues: Vec<UpvalueDescriptor>,
    body: Chunk,
    kind: FunctionKind,
) -> Result<(), BuildError> {
    let function = vm.function(name, arity, upvalues, body, kind);
    let idx = b.add_constant(function);
    b.emit_with_operand(Op::Closure, idx)
}

/// `def <name>(...)` with no captures, bound as a global.
fn define_function(
    vm: &mut Vm,
    b: &mut ChunkBuilder,
    function: &str,
    arity: usize,
    body: Chunk,
    kind: FunctionKind,
) -> Result<(), BuildError> {
    closure_of(vm, b, function, arity, Vec::new(), body, kind)?;
    let global = name(vm, b, function);
    b.define_global(global)
}

fn finish_module(mut b: ChunkBuilder) -> Chunk {
    b.emit(Op::None);
    b.emit(Op::Return);
    b.finish()
}

fn print_string(vm: &mut Vm, b: &mut ChunkBuilder, text: &str) -> Result<(), BuildError> {
    let value = vm.string(text);
    b.emit_constant(value)?;
    b.emit(Op::Print);
    Ok(())
}

fn arithmetic(_vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut b = ChunkBuilder::new("<module>");
    b.emit_constant(Value::Integer(1))?;
    b.emit_constant(Value::Integer(2))?;
    b.emit(Op::Add);
    b.emit(Op::Return);
    Ok(b.finish())
}

fn concatenation(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut b = ChunkBuilder::new("<module>");
    let a = vm.string("a");
    b.emit_constant(a)?;
    b.emit_constant(Value::Integer(1))?;
    b.emit(Op::Add);
    b.emit(Op::Return);
    Ok(b.finish())
}

fn globals(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut b = ChunkBuilder::new("<module>");
    let x = name(vm, &mut b, "x");
    b.emit_constant(Value::Integer(10))?;
    b.define_global(x)?;
    b.set_line(2);
    b.get_global(x)?;
    b.emit_constant(Value::Integer(2))?;
    b.emit(Op::Multiply);
    b.set_global(x)?;
    b.emit(Op::Pop);
    b.set_line(3);
    b.get_global(x)?;
    b.emit(Op::Print);
    Ok(finish_module(b))
}

/// ```text
/// def make_counter():
///     count = 0
///     def inc():
///         count += 1
///         return count
///     return inc
/// c = make_counter(); c(); c(); print(c())
/// ```
fn closure(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut inc = ChunkBuilder::new("inc");
    inc.emit_with_operand(Op::GetUpvalue, 0)?;
    inc.emit_constant(Value::Integer(1))?;
    inc.emit(Op::Add);
    inc.emit_with_operand(Op::SetUpvalue, 0)?;
    inc.emit(Op::Return);

    let mut make = ChunkBuilder::new("make_counter");
    make.emit_constant(Value::Integer(0))?;
    let captures = vec![UpvalueDescriptor {
        is_local: true,
        index: 0,
    }];
    closure_of(vm, &mut make, "inc", 0, captures, inc.finish(), FunctionKind::Plain)?;
    make.emit(Op::Return);

    let mut b = ChunkBuilder::new("<module>");
    define_function(vm, &mut b, "make_counter", 0, make.finish(), FunctionKind::Plain)?;
    let make_counter = name(vm, &mut b, "make_counter");
    let c = name(vm, &mut b, "c");
    b.get_global(make_counter)?;
    b.call(0)?;
    b.define_global(c)?;
    for _ in 0..2 {
        b.get_global(c)?;
        b.call(0)?;
        b.emit(Op::Pop);
    }
    b.get_global(c)?;
    b.call(0)?;
    b.emit(Op::Print);
    Ok(finish_module(b))
}

/// ```text
/// class Animal:
///     def __init__(self, name): self.name = name
///     def speak(self): return self.name + " makes a sound"
/// class Dog(Animal):
///     def speak(self): return super().speak() + "!"
/// d = Dog("Rex"); print(d.speak())
/// ```
fn classes(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut init = ChunkBuilder::new("__init__");
    let field = name(vm, &mut init, "name");
    init.get_local(0)?;
    init.get_local(1)?;
    init.emit_with_operand(Op::SetProperty, field)?;
    init.emit(Op::Pop);
    init.emit(Op::None);
    init.emit(Op::Return);

    let mut speak = ChunkBuilder::new("speak");
    let field = name(vm, &mut speak, "name");
    let suffix = vm.string(" makes a sound");
    speak.get_local(0)?;
    speak.emit_with_operand(Op::GetProperty, field)?;
    speak.emit_constant(suffix)?;
    speak.emit(Op::Add);
    speak.emit(Op::Return);

    let mut dog_speak = ChunkBuilder::new("speak");
    let animal = name(vm, &mut dog_speak, "Animal");
    let method = name(vm, &mut dog_speak, "speak");
    let bang = vm.string("!");
    dog_speak.get_local(0)?;
    dog_speak.get_global(animal)?;
    dog_speak.emit_with_operand(Op::GetSuper, method)?;
    dog_speak.call(0)?;
    dog_speak.emit_constant(bang)?;
    dog_speak.emit(Op::Add);
    dog_speak.emit(Op::Return);

    let mut b = ChunkBuilder::new("<module>");
    let animal = name(vm, &mut b, "Animal");
    let dog = name(vm, &mut b, "Dog");
    let init_name = name(vm, &mut b, "__init__");
    let speak_name = name(vm, &mut b, "speak");
    let d = name(vm, &mut b, "d");

    b.emit_with_operand(Op::Class, animal)?;
    closure_of(vm, &mut b, "__init__", 2, Vec::new(), init.finish(), FunctionKind::Plain)?;
    b.emit_with_operand(Op::ClassProperty, init_name)?;
    closure_of(vm, &mut b, "speak", 1, Vec::new(), speak.finish(), FunctionKind::Plain)?;
    b.emit_with_operand(Op::ClassProperty, speak_name)?;
    b.emit(Op::Finalize);
    b.define_global(animal)?;

    b.set_line(4);
    b.emit_with_operand(Op::Class, dog)?;
    b.get_global(animal)?;
    b.emit(Op::Inherit);
    closure_of(vm, &mut b, "speak", 1, Vec::new(), dog_speak.finish(), FunctionKind::Plain)?;
    b.emit_with_operand(Op::ClassProperty, speak_name)?;
    b.emit(Op::Finalize);
    b.define_global(dog)?;

    b.set_line(6);
    let rex = vm.string("Rex");
    b.get_global(dog)?;
    b.emit_constant(rex)?;
    b.call(1)?;
    b.define_global(d)?;
    b.get_global(d)?;
    b.emit_with_operand(Op::GetMethod, speak_name)?;
    b.emit_with_operand(Op::CallMethod, 0)?;
    b.emit(Op::Print);
    Ok(finish_module(b))
}

/// Emit `for x in <iterable on stack>: print(x)`.
fn print_each(b: &mut ChunkBuilder) -> Result<(), BuildError> {
    b.emit(Op::InvokeIter);
    let top = b.current_offset();
    let done = b.jump(Op::CallIter);
    b.emit(Op::Print);
    b.loop_to(Op::LoopIter, top)?;
    b.bind(done)?;
    b.emit(Op::Pop);
    Ok(())
}

fn range_loop(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut b = ChunkBuilder::new("<module>");
    let range = name(vm, &mut b, "range");
    b.get_global(range)?;
    b.emit_constant(Value::Integer(1))?;
    b.emit_constant(Value::Integer(4))?;
    b.call(2)?;
    print_each(&mut b)?;
    Ok(finish_module(b))
}

fn generator(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut body = ChunkBuilder::new("gen");
    for n in 1..=3 {
        body.emit_constant(Value::Integer(n))?;
        body.emit(Op::Yield);
        body.emit(Op::Pop);
    }
    body.emit(Op::None);
    body.emit(Op::Return);

    let mut b = ChunkBuilder::new("<module>");
    define_function(vm, &mut b, "gen", 0, body.finish(), FunctionKind::Generator)?;
    let gen_name = name(vm, &mut b, "gen");
    b.get_global(gen_name)?;
    b.call(0)?;
    print_each(&mut b)?;
    Ok(finish_module(b))
}

/// ```text
/// def inner(): yield 1; yield 2; return 10
/// def outer(): r = yield from inner(); yield r
/// for v in outer(): print(v)
/// ```
fn yield_from(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut inner = ChunkBuilder::new("inner");
    for n in 1..=2 {
        inner.emit_constant(Value::Integer(n))?;
        inner.emit(Op::Yield);
        inner.emit(Op::Pop);
    }
    inner.emit_constant(Value::Integer(10))?;
    inner.emit(Op::Return);

    let mut outer = ChunkBuilder::new("outer");
    let inner_name = name(vm, &mut outer, "inner");
    outer.get_global(inner_name)?;
    outer.call(0)?;
    let done = outer.jump(Op::YieldFrom);
    outer.bind(done)?;
    outer.emit(Op::Yield);
    outer.emit(Op::Pop);
    outer.emit(Op::None);
    outer.emit(Op::Return);

    let mut b = ChunkBuilder::new("<module>");
    define_function(vm, &mut b, "inner", 0, inner.finish(), FunctionKind::Generator)?;
    define_function(vm, &mut b, "outer", 0, outer.finish(), FunctionKind::Generator)?;
    let outer_name = name(vm, &mut b, "outer");
    b.get_global(outer_name)?;
    b.call(0)?;
    print_each(&mut b)?;
    Ok(finish_module(b))
}

/// ```text
/// try: missing
/// except NameError: print("caught")
/// ```
fn try_except(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut b = ChunkBuilder::new("<module>");
    let missing = name(vm, &mut b, "missing");
    let name_error = name(vm, &mut b, "NameError");

    let handler = b.jump(Op::PushTry);
    b.set_line(2);
    b.get_global(missing)?;
    b.emit(Op::Pop);
    b.emit(Op::PopHandler);
    let end = b.jump(Op::Jump);

    b.bind(handler)?;
    b.set_line(3);
    b.get_global(name_error)?;
    b.emit(Op::FilterExcept);
    let reraise = b.jump(Op::PopJumpIfFalse);
    b.emit(Op::Pop);
    print_string(vm, &mut b, "caught")?;
    let handled = b.jump(Op::Jump);
    b.bind(reraise)?;
    b.emit(Op::Raise);

    b.bind(end)?;
    b.bind(handled)?;
    Ok(finish_module(b))
}

fn with_demo(vm: &mut Vm) -> Result<Chunk, BuildError> {
    with_statement(vm, WithFault::Nothing)
}

/// Where the `with` demo hits an undefined global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithFault {
    Nothing,
    Enter,
    Body,
}

/// ```text
/// class Manager:
///     def __enter__(self): print("enter"); return self
///     def __exit__(self, exc): print("exit")
/// with Manager(): print("body")   # or: missing
/// ```
pub fn with_statement(vm: &mut Vm, fault: WithFault) -> Result<Chunk, BuildError> {
    let mut enter = ChunkBuilder::new("__enter__");
    print_string(vm, &mut enter, "enter")?;
    if fault == WithFault::Enter {
        let missing = name(vm, &mut enter, "missing");
        enter.get_global(missing)?;
        enter.emit(Op::Pop);
    }
    enter.get_local(0)?;
    enter.emit(Op::Return);

    let mut exit = ChunkBuilder::new("__exit__");
    print_string(vm, &mut exit, "exit")?;
    exit.emit(Op::None);
    exit.emit(Op::Return);

    let mut b = ChunkBuilder::new("<module>");
    let manager = name(vm, &mut b, "Manager");
    let enter_name = name(vm, &mut b, "__enter__");
    let exit_name = name(vm, &mut b, "__exit__");
    b.emit_with_operand(Op::Class, manager)?;
    closure_of(vm, &mut b, "__enter__", 1, Vec::new(), enter.finish(), FunctionKind::Plain)?;
    b.emit_with_operand(Op::ClassProperty, enter_name)?;
    closure_of(vm, &mut b, "__exit__", 2, Vec::new(), exit.finish(), FunctionKind::Plain)?;
    b.emit_with_operand(Op::ClassProperty, exit_name)?;
    b.emit(Op::Finalize);
    b.define_global(manager)?;

    b.set_line(4);
    b.get_global(manager)?;
    b.call(0)?;
    let cleanup = b.jump(Op::PushWith);
    b.emit(Op::Pop);
    if fault == WithFault::Body {
        let missing = name(vm, &mut b, "missing");
        b.get_global(missing)?;
        b.emit(Op::Pop);
    } else {
        print_string(vm, &mut b, "body")?;
    }
    b.emit(Op::PopHandler);
    b.emit(Op::None);
    b.bind(cleanup)?;
    b.emit(Op::CleanupWith);
    b.emit(Op::Pop);
    b.emit(Op::EndFinally);
    Ok(finish_module(b))
}

fn bigint(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut b = ChunkBuilder::new("<module>");
    let bigint = name(vm, &mut b, "bigint");
    for n in [0xFF_FFFF, 1] {
        b.get_global(bigint)?;
        b.emit_constant(Value::Integer(n))?;
        b.call(1)?;
    }
    b.emit(Op::Add);
    b.emit(Op::Print);
    Ok(finish_module(b))
}

fn type_error(vm: &mut Vm) -> Result<Chunk, BuildError> {
    let mut b = ChunkBuilder::new("<module>");
    let a = name(vm, &mut b, "a");
    let s = name(vm, &mut b, "s");
    b.emit_constant(Value::Integer(1))?;
    b.define_global(a)?;
    b.set_line(2);
    let text = vm.string("a");
    b.emit_constant(text)?;
    b.define_global(s)?;
    b.set_line(3);
    b.get_global(a)?;
    b.get_global(s)?;
    b.emit(Op::Add);
    b.emit(Op::Print);
    Ok(finish_module(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmSettings;

    #[test]
    fn demo_names_are_unique() {
        for (i, demo) in DEMOS.iter().enumerate() {
            assert!(DEMOS[i + 1..].iter().all(|other| other.name != demo.name));
        }
        assert!(find("arith").is_some());
        assert!(find("nope").is_none());
    }

    #[test]
    fn every_demo_assembles_and_disassembles() {
        let mut vm = Vm::new(VmSettings::default()).unwrap();
        for demo in DEMOS {
            let chunk = (demo.build)(&mut vm).unwrap();
            let listing = vm.disassemble(&chunk);
            assert!(listing.starts_with("== <module> =="), "{}", demo.name);
            assert!(listing.contains("Return"), "{}", demo.name);
        }
    }
}
