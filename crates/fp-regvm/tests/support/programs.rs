#![allow(dead_code)]
use std::sync::Arc;

use fp_bytecode::{CodeBuilder, CodeObject, CompareOp, Const, Opcode};

/// Module-level programs shared by the scenario and equivalence tests.
pub struct Program {
    pub name: &'static str,
    pub code: Arc<CodeObject>,
    /// Whether the register compiler accepts the module code itself.
    pub compiles: bool,
}

fn program(name: &'static str, compiles: bool, builder: &mut CodeBuilder) -> Program {
    Program {
        name,
        code: builder.build_arc().expect("program should assemble"),
        compiles,
    }
}

pub fn corpus() -> Vec<Program> {
    vec![
        arithmetic(),
        loop_with_break(),
        swap(),
        conditional_expression(0),
        conditional_expression(1),
        list_building(),
        dict_building(),
        call_with_defaults(),
        call_with_keywords(),
        closure_cells(),
        recursive_factorial(10),
        short_circuit(),
        unpack_tuple(),
        while_with_continue(),
        zero_division(),
        unbound_local(),
        print_fallback(),
        chained_compare(5),
        chained_compare(50),
        augmented_subscript(),
        chained_assignment(),
        dict_literal(),
        slicing(),
        set_literal(),
        attributes(),
        delete_missing_attribute(),
        star_arguments(),
        raise_value_error(),
        global_counter(),
        unary_operators(),
        rotations(),
        constant_identity(),
        wide_tuple(),
    ]
}

/// return (40 + 2) * 3 - 6 // 4
pub fn arithmetic() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(40).load_int(2).op(Opcode::BinaryAdd);
    builder.load_int(3).op(Opcode::BinaryMultiply);
    builder.load_int(6).load_int(4).op(Opcode::BinaryFloorDivide);
    builder.op(Opcode::BinarySubtract).ret();
    program("arithmetic", true, &mut builder)
}

/// return 40 + 2
pub fn constant_sum() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(40).load_int(2).op(Opcode::BinaryAdd).ret();
    program("constant_sum", true, &mut builder)
}

/// total = 0
/// for x in range(10):
///     if x == 4: break
///     total += x
/// return total
pub fn loop_with_break() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let exit = builder.new_label();
    let head = builder.new_label();
    let done = builder.new_label();
    let skip = builder.new_label();
    builder.load_int(0).store_fast("total");
    builder.jump(Opcode::SetupLoop, exit);
    builder.load_global("range").load_int(10).call(1).op(Opcode::GetIter);
    builder.bind(head);
    builder.jump(Opcode::ForIter, done);
    builder.store_fast("x");
    builder.load_fast("x").load_int(4).compare(CompareOp::Eq);
    builder.jump(Opcode::PopJumpIfFalse, skip);
    builder.op(Opcode::BreakLoop);
    builder.bind(skip);
    builder
        .load_fast("total")
        .load_fast("x")
        .op(Opcode::InplaceAdd)
        .store_fast("total");
    builder.jump(Opcode::JumpAbsolute, head);
    builder.bind(done);
    builder.op(Opcode::PopBlock);
    builder.bind(exit);
    builder.load_fast("total").ret();
    program("loop_with_break", true, &mut builder)
}

/// total = 0
/// for i in range(5): total += i
/// return total
pub fn range_sum() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let head = builder.new_label();
    let done = builder.new_label();
    let exit = builder.new_label();
    builder.load_int(0).store_fast("total");
    builder.jump(Opcode::SetupLoop, exit);
    builder.load_global("range").load_int(5).call(1).op(Opcode::GetIter);
    builder.bind(head);
    builder.jump(Opcode::ForIter, done);
    builder.store_fast("i");
    builder
        .load_fast("total")
        .load_fast("i")
        .op(Opcode::InplaceAdd)
        .store_fast("total");
    builder.jump(Opcode::JumpAbsolute, head);
    builder.bind(done);
    builder.op(Opcode::PopBlock);
    builder.bind(exit);
    builder.load_fast("total").ret();
    program("range_sum", true, &mut builder)
}

/// a = 1; b = 2
/// a, b = b, a
/// return (a, b)
pub fn swap() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(1).store_fast("a");
    builder.load_int(2).store_fast("b");
    builder.load_fast("b").load_fast("a").op(Opcode::RotTwo);
    builder.store_fast("a").store_fast("b");
    builder.load_fast("a").load_fast("b").op_arg(Opcode::BuildTuple, 2).ret();
    program("swap", true, &mut builder)
}

/// c = flag; a = 5; b = 7
/// return (a if c else b) + 1
pub fn conditional_expression(flag: i64) -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let other = builder.new_label();
    let join = builder.new_label();
    builder.load_int(flag).store_fast("c");
    builder.load_int(5).store_fast("a");
    builder.load_int(7).store_fast("b");
    builder.load_fast("c");
    builder.jump(Opcode::PopJumpIfFalse, other);
    builder.load_fast("a");
    builder.jump(Opcode::JumpForward, join);
    builder.bind(other);
    builder.load_fast("b");
    builder.bind(join);
    builder.load_int(1).op(Opcode::BinaryAdd).ret();
    let name = if flag == 0 {
        "conditional_expression_false"
    } else {
        "conditional_expression_true"
    };
    program(name, true, &mut builder)
}

/// xs = []
/// for i in range(4): xs.append(i * i)
/// return (xs[3] + len(xs), 4 in xs)
pub fn list_building() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let head = builder.new_label();
    let done = builder.new_label();
    let exit = builder.new_label();
    builder.op_arg(Opcode::BuildList, 0).store_fast("xs");
    builder.jump(Opcode::SetupLoop, exit);
    builder.load_global("range").load_int(4).call(1).op(Opcode::GetIter);
    builder.bind(head);
    builder.jump(Opcode::ForIter, done);
    builder.store_fast("i");
    builder.load_fast("xs").load_attr("append");
    builder.load_fast("i").load_fast("i").op(Opcode::BinaryMultiply);
    builder.call(1).op(Opcode::PopTop);
    builder.jump(Opcode::JumpAbsolute, head);
    builder.bind(done);
    builder.op(Opcode::PopBlock);
    builder.bind(exit);
    builder.load_fast("xs").load_int(3).op(Opcode::BinarySubscr);
    builder.load_global("len").load_fast("xs").call(1);
    builder.op(Opcode::BinaryAdd);
    builder.load_int(4).load_fast("xs").compare(CompareOp::In);
    builder.op_arg(Opcode::BuildTuple, 2).ret();
    program("list_building", true, &mut builder)
}

/// d = {}
/// d["k"] = 3; d["j"] = 4
/// return d["k"] * d["j"] + len(d)
pub fn dict_building() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.op_arg(Opcode::BuildMap, 0).store_fast("d");
    builder.load_int(3).load_fast("d").load_const(Const::Str("k".into()));
    builder.op(Opcode::StoreSubscr);
    builder.load_int(4).load_fast("d").load_const(Const::Str("j".into()));
    builder.op(Opcode::StoreSubscr);
    builder.load_fast("d").load_const(Const::Str("k".into())).op(Opcode::BinarySubscr);
    builder.load_fast("d").load_const(Const::Str("j".into())).op(Opcode::BinarySubscr);
    builder.op(Opcode::BinaryMultiply);
    builder.load_global("len").load_fast("d").call(1);
    builder.op(Opcode::BinaryAdd).ret();
    program("dict_building", true, &mut builder)
}

/// def add(a, b=10): return a + b
/// return add(5)
pub fn call_with_defaults() -> Program {
    let mut inner = CodeBuilder::new("add").params(&["a", "b"]);
    inner.load_fast("a").load_fast("b").op(Opcode::BinaryAdd).ret();
    let inner = inner.build_arc().expect("inner should assemble");

    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(10);
    builder.load_const(Const::Code(inner));
    builder.op_arg(Opcode::MakeFunction, 1);
    builder.named(Opcode::StoreName, "add");
    builder.named(Opcode::LoadName, "add").load_int(5).call(1).ret();
    program("call_with_defaults", true, &mut builder)
}

/// def sub(a, b): return a - b
/// return sub(b=1, a=5)
pub fn call_with_keywords() -> Program {
    let mut inner = CodeBuilder::new("sub").params(&["a", "b"]);
    inner.load_fast("a").load_fast("b").op(Opcode::BinarySubtract).ret();
    let inner = inner.build_arc().expect("inner should assemble");

    let mut builder = CodeBuilder::new("<module>");
    builder.load_const(Const::Code(inner));
    builder.op_arg(Opcode::MakeFunction, 0);
    builder.named(Opcode::StoreName, "sub");
    builder.named(Opcode::LoadName, "sub");
    builder.load_const(Const::Str("b".into())).load_int(1);
    builder.load_const(Const::Str("a".into())).load_int(5);
    builder.call_kw(0, 2).ret();
    program("call_with_keywords", true, &mut builder)
}

/// n = 1
/// def get(): return n
/// n = 2
/// return get()
pub fn closure_cells() -> Program {
    let mut get = CodeBuilder::new("get").freevars(&["n"]);
    get.deref(Opcode::LoadDeref, "n").expect("free variable").ret();
    let get = get.build_arc().expect("inner should assemble");

    let mut outer = CodeBuilder::new("<module>").cellvars(&["n"]);
    outer.load_int(1);
    outer.deref(Opcode::StoreDeref, "n").expect("cell variable");
    outer.deref(Opcode::LoadClosure, "n").expect("cell variable");
    outer.op_arg(Opcode::BuildTuple, 1);
    outer.load_const(Const::Code(get));
    outer.op_arg(Opcode::MakeClosure, 0);
    outer.store_fast("get");
    outer.load_int(2);
    outer.deref(Opcode::StoreDeref, "n").expect("cell variable");
    outer.load_fast("get").call(0).ret();
    program("closure_cells", true, &mut outer)
}

/// def fact(n):
///     if n < 2: return 1
///     return n * fact(n - 1)
/// return fact(arg)
pub fn recursive_factorial(arg: i64) -> Program {
    let mut fact = CodeBuilder::new("fact").params(&["n"]);
    let recurse = fact.new_label();
    fact.load_fast("n").load_int(2).compare(CompareOp::Lt);
    fact.jump(Opcode::PopJumpIfFalse, recurse);
    fact.load_int(1).ret();
    fact.bind(recurse);
    fact.load_fast("n");
    fact.load_global("fact").load_fast("n").load_int(1).op(Opcode::BinarySubtract);
    fact.call(1).op(Opcode::BinaryMultiply).ret();
    let fact = fact.build_arc().expect("inner should assemble");

    let mut builder = CodeBuilder::new("<module>");
    builder.load_const(Const::Code(fact));
    builder.op_arg(Opcode::MakeFunction, 0);
    builder.named(Opcode::StoreName, "fact");
    builder.named(Opcode::LoadName, "fact").load_int(arg).call(1).ret();
    program("recursive_factorial", true, &mut builder)
}

/// x = 0; y = 5
/// return (x and y) or y + 1
pub fn short_circuit() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let after_and = builder.new_label();
    let after_or = builder.new_label();
    builder.load_int(0).store_fast("x");
    builder.load_int(5).store_fast("y");
    builder.load_fast("x");
    builder.jump(Opcode::JumpIfFalseOrPop, after_and);
    builder.load_fast("y");
    builder.bind(after_and);
    builder.jump(Opcode::JumpIfTrueOrPop, after_or);
    builder.load_fast("y").load_int(1).op(Opcode::BinaryAdd);
    builder.bind(after_or);
    builder.ret();
    program("short_circuit", true, &mut builder)
}

/// a, b = (1, 2)
/// return a * 10 + b
pub fn unpack_tuple() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_const(Const::Tuple(vec![Const::Int(1), Const::Int(2)]));
    builder.op_arg(Opcode::UnpackSequence, 2);
    builder.store_fast("a").store_fast("b");
    builder.load_fast("a").load_int(10).op(Opcode::BinaryMultiply);
    builder.load_fast("b").op(Opcode::BinaryAdd).ret();
    program("unpack_tuple", true, &mut builder)
}

/// i = 0; total = 0
/// while i < 6:
///     i += 1
///     if not i % 2: continue
///     total += i
/// return total
pub fn while_with_continue() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let exit = builder.new_label();
    let head = builder.new_label();
    let done = builder.new_label();
    let body = builder.new_label();
    builder.load_int(0).store_fast("i");
    builder.load_int(0).store_fast("total");
    builder.jump(Opcode::SetupLoop, exit);
    builder.bind(head);
    builder.load_fast("i").load_int(6).compare(CompareOp::Lt);
    builder.jump(Opcode::PopJumpIfFalse, done);
    builder
        .load_fast("i")
        .load_int(1)
        .op(Opcode::InplaceAdd)
        .store_fast("i");
    builder.load_fast("i").load_int(2).op(Opcode::BinaryModulo);
    builder.jump(Opcode::PopJumpIfTrue, body);
    builder.jump(Opcode::ContinueLoop, head);
    builder.bind(body);
    builder
        .load_fast("total")
        .load_fast("i")
        .op(Opcode::InplaceAdd)
        .store_fast("total");
    builder.jump(Opcode::JumpAbsolute, head);
    builder.bind(done);
    builder.op(Opcode::PopBlock);
    builder.bind(exit);
    builder.load_fast("total").ret();
    program("while_with_continue", true, &mut builder)
}

/// return 1 // 0
pub fn zero_division() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(1).load_int(0).op(Opcode::BinaryFloorDivide).ret();
    program("zero_division", true, &mut builder)
}

/// return ghost
pub fn unbound_local() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_fast("ghost").ret();
    program("unbound_local", true, &mut builder)
}

/// print 7
/// return 7
pub fn print_fallback() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(7).op(Opcode::PrintItem).op(Opcode::PrintNewline);
    builder.load_int(7).ret();
    program("print_fallback", false, &mut builder)
}

/// while True: pass
pub fn spin() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let head = builder.new_label();
    builder.bind(head);
    builder.jump(Opcode::JumpAbsolute, head);
    program("spin", true, &mut builder)
}

/// x = arg
/// return 1 < x < 10
pub fn chained_compare(arg: i64) -> Program {
    let mut builder = CodeBuilder::new("<module>");
    let cleanup = builder.new_label();
    let end = builder.new_label();
    builder.load_int(arg).store_fast("x");
    builder.load_int(1).load_fast("x");
    builder.op(Opcode::DupTop).op(Opcode::RotThree);
    builder.compare(CompareOp::Lt);
    builder.jump(Opcode::JumpIfFalseOrPop, cleanup);
    builder.load_int(10).compare(CompareOp::Lt);
    builder.jump(Opcode::JumpForward, end);
    builder.bind(cleanup);
    builder.op(Opcode::RotTwo).op(Opcode::PopTop);
    builder.bind(end);
    builder.ret();
    let name = if (1..10).contains(&arg) {
        "chained_compare_inside"
    } else {
        "chained_compare_outside"
    };
    program(name, true, &mut builder)
}

/// xs = [1, 2, 3]
/// xs[1] += 10
/// return xs[1]
pub fn augmented_subscript() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(1).load_int(2).load_int(3);
    builder.op_arg(Opcode::BuildList, 3).store_fast("xs");
    builder.load_fast("xs").load_int(1);
    builder.op_arg(Opcode::DupTopx, 2).op(Opcode::BinarySubscr);
    builder.load_int(10).op(Opcode::InplaceAdd);
    builder.op(Opcode::RotThree).op(Opcode::StoreSubscr);
    builder.load_fast("xs").load_int(1).op(Opcode::BinarySubscr).ret();
    program("augmented_subscript", true, &mut builder)
}

/// x = y = [1]
/// x.append(2)
/// return len(y) + y[1]
pub fn chained_assignment() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(1).op_arg(Opcode::BuildList, 1);
    builder.op(Opcode::DupTop).store_fast("x").store_fast("y");
    builder.load_fast("x").load_attr("append").load_int(2);
    builder.call(1).op(Opcode::PopTop);
    builder.load_global("len").load_fast("y").call(1);
    builder.load_fast("y").load_int(1).op(Opcode::BinarySubscr);
    builder.op(Opcode::BinaryAdd).ret();
    program("chained_assignment", true, &mut builder)
}

/// d = {"a": 1, "b": 2}
/// return d["a"] + d["b"] * 10
pub fn dict_literal() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.op_arg(Opcode::BuildMap, 2);
    builder.load_int(1).load_const(Const::Str("a".into())).op(Opcode::StoreMap);
    builder.load_int(2).load_const(Const::Str("b".into())).op(Opcode::StoreMap);
    builder.store_fast("d");
    builder.load_fast("d").load_const(Const::Str("a".into())).op(Opcode::BinarySubscr);
    builder.load_fast("d").load_const(Const::Str("b".into())).op(Opcode::BinarySubscr);
    builder.load_int(10).op(Opcode::BinaryMultiply);
    builder.op(Opcode::BinaryAdd).ret();
    program("dict_literal", true, &mut builder)
}

/// xs = [0, 1, 2, 3, 4]
/// del xs[0]
/// return (xs[0:4:2], xs[1:3])
pub fn slicing() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    for value in 0..5 {
        builder.load_int(value);
    }
    builder.op_arg(Opcode::BuildList, 5).store_fast("xs");
    builder.load_fast("xs").load_int(0).op(Opcode::DeleteSubscr);
    builder.load_fast("xs").load_int(0).load_int(4).load_int(2);
    builder.op_arg(Opcode::BuildSlice, 3).op(Opcode::BinarySubscr);
    builder.load_fast("xs").load_int(1).load_int(3);
    builder.op_arg(Opcode::BuildSlice, 2).op(Opcode::BinarySubscr);
    builder.op_arg(Opcode::BuildTuple, 2).ret();
    program("slicing", true, &mut builder)
}

/// s = {1, 2, 2}
/// return (len(s), 2 in s, 5 in s)
pub fn set_literal() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(1).load_int(2).load_int(2);
    builder.op_arg(Opcode::BuildSet, 3).store_fast("s");
    builder.load_global("len").load_fast("s").call(1);
    builder.load_int(2).load_fast("s").compare(CompareOp::In);
    builder.load_int(5).load_fast("s").compare(CompareOp::In);
    builder.op_arg(Opcode::BuildTuple, 3).ret();
    program("set_literal", true, &mut builder)
}

/// o = namespace()
/// o.x = 5; o.y = 6
/// del o.x
/// return o.y
pub fn attributes() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_global("namespace").call(0).store_fast("o");
    builder.load_int(5).load_fast("o").named(Opcode::StoreAttr, "x");
    builder.load_int(6).load_fast("o").named(Opcode::StoreAttr, "y");
    builder.load_fast("o").named(Opcode::DeleteAttr, "x");
    builder.load_fast("o").load_attr("y").ret();
    program("attributes", true, &mut builder)
}

/// o = namespace()
/// del o.x
pub fn delete_missing_attribute() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_global("namespace").call(0).store_fast("o");
    builder.load_fast("o").named(Opcode::DeleteAttr, "x");
    builder.load_none().ret();
    program("delete_missing_attribute", true, &mut builder)
}

/// def digits(a, b, c): return a * 100 + b * 10 + c
/// args = (2, 3)
/// kw = {"c": 3, "b": 2}
/// return digits(1, *args) + digits(1, **kw)
pub fn star_arguments() -> Program {
    let mut digits = CodeBuilder::new("digits").params(&["a", "b", "c"]);
    digits.load_fast("a").load_int(100).op(Opcode::BinaryMultiply);
    digits.load_fast("b").load_int(10).op(Opcode::BinaryMultiply);
    digits.op(Opcode::BinaryAdd);
    digits.load_fast("c").op(Opcode::BinaryAdd).ret();
    let digits = digits.build_arc().expect("inner should assemble");

    let mut builder = CodeBuilder::new("<module>");
    builder.load_const(Const::Code(digits));
    builder.op_arg(Opcode::MakeFunction, 0).store_fast("digits");
    builder.load_const(Const::Tuple(vec![Const::Int(2), Const::Int(3)]));
    builder.store_fast("args");
    builder.op_arg(Opcode::BuildMap, 2);
    builder.load_int(3).load_const(Const::Str("c".into())).op(Opcode::StoreMap);
    builder.load_int(2).load_const(Const::Str("b".into())).op(Opcode::StoreMap);
    builder.store_fast("kw");
    builder.load_fast("digits").load_int(1).load_fast("args");
    builder.op_arg(Opcode::CallFunctionVar, 1);
    builder.load_fast("digits").load_int(1).load_fast("kw");
    builder.op_arg(Opcode::CallFunctionKw, 1);
    builder.op(Opcode::BinaryAdd).ret();
    program("star_arguments", true, &mut builder)
}

/// raise ValueError("bad")
pub fn raise_value_error() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder
        .load_global("ValueError")
        .load_const(Const::Str("bad".into()))
        .call(1);
    builder.op_arg(Opcode::RaiseVarargs, 1);
    program("raise_value_error", true, &mut builder)
}

/// def bump():
///     global counter
///     counter = counter + 1
/// counter = 1
/// bump(); bump()
/// return counter
pub fn global_counter() -> Program {
    let mut bump = CodeBuilder::new("bump");
    bump.load_global("counter").load_int(1).op(Opcode::BinaryAdd);
    bump.named(Opcode::StoreGlobal, "counter");
    bump.load_none().ret();
    let bump = bump.build_arc().expect("inner should assemble");

    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(1).named(Opcode::StoreName, "counter");
    builder.load_const(Const::Code(bump));
    builder.op_arg(Opcode::MakeFunction, 0).store_fast("bump");
    builder.load_fast("bump").call(0).op(Opcode::PopTop);
    builder.load_fast("bump").call(0).op(Opcode::PopTop);
    builder.named(Opcode::LoadName, "counter").ret();
    program("global_counter", true, &mut builder)
}

/// x = 5
/// return (-x, not x, ~x, +x)
pub fn unary_operators() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_int(5).store_fast("x");
    builder.load_fast("x").op(Opcode::UnaryNegative);
    builder.load_fast("x").op(Opcode::UnaryNot);
    builder.load_fast("x").op(Opcode::UnaryInvert);
    builder.load_fast("x").op(Opcode::UnaryPositive);
    builder.op_arg(Opcode::BuildTuple, 4).ret();
    program("unary_operators", true, &mut builder)
}

/// a, b, c, d = 1, 2, 3, 4
/// push a, b, c, d; ROT_FOUR; ROT_THREE
/// return the four values as a tuple
pub fn rotations() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    for (value, name) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
        builder.load_int(value).store_fast(name);
    }
    builder.load_fast("a").load_fast("b").load_fast("c").load_fast("d");
    builder.op(Opcode::RotFour).op(Opcode::RotThree);
    builder.op_arg(Opcode::BuildTuple, 4).ret();
    program("rotations", true, &mut builder)
}

/// t = (1, 2)
/// return t is (1, 2)
pub fn constant_identity() -> Program {
    let pair = Const::Tuple(vec![Const::Int(1), Const::Int(2)]);
    let mut builder = CodeBuilder::new("<module>");
    builder.load_const(pair.clone()).store_fast("t");
    builder.load_fast("t").load_const(pair).compare(CompareOp::Is).ret();
    program("constant_identity", true, &mut builder)
}

/// return len((0, 1, ..., 299)) built from 300 separate loads
///
/// The tuple has more operands than a variadic instruction can encode.
pub fn wide_tuple() -> Program {
    let mut builder = CodeBuilder::new("<module>");
    builder.load_global("len");
    for value in 0..WIDE_TUPLE_LEN {
        builder.load_int(value);
    }
    builder.op_arg(Opcode::BuildTuple, WIDE_TUPLE_LEN as u32);
    builder.call(1).ret();
    program("wide_tuple", false, &mut builder)
}

pub const WIDE_TUPLE_LEN: i64 = 300;
