use itertools::Itertools;

use crate::code::{CodeObject, Const};
use crate::decode::instructions;
use crate::opcode::{CallArgs, CompareOp, Opcode};

pub fn format_const(constant: &Const) -> String {
    match constant {
        Const::None => "None".to_string(),
        Const::Bool(true) => "True".to_string(),
        Const::Bool(false) => "False".to_string(),
        Const::Int(value) => value.to_string(),
        Const::Float(value) => format!("{:?}", value),
        Const::Str(value) => format!("{:?}", value),
        Const::Tuple(items) if items.len() == 1 => format!("({},)", format_const(&items[0])),
        Const::Tuple(items) => format!("({})", items.iter().map(format_const).join(", ")),
        Const::Code(code) => format!("<code {}>", code.name),
    }
}

/// Disassembles a code object and its nested functions.
pub fn format_code(code: &CodeObject) -> String {
    let mut output = String::new();
    format_into(code, 0, &mut output);
    output
}

fn format_into(code: &CodeObject, depth: usize, output: &mut String) {
    let pad = "  ".repeat(depth);
    output.push_str(&format!(
        "{}code {}(argcount: {}, locals: {}, cells: {})\n",
        pad,
        code.name,
        code.argcount,
        code.nlocals,
        code.num_cells()
    ));
    if !code.consts.is_empty() {
        output.push_str(&format!(
            "{}  consts: [{}]\n",
            pad,
            code.consts.iter().map(format_const).join(", ")
        ));
    }
    for instr in instructions(&code.code) {
        let instr = match instr {
            Ok(instr) => instr,
            Err(err) => {
                output.push_str(&format!("{}  <{}>\n", pad, err));
                break;
            }
        };
        let detail = if instr.opcode.has_argument() {
            format!(" {}{}", instr.arg, describe_arg(code, instr.opcode, instr.arg, instr.jump_target()))
        } else {
            String::new()
        };
        output.push_str(&format!(
            "{}  {:>5} {}{}\n",
            pad, instr.offset, instr.opcode, detail
        ));
    }
    for nested in code.nested_code() {
        format_into(nested, depth + 1, output);
    }
}

fn describe_arg(code: &CodeObject, opcode: Opcode, arg: u32, target: Option<usize>) -> String {
    let described = if let Some(target) = target {
        Some(format!("to {}", target))
    } else if opcode.uses_const() {
        code.consts.get(arg as usize).map(format_const)
    } else if opcode.uses_name() {
        code.name_at(arg).map(str::to_string)
    } else if opcode.uses_local() {
        code.varname_at(arg).map(str::to_string)
    } else if opcode.uses_cell() {
        code.cell_name_at(arg).map(str::to_string)
    } else if opcode == Opcode::CompareOp {
        CompareOp::from_arg(arg).map(|op| op.symbol().to_string())
    } else if matches!(
        opcode,
        Opcode::CallFunction
            | Opcode::CallFunctionVar
            | Opcode::CallFunctionKw
            | Opcode::CallFunctionVarKw
    ) {
        let args = CallArgs::unpack(arg);
        Some(format!("{} positional, {} keyword", args.positional, args.keyword))
    } else {
        None
    };
    described
        .map(|text| format!(" ({})", text))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;

    #[test]
    fn disassembly_names_operands() {
        let mut builder = CodeBuilder::new("add").params(&["a", "b"]);
        builder.load_fast("a").load_fast("b").op(Opcode::BinaryAdd).ret();
        let text = format_code(&builder.build().unwrap());
        assert!(text.starts_with("code add(argcount: 2, locals: 2, cells: 0)"));
        assert!(text.contains("LOAD_FAST 1 (b)"));
        assert!(text.contains("BINARY_ADD"));
    }

    #[test]
    fn formats_tuples() {
        let single = Const::Tuple(vec![Const::Int(1)]);
        let pair = Const::Tuple(vec![Const::Str("x".into()), Const::None]);
        assert_eq!(format_const(&single), "(1,)");
        assert_eq!(format_const(&pair), "(\"x\", None)");
    }
}
