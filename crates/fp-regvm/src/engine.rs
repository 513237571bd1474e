//! Compile-or-fallback execution.
//!
//! An `Engine` owns the compiled-code cache and is shared freely between threads. Each
//! top-level invocation runs in a `Session`, which carries the instruction ceiling, the call
//! depth and the output buffer. Every function call made during the invocation goes back
//! through the session, so callees are compiled lazily and a rejected callee runs on the
//! stack interpreter while its callers stay on the register interpreter.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use fp_bytecode::CodeObject;
use fp_stackvm::{
    bind_arguments, module_frame, object, ExecLimits, Frame, Function, FunctionRunner, Globals,
    Value, VmError,
};
use tracing::{debug, warn};

use crate::cache::{CacheLookup, CodeCache};
use crate::config::EngineOptions;
use crate::encode::RegisterCode;
use crate::error::CompileError;
use crate::{compile, interp};

pub struct Engine {
    options: EngineOptions,
    cache: CodeCache,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            cache: CodeCache::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    /// Compiled form of `code`, or `None` when it runs on the stack interpreter.
    pub fn compile(&self, code: &Arc<CodeObject>) -> Option<Arc<RegisterCode>> {
        if !self.options.enable_register_vm {
            return None;
        }
        match self.cache.lookup(code) {
            CacheLookup::Compiled(compiled) => Some(compiled),
            CacheLookup::Rejected(_) => None,
            CacheLookup::Missing => self.try_compile(code).ok(),
        }
    }

    /// Compiles `code` unless a compilation is already cached, recording failures.
    pub fn try_compile(&self, code: &Arc<CodeObject>) -> Result<Arc<RegisterCode>, CompileError> {
        if let Some(compiled) = self.cache.get(code) {
            return Ok(compiled);
        }
        match compile(code, &self.options.compiler) {
            Ok(compiled) => Ok(self.cache.insert(code, compiled)),
            Err(err) => {
                if err.is_unsupported() {
                    debug!(function = %code.name, error = %err, "falling back to stack vm");
                } else {
                    warn!(function = %code.name, error = %err, "register compilation failed");
                }
                self.cache.reject(code, err.to_string());
                Err(err)
            }
        }
    }

    pub fn session(&self) -> Session<'_> {
        Session {
            engine: self,
            limits: ExecLimits::new(self.options.instruction_limit, self.options.max_depth),
            output: RefCell::new(String::new()),
        }
    }

    pub fn run_module(&self, code: &Arc<CodeObject>, globals: &Globals) -> Result<Value, VmError> {
        self.session().run_module(code, globals)
    }

    pub fn call(
        &self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError> {
        self.session().call(callee, args, kwargs)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

/// State of one top-level invocation.
pub struct Session<'e> {
    engine: &'e Engine,
    limits: ExecLimits,
    output: RefCell<String>,
}

impl Session<'_> {
    pub fn run_module(&self, code: &Arc<CodeObject>, globals: &Globals) -> Result<Value, VmError> {
        self.run_code(code, globals, module_frame(code))
    }

    pub fn call(
        &self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError> {
        object::call(self, callee, args, kwargs)
    }

    /// Text written by `PRINT_ITEM` and `PRINT_NEWLINE` in fallback functions.
    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }

    pub fn executed(&self) -> u64 {
        self.limits.executed()
    }

    fn run_code(
        &self,
        code: &Arc<CodeObject>,
        globals: &Globals,
        frame: Frame,
    ) -> Result<Value, VmError> {
        match self.engine.compile(code) {
            Some(compiled) => interp::execute(self, &compiled, globals, frame),
            None => fp_stackvm::execute(self, code, globals, frame),
        }
    }
}

impl FunctionRunner for Session<'_> {
    fn call_function(
        &self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError> {
        let frame = bind_arguments(function, args, kwargs)?;
        self.run_code(&function.code, &function.globals, frame)
    }

    fn limits(&self) -> &ExecLimits {
        &self.limits
    }

    fn write_output(&self, text: &str) {
        self.output.borrow_mut().push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_bytecode::{CodeBuilder, Const, Opcode};
    use pretty_assertions::assert_eq;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn engine_is_shareable() {
        assert_send_sync::<Engine>();
        assert_send_sync::<RegisterCode>();
    }

    #[test]
    fn rejected_callee_runs_on_the_stack_vm() {
        // def show(x): print x; return x * 2
        let mut show = CodeBuilder::new("show").params(&["x"]);
        show.load_fast("x").op(Opcode::PrintItem).op(Opcode::PrintNewline);
        show.load_fast("x").load_int(2).op(Opcode::BinaryMultiply).ret();
        let show = Arc::new(show.build().unwrap());

        let mut module = CodeBuilder::new("<module>");
        module.load_const(Const::Code(show.clone()));
        module.op_arg(Opcode::MakeFunction, 0);
        module.named(Opcode::StoreName, "show");
        module.named(Opcode::LoadName, "show").load_int(21).call(1).ret();
        let module = Arc::new(module.build().unwrap());

        let engine = Engine::default();
        let session = engine.session();
        let result = session.run_module(&module, &Globals::new()).unwrap();
        assert_eq!(result, Value::Int(42));
        assert_eq!(session.output(), "21\n");
        assert!(engine.cache().get(&module).is_some());
        assert!(engine.cache().is_rejected(&show));
        assert!(engine.try_compile(&show).unwrap_err().is_unsupported());
    }

    #[test]
    fn disabled_register_vm_compiles_nothing() {
        let mut builder = CodeBuilder::new("<module>");
        builder.load_int(3).ret();
        let code = Arc::new(builder.build().unwrap());
        let engine = Engine::new(EngineOptions {
            enable_register_vm: false,
            ..EngineOptions::default()
        });
        assert_eq!(
            engine.run_module(&code, &Globals::new()).unwrap(),
            Value::Int(3)
        );
        assert_eq!(engine.cache().compiled_len(), 0);
    }

    #[test]
    fn limits_span_nested_calls() {
        // def spin(): while True: pass
        let mut spin = CodeBuilder::new("spin");
        let head = spin.new_label();
        spin.bind(head);
        spin.jump(Opcode::JumpAbsolute, head);
        let spin = Arc::new(spin.build().unwrap());

        let mut module = CodeBuilder::new("<module>");
        module.load_const(Const::Code(spin));
        module.op_arg(Opcode::MakeFunction, 0);
        module.call(0).ret();
        let module = Arc::new(module.build().unwrap());

        let engine = Engine::new(EngineOptions {
            instruction_limit: Some(500),
            ..EngineOptions::default()
        });
        let err = engine.run_module(&module, &Globals::new()).unwrap_err();
        assert_eq!(err, VmError::InstructionLimit { limit: 500 });
    }
}
