//! Single-pass, register-based parser and bytecode emitter.
//!
//! There is no AST: every expression and statement is parsed and, in the
//! same pass, folded where possible and emitted directly into a
//! [`Function`]'s instruction stream. Conditionals and loops are compiled
//! with the classic "comparison conditionally skips the following `JMP`"
//! pattern — see [`Opcode::IsTrueL`]/[`Opcode::IsFalseL`] — with the
//! `JMP`'s target backpatched once the branch it skips to is known.
//!
//! Jump targets are absolute instruction indices rather than the original's
//! relative offsets; both compiler and executor agree on this, so it's an
//! internal detail, not an observable difference.

use hydrogen_core::{
    Function, HyError, Instruction, Opcode, Program, StructDefinition, UpvalueDesc,
};

use tracing::debug;

use crate::import::{validate_path, SourceLoader};
use crate::lexer::Lexer;
use crate::token::{Token, TokenType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Or,
    And,
    Equality,
    Comparison,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Term,
    Factor,
    Unary,
}

fn precedence_of(kind: TokenType) -> Precedence {
    use TokenType::*;
    match kind {
        Or => Precedence::Or,
        And => Precedence::And,
        Eq | Neq => Precedence::Equality,
        Lt | Le | Gt | Ge => Precedence::Comparison,
        BitOr => Precedence::BitOr,
        BitXor => Precedence::BitXor,
        BitAnd => Precedence::BitAnd,
        Lshift | Rshift => Precedence::Shift,
        Add | Sub | Concat => Precedence::Term,
        Mul | Div | Mod => Precedence::Factor,
        _ => Precedence::None,
    }
}

fn next_precedence(prec: Precedence) -> Precedence {
    match prec {
        Precedence::Or => Precedence::And,
        Precedence::And => Precedence::Equality,
        Precedence::Equality => Precedence::Comparison,
        Precedence::Comparison => Precedence::BitOr,
        Precedence::BitOr => Precedence::BitXor,
        Precedence::BitXor => Precedence::BitAnd,
        Precedence::BitAnd => Precedence::Shift,
        Precedence::Shift => Precedence::Term,
        Precedence::Term => Precedence::Factor,
        Precedence::Factor | Precedence::Unary | Precedence::None => Precedence::Unary,
    }
}

/// The compile-time classification of an already-parsed expression: either
/// a value sitting in a register, or a constant known at parse time that
/// hasn't been emitted anywhere yet (constant folding keeps it this way for
/// as long as possible).
#[derive(Debug, Clone, Copy)]
enum IndexKind {
    Const(u16),
    Local(u16),
}

#[derive(Debug, Clone)]
enum Operand {
    Local(u16),
    Integer(i16),
    Number(f64),
    Str(String),
    True,
    False,
    Nil,
    Function(u32),
    Native(u32),
    TopLevel { package: u32, slot: u16 },
    /// A struct field not yet read: `instance` holds the receiver, already
    /// discharged to a register; `field` is its slot in the shared
    /// field-name table (see `StructDefinition::set_field_at`).
    Field { instance: u16, field: u16 },
    /// An array element not yet read, analogous to `Field`.
    Index { array: u16, index: IndexKind },
    /// A captured enclosing local not yet read: `index` is its slot in the
    /// current function's `upvalues` table. Kept unread (rather than
    /// eagerly emitting `MOV_LU`) so an assignment target can tell this
    /// apart from an ordinary local and write through the upvalue with
    /// `MOV_U*` instead of clobbering a fresh temp.
    Upvalue(u16),
}

impl Operand {
    fn is_constant(&self) -> bool {
        !matches!(
            self,
            Operand::Local(_)
                | Operand::TopLevel { .. }
                | Operand::Field { .. }
                | Operand::Index { .. }
                | Operand::Upvalue(_)
        )
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Integer(i) => Some(*i as f64),
            Operand::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn is_truthy_constant(&self) -> Option<bool> {
        match self {
            Operand::True => Some(true),
            Operand::False | Operand::Nil => Some(false),
            Operand::Integer(_) | Operand::Number(_) | Operand::Str(_) => Some(true),
            _ => None,
        }
    }
}

struct Local {
    name: String,
    slot: u16,
    depth: u32,
}

struct LoopCtx {
    start: u32,
    break_jumps: Vec<u32>,
}

/// Per-function compile state: locals currently in scope and the
/// high-water mark of slots used (becomes `Function::frame_size`).
struct FunctionScope {
    function: u32,
    locals: Vec<Local>,
    next_slot: u16,
    frame_size: u16,
    depth: u32,
    loops: Vec<LoopCtx>,
}

pub struct Parser<'p, 'src, L: SourceLoader> {
    lexer: Lexer<'src>,
    program: &'p mut Program,
    package: u32,
    scopes: Vec<FunctionScope>,
    loader: &'p mut L,
}

impl<'p, 'src, L: SourceLoader> Parser<'p, 'src, L> {
    fn err_unexpected(&self, message: impl Into<String>) -> HyError {
        HyError::Parse {
            message: message.into(),
            line: self.lexer.line(),
            column: 1,
            length: self.lexer.token.len().max(1) as u32,
        }
    }

    fn function_index(&self) -> u32 {
        self.scopes.last().unwrap().function
    }

    fn emit(&mut self, ins: Instruction) -> u32 {
        let fi = self.function_index();
        self.program.functions[fi as usize].emit(ins)
    }

    fn code_len(&self) -> u32 {
        self.program.functions[self.function_index() as usize].code.len() as u32
    }

    fn reserve_slot(&mut self) -> u16 {
        let scope = self.scopes.last_mut().unwrap();
        let slot = scope.next_slot;
        scope.next_slot += 1;
        scope.frame_size = scope.frame_size.max(scope.next_slot);
        slot
    }

    fn release_slots(&mut self, to: u16) {
        self.scopes.last_mut().unwrap().next_slot = to;
    }

    fn declare_local(&mut self, name: String, slot: u16) {
        let depth = self.scopes.last().unwrap().depth;
        self.scopes.last_mut().unwrap().locals.push(Local { name, slot, depth });
    }

    fn find_local(&self, name: &str) -> Option<u16> {
        self.scopes.last().unwrap().locals.iter().rev().find(|l| l.name == name).map(|l| l.slot)
    }

    /// True at file scope, outside any function and any nested block —
    /// where `let` creates a package-level entry instead of a local slot.
    fn is_top_level(&self) -> bool {
        self.scopes.len() == 1 && self.scopes[0].depth == 0
    }

    /// Searches enclosing function scopes for `name`, wiring up an upvalue
    /// chain through every intermediate function if found further out than
    /// the immediately enclosing one.
    fn resolve_upvalue(&mut self, depth_from_top: usize, name: &str) -> Option<u16> {
        if depth_from_top + 1 >= self.scopes.len() {
            return None;
        }
        let enclosing = self.scopes.len() - depth_from_top - 2;
        if let Some(local) = self.scopes[enclosing].locals.iter().rev().find(|l| l.name == name) {
            let slot = local.slot;
            return Some(self.add_upvalue(enclosing + 1, UpvalueDesc { index: slot, is_local: true }));
        }
        let outer_upvalue = self.resolve_upvalue(depth_from_top + 1, name)?;
        Some(self.add_upvalue(enclosing + 1, UpvalueDesc { index: outer_upvalue, is_local: false }))
    }

    fn add_upvalue(&mut self, scope_index: usize, desc: UpvalueDesc) -> u16 {
        let fn_index = self.scopes[scope_index].function;
        let func = &mut self.program.functions[fn_index as usize];
        if let Some(pos) = func.upvalues.iter().position(|u| u.index == desc.index && u.is_local == desc.is_local) {
            return pos as u16;
        }
        func.upvalues.push(desc);
        (func.upvalues.len() - 1) as u16
    }

    // -- discharge: materialise an Operand into a concrete register --

    fn discharge(&mut self, operand: &Operand, slot: u16) {
        match operand {
            Operand::Local(src) => {
                if *src != slot {
                    self.emit(Instruction::new(Opcode::MovLl, slot, *src, 0));
                }
            }
            Operand::Integer(i) => {
                self.emit(Instruction::new(Opcode::MovLi, slot, *i as u16, 0));
            }
            Operand::Number(n) => {
                let idx = self.program.add_constant(*n);
                self.emit(Instruction::new(Opcode::MovLn, slot, idx as u16, 0));
            }
            Operand::Str(s) => {
                let idx = self.program.add_literal(s.clone());
                self.emit(Instruction::new(Opcode::MovLs, slot, idx as u16, 0));
            }
            Operand::True => {
                self.emit(Instruction::new(Opcode::MovLp, slot, hydrogen_core::value::TAG_TRUE, 0));
            }
            Operand::False => {
                self.emit(Instruction::new(Opcode::MovLp, slot, hydrogen_core::value::TAG_FALSE, 0));
            }
            Operand::Nil => {
                self.emit(Instruction::new(Opcode::MovLp, slot, hydrogen_core::value::TAG_NIL, 0));
            }
            Operand::Function(f) => {
                self.emit_closure(slot, *f);
            }
            Operand::Native(n) => {
                self.emit(Instruction::new(Opcode::MovLv, slot, *n as u16, 0));
            }
            Operand::TopLevel { package, slot: top_slot } => {
                self.emit(Instruction::new(Opcode::MovLt, slot, *package as u16, *top_slot));
            }
            Operand::Field { instance, field } => {
                self.emit(Instruction::new(Opcode::StructField, slot, *instance, *field));
            }
            Operand::Index { array, index } => match *index {
                IndexKind::Const(c) => {
                    self.emit(Instruction::new(Opcode::ArrayGetI, slot, *array, c));
                }
                IndexKind::Local(l) => {
                    self.emit(Instruction::new(Opcode::ArrayGetL, slot, *array, l));
                }
            },
            Operand::Upvalue(up) => {
                self.emit(Instruction::new(Opcode::MovLu, slot, *up, 0));
            }
        }
    }

    fn needs_closure(&self, fn_index: u32) -> bool {
        !self.program.functions[fn_index as usize].upvalues.is_empty()
    }

    /// Writes a plain `MOV_L_F` then, if the function captured anything,
    /// converts it into a closure with one `CAPTURE_*` per upvalue.
    fn emit_closure(&mut self, slot: u16, fn_index: u32) {
        self.emit(Instruction::new(Opcode::MovLf, slot, fn_index as u16, 0));
        if !self.needs_closure(fn_index) {
            return;
        }
        self.emit(Instruction::new(Opcode::MakeClosure, slot, fn_index as u16, 0));
        let upvalues = self.program.functions[fn_index as usize].upvalues.clone();
        for up in upvalues {
            let opcode = if up.is_local { Opcode::CaptureLocal } else { Opcode::CaptureUpvalue };
            self.emit(Instruction::new(opcode, slot, up.index, 0));
        }
    }

    fn to_local(&mut self, operand: Operand, slot: u16) -> u16 {
        if let Operand::Local(s) = operand {
            return s;
        }
        self.discharge(&operand, slot);
        slot
    }

    /// Materialises `operand` into package top-level `(package, top_slot)`,
    /// mirroring `discharge`'s per-operand-type opcode selection but
    /// targeting `MOV_T*` instead of `MOV_L*`. `scratch` is a temp register
    /// used only when `operand` needs a register stop along the way (a
    /// closure that must run `CAPTURE_*` before it can be stored, or a
    /// value that's itself an unread field/index/upvalue/top-level).
    fn discharge_top_level(&mut self, operand: &Operand, package: u32, top_slot: u16, scratch: u16) {
        let package = package as u16;
        match operand {
            Operand::Local(src) => {
                self.emit(Instruction::new(Opcode::MovTl, *src, package, top_slot));
            }
            Operand::Integer(i) => {
                self.emit(Instruction::new(Opcode::MovTi, *i as u16, package, top_slot));
            }
            Operand::Number(n) => {
                let idx = self.program.add_constant(*n);
                self.emit(Instruction::new(Opcode::MovTn, idx as u16, package, top_slot));
            }
            Operand::Str(s) => {
                let idx = self.program.add_literal(s.clone());
                self.emit(Instruction::new(Opcode::MovTs, idx as u16, package, top_slot));
            }
            Operand::True => {
                self.emit(Instruction::new(Opcode::MovTp, hydrogen_core::value::TAG_TRUE, package, top_slot));
            }
            Operand::False => {
                self.emit(Instruction::new(Opcode::MovTp, hydrogen_core::value::TAG_FALSE, package, top_slot));
            }
            Operand::Nil => {
                self.emit(Instruction::new(Opcode::MovTp, hydrogen_core::value::TAG_NIL, package, top_slot));
            }
            Operand::Function(f) => {
                if self.needs_closure(*f) {
                    self.emit_closure(scratch, *f);
                    self.emit(Instruction::new(Opcode::MovTl, scratch, package, top_slot));
                } else {
                    self.emit(Instruction::new(Opcode::MovTf, *f as u16, package, top_slot));
                }
            }
            Operand::Native(n) => {
                self.emit(Instruction::new(Opcode::MovTv, *n as u16, package, top_slot));
            }
            Operand::TopLevel { .. } | Operand::Field { .. } | Operand::Index { .. } | Operand::Upvalue(_) => {
                let local = self.to_local(operand.clone(), scratch);
                self.emit(Instruction::new(Opcode::MovTl, local, package, top_slot));
            }
        }
    }

    // -- conditionals --

    fn emit_jump(&mut self) -> u32 {
        self.emit(Instruction::new(Opcode::Jmp, 0, 0, 0))
    }

    fn patch_jump(&mut self, jmp_index: u32) {
        let target = self.code_len() as u16;
        let fi = self.function_index();
        let func = &mut self.program.functions[fi as usize];
        func.code[jmp_index as usize] = func.code[jmp_index as usize].with_arg(1, target);
    }

    fn emit_loop(&mut self, start: u32) {
        self.emit(Instruction::new(Opcode::Loop, start as u16, 0, 0));
    }

    /// Emits `test; JMP` and returns the `JMP`'s index for later patching.
    /// `skip_on_truthy` picks `IsTrueL` (jump taken when false — used by
    /// `if`/`while`/`and`) or `IsFalseL` (jump taken when true — used by
    /// `or`).
    fn emit_test(&mut self, slot: u16, skip_on_truthy: bool) -> u32 {
        let opcode = if skip_on_truthy { Opcode::IsTrueL } else { Opcode::IsFalseL };
        self.emit(Instruction::new(opcode, slot, 0, 0));
        self.emit_jump()
    }

    // -- token helpers --

    fn check(&self, kind: TokenType) -> bool {
        self.lexer.token.kind == kind
    }

    fn advance(&mut self) -> Result<Token<'src>, HyError> {
        let tok = self.lexer.token;
        self.lexer.advance()?;
        Ok(tok)
    }

    fn expect(&mut self, kind: TokenType, what: &str) -> Result<Token<'src>, HyError> {
        if !self.check(kind) {
            return Err(self.err_unexpected(format!("expected {what}")));
        }
        self.advance()
    }

    fn matches(&mut self, kind: TokenType) -> Result<bool, HyError> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // -- expressions --

    fn parse_expr(&mut self, slot: u16) -> Result<Operand, HyError> {
        self.expr_precedence(slot, Precedence::Or)
    }

    fn expr_precedence(&mut self, slot: u16, min_prec: Precedence) -> Result<Operand, HyError> {
        let mut left = self.expr_unary(slot)?;
        loop {
            let prec = precedence_of(self.lexer.token.kind);
            if prec == Precedence::None || prec < min_prec {
                break;
            }
            let op_token = self.advance()?;
            left = self.expr_binary(slot, op_token, left)?;
        }
        Ok(left)
    }

    fn expr_binary(&mut self, slot: u16, op: Token<'src>, left: Operand) -> Result<Operand, HyError> {
        let prec = precedence_of(op.kind);
        match op.kind {
            TokenType::And => {
                let left_slot = self.to_local(left, slot);
                let short_circuit = self.emit_test(left_slot, true);
                let right = self.expr_precedence(slot, Precedence::And)?;
                self.discharge(&right, left_slot);
                self.patch_jump(short_circuit);
                return Ok(Operand::Local(left_slot));
            }
            TokenType::Or => {
                let left_slot = self.to_local(left, slot);
                let short_circuit = self.emit_test(left_slot, false);
                let right = self.expr_precedence(slot, Precedence::Or)?;
                self.discharge(&right, left_slot);
                self.patch_jump(short_circuit);
                return Ok(Operand::Local(left_slot));
            }
            _ => {}
        }

        let next = next_precedence(prec);
        let right_slot = self.reserve_slot();
        let right = self.expr_precedence(right_slot, next)?;
        self.release_slots(right_slot);

        if let Some(folded) = fold_binary(op.kind, &left, &right) {
            return Ok(folded);
        }

        // `left` may already live in a named local's register (e.g. plain
        // `a`). Discharge it into the destination temp explicitly rather
        // than reusing its source register as the output — `slot` is a
        // temp reserved by our caller and never a named local's own slot,
        // so the result lands there instead of clobbering `a`.
        self.discharge(&left, slot);
        let out_slot = slot;
        let rhs_slot = self.to_local(right, right_slot);
        let opcode = binary_opcode(op.kind).ok_or_else(|| self.err_unexpected("invalid operator"))?;
        self.emit(Instruction::new(opcode, out_slot, out_slot, rhs_slot));
        Ok(Operand::Local(out_slot))
    }

    fn expr_unary(&mut self, slot: u16) -> Result<Operand, HyError> {
        if self.check(TokenType::Sub) {
            self.advance()?;
            let operand = self.expr_unary(slot)?;
            if let Some(n) = operand.as_number() {
                return Ok(Operand::Number(-n));
            }
            // Same reasoning as `expr_binary`: don't let a bare operand's own
            // register double as the output, or `let a = 5; let b = -a`
            // would overwrite `a`.
            self.discharge(&operand, slot);
            self.emit(Instruction::new(Opcode::NegL, slot, slot, 0));
            return Ok(Operand::Local(slot));
        }
        if self.check(TokenType::Not) {
            self.advance()?;
            let operand = self.expr_unary(slot)?;
            if let Some(b) = operand.is_truthy_constant() {
                return Ok(if b { Operand::False } else { Operand::True });
            }
            let local = slot;
            self.discharge(&operand, local);
            self.emit(Instruction::new(Opcode::IsFalseL, local, 0, 0));
            let else_jmp = self.emit_jump();
            self.emit(Instruction::new(Opcode::MovLp, local, hydrogen_core::value::TAG_FALSE, 0));
            let end_jmp = self.emit_jump();
            self.patch_jump(else_jmp);
            self.emit(Instruction::new(Opcode::MovLp, local, hydrogen_core::value::TAG_TRUE, 0));
            self.patch_jump(end_jmp);
            return Ok(Operand::Local(local));
        }
        self.expr_postfix(slot)
    }

    fn expr_postfix(&mut self, slot: u16) -> Result<Operand, HyError> {
        let mut operand = self.expr_operand(slot)?;
        loop {
            if self.check(TokenType::OpenParen) {
                operand = match operand {
                    Operand::Field { instance, field } => self.parse_method_call(instance, field)?,
                    other => self.parse_call(slot, other)?,
                };
            } else if self.check(TokenType::Dot) {
                operand = self.parse_field(slot, operand)?;
            } else if self.check(TokenType::OpenBracket) {
                operand = self.parse_index(slot, operand)?;
            } else {
                break;
            }
        }
        Ok(operand)
    }

    /// Parses `.name`, leaving the receiver discharged into `slot` and
    /// returning an unread `Operand::Field`. A following `(` is a method
    /// call, handled by the postfix loop special-casing this operand into
    /// `parse_method_call`; anything else discharges it as a plain field
    /// read through `STRUCT_FIELD`.
    fn parse_field(&mut self, slot: u16, operand: Operand) -> Result<Operand, HyError> {
        self.advance()?; // .
        let name_tok = self.expect(TokenType::Identifier, "field name")?;
        let name = name_tok.text.to_string();
        let instance = self.to_local(operand, slot);
        let field = self.program.add_field(&name) as u16;
        Ok(Operand::Field { instance, field })
    }

    fn parse_index(&mut self, slot: u16, operand: Operand) -> Result<Operand, HyError> {
        self.advance()?; // [
        let array = self.to_local(operand, slot);
        let idx_slot = self.reserve_slot();
        let idx_operand = self.parse_expr(idx_slot)?;
        self.expect(TokenType::CloseBracket, "']'")?;
        let index = match idx_operand {
            Operand::Integer(i) if i >= 0 => {
                self.release_slots(idx_slot);
                IndexKind::Const(i as u16)
            }
            other => {
                let local = self.to_local(other, idx_slot);
                IndexKind::Local(local)
            }
        };
        Ok(Operand::Index { array, index })
    }

    fn parse_array_literal(&mut self, slot: u16) -> Result<Operand, HyError> {
        self.advance()?; // [
        let mut first: Option<u16> = None;
        let mut count = 0u16;
        if !self.check(TokenType::CloseBracket) {
            loop {
                let elem_slot = self.reserve_slot();
                first.get_or_insert(elem_slot);
                let elem = self.parse_expr(elem_slot)?;
                self.discharge(&elem, elem_slot);
                count += 1;
                if !self.matches(TokenType::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenType::CloseBracket, "']'")?;
        if let Some(first_slot) = first {
            self.release_slots(first_slot);
        }
        self.emit(Instruction::new(Opcode::ArrayNew, slot, count, 0));
        if let Some(first_slot) = first {
            for i in 0..count {
                self.emit(Instruction::new(Opcode::ArrayISetL, slot, i, first_slot + i));
            }
        }
        Ok(Operand::Local(slot))
    }

    /// Parses `new Name(args)`. The struct must already be defined —
    /// structs are resolved top-to-bottom like everything else in this
    /// single-pass compiler, so construct-before-define is a compile error.
    fn parse_struct_new(&mut self, slot: u16) -> Result<Operand, HyError> {
        self.advance()?; // new
        let name_tok = self.expect(TokenType::Identifier, "struct name")?;
        let name = name_tok.text.to_string();
        let def_index = self
            .program
            .find_struct(self.package, &name)
            .ok_or_else(|| self.err_unexpected(format!("unknown struct '{name}'")))?;
        self.expect(TokenType::OpenParen, "'('")?;
        let mut argc = 0u16;
        if !self.check(TokenType::CloseParen) {
            loop {
                let arg_slot = self.reserve_slot();
                let arg = self.parse_expr(arg_slot)?;
                self.discharge(&arg, arg_slot);
                argc += 1;
                if !self.matches(TokenType::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenType::CloseParen, "')'")?;
        self.release_slots(slot + 1);
        self.emit(Instruction::new(Opcode::StructNew, slot, def_index as u16, argc));
        Ok(Operand::Local(slot))
    }

    fn parse_call(&mut self, slot: u16, callee: Operand) -> Result<Operand, HyError> {
        self.advance()?; // (
        let callee_slot = self.to_local(callee, slot);
        let mut argc = 0u16;
        if !self.check(TokenType::CloseParen) {
            loop {
                let arg_slot = self.reserve_slot();
                let arg = self.parse_expr(arg_slot)?;
                self.discharge(&arg, arg_slot);
                argc += 1;
                if !self.matches(TokenType::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenType::CloseParen, "')'")?;
        self.release_slots(callee_slot + 1);
        self.emit(Instruction::new(Opcode::Call, callee_slot, argc, 0));
        Ok(Operand::Local(callee_slot))
    }

    /// Parses the argument list of `receiver.name(args...)`, given the
    /// `Operand::Field { instance, field }` `parse_field` already produced.
    /// The receiver's actual heap type (struct vs. array/string) is only
    /// known at runtime, so this emits `CALL_METHOD` rather than discharging
    /// the field through `STRUCT_FIELD` first — the executor picks
    /// struct-method dispatch or a built-in core method by name.
    fn parse_method_call(&mut self, instance: u16, field: u16) -> Result<Operand, HyError> {
        self.advance()?; // (
        self.release_slots(instance + 1);
        let mut argc = 0u16;
        if !self.check(TokenType::CloseParen) {
            loop {
                let arg_slot = self.reserve_slot();
                let arg = self.parse_expr(arg_slot)?;
                self.discharge(&arg, arg_slot);
                argc += 1;
                if !self.matches(TokenType::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenType::CloseParen, "')'")?;
        self.release_slots(instance + 1);
        self.emit(Instruction::new(Opcode::CallMethod, instance, field, argc));
        Ok(Operand::Local(instance))
    }

    fn expr_operand(&mut self, slot: u16) -> Result<Operand, HyError> {
        let token = self.lexer.token;
        match token.kind {
            TokenType::Integer => {
                self.advance()?;
                Ok(Operand::Integer(token.integer))
            }
            TokenType::Number => {
                self.advance()?;
                Ok(Operand::Number(token.number))
            }
            TokenType::String => {
                let decoded = self.lexer.extract_string(&token)?;
                self.advance()?;
                Ok(Operand::Str(decoded))
            }
            TokenType::True => {
                self.advance()?;
                Ok(Operand::True)
            }
            TokenType::False => {
                self.advance()?;
                Ok(Operand::False)
            }
            TokenType::Nil => {
                self.advance()?;
                Ok(Operand::Nil)
            }
            TokenType::OpenParen => {
                self.advance()?;
                let inner = self.parse_expr(slot)?;
                self.expect(TokenType::CloseParen, "')'")?;
                Ok(inner)
            }
            TokenType::OpenBracket => self.parse_array_literal(slot),
            TokenType::New => self.parse_struct_new(slot),
            TokenType::Identifier => self.expr_identifier(slot),
            TokenType::SelfKw => {
                self.advance()?;
                self.find_local("self").map(Operand::Local).ok_or_else(|| self.err_unexpected("'self' outside a method"))
            }
            _ => Err(self.err_unexpected("expected expression")),
        }
    }

    fn expr_identifier(&mut self, _slot: u16) -> Result<Operand, HyError> {
        let token = self.advance()?;
        let name = token.text;

        if let Some(local) = self.find_local(name) {
            return Ok(Operand::Local(local));
        }
        if let Some(up) = self.resolve_upvalue(0, name) {
            return Ok(Operand::Upvalue(up));
        }
        let package_idx = self.package;
        if let Some(top_slot) = self.program.packages[package_idx as usize].find_top_level(name) {
            return Ok(Operand::TopLevel { package: package_idx, slot: top_slot });
        }
        if let Some(idx) = self.program.functions.iter().position(|f| f.name.as_deref() == Some(name)) {
            return Ok(Operand::Function(idx as u32));
        }
        if let Some(idx) = self.program.native_fns.iter().position(|n| n.name == name) {
            return Ok(Operand::Native(idx as u32));
        }
        Err(self.err_unexpected(format!("unknown identifier '{name}'")))
    }

    // -- statements --

    fn parse_block(&mut self, terminator: TokenType) -> Result<(), HyError> {
        let depth = self.scopes.last().unwrap().depth + 1;
        self.scopes.last_mut().unwrap().depth = depth;
        let saved_slot = self.scopes.last().unwrap().next_slot;

        while !self.check(terminator) && !self.check(TokenType::Eof) {
            self.parse_statement()?;
        }

        let scope = self.scopes.last_mut().unwrap();
        scope.locals.retain(|l| l.depth < depth);
        scope.depth -= 1;
        self.release_slots(saved_slot);
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<(), HyError> {
        match self.lexer.token.kind {
            TokenType::Let => self.parse_let(),
            TokenType::If => self.parse_if(),
            TokenType::While => self.parse_while(),
            TokenType::Loop => self.parse_loop(),
            TokenType::Break => self.parse_break(),
            TokenType::Return => self.parse_return(),
            TokenType::Fn => self.parse_fn_statement(),
            TokenType::Struct => self.parse_struct(),
            TokenType::Import => self.parse_import(),
            TokenType::OpenBrace => {
                self.advance()?;
                self.parse_block(TokenType::CloseBrace)?;
                self.expect(TokenType::CloseBrace, "'}'").map(|_| ())
            }
            _ => self.parse_assignment_or_call(),
        }
    }

    fn parse_let(&mut self) -> Result<(), HyError> {
        self.advance()?; // let
        let name_tok = self.expect(TokenType::Identifier, "identifier")?;
        let name = name_tok.text.to_string();
        self.expect(TokenType::Assign, "'='")?;

        if self.is_top_level() {
            let package_idx = self.package;
            if self.program.packages[package_idx as usize].find_top_level(&name).is_some() {
                return Err(self.err_unexpected(format!("top-level name '{name}' already defined in this package")));
            }
            let top_slot = self.program.packages[package_idx as usize].add_top_level(name) as u16;
            let scratch = self.reserve_slot();
            let value = self.parse_expr(scratch)?;
            self.discharge_top_level(&value, package_idx, top_slot, scratch);
            self.release_slots(scratch);
            return Ok(());
        }

        let slot = self.reserve_slot();
        let value = self.parse_expr(slot)?;
        self.discharge(&value, slot);
        self.declare_local(name, slot);
        Ok(())
    }

    fn parse_assignment_or_call(&mut self) -> Result<(), HyError> {
        let slot = self.reserve_slot();
        let operand = self.parse_expr(slot)?;
        if self.check(TokenType::Assign) {
            self.advance()?;
            match operand {
                Operand::Local(target) => {
                    let value = self.parse_expr(slot)?;
                    self.discharge(&value, target);
                }
                Operand::TopLevel { package, slot: top_slot } => {
                    let value = self.parse_expr(slot)?;
                    self.discharge_top_level(&value, package, top_slot, slot);
                }
                Operand::Upvalue(up) => {
                    let value = self.parse_expr(slot)?;
                    let value_local = self.to_local(value, slot);
                    self.emit(Instruction::new(Opcode::MovUl, up, value_local, 0));
                }
                Operand::Field { instance, field } => {
                    let value_slot = self.reserve_slot();
                    let value = self.parse_expr(value_slot)?;
                    let value_local = self.to_local(value, value_slot);
                    self.emit(Instruction::new(Opcode::StructSetL, instance, field, value_local));
                    self.release_slots(value_slot);
                }
                Operand::Index { array, index } => {
                    let value_slot = self.reserve_slot();
                    let value = self.parse_expr(value_slot)?;
                    let value_local = self.to_local(value, value_slot);
                    match index {
                        IndexKind::Const(c) => {
                            self.emit(Instruction::new(Opcode::ArrayISetL, array, c, value_local));
                        }
                        IndexKind::Local(l) => {
                            self.emit(Instruction::new(Opcode::ArrayLSetL, array, l, value_local));
                        }
                    }
                    self.release_slots(value_slot);
                }
                _ => return Err(self.err_unexpected("invalid assignment target")),
            }
        } else {
            self.discharge(&operand, slot);
        }
        self.release_slots(slot);
        Ok(())
    }

    fn parse_if(&mut self) -> Result<(), HyError> {
        self.advance()?; // if
        let cond_slot = self.reserve_slot();
        let cond = self.parse_expr(cond_slot)?;
        let mut end_jumps = Vec::new();

        if let Some(known) = cond.is_truthy_constant() {
            // Constant-folded condition: only compile the live branch.
            self.expect(TokenType::OpenBrace, "'{'")?;
            if known {
                self.parse_block(TokenType::CloseBrace)?;
                self.expect(TokenType::CloseBrace, "'}'")?;
                self.skip_else_branches()?;
            } else {
                self.skip_braced_block()?;
                self.expect(TokenType::CloseBrace, "'}'")?;
                self.parse_else_chain(&mut end_jumps)?;
            }
            self.release_slots(cond_slot);
            return Ok(());
        }

        let local = self.to_local(cond, cond_slot);
        let else_jmp = self.emit_test(local, true);
        self.release_slots(cond_slot);
        self.expect(TokenType::OpenBrace, "'{'")?;
        self.parse_block(TokenType::CloseBrace)?;
        self.expect(TokenType::CloseBrace, "'}'")?;
        end_jumps.push(self.emit_jump());
        self.patch_jump(else_jmp);
        self.parse_else_chain(&mut end_jumps)?;
        for jmp in end_jumps {
            self.patch_jump(jmp);
        }
        Ok(())
    }

    fn parse_else_chain(&mut self, end_jumps: &mut Vec<u32>) -> Result<(), HyError> {
        if self.matches(TokenType::ElseIf)? {
            let cond_slot = self.reserve_slot();
            let cond = self.parse_expr(cond_slot)?;
            let local = self.to_local(cond, cond_slot);
            let else_jmp = self.emit_test(local, true);
            self.release_slots(cond_slot);
            self.expect(TokenType::OpenBrace, "'{'")?;
            self.parse_block(TokenType::CloseBrace)?;
            self.expect(TokenType::CloseBrace, "'}'")?;
            end_jumps.push(self.emit_jump());
            self.patch_jump(else_jmp);
            self.parse_else_chain(end_jumps)?;
        } else if self.matches(TokenType::Else)? {
            self.expect(TokenType::OpenBrace, "'{'")?;
            self.parse_block(TokenType::CloseBrace)?;
            self.expect(TokenType::CloseBrace, "'}'")?;
        }
        Ok(())
    }

    fn skip_braced_block(&mut self) -> Result<(), HyError> {
        self.advance()?; // {
        let mut depth = 1;
        while depth > 0 && !self.check(TokenType::Eof) {
            match self.lexer.token.kind {
                TokenType::OpenBrace => depth += 1,
                TokenType::CloseBrace => depth -= 1,
                _ => {}
            }
            if depth > 0 {
                self.advance()?;
            }
        }
        Ok(())
    }

    fn skip_else_branches(&mut self) -> Result<(), HyError> {
        if self.check(TokenType::ElseIf) {
            self.advance()?;
            let cond_slot = self.reserve_slot();
            let _ = self.parse_expr(cond_slot)?;
            self.release_slots(cond_slot);
            self.skip_braced_block()?;
            self.expect(TokenType::CloseBrace, "'}'")?;
            self.skip_else_branches()?;
        } else if self.check(TokenType::Else) {
            self.advance()?;
            self.skip_braced_block()?;
            self.expect(TokenType::CloseBrace, "'}'")?;
        }
        Ok(())
    }

    fn parse_while(&mut self) -> Result<(), HyError> {
        self.advance()?; // while
        let start = self.code_len();
        let cond_slot = self.reserve_slot();
        let cond = self.parse_expr(cond_slot)?;
        let local = self.to_local(cond, cond_slot);
        let end_jmp = self.emit_test(local, true);
        self.release_slots(cond_slot);

        self.scopes.last_mut().unwrap().loops.push(LoopCtx { start, break_jumps: Vec::new() });
        self.expect(TokenType::OpenBrace, "'{'")?;
        self.parse_block(TokenType::CloseBrace)?;
        self.expect(TokenType::CloseBrace, "'}'")?;
        self.emit_loop(start);
        self.patch_jump(end_jmp);
        let loop_ctx = self.scopes.last_mut().unwrap().loops.pop().unwrap();
        for jmp in loop_ctx.break_jumps {
            self.patch_jump(jmp);
        }
        Ok(())
    }

    fn parse_loop(&mut self) -> Result<(), HyError> {
        self.advance()?; // loop
        let start = self.code_len();
        self.scopes.last_mut().unwrap().loops.push(LoopCtx { start, break_jumps: Vec::new() });
        self.expect(TokenType::OpenBrace, "'{'")?;
        self.parse_block(TokenType::CloseBrace)?;
        self.expect(TokenType::CloseBrace, "'}'")?;
        self.emit_loop(start);
        let loop_ctx = self.scopes.last_mut().unwrap().loops.pop().unwrap();
        for jmp in loop_ctx.break_jumps {
            self.patch_jump(jmp);
        }
        Ok(())
    }

    fn parse_break(&mut self) -> Result<(), HyError> {
        self.advance()?; // break
        let jmp = self.emit_jump();
        let scope = self.scopes.last_mut().unwrap();
        match scope.loops.last_mut() {
            Some(loop_ctx) => {
                loop_ctx.break_jumps.push(jmp);
                Ok(())
            }
            None => Err(self.err_unexpected("'break' outside a loop")),
        }
    }

    fn parse_return(&mut self) -> Result<(), HyError> {
        self.advance()?; // return
        if self.at_statement_boundary() {
            self.emit(Instruction::new(Opcode::Ret0, 0, 0, 0));
            return Ok(());
        }
        let slot = self.reserve_slot();
        let value = self.parse_expr(slot)?;
        match value {
            Operand::Local(s) => {
                self.emit(Instruction::new(Opcode::RetL, s, 0, 0));
            }
            Operand::Integer(i) => {
                self.emit(Instruction::new(Opcode::RetI, i as u16, 0, 0));
            }
            Operand::Number(n) => {
                let idx = self.program.add_constant(n);
                self.emit(Instruction::new(Opcode::RetN, idx as u16, 0, 0));
            }
            Operand::Str(s) => {
                let idx = self.program.add_literal(s);
                self.emit(Instruction::new(Opcode::RetS, idx as u16, 0, 0));
            }
            Operand::True => {
                self.emit(Instruction::new(Opcode::RetP, hydrogen_core::value::TAG_TRUE, 0, 0));
            }
            Operand::False => {
                self.emit(Instruction::new(Opcode::RetP, hydrogen_core::value::TAG_FALSE, 0, 0));
            }
            Operand::Nil => {
                self.emit(Instruction::new(Opcode::RetP, hydrogen_core::value::TAG_NIL, 0, 0));
            }
            Operand::Function(f) => {
                if self.needs_closure(f) {
                    self.emit_closure(slot, f);
                    self.emit(Instruction::new(Opcode::RetL, slot, 0, 0));
                } else {
                    self.emit(Instruction::new(Opcode::RetF, f as u16, 0, 0));
                }
            }
            Operand::Native(n) => {
                self.emit(Instruction::new(Opcode::RetV, n as u16, 0, 0));
            }
            Operand::TopLevel { package, slot: top_slot } => {
                let local = self.reserve_slot();
                self.emit(Instruction::new(Opcode::MovLt, local, package as u16, top_slot));
                self.emit(Instruction::new(Opcode::RetL, local, 0, 0));
            }
        }
        self.release_slots(slot);
        Ok(())
    }

    fn at_statement_boundary(&self) -> bool {
        matches!(self.lexer.token.kind, TokenType::CloseBrace | TokenType::Eof)
    }

    fn parse_fn_statement(&mut self) -> Result<(), HyError> {
        self.advance()?; // fn
        let name_tok = self.expect(TokenType::Identifier, "function name")?;
        let name = name_tok.text.to_string();
        let fn_index = self.parse_fn_body(Some(name.clone()), false)?;
        let slot = self.reserve_slot();
        self.emit_closure(slot, fn_index);
        self.declare_local(name, slot);
        Ok(())
    }

    /// Parses `(params) { body }`, compiling into a fresh `Function` and
    /// returning its index. The caller binds the resulting function value
    /// wherever it belongs (a local, a struct's method table).
    fn parse_fn_body(&mut self, name: Option<String>, is_method: bool) -> Result<u32, HyError> {
        self.expect(TokenType::OpenParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(TokenType::CloseParen) {
            loop {
                let p = self.expect(TokenType::Identifier, "parameter name")?;
                params.push(p.text.to_string());
                if !self.matches(TokenType::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenType::CloseParen, "')'")?;

        let source = self.program.functions[self.function_index() as usize].source;
        let line = self.lexer.line();
        let mut func = Function::new(self.package, source, line, is_method);
        func.name = name;
        func.arity = params.len() as u32;
        let fn_index = self.program.add_function(func);

        self.scopes.push(FunctionScope {
            function: fn_index,
            locals: Vec::new(),
            next_slot: 0,
            frame_size: 0,
            depth: 0,
            loops: Vec::new(),
        });
        if is_method {
            let slot = self.reserve_slot();
            self.declare_local("self".to_string(), slot);
        }
        for p in params {
            let slot = self.reserve_slot();
            self.declare_local(p, slot);
        }

        self.expect(TokenType::OpenBrace, "'{'")?;
        self.parse_block(TokenType::CloseBrace)?;
        self.expect(TokenType::CloseBrace, "'}'")?;
        self.emit(Instruction::new(Opcode::Ret0, 0, 0, 0));

        let scope = self.scopes.pop().unwrap();
        self.program.functions[fn_index as usize].frame_size = scope.frame_size as u32;
        Ok(fn_index)
    }

    fn parse_struct(&mut self) -> Result<(), HyError> {
        self.advance()?; // struct
        let name_tok = self.expect(TokenType::Identifier, "struct name")?;
        let name = name_tok.text.to_string();
        let source = self.program.functions[self.function_index() as usize].source;
        let line = self.lexer.line();
        let mut def = StructDefinition::new(name, self.package, source, line);

        self.expect(TokenType::OpenBrace, "'{'")?;
        while !self.check(TokenType::CloseBrace) && !self.check(TokenType::Eof) {
            if self.check(TokenType::New) {
                self.advance()?;
                let fn_index = self.parse_fn_body(Some("new".to_string()), true)?;
                def.constructor = Some(fn_index);
            } else if self.check(TokenType::Fn) {
                self.advance()?;
                let method_tok = self.expect(TokenType::Identifier, "method name")?;
                let method_name = method_tok.text.to_string();
                let fn_index = self.parse_fn_body(Some(method_name.clone()), true)?;
                let global_index = self.program.add_field(&method_name);
                def.set_method_at(global_index, method_name, fn_index);
            } else {
                let field_tok = self.expect(TokenType::Identifier, "field name")?;
                let name = field_tok.text.to_string();
                let global_index = self.program.add_field(&name);
                def.set_field_at(global_index, name);
            }
        }
        self.expect(TokenType::CloseBrace, "'}'")?;
        self.program.add_struct(def);
        Ok(())
    }

    fn parse_import(&mut self) -> Result<(), HyError> {
        self.advance()?; // import
        let path_tok = self.expect(TokenType::String, "import path")?;
        let path = self.lexer.extract_string(&path_tok)?;
        validate_path(&path)?;

        let pkg_name = crate::import::package_name(&path);
        let pkg_index = match self.program.find_package(&pkg_name) {
            Some(idx) => idx,
            None => {
                let contents = self.loader.load(&path)?;
                compile_package(self.program, self.loader, Some(pkg_name), Some(path), contents)?
            }
        };
        self.program.packages[self.package as usize].imports.push(pkg_index);
        Ok(())
    }
}

/// Folds a binary operator over two compile-time constants where possible.
fn fold_binary(op: TokenType, left: &Operand, right: &Operand) -> Option<Operand> {
    use TokenType::*;
    if !left.is_constant() || !right.is_constant() {
        return None;
    }
    match op {
        Add | Sub | Mul | Div | Mod => {
            let l = left.as_number()?;
            let r = right.as_number()?;
            let result = match op {
                Add => l + r,
                Sub => l - r,
                Mul => l * r,
                Div => l / r,
                Mod => l % r,
                _ => unreachable!(),
            };
            Some(Operand::Number(result))
        }
        Concat => {
            if let (Operand::Str(a), Operand::Str(b)) = (left, right) {
                Some(Operand::Str(format!("{a}{b}")))
            } else {
                None
            }
        }
        Eq | Neq => {
            let equal = constants_equal(left, right)?;
            Some(bool_operand(if op == Eq { equal } else { !equal }))
        }
        Lt | Le | Gt | Ge => {
            let l = left.as_number()?;
            let r = right.as_number()?;
            let result = match op {
                Lt => l < r,
                Le => l <= r,
                Gt => l > r,
                Ge => l >= r,
                _ => unreachable!(),
            };
            Some(bool_operand(result))
        }
        _ => None,
    }
}

fn constants_equal(left: &Operand, right: &Operand) -> Option<bool> {
    match (left, right) {
        (Operand::Integer(_) | Operand::Number(_), Operand::Integer(_) | Operand::Number(_)) => {
            Some(left.as_number() == right.as_number())
        }
        (Operand::Str(a), Operand::Str(b)) => Some(a == b),
        (Operand::True, Operand::True) | (Operand::False, Operand::False) | (Operand::Nil, Operand::Nil) => {
            Some(true)
        }
        _ => None,
    }
}

fn bool_operand(b: bool) -> Operand {
    if b { Operand::True } else { Operand::False }
}

fn binary_opcode(op: TokenType) -> Option<Opcode> {
    use TokenType::*;
    Some(match op {
        Add => Opcode::AddLl,
        Sub => Opcode::SubLl,
        Mul => Opcode::MulLl,
        Div => Opcode::DivLl,
        Mod => Opcode::ModLl,
        Concat => Opcode::ConcatLl,
        Eq => Opcode::EqLl,
        Neq => Opcode::NeqLl,
        Lt => Opcode::LtLl,
        Le => Opcode::LeLl,
        Gt => Opcode::GtLl,
        Ge => Opcode::GeLl,
        _ => return None,
    })
}

/// Compiles `contents` as a package's source, recursing into any `import`s
/// it contains, and returns the new package's index. This is the single
/// entry point used both for the top-level program and every import.
pub fn compile_package<L: SourceLoader>(
    program: &mut Program,
    loader: &mut L,
    package_name: Option<String>,
    file: Option<String>,
    contents: String,
) -> Result<u32, HyError> {
    let source_text = contents.clone();
    let source_index = program.add_source(file, contents);
    let package_index = program.add_package(package_name);

    let main_fn = Function::new(package_index, source_index, 1, false);
    let main_fn_index = program.add_function(main_fn);
    program.packages[package_index as usize].main_fn = Some(main_fn_index);

    let lexer = Lexer::new(&source_text, source_index)?;
    let mut parser = Parser {
        lexer,
        program,
        package: package_index,
        scopes: vec![FunctionScope {
            function: main_fn_index,
            locals: Vec::new(),
            next_slot: 0,
            frame_size: 0,
            depth: 0,
            loops: Vec::new(),
        }],
        loader,
    };

    while !parser.check(TokenType::Eof) {
        if let Err(err) = parser.parse_statement() {
            debug!("parse error in package {}: {}", package_index, err);
            return Err(err);
        }
    }
    parser.emit(Instruction::new(Opcode::Ret0, 0, 0, 0));
    let scope = parser.scopes.pop().unwrap();
    parser.program.functions[main_fn_index as usize].frame_size = scope.frame_size as u32;

    Ok(package_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapLoader(HashMap<String, String>);

    impl SourceLoader for MapLoader {
        fn load(&mut self, path: &str) -> Result<String, HyError> {
            self.0.get(path).cloned().ok_or_else(|| HyError::io(format!("no such module: {path}")))
        }
    }

    fn compile(src: &str) -> Program {
        let mut program = Program::new();
        let mut loader = MapLoader::default();
        compile_package(&mut program, &mut loader, Some("main".into()), None, src.to_string()).unwrap();
        program
    }

    #[test]
    fn constant_arithmetic_is_folded_away() {
        let program = compile("let x = 1 + 2 * 3");
        let main = &program.functions[0];
        assert!(main.code.iter().all(|ins| !matches!(
            ins.opcode(),
            Opcode::AddLl | Opcode::MulLl | Opcode::AddLi | Opcode::MulLi
        )));
    }

    #[test]
    fn if_else_emits_balanced_jumps() {
        let program = compile("let x = 1\nif x { x = 2 } else { x = 3 }");
        let main = &program.functions[0];
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::Jmp));
    }

    #[test]
    fn while_loop_compiles_backward_jump() {
        let program = compile("let i = 0\nwhile i { i = i }");
        let main = &program.functions[0];
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::Loop));
    }

    #[test]
    fn struct_definition_is_recorded() {
        let program = compile("struct Point { x y fn sum() { return self } }");
        assert_eq!(program.structs.len(), 1);
        assert_eq!(program.structs[0].fields.len(), 3);
        assert_eq!(program.structs[0].name, "Point");
    }

    #[test]
    fn nested_fn_is_declared_as_local() {
        let program = compile("fn add(a, b) { return a }");
        assert!(program.functions.iter().any(|f| f.name.as_deref() == Some("add")));
    }

    #[test]
    fn array_literal_emits_array_new_and_fills_it() {
        let program = compile("let a = [1, 2, 3]");
        let main = &program.functions[0];
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::ArrayNew));
        let fills = main.code.iter().filter(|ins| ins.opcode() == Opcode::ArrayISetL).count();
        assert_eq!(fills, 3);
    }

    #[test]
    fn struct_field_access_and_assignment_compile() {
        let program = compile("struct Point { x y }\nlet p = new Point()\np.x = 1\nlet n = p.x");
        let main = &program.functions[0];
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::StructNew));
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::StructSetL));
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::StructField));
    }

    #[test]
    fn array_index_read_and_write_compile() {
        let program = compile("let a = [1, 2]\na[0] = 9\nlet x = a[0]");
        let main = &program.functions[0];
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::ArrayISetL));
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::ArrayGetI));
    }

    #[test]
    fn constructing_an_unknown_struct_is_an_error() {
        let mut program = Program::new();
        let mut loader = MapLoader::default();
        let result =
            compile_package(&mut program, &mut loader, Some("main".into()), None, "let p = new Nope()".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let mut program = Program::new();
        let mut loader = MapLoader::default();
        let result = compile_package(&mut program, &mut loader, Some("main".into()), None, "break".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn array_method_call_emits_call_method() {
        let program = compile("let a = [1, 2]\na.push(3)");
        let main = &program.functions[0];
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::CallMethod));
    }

    #[test]
    fn struct_method_call_also_goes_through_call_method() {
        let program = compile("struct Point { x y fn sum() { return self.x } }\nlet p = new Point()\nlet s = p.sum()");
        let main = &program.functions[0];
        assert!(main.code.iter().any(|ins| ins.opcode() == Opcode::CallMethod));
        assert!(!main.code.iter().any(|ins| ins.opcode() == Opcode::Call));
    }

    #[test]
    fn toplevel_let_does_not_shadow_into_a_local_slot() {
        let program = compile("let counter = 0\nfn tick() { counter = counter + 1 }");
        assert_eq!(program.packages[0].top_levels.len(), 1);
        assert_eq!(program.packages[0].top_levels[0].0, "counter");
        let tick = program.functions.iter().find(|f| f.name.as_deref() == Some("tick")).unwrap();
        assert!(tick.upvalues.is_empty(), "counter is a package top-level, not a captured upvalue");
    }

    #[test]
    fn binary_op_on_a_bare_local_does_not_reuse_its_register() {
        let program = compile("let a = 3\nlet b = a == 3 && a > 0");
        let main = &program.functions[0];
        // `a` lives in package top-level slot 0, read back via MOV_L_T before
        // each comparison — if the comparison clobbered that read's register
        // the second `a > 0` would be reading the boolean the first `==`
        // produced instead of a fresh read of `a`.
        let lt_reads = main.code.iter().filter(|ins| ins.opcode() == Opcode::MovLt).count();
        assert_eq!(lt_reads, 2, "both `a == 3` and `a > 0` should read `a` independently");
    }
}
