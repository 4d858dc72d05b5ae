//! Bytecode instruction encoding.
//!
//! An instruction is a 64-bit word: `opcode:16 | arg1:16 | arg2:16 | arg3:16`.
//! Opcode declaration order is load-bearing — the parser computes many
//! opcodes by adding an operand-type offset to a family's base opcode (see
//! `hydrogen_compiler::parser::operand`), so variants must stay in exactly
//! the order below.

/// Postfix meanings on opcode names: L=local L=local I=integer N=number
/// S=string P=primitive(true/false/nil) F=function V=native U=upvalue
/// T=top-level local.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Storage
    MovLl,
    MovLi,
    MovLn,
    MovLs,
    MovLp,
    MovLf,
    MovLv,

    MovUl,
    MovUi,
    MovUn,
    MovUs,
    MovUp,
    MovUf,
    MovUv,

    MovLu,
    UpvalueClose,

    MovTl,
    MovTi,
    MovTn,
    MovTs,
    MovTp,
    MovTf,
    MovTv,

    MovLt,
    MovSelf,

    // Math
    AddLl,
    AddLi,
    AddLn,
    AddIl,
    AddNl,

    SubLl,
    SubLi,
    SubLn,
    SubIl,
    SubNl,

    MulLl,
    MulLi,
    MulLn,
    MulIl,
    MulNl,

    DivLl,
    DivLi,
    DivLn,
    DivIl,
    DivNl,

    ModLl,
    ModLi,
    ModLn,
    ModIl,
    ModNl,

    ConcatLl,
    ConcatLs,
    ConcatSl,

    NegL,

    // Comparison — every comparison opcode must be immediately followed by a
    // JMP; the comparison conditionally skips it.
    IsTrueL,
    IsFalseL,

    EqLl,
    EqLi,
    EqLn,
    EqLs,
    EqLp,
    EqLf,
    EqLv,

    NeqLl,
    NeqLi,
    NeqLn,
    NeqLs,
    NeqLp,
    NeqLf,
    NeqLv,

    LtLl,
    LtLi,
    LtLn,

    LeLl,
    LeLi,
    LeLn,

    GtLl,
    GtLi,
    GtLn,

    GeLl,
    GeLi,
    GeLn,

    // Control flow
    Jmp,
    Loop,

    // Functions
    Call,
    /// `a1`: instance/destination register. `a2`: field-name intern index.
    /// `a3`: argument count, in the registers right after `a1`. Dispatches on
    /// the receiver's actual heap-object type rather than any static field
    /// slot, so it covers both struct methods and the built-in array/string
    /// core methods through one opcode.
    CallMethod,
    Ret0,
    RetL,
    RetI,
    RetN,
    RetS,
    RetP,
    RetF,
    RetV,

    // Structs
    StructNew,
    NativeStructNew,
    StructCallConstructor,
    StructField,

    StructSetL,
    StructSetI,
    StructSetN,
    StructSetS,
    StructSetP,
    StructSetF,
    StructSetV,

    // Arrays
    ArrayNew,
    ArrayGetL,
    ArrayGetI,

    ArrayISetL,
    ArrayISetI,
    ArrayISetN,
    ArrayISetS,
    ArrayISetP,
    ArrayISetF,
    ArrayISetV,

    ArrayLSetL,
    ArrayLSetI,
    ArrayLSetN,
    ArrayLSetS,
    ArrayLSetP,
    ArrayLSetF,
    ArrayLSetV,

    // Closures — MAKE_CLOSURE converts the plain function value just written
    // by MOV_L_F into a heap-allocated closure; each CAPTURE_* that follows
    // appends one upvalue to it, in the order the function's upvalue list
    // was built during parsing.
    MakeClosure,
    CaptureLocal,
    CaptureUpvalue,

    NoOp,
}

impl Opcode {
    /// Reconstructs an opcode from a raw `u16`, as decoded out of an
    /// instruction word. Panics on an out-of-range value — the parser only
    /// ever emits opcodes it computed itself, so a bad value here means a
    /// compiler bug, not malformed user input.
    pub fn from_u16(raw: u16) -> Self {
        assert!(raw <= Opcode::NoOp as u16, "invalid opcode {raw}");
        // SAFETY: `Opcode` is `repr(u16)` and we just bounds-checked `raw`
        // against the last declared discriminant, which is contiguous with 0.
        unsafe { std::mem::transmute::<u16, Opcode>(raw) }
    }
}

/// A single 64-bit bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u64);

impl Instruction {
    pub fn new(opcode: Opcode, arg1: u16, arg2: u16, arg3: u16) -> Self {
        let raw = (opcode as u64) | ((arg1 as u64) << 16) | ((arg2 as u64) << 32) | ((arg3 as u64) << 48);
        Instruction(raw)
    }

    pub fn opcode(self) -> Opcode {
        Opcode::from_u16(self.arg(0))
    }

    /// Returns the `n`th 16-bit field of the instruction. Field 0 is the
    /// opcode itself.
    pub fn arg(self, n: u32) -> u16 {
        ((self.0 >> (n << 4)) & 0xffff) as u16
    }

    /// Returns a copy of this instruction with its `n`th field replaced.
    pub fn with_arg(self, n: u32, value: u16) -> Self {
        let cleared = self.0 & !(0xffffu64 << (n << 4));
        Instruction(cleared | ((value as u64) << (n << 4)))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_four_fields() {
        let ins = Instruction::new(Opcode::AddLl, 1, 2, 3);
        assert_eq!(ins.arg(0), Opcode::AddLl as u16);
        assert_eq!(ins.arg(1), 1);
        assert_eq!(ins.arg(2), 2);
        assert_eq!(ins.arg(3), 3);
        assert_eq!(ins.opcode(), Opcode::AddLl);
    }

    #[test]
    fn with_arg_preserves_other_fields() {
        let ins = Instruction::new(Opcode::Call, 5, 6, 7);
        let patched = ins.with_arg(2, 99);
        assert_eq!(patched.arg(0), ins.arg(0));
        assert_eq!(patched.arg(1), ins.arg(1));
        assert_eq!(patched.arg(2), 99);
        assert_eq!(patched.arg(3), ins.arg(3));
    }

    #[test]
    fn no_op_is_last_discriminant() {
        assert_eq!(Opcode::from_u16(Opcode::NoOp as u16), Opcode::NoOp);
    }
}
