//! The register VM: fetch-decode-execute over a [`Frame`]'s bytecode.
//!
//! There's no bytecode-to-native dispatch table or threaded interpreter
//! here, just a `match` over [`Opcode`] — nested calls recurse straight
//! through [`call_function`], so the Rust call stack mirrors the Hydrogen
//! one and `max_call_depth` is enforced once, in [`HyState::push_frame`].

use hydrogen_core::heap::{deref, deref_mut};
use hydrogen_core::{
    value, HeapObject, HyArgs, HyArray, HyClosure, HyError, HyMethod, HyString, HyStructInstance, HyValue, Instruction,
    Opcode,
};

use crate::closures::Upvalue;
use crate::native;
use crate::state::HyState;

/// Invokes `callee` (a plain function, a native, or a closure) with `args`,
/// returning its result.
pub fn call_value(state: &mut HyState, callee: HyValue, args: &[HyValue]) -> Result<HyValue, HyError> {
    if callee.is_fn() {
        return call_function(state, callee.fn_index() as u32, args, &[], &[]);
    }
    if callee.is_native() {
        let native = state.program.native_fns[callee.native_index() as usize];
        if let Some(arity) = native.arity {
            if arity as usize != args.len() {
                return Err(HyError::runtime(format!(
                    "'{}' expects {} argument(s), got {}",
                    native.name,
                    arity,
                    args.len()
                )));
            }
        }
        return (native.func)(&mut state.heap, &HyArgs { values: args });
    }
    if callee.is_ptr() {
        // SAFETY: every pointer-tagged value in a running program was
        // produced by this same `state.heap`.
        let obj = unsafe { deref(callee) };
        if let Some(closure) = obj.as_closure() {
            let handles = closure.upvalues.clone();
            let upvalues: Vec<Upvalue> = handles.iter().map(|h| state.open_upvalues.get(*h)).collect();
            return call_function(state, closure.function, args, &handles, &upvalues);
        }
        if let Some(method) = obj.as_method() {
            let (parent, function) = (method.parent, method.function);
            let mut bound_args = Vec::with_capacity(args.len() + 1);
            bound_args.push(parent);
            bound_args.extend_from_slice(args);
            return call_function(state, function, &bound_args, &[], &[]);
        }
    }
    Err(HyError::runtime("value is not callable"))
}

/// Calls function `fn_index` directly, given the resolved upvalue
/// environment it should run with (empty for a plain, non-capturing
/// function).
pub fn call_function(
    state: &mut HyState,
    fn_index: u32,
    args: &[HyValue],
    handles: &[u32],
    upvalues: &[Upvalue],
) -> Result<HyValue, HyError> {
    let frame_size = state.program.functions[fn_index as usize].frame_size as usize;
    let needed = frame_size.max(args.len());
    let base = state.stack.len();
    state.stack.resize(base + needed, HyValue::NIL);
    state.stack[base..base + args.len()].copy_from_slice(args);

    let frame_index = match state.push_frame(fn_index, base) {
        Ok(i) => i,
        Err(e) => {
            state.stack.truncate(base);
            return Err(e);
        }
    };
    state.frames[frame_index].upvalues = upvalues.to_vec();
    state.frames[frame_index].upvalue_handles = handles.to_vec();

    let result = run_frame(state, frame_index);
    state.pop_frame();
    state.stack.truncate(base);
    result
}

fn run_frame(state: &mut HyState, frame_index: usize) -> Result<HyValue, HyError> {
    loop {
        let function = state.frames[frame_index].function;
        let pc = state.frames[frame_index].pc;
        let ins = state.program.functions[function as usize].code[pc];
        state.frames[frame_index].pc = pc + 1;
        if let Some(result) = step(state, frame_index, ins)? {
            return Ok(result);
        }
    }
}

fn read_num(state: &HyState, base: usize, slot: u16) -> Result<f64, HyError> {
    let v = state.stack[base + slot as usize];
    if !v.is_num() {
        return Err(HyError::runtime("number expected"));
    }
    Ok(v.as_f64())
}

fn read_string(state: &HyState, base: usize, slot: u16) -> Result<String, HyError> {
    let v = state.stack[base + slot as usize];
    if !v.is_ptr() {
        return Err(HyError::runtime("string expected"));
    }
    // SAFETY: produced by `state.heap`.
    let obj = unsafe { deref(v) };
    obj.as_string().map(|s| s.contents.clone()).ok_or_else(|| HyError::runtime("string expected"))
}

fn alloc_string(state: &mut HyState, contents: String) -> HyValue {
    state.heap.alloc(HeapObject::String(HyString { contents }))
}

fn primitive(tag: u16) -> HyValue {
    match tag {
        value::TAG_TRUE => HyValue::TRUE,
        value::TAG_FALSE => HyValue::FALSE,
        _ => HyValue::NIL,
    }
}

/// Executes one instruction. Returns `Some(value)` when it was a `RET*`,
/// ending this frame; `None` to keep running.
fn step(state: &mut HyState, frame_index: usize, ins: Instruction) -> Result<Option<HyValue>, HyError> {
    let base = state.frames[frame_index].base;
    let a1 = ins.arg(1);
    let a2 = ins.arg(2);
    let a3 = ins.arg(3);

    macro_rules! set {
        ($slot:expr, $value:expr) => {
            state.stack[base + $slot as usize] = $value
        };
    }
    macro_rules! get {
        ($slot:expr) => {
            state.stack[base + $slot as usize]
        };
    }

    match ins.opcode() {
        Opcode::MovLl => set!(a1, get!(a2)),
        Opcode::MovLi => set!(a1, HyValue::from_i16(a2 as i16)),
        Opcode::MovLn => set!(a1, HyValue::from_f64(state.program.constants[a2 as usize])),
        Opcode::MovLs => {
            let s = state.program.strings[a2 as usize].clone();
            let v = alloc_string(state, s);
            set!(a1, v);
        }
        Opcode::MovLp => set!(a1, primitive(a2)),
        Opcode::MovLf => set!(a1, HyValue::from_fn_index(a2)),
        Opcode::MovLv => set!(a1, HyValue::from_native_index(a2)),

        Opcode::MovUl => write_upvalue(state, frame_index, a1, get!(a2)),
        Opcode::MovUi => write_upvalue(state, frame_index, a1, HyValue::from_i16(a2 as i16)),
        Opcode::MovUn => write_upvalue(state, frame_index, a1, HyValue::from_f64(state.program.constants[a2 as usize])),
        Opcode::MovUs => {
            let s = state.program.strings[a2 as usize].clone();
            let v = alloc_string(state, s);
            write_upvalue(state, frame_index, a1, v);
        }
        Opcode::MovUp => write_upvalue(state, frame_index, a1, primitive(a2)),
        Opcode::MovUf => write_upvalue(state, frame_index, a1, HyValue::from_fn_index(a2)),
        Opcode::MovUv => write_upvalue(state, frame_index, a1, HyValue::from_native_index(a2)),

        Opcode::MovLu => {
            let v = state.frames[frame_index].upvalues[a2 as usize].get(&state.stack);
            set!(a1, v);
        }
        Opcode::UpvalueClose => {
            let frame_id = state.frames[frame_index].id;
            state.open_upvalues.close_frame(frame_id, &state.stack);
        }

        Opcode::MovTl => state.program.packages[a2 as usize].top_levels[a3 as usize].1 = get!(a1),
        Opcode::MovTi => {
            state.program.packages[a2 as usize].top_levels[a3 as usize].1 = HyValue::from_i16(a1 as i16)
        }
        Opcode::MovTn => {
            let n = state.program.constants[a1 as usize];
            state.program.packages[a2 as usize].top_levels[a3 as usize].1 = HyValue::from_f64(n);
        }
        Opcode::MovTs => {
            let s = state.program.strings[a1 as usize].clone();
            let v = alloc_string(state, s);
            state.program.packages[a2 as usize].top_levels[a3 as usize].1 = v;
        }
        Opcode::MovTp => state.program.packages[a2 as usize].top_levels[a3 as usize].1 = primitive(a1),
        Opcode::MovTf => {
            state.program.packages[a2 as usize].top_levels[a3 as usize].1 = HyValue::from_fn_index(a1)
        }
        Opcode::MovTv => {
            state.program.packages[a2 as usize].top_levels[a3 as usize].1 = HyValue::from_native_index(a1)
        }
        Opcode::MovLt => {
            let v = state.program.packages[a2 as usize].top_levels[a3 as usize].1;
            set!(a1, v);
        }
        Opcode::MovSelf => set!(a1, get!(0)),

        Opcode::AddLl => set!(a1, HyValue::from_f64(read_num(state, base, a1)? + read_num(state, base, a3)?)),
        Opcode::AddLi => set!(a1, HyValue::from_f64(read_num(state, base, a1)? + a2 as i16 as f64)),
        Opcode::AddLn => set!(a1, HyValue::from_f64(read_num(state, base, a1)? + state.program.constants[a2 as usize])),
        Opcode::AddIl => set!(a1, HyValue::from_f64(a2 as i16 as f64 + read_num(state, base, a3)?)),
        Opcode::AddNl => {
            set!(a1, HyValue::from_f64(state.program.constants[a2 as usize] + read_num(state, base, a3)?))
        }

        Opcode::SubLl => set!(a1, HyValue::from_f64(read_num(state, base, a1)? - read_num(state, base, a3)?)),
        Opcode::SubLi => set!(a1, HyValue::from_f64(read_num(state, base, a1)? - a2 as i16 as f64)),
        Opcode::SubLn => set!(a1, HyValue::from_f64(read_num(state, base, a1)? - state.program.constants[a2 as usize])),
        Opcode::SubIl => set!(a1, HyValue::from_f64(a2 as i16 as f64 - read_num(state, base, a3)?)),
        Opcode::SubNl => {
            set!(a1, HyValue::from_f64(state.program.constants[a2 as usize] - read_num(state, base, a3)?))
        }

        Opcode::MulLl => set!(a1, HyValue::from_f64(read_num(state, base, a1)? * read_num(state, base, a3)?)),
        Opcode::MulLi => set!(a1, HyValue::from_f64(read_num(state, base, a1)? * a2 as i16 as f64)),
        Opcode::MulLn => set!(a1, HyValue::from_f64(read_num(state, base, a1)? * state.program.constants[a2 as usize])),
        Opcode::MulIl => set!(a1, HyValue::from_f64(a2 as i16 as f64 * read_num(state, base, a3)?)),
        Opcode::MulNl => {
            set!(a1, HyValue::from_f64(state.program.constants[a2 as usize] * read_num(state, base, a3)?))
        }

        Opcode::DivLl => set!(a1, HyValue::from_f64(read_num(state, base, a1)? / read_num(state, base, a3)?)),
        Opcode::DivLi => set!(a1, HyValue::from_f64(read_num(state, base, a1)? / a2 as i16 as f64)),
        Opcode::DivLn => set!(a1, HyValue::from_f64(read_num(state, base, a1)? / state.program.constants[a2 as usize])),
        Opcode::DivIl => set!(a1, HyValue::from_f64(a2 as i16 as f64 / read_num(state, base, a3)?)),
        Opcode::DivNl => {
            set!(a1, HyValue::from_f64(state.program.constants[a2 as usize] / read_num(state, base, a3)?))
        }

        Opcode::ModLl => set!(a1, HyValue::from_f64(read_num(state, base, a1)? % read_num(state, base, a3)?)),
        Opcode::ModLi => set!(a1, HyValue::from_f64(read_num(state, base, a1)? % a2 as i16 as f64)),
        Opcode::ModLn => set!(a1, HyValue::from_f64(read_num(state, base, a1)? % state.program.constants[a2 as usize])),
        Opcode::ModIl => set!(a1, HyValue::from_f64(a2 as i16 as f64 % read_num(state, base, a3)?)),
        Opcode::ModNl => {
            set!(a1, HyValue::from_f64(state.program.constants[a2 as usize] % read_num(state, base, a3)?))
        }

        Opcode::ConcatLl => {
            let left = read_string(state, base, a1)?;
            let right = read_string(state, base, a3)?;
            let v = alloc_string(state, left + &right);
            set!(a1, v);
        }
        Opcode::ConcatLs => {
            let left = read_string(state, base, a1)?;
            let right = state.program.strings[a3 as usize].clone();
            let v = alloc_string(state, left + &right);
            set!(a1, v);
        }
        Opcode::ConcatSl => {
            let left = state.program.strings[a2 as usize].clone();
            let right = read_string(state, base, a3)?;
            let v = alloc_string(state, left + &right);
            set!(a1, v);
        }

        Opcode::NegL => set!(a1, HyValue::from_f64(-read_num(state, base, a2)?)),

        Opcode::IsTrueL => {
            if get!(a1).is_truthy() {
                state.frames[frame_index].pc += 1;
            }
        }
        Opcode::IsFalseL => {
            if !get!(a1).is_truthy() {
                state.frames[frame_index].pc += 1;
            }
        }

        Opcode::EqLl => set!(a1, HyValue::from_bool(unsafe { hydrogen_core::heap::value_eq(get!(a1), get!(a3)) })),
        Opcode::NeqLl => set!(a1, HyValue::from_bool(unsafe { !hydrogen_core::heap::value_eq(get!(a1), get!(a3)) })),
        Opcode::EqLi => set!(a1, HyValue::from_bool(get!(a1).is_num() && get!(a1).as_f64() == a2 as i16 as f64)),
        Opcode::NeqLi => set!(a1, HyValue::from_bool(!(get!(a1).is_num() && get!(a1).as_f64() == a2 as i16 as f64))),
        Opcode::EqLn => {
            set!(a1, HyValue::from_bool(get!(a1).is_num() && get!(a1).as_f64() == state.program.constants[a2 as usize]))
        }
        Opcode::NeqLn => set!(
            a1,
            HyValue::from_bool(!(get!(a1).is_num() && get!(a1).as_f64() == state.program.constants[a2 as usize]))
        ),
        Opcode::EqLs => {
            let matches = read_string(state, base, a1).ok().is_some_and(|s| s == state.program.strings[a2 as usize]);
            set!(a1, HyValue::from_bool(matches));
        }
        Opcode::NeqLs => {
            let matches = read_string(state, base, a1).ok().is_some_and(|s| s == state.program.strings[a2 as usize]);
            set!(a1, HyValue::from_bool(!matches));
        }
        Opcode::EqLp => set!(a1, HyValue::from_bool(get!(a1).bits() == primitive(a2).bits())),
        Opcode::NeqLp => set!(a1, HyValue::from_bool(get!(a1).bits() != primitive(a2).bits())),
        Opcode::EqLf => set!(a1, HyValue::from_bool(get!(a1).is_fn() && get!(a1).fn_index() == a2)),
        Opcode::NeqLf => set!(a1, HyValue::from_bool(!(get!(a1).is_fn() && get!(a1).fn_index() == a2))),
        Opcode::EqLv => set!(a1, HyValue::from_bool(get!(a1).is_native() && get!(a1).native_index() == a2)),
        Opcode::NeqLv => set!(a1, HyValue::from_bool(!(get!(a1).is_native() && get!(a1).native_index() == a2))),

        Opcode::LtLl => set!(a1, HyValue::from_bool(read_num(state, base, a1)? < read_num(state, base, a3)?)),
        Opcode::LtLi => set!(a1, HyValue::from_bool(read_num(state, base, a1)? < a2 as i16 as f64)),
        Opcode::LtLn => set!(a1, HyValue::from_bool(read_num(state, base, a1)? < state.program.constants[a2 as usize])),
        Opcode::LeLl => set!(a1, HyValue::from_bool(read_num(state, base, a1)? <= read_num(state, base, a3)?)),
        Opcode::LeLi => set!(a1, HyValue::from_bool(read_num(state, base, a1)? <= a2 as i16 as f64)),
        Opcode::LeLn => set!(a1, HyValue::from_bool(read_num(state, base, a1)? <= state.program.constants[a2 as usize])),
        Opcode::GtLl => set!(a1, HyValue::from_bool(read_num(state, base, a1)? > read_num(state, base, a3)?)),
        Opcode::GtLi => set!(a1, HyValue::from_bool(read_num(state, base, a1)? > a2 as i16 as f64)),
        Opcode::GtLn => set!(a1, HyValue::from_bool(read_num(state, base, a1)? > state.program.constants[a2 as usize])),
        Opcode::GeLl => set!(a1, HyValue::from_bool(read_num(state, base, a1)? >= read_num(state, base, a3)?)),
        Opcode::GeLi => set!(a1, HyValue::from_bool(read_num(state, base, a1)? >= a2 as i16 as f64)),
        Opcode::GeLn => set!(a1, HyValue::from_bool(read_num(state, base, a1)? >= state.program.constants[a2 as usize])),

        Opcode::Jmp => state.frames[frame_index].pc = a1 as usize,
        Opcode::Loop => state.frames[frame_index].pc = a1 as usize,

        Opcode::Call => {
            let callee = get!(a1);
            let argc = a2 as usize;
            let args: Vec<HyValue> = (0..argc).map(|i| get!(a1 + 1 + i as u16)).collect();
            let result = call_value(state, callee, &args)?;
            state.stack[base + a1 as usize] = result;
        }
        Opcode::CallMethod => {
            let instance = get!(a1);
            let field = a2 as usize;
            let argc = a3 as usize;
            let args: Vec<HyValue> = (0..argc).map(|i| get!(a1 + 1 + i as u16)).collect();
            let result = call_method(state, instance, field, &args)?;
            state.stack[base + a1 as usize] = result;
        }

        Opcode::Ret0 => return Ok(Some(HyValue::NIL)),
        Opcode::RetL => return Ok(Some(get!(a1))),
        Opcode::RetI => return Ok(Some(HyValue::from_i16(a1 as i16))),
        Opcode::RetN => return Ok(Some(HyValue::from_f64(state.program.constants[a1 as usize]))),
        Opcode::RetS => {
            let s = state.program.strings[a1 as usize].clone();
            return Ok(Some(alloc_string(state, s)));
        }
        Opcode::RetP => return Ok(Some(primitive(a1))),
        Opcode::RetF => return Ok(Some(HyValue::from_fn_index(a1))),
        Opcode::RetV => return Ok(Some(HyValue::from_native_index(a1))),

        Opcode::MakeClosure => {
            let function = a2 as u32;
            let closure = state.heap.alloc(HeapObject::Closure(HyClosure { function, upvalues: Vec::new() }));
            set!(a1, closure);
        }
        Opcode::CaptureLocal => {
            let frame_id = state.frames[frame_index].id;
            let handle = state.open_upvalues.capture(frame_id, base + a2 as usize);
            push_capture(state, base, a1, handle);
        }
        Opcode::CaptureUpvalue => {
            let handle = state.frames[frame_index].upvalue_handles[a2 as usize];
            push_capture(state, base, a1, handle);
        }

        Opcode::StructNew | Opcode::NativeStructNew => {
            let def_index = a2 as usize;
            let argc = a3 as usize;
            let instance = new_struct_instance(state, def_index as u32);
            let args: Vec<HyValue> = (0..argc).map(|i| get!(a1 + 1 + i as u16)).collect();
            if let Some(ctor) = state.program.structs[def_index].constructor {
                let mut ctor_args = Vec::with_capacity(args.len() + 1);
                ctor_args.push(instance);
                ctor_args.extend(args);
                call_function(state, ctor, &ctor_args, &[], &[])?;
            }
            set!(a1, instance);
        }
        Opcode::StructCallConstructor => {
            let instance = get!(a1);
            let def_index = a2 as usize;
            let argc = a3 as usize;
            let args: Vec<HyValue> = (0..argc).map(|i| get!(a1 + 1 + i as u16)).collect();
            if let Some(ctor) = state.program.structs[def_index].constructor {
                let mut ctor_args = Vec::with_capacity(args.len() + 1);
                ctor_args.push(instance);
                ctor_args.extend(args);
                call_function(state, ctor, &ctor_args, &[], &[])?;
            }
        }
        Opcode::StructField => {
            let v = read_struct_field(state, get!(a2), a3 as usize)?;
            set!(a1, v);
        }

        Opcode::StructSetL => write_struct_field(state, get!(a1), a2 as usize, get!(a3))?,
        Opcode::StructSetI => write_struct_field(state, get!(a1), a2 as usize, HyValue::from_i16(a3 as i16))?,
        Opcode::StructSetN => {
            let n = state.program.constants[a3 as usize];
            write_struct_field(state, get!(a1), a2 as usize, HyValue::from_f64(n))?;
        }
        Opcode::StructSetS => {
            let s = state.program.strings[a3 as usize].clone();
            let v = alloc_string(state, s);
            write_struct_field(state, get!(a1), a2 as usize, v)?;
        }
        Opcode::StructSetP => write_struct_field(state, get!(a1), a2 as usize, primitive(a3))?,
        Opcode::StructSetF => write_struct_field(state, get!(a1), a2 as usize, HyValue::from_fn_index(a3))?,
        Opcode::StructSetV => write_struct_field(state, get!(a1), a2 as usize, HyValue::from_native_index(a3))?,

        Opcode::ArrayNew => {
            let len = a2 as usize;
            let array = state.heap.alloc(HeapObject::Array(HyArray { contents: vec![HyValue::NIL; len] }));
            set!(a1, array);
        }
        Opcode::ArrayGetL => {
            let index = read_num(state, base, a3)? as usize;
            let v = read_array_element(state, get!(a2), index)?;
            set!(a1, v);
        }
        Opcode::ArrayGetI => {
            let v = read_array_element(state, get!(a2), a3 as usize)?;
            set!(a1, v);
        }

        Opcode::ArrayISetL => write_array_element(state, get!(a1), a2 as usize, get!(a3))?,
        Opcode::ArrayISetI => write_array_element(state, get!(a1), a2 as usize, HyValue::from_i16(a3 as i16))?,
        Opcode::ArrayISetN => {
            let n = state.program.constants[a3 as usize];
            write_array_element(state, get!(a1), a2 as usize, HyValue::from_f64(n))?;
        }
        Opcode::ArrayISetS => {
            let s = state.program.strings[a3 as usize].clone();
            let v = alloc_string(state, s);
            write_array_element(state, get!(a1), a2 as usize, v)?;
        }
        Opcode::ArrayISetP => write_array_element(state, get!(a1), a2 as usize, primitive(a3))?,
        Opcode::ArrayISetF => write_array_element(state, get!(a1), a2 as usize, HyValue::from_fn_index(a3))?,
        Opcode::ArrayISetV => write_array_element(state, get!(a1), a2 as usize, HyValue::from_native_index(a3))?,

        Opcode::ArrayLSetL => {
            let index = read_num(state, base, a2)? as usize;
            write_array_element(state, get!(a1), index, get!(a3))?;
        }
        Opcode::ArrayLSetI => {
            let index = read_num(state, base, a2)? as usize;
            write_array_element(state, get!(a1), index, HyValue::from_i16(a3 as i16))?;
        }
        Opcode::ArrayLSetN => {
            let index = read_num(state, base, a2)? as usize;
            let n = state.program.constants[a3 as usize];
            write_array_element(state, get!(a1), index, HyValue::from_f64(n))?;
        }
        Opcode::ArrayLSetS => {
            let index = read_num(state, base, a2)? as usize;
            let s = state.program.strings[a3 as usize].clone();
            let v = alloc_string(state, s);
            write_array_element(state, get!(a1), index, v)?;
        }
        Opcode::ArrayLSetP => {
            let index = read_num(state, base, a2)? as usize;
            write_array_element(state, get!(a1), index, primitive(a3))?;
        }
        Opcode::ArrayLSetF => {
            let index = read_num(state, base, a2)? as usize;
            write_array_element(state, get!(a1), index, HyValue::from_fn_index(a3))?;
        }
        Opcode::ArrayLSetV => {
            let index = read_num(state, base, a2)? as usize;
            write_array_element(state, get!(a1), index, HyValue::from_native_index(a3))?;
        }

        Opcode::NoOp => {}
    }
    Ok(None)
}

fn write_upvalue(state: &mut HyState, frame_index: usize, index: u16, value: HyValue) {
    let up = state.frames[frame_index].upvalues[index as usize].clone();
    up.set(&mut state.stack, value);
}

fn push_capture(state: &mut HyState, base: usize, slot: u16, handle: u32) {
    let target = state.stack[base + slot as usize];
    // SAFETY: only ever called right after `MAKE_CLOSURE` wrote a closure
    // object into this slot.
    let obj = unsafe { deref_mut(target) };
    obj.as_closure_mut().expect("CAPTURE_* without a preceding MAKE_CLOSURE").upvalues.push(handle);
}

fn new_struct_instance(state: &mut HyState, def_index: u32) -> HyValue {
    let field_count = state.program.structs[def_index as usize].fields.len();
    let def = &state.program.structs[def_index as usize];
    let mut fields = vec![HyValue::NIL; field_count];
    let methods: Vec<(usize, u32)> =
        def.methods.iter().enumerate().filter_map(|(i, m)| m.map(|f| (i, f))).collect();
    let instance = state.heap.alloc(HeapObject::Struct(HyStructInstance { definition: def_index, fields: Vec::new() }));
    for (slot, function) in methods {
        fields[slot] = state.heap.alloc(HeapObject::Method(HyMethod { parent: instance, function }));
    }
    // SAFETY: `instance` was just allocated by `state.heap` above.
    let obj = unsafe { deref_mut(instance) };
    obj.as_struct_mut().unwrap().fields = fields;
    instance
}

fn read_struct_field(state: &HyState, instance: HyValue, field: usize) -> Result<HyValue, HyError> {
    if !instance.is_ptr() {
        return Err(HyError::runtime("struct instance expected"));
    }
    // SAFETY: produced by `state.heap`.
    let obj = unsafe { deref(instance) };
    let s = obj.as_struct().ok_or_else(|| HyError::runtime("struct instance expected"))?;
    s.fields.get(field).copied().ok_or_else(|| HyError::runtime("no such field"))
}

fn write_struct_field(state: &mut HyState, instance: HyValue, field: usize, value: HyValue) -> Result<(), HyError> {
    if !instance.is_ptr() {
        return Err(HyError::runtime("struct instance expected"));
    }
    // SAFETY: produced by `state.heap`.
    let obj = unsafe { deref_mut(instance) };
    let s = obj.as_struct_mut().ok_or_else(|| HyError::runtime("struct instance expected"))?;
    if field >= s.fields.len() {
        return Err(HyError::runtime("no such field"));
    }
    s.fields[field] = value;
    Ok(())
}

/// Dispatches a `.name(args...)` call on `instance`: a struct field slot
/// holding a method (or a plain callable value stored in a data field) for
/// struct receivers, a built-in core method for array/string receivers.
fn call_method(state: &mut HyState, instance: HyValue, field: usize, args: &[HyValue]) -> Result<HyValue, HyError> {
    if !instance.is_ptr() {
        return Err(HyError::runtime("value has no methods"));
    }
    // SAFETY: produced by `state.heap`.
    let obj = unsafe { deref(instance) };
    if obj.as_struct().is_some() {
        let value = read_struct_field(state, instance, field)?;
        return call_value(state, value, args);
    }
    if obj.as_array().is_some() || obj.as_string().is_some() {
        let name = state.program.fields[field].clone();
        let method = native::core_method_find(obj.obj_type(), &name, args.len())
            .ok_or_else(|| HyError::runtime(format!("no such method '{name}'")))??;
        return (method.func)(instance, args);
    }
    Err(HyError::runtime("value has no methods"))
}

fn read_array_element(state: &HyState, array: HyValue, index: usize) -> Result<HyValue, HyError> {
    if !array.is_ptr() {
        return Err(HyError::runtime("array expected"));
    }
    // SAFETY: produced by `state.heap`.
    let obj = unsafe { deref(array) };
    let a = obj.as_array().ok_or_else(|| HyError::runtime("array expected"))?;
    a.contents.get(index).copied().ok_or_else(|| HyError::runtime("array index out of bounds"))
}

fn write_array_element(state: &mut HyState, array: HyValue, index: usize, value: HyValue) -> Result<(), HyError> {
    if !array.is_ptr() {
        return Err(HyError::runtime("array expected"));
    }
    // SAFETY: produced by `state.heap`.
    let obj = unsafe { deref_mut(array) };
    let a = obj.as_array_mut().ok_or_else(|| HyError::runtime("array expected"))?;
    if index >= a.contents.len() {
        return Err(HyError::runtime("array index out of bounds"));
    }
    a.contents[index] = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::HyConfig;
    use crate::state::HyState;

    #[test]
    fn arithmetic_and_control_flow_evaluate() {
        let mut state = HyState::new(HyConfig::default());
        let result = state
            .run_string(None, "let x = 0\nlet i = 0\nwhile i < 5 {\n x = x + i\n i = i + 1\n}\nreturn x".into())
            .unwrap();
        assert_eq!(result.as_f64(), 10.0);
    }

    #[test]
    fn recursive_function_calls_work() {
        let mut state = HyState::new(HyConfig::default());
        let src = "fn fact(n) {\n if n <= 1 { return 1 }\n return n * fact(n - 1)\n}\nreturn fact(5)";
        let result = state.run_string(None, src.into()).unwrap();
        assert_eq!(result.as_f64(), 120.0);
    }

    #[test]
    fn closures_capture_enclosing_locals() {
        let mut state = HyState::new(HyConfig::default());
        let src = "let n = 10\nfn add_n(x) {\n return x + n\n}\nreturn add_n(5)";
        let result = state.run_string(None, src.into()).unwrap();
        assert_eq!(result.as_f64(), 15.0);
    }

    #[test]
    fn string_concatenation_allocates_a_new_string() {
        let mut state = HyState::new(HyConfig::default());
        let result = state.run_string(None, "let s = \"foo\" .. \"bar\"\nreturn s".into()).unwrap();
        assert!(result.is_ptr());
    }

    #[test]
    fn division_by_zero_is_not_a_runtime_panic() {
        let mut state = HyState::new(HyConfig::default());
        let result = state.run_string(None, "let x = 1 / 0\nreturn x".into()).unwrap();
        assert!(result.as_f64().is_infinite());
    }

    #[test]
    fn struct_constructor_and_methods_run() {
        let mut state = HyState::new(HyConfig::default());
        let src = "struct Point {\n x\n y\n new(x, y) {\n self.x = x\n self.y = y\n }\n fn sum() {\n return self.x + self.y\n }\n}\nlet p = new Point(3, 4)\nreturn p.sum()";
        let result = state.run_string(None, src.into()).unwrap();
        assert_eq!(result.as_f64(), 7.0);
    }

    #[test]
    fn array_literal_index_and_assignment_round_trip() {
        let mut state = HyState::new(HyConfig::default());
        let src = "let a = [1, 2, 3]\na[1] = 20\nreturn a[1] + a[0]";
        let result = state.run_string(None, src.into()).unwrap();
        assert_eq!(result.as_f64(), 21.0);
    }
}
