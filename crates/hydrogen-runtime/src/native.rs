//! Core methods available on every `Array`/`String` heap object, looked up
//! by name rather than compiled as ordinary function calls — `array.push(1)`
//! resolves through this table instead of the struct method list.
//!
//! Called from `exec::call_method`, which the `CALL_METHOD` opcode reaches
//! for any non-struct receiver.

use hydrogen_core::heap::{deref, deref_mut};
use hydrogen_core::{HeapObject, HyError, HyValue, ObjType};

pub type CoreMethodFn = fn(HyValue, &[HyValue]) -> Result<HyValue, HyError>;

#[derive(Clone, Copy)]
pub struct CoreMethod {
    pub name: &'static str,
    /// `None` means variadic.
    pub arity: Option<u32>,
    pub func: CoreMethodFn,
}

const ARRAY_METHODS: &[CoreMethod] = &[
    CoreMethod { name: "len", arity: Some(0), func: array_len },
    CoreMethod { name: "push", arity: None, func: array_push },
    CoreMethod { name: "insert", arity: Some(2), func: array_insert },
    CoreMethod { name: "remove", arity: Some(1), func: array_remove },
    CoreMethod { name: "pop", arity: Some(0), func: array_pop },
];

const STRING_METHODS: &[CoreMethod] = &[CoreMethod { name: "len", arity: Some(0), func: string_len }];

/// Looks up a core method by receiver type and name, checking arity against
/// the number of arguments the call site supplied (excluding the receiver).
pub fn core_method_find(obj_type: ObjType, name: &str, argc: usize) -> Option<Result<CoreMethod, HyError>> {
    let table = match obj_type {
        ObjType::Array => ARRAY_METHODS,
        ObjType::String => STRING_METHODS,
        _ => return None,
    };
    let method = table.iter().find(|m| m.name == name)?;
    if let Some(arity) = method.arity {
        if arity as usize != argc {
            return Some(Err(HyError::runtime(format!(
                "'{name}' expects {arity} argument(s), got {argc}"
            ))));
        }
    }
    Some(Ok(*method))
}

fn array_of<'a>(receiver: HyValue) -> Result<&'a HeapObject, HyError> {
    if !receiver.is_ptr() {
        return Err(HyError::runtime("array expected"));
    }
    // SAFETY: callers only pass receivers they just pulled off the stack,
    // which were allocated by the still-live heap executing this call.
    Ok(unsafe { deref(receiver) })
}

fn array_len(receiver: HyValue, _args: &[HyValue]) -> Result<HyValue, HyError> {
    let obj = array_of(receiver)?;
    let array = obj.as_array().ok_or_else(|| HyError::runtime("array expected"))?;
    Ok(HyValue::from_f64(array.contents.len() as f64))
}

fn array_push(receiver: HyValue, args: &[HyValue]) -> Result<HyValue, HyError> {
    if !receiver.is_ptr() {
        return Err(HyError::runtime("array expected"));
    }
    // SAFETY: see `array_of`.
    let obj = unsafe { deref_mut(receiver) };
    let array = obj.as_array_mut().ok_or_else(|| HyError::runtime("array expected"))?;
    array.contents.extend_from_slice(args);
    Ok(HyValue::NIL)
}

fn array_insert(receiver: HyValue, args: &[HyValue]) -> Result<HyValue, HyError> {
    if !args[0].is_num() {
        return Err(HyError::runtime("number expected"));
    }
    let index = args[0].as_f64() as usize;
    if !receiver.is_ptr() {
        return Err(HyError::runtime("array expected"));
    }
    // SAFETY: see `array_of`.
    let obj = unsafe { deref_mut(receiver) };
    let array = obj.as_array_mut().ok_or_else(|| HyError::runtime("array expected"))?;
    if index > array.contents.len() {
        return Err(HyError::runtime("array index out of bounds"));
    }
    array.contents.insert(index, args[1]);
    Ok(HyValue::NIL)
}

fn array_remove(receiver: HyValue, args: &[HyValue]) -> Result<HyValue, HyError> {
    if !args[0].is_num() {
        return Err(HyError::runtime("number expected"));
    }
    let index = args[0].as_f64() as usize;
    if !receiver.is_ptr() {
        return Err(HyError::runtime("array expected"));
    }
    // SAFETY: see `array_of`.
    let obj = unsafe { deref_mut(receiver) };
    let array = obj.as_array_mut().ok_or_else(|| HyError::runtime("array expected"))?;
    if index >= array.contents.len() {
        return Err(HyError::runtime("array index out of bounds"));
    }
    Ok(array.contents.remove(index))
}

fn array_pop(receiver: HyValue, _args: &[HyValue]) -> Result<HyValue, HyError> {
    if !receiver.is_ptr() {
        return Err(HyError::runtime("array expected"));
    }
    // SAFETY: see `array_of`.
    let obj = unsafe { deref_mut(receiver) };
    let array = obj.as_array_mut().ok_or_else(|| HyError::runtime("array expected"))?;
    array.contents.pop().ok_or_else(|| HyError::runtime("pop from an empty array"))
}

fn string_len(receiver: HyValue, _args: &[HyValue]) -> Result<HyValue, HyError> {
    let obj = array_of(receiver)?;
    let s = obj.as_string().ok_or_else(|| HyError::runtime("string expected"))?;
    Ok(HyValue::from_f64(s.contents.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrogen_core::{Heap, HyArray, HyString};

    #[test]
    fn push_appends_all_arguments_in_order() {
        let mut heap = Heap::new();
        let array = heap.alloc(HeapObject::Array(HyArray { contents: vec![] }));
        array_push(array, &[HyValue::from_f64(1.0), HyValue::from_f64(2.0)]).unwrap();
        let len = array_len(array, &[]).unwrap();
        assert_eq!(len.as_f64(), 2.0);
    }

    #[test]
    fn insert_shifts_the_tail_right() {
        let mut heap = Heap::new();
        let array = heap.alloc(HeapObject::Array(HyArray {
            contents: vec![HyValue::from_f64(1.0), HyValue::from_f64(3.0)],
        }));
        array_insert(array, &[HyValue::from_f64(1.0), HyValue::from_f64(2.0)]).unwrap();
        // SAFETY: test-local, heap still alive.
        let obj = unsafe { deref(array) };
        let contents = &obj.as_array().unwrap().contents;
        assert_eq!(contents.iter().map(|v| v.as_f64()).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn pop_from_empty_array_errors() {
        let mut heap = Heap::new();
        let array = heap.alloc(HeapObject::Array(HyArray { contents: vec![] }));
        assert!(array_pop(array, &[]).is_err());
    }

    #[test]
    fn string_len_counts_bytes() {
        let mut heap = Heap::new();
        let s = heap.alloc(HeapObject::String(HyString { contents: "hello".into() }));
        let len = string_len(s, &[]).unwrap();
        assert_eq!(len.as_f64(), 5.0);
    }

    #[test]
    fn unknown_method_returns_none() {
        assert!(core_method_find(ObjType::Array, "nonexistent", 0).is_none());
    }

    #[test]
    fn wrong_arity_is_a_runtime_error() {
        let result = core_method_find(ObjType::Array, "len", 1).unwrap();
        assert!(result.is_err());
    }
}
