//! `extern "C"` embedding shim.
//!
//! The idiomatic Rust surface is [`crate::HyState`] directly; this module
//! exists so a C embedder (or any FFI-capable host) gets the same
//! create/free/run/inspect shape without linking against Rust types. A
//! `HyState` crosses the boundary as an opaque pointer; values cross it as
//! raw `u64` bit patterns, since [`HyValue`] is `#[repr(transparent)]` over
//! one.
//!
//! Registering a native function or struct from the C side is not
//! implemented: [`hydrogen_core::NativeFn`] is a plain Rust function
//! pointer with no slot for caller-supplied context, so there is nowhere to
//! stash a C callback's own state between the registration call and the
//! invocation the VM later makes. `hy_state_add_native` exists as a stable
//! symbol returning a clear error rather than silently doing nothing.

use std::ffi::{CStr, CString};

use libc::{c_char, c_int};

use hydrogen_core::HyValue;

use crate::config::HyConfig;
use crate::state::HyState;

/// Result of a run call: either `value` holds the returned [`HyValue`]'s
/// bits, or `error` holds an owned, NUL-terminated message the caller must
/// release with [`hy_string_free`].
#[repr(C)]
pub struct HyRunResult {
    pub ok: bool,
    pub value: u64,
    pub error: *mut c_char,
}

impl HyRunResult {
    fn ok(value: HyValue) -> Self {
        HyRunResult { ok: true, value: value.bits(), error: std::ptr::null_mut() }
    }

    fn err(message: String) -> Self {
        let c_string = CString::new(message).unwrap_or_else(|_| CString::new("<error message contained NUL>").unwrap());
        HyRunResult { ok: false, value: 0, error: c_string.into_raw() }
    }
}

/// Creates a new interpreter state with default configuration.
///
/// # Safety
/// The returned pointer must be released exactly once with [`hy_state_free`].
#[no_mangle]
pub extern "C" fn hy_state_new() -> *mut HyState {
    Box::into_raw(Box::new(HyState::default()))
}

/// Creates a new interpreter state with an explicit configuration.
///
/// # Safety
/// The returned pointer must be released exactly once with [`hy_state_free`].
#[no_mangle]
pub extern "C" fn hy_state_new_with_config(
    initial_stack_size: usize,
    max_call_depth: usize,
    trace_bytecode: bool,
) -> *mut HyState {
    let config = HyConfig { initial_stack_size, max_call_depth, trace_bytecode };
    Box::into_raw(Box::new(HyState::new(config)))
}

/// Frees a state created by [`hy_state_new`] or [`hy_state_new_with_config`].
///
/// # Safety
/// `state` must be a pointer this module produced, not yet freed, and not
/// used again afterwards.
#[no_mangle]
pub unsafe extern "C" fn hy_state_free(state: *mut HyState) {
    if state.is_null() {
        return;
    }
    // SAFETY: caller's contract above.
    drop(unsafe { Box::from_raw(state) });
}

/// Compiles and runs `source` as an anonymous package.
///
/// `file` may be null (reported as `<string>` in diagnostics).
///
/// # Safety
/// `state` must be a live pointer from [`hy_state_new`]; `source` must be a
/// valid, NUL-terminated, UTF-8 C string; `file`, if non-null, likewise.
#[no_mangle]
pub unsafe extern "C" fn hy_state_run_string(
    state: *mut HyState,
    file: *const c_char,
    source: *const c_char,
) -> HyRunResult {
    // SAFETY: caller's contract above.
    let state = unsafe { &mut *state };
    let source = match unsafe { CStr::from_ptr(source) }.to_str() {
        Ok(s) => s.to_string(),
        Err(_) => return HyRunResult::err("source is not valid UTF-8".to_string()),
    };
    let file = if file.is_null() {
        None
    } else {
        match unsafe { CStr::from_ptr(file) }.to_str() {
            Ok(s) => Some(s.to_string()),
            Err(_) => return HyRunResult::err("file path is not valid UTF-8".to_string()),
        }
    };
    match state.run_string(file, source) {
        Ok(value) => HyRunResult::ok(value),
        Err(diag) => HyRunResult::err(diag.to_string()),
    }
}

/// Compiles and runs the file at `path`, resolving imports relative to its
/// parent directory.
///
/// # Safety
/// `state` must be a live pointer from [`hy_state_new`]; `path` must be a
/// valid, NUL-terminated, UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn hy_state_run_file(state: *mut HyState, path: *const c_char) -> HyRunResult {
    // SAFETY: caller's contract above.
    let state = unsafe { &mut *state };
    let path = match unsafe { CStr::from_ptr(path) }.to_str() {
        Ok(s) => s,
        Err(_) => return HyRunResult::err("path is not valid UTF-8".to_string()),
    };
    match state.run_file(path) {
        Ok(value) => HyRunResult::ok(value),
        Err(diag) => HyRunResult::err(diag.to_string()),
    }
}

/// See the module doc comment: always returns an error. The symbol exists so
/// embedders get a clear failure instead of a missing-symbol link error.
///
/// # Safety
/// `state` must be a live pointer from [`hy_state_new`]; `name` must be a
/// valid, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn hy_state_add_native(
    _state: *mut HyState,
    name: *const c_char,
    _arity: c_int,
) -> *mut c_char {
    // SAFETY: caller's contract above.
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
    let message = format!(
        "registering native function '{name}' over the C boundary is not supported: \
         recompile with the function linked in as a Rust NativeFn instead"
    );
    CString::new(message).unwrap().into_raw()
}

/// Frees a C string this module returned (an `HyRunResult::error`, or the
/// result of [`hy_state_add_native`]).
///
/// # Safety
/// `s` must be a pointer this module produced via `CString::into_raw`, not
/// yet freed, and not used again afterwards. Passing null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn hy_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: caller's contract above.
    drop(unsafe { CString::from_raw(s) });
}

#[no_mangle]
pub extern "C" fn hy_value_nil() -> u64 {
    HyValue::NIL.bits()
}

#[no_mangle]
pub extern "C" fn hy_value_from_f64(n: f64) -> u64 {
    HyValue::from_f64(n).bits()
}

#[no_mangle]
pub extern "C" fn hy_value_from_bool(b: bool) -> u64 {
    HyValue::from_bool(b).bits()
}

#[no_mangle]
pub extern "C" fn hy_value_is_nil(bits: u64) -> bool {
    HyValue::from_bits(bits).is_nil()
}

#[no_mangle]
pub extern "C" fn hy_value_is_num(bits: u64) -> bool {
    HyValue::from_bits(bits).is_num()
}

#[no_mangle]
pub extern "C" fn hy_value_is_bool(bits: u64) -> bool {
    HyValue::from_bits(bits).is_bool()
}

/// Unpacks a numeric value. Behaviour is unspecified (not unsafe) if `bits`
/// is not a number — check [`hy_value_is_num`] first.
#[no_mangle]
pub extern "C" fn hy_value_as_f64(bits: u64) -> f64 {
    let value = HyValue::from_bits(bits);
    if value.is_num() { value.as_f64() } else { f64::NAN }
}

#[no_mangle]
pub extern "C" fn hy_value_as_bool(bits: u64) -> bool {
    HyValue::from_bits(bits).as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn run_string_round_trips_a_number() {
        let state = hy_state_new();
        let source = CString::new("return 1 + 2").unwrap();
        // SAFETY: state is a live pointer from hy_state_new; source is a
        // valid NUL-terminated C string; file is null.
        let result = unsafe { hy_state_run_string(state, std::ptr::null(), source.as_ptr()) };
        assert!(result.ok);
        assert_eq!(hy_value_as_f64(result.value), 3.0);
        // SAFETY: state was created by hy_state_new above and not yet freed.
        unsafe { hy_state_free(state) };
    }

    #[test]
    fn run_string_surfaces_a_compile_error_message() {
        let state = hy_state_new();
        let source = CString::new("let").unwrap();
        // SAFETY: see above.
        let result = unsafe { hy_state_run_string(state, std::ptr::null(), source.as_ptr()) };
        assert!(!result.ok);
        assert!(!result.error.is_null());
        // SAFETY: result.error was produced by HyRunResult::err above.
        unsafe { hy_string_free(result.error) };
        // SAFETY: see above.
        unsafe { hy_state_free(state) };
    }

    #[test]
    fn value_predicates_match_construction() {
        assert!(hy_value_is_nil(hy_value_nil()));
        assert!(hy_value_is_num(hy_value_from_f64(1.5)));
        assert!(hy_value_is_bool(hy_value_from_bool(true)));
        assert!(hy_value_as_bool(hy_value_from_bool(true)));
    }
}
