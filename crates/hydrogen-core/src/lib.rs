//! Hydrogen Core: NaN-tagged values, heap objects and bytecode encoding.
//!
//! This crate is the shared foundation between the compiler (lexer, parser
//! and bytecode emitter) and the runtime (executor and embedding API): it
//! owns the value representation and heap object model both sides need to
//! agree on, plus the error/diagnostic types that cross the embedding
//! boundary.
//!
//! # Modules
//!
//! - `value`: the 8-byte NaN-tagged `HyValue` and its predicates/constructors
//! - `heap`: heap-allocated strings, struct instances, methods and arrays
//! - `bytecode`: the 64-bit instruction encoding and opcode table
//! - `ident`: borrowed/owned identifier names
//! - `error`: the `HyError`/`Diagnostic` types returned across the API

pub mod bytecode;
pub mod error;
pub mod heap;
pub mod ident;
pub mod program;
pub mod value;

pub use bytecode::{Instruction, Opcode};
pub use error::{Diagnostic, HyError};
pub use heap::{HeapObject, Heap, HyArray, HyClosure, HyMethod, HyString, HyStructInstance, ObjType};
pub use ident::Identifier;
pub use program::{Function, HyArgs, NativeFn, NativeFunction, Package, Program, Source, StructDefinition, UpvalueDesc, VAR_ARG};
pub use value::{ceil_power_of_2, HyValue};

/// Sentinel used throughout the compiler/runtime for "no such index",
/// mirroring the original `NOT_FOUND` convention.
pub const NOT_FOUND: u32 = u32::MAX;
