//! Embedding-facing interpreter state: the heap, value stack, call frames
//! and the program they execute against.

use std::path::Path;

use hydrogen_compiler::{compile_package, FsLoader, SourceLoader};
use hydrogen_core::{Diagnostic, Heap, HyError, HyValue, Program};

use crate::closures::{OpenUpvalues, Upvalue};
use crate::config::HyConfig;

/// One active function call.
pub struct Frame {
    pub function: u32,
    /// Index into `HyState`'s value stack of this frame's slot 0.
    pub base: usize,
    pub pc: usize,
    /// Stable identity for this invocation. Stack position alone isn't
    /// stable once deeper frames pop, but this counter never repeats, so
    /// it's what captured upvalues key their `(frame, slot)` pair on.
    pub id: usize,
    /// This function's own captured environment, resolved once at call
    /// time from the closure object (if any) that was invoked.
    pub upvalues: Vec<Upvalue>,
    /// Open-upvalue-table handles parallel to `upvalues`, reused verbatim
    /// by `CAPTURE_UPVALUE` when this function itself declares a nested
    /// closure over one of them.
    pub upvalue_handles: Vec<u32>,
}

struct NullLoader;

impl SourceLoader for NullLoader {
    fn load(&mut self, path: &str) -> Result<String, HyError> {
        Err(HyError::io(format!("cannot import '{path}': running from a bare string has no base directory")))
    }
}

/// Owns everything a running Hydrogen program touches: the shared compiled
/// arena, the heap, the value stack and the active call frames.
pub struct HyState {
    pub program: Program,
    pub heap: Heap,
    pub config: HyConfig,
    pub(crate) stack: Vec<HyValue>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) open_upvalues: OpenUpvalues,
    next_frame_id: usize,
}

impl Default for HyState {
    fn default() -> Self {
        HyState::new(HyConfig::default())
    }
}

impl HyState {
    pub fn new(config: HyConfig) -> Self {
        HyState {
            stack: Vec::with_capacity(config.initial_stack_size),
            program: Program::new(),
            heap: Heap::new(),
            config,
            frames: Vec::new(),
            open_upvalues: OpenUpvalues::new(),
            next_frame_id: 0,
        }
    }

    /// Compiles `source` as an anonymous package and runs its top-level
    /// statements, returning whatever its implicit `return` produced (`nil`
    /// if it fell off the end). Imports are rejected: a bare string has no
    /// base directory to resolve them against — use [`HyState::run_file`]
    /// for scripts that import other files.
    pub fn run_string(&mut self, file: Option<String>, source: String) -> Result<HyValue, Diagnostic> {
        let mut loader = NullLoader;
        self.compile_and_run(&mut loader, None, file, source)
    }

    /// Reads and runs the file at `path`, resolving any `import`s relative
    /// to its parent directory.
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<HyValue, Diagnostic> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            HyError::io(format!("{e}")).into_diagnostic(Some(path.display().to_string()), None)
        })?;
        let base_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        let mut loader = FsLoader { base_dir };
        let file = Some(path.display().to_string());
        self.compile_and_run(&mut loader, None, file, source)
    }

    fn compile_and_run<L: SourceLoader>(
        &mut self,
        loader: &mut L,
        package_name: Option<String>,
        file: Option<String>,
        source: String,
    ) -> Result<HyValue, Diagnostic> {
        let source_text = source.clone();
        let package = compile_package(&mut self.program, loader, package_name, file.clone(), source)
            .map_err(|e| e.into_diagnostic(file.clone(), Some(&source_text)))?;
        let main_fn = self.program.packages[package as usize]
            .main_fn
            .expect("compile_package always records a package's main function");
        self.program.packages[package as usize].initialised = true;
        crate::exec::call_function(self, main_fn, &[], &[], &[])
            .map_err(|e| e.into_diagnostic(file, Some(&source_text)))
    }

    pub fn stack(&self) -> &[HyValue] {
        &self.stack
    }

    pub(crate) fn push_frame(&mut self, function: u32, base: usize) -> Result<usize, HyError> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(HyError::runtime("stack overflow"));
        }
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        self.frames.push(Frame { function, base, pc: 0, id, upvalues: Vec::new(), upvalue_handles: Vec::new() });
        Ok(self.frames.len() - 1)
    }

    pub(crate) fn pop_frame(&mut self) {
        let frame = self.frames.pop().expect("pop_frame called with no active frame");
        self.open_upvalues.close_frame(frame.id, &self.stack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_a_bare_string_rejects_imports() {
        let mut state = HyState::default();
        let err = state.run_string(None, "import \"foo\"".into());
        assert!(err.is_err());
    }

    #[test]
    fn returns_nil_when_nothing_is_returned() {
        let mut state = HyState::default();
        let result = state.run_string(None, "let x = 1".into()).unwrap();
        assert!(result.is_nil());
    }
}
