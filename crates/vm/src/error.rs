//! VM errors.
//!
//! Two families: [`LoadError`] covers everything that can go wrong while
//! reading and linking a compiled shader (always fatal for that program),
//! and [`RuntimeError`] covers internal consistency violations during
//! execution. Recoverable conditions (bad stored argument, array index
//! out of range) are logged and recovered at the call site and never
//! surface as errors.

use thiserror::Error;
use umbra_foundation::VarType;

/// Loader result type.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Runtime result type.
pub type RunResult<T> = std::result::Result<T, RuntimeError>;

/// Fatal errors while loading or linking a compiled shader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unrecognized token `{0}`")]
    Lex(String),

    #[error("unexpected end of bytecode stream, expected {0}")]
    UnexpectedEof(String),

    #[error("expected {expected}, found `{found}`")]
    Unexpected { expected: String, found: String },

    #[error("unknown shader kind `{0}`")]
    UnknownShaderKind(String),

    #[error("bytecode version mismatch: program declares `{found}`, engine is `{engine}`")]
    VersionMismatch { found: String, engine: String },

    #[error("unknown opcode mnemonic `{0}`")]
    UnknownOpcode(String),

    #[error("malformed declaration: {0}")]
    MalformedDeclaration(String),

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("unresolved label :{0}")]
    UnresolvedLabel(u32),

    #[error("bad type code `{0}` in external descriptor")]
    BadTypeCode(String),

    #[error("no shadeop matches {wanted}; known signatures: [{known}]")]
    UnresolvedExternal { wanted: String, known: String },
}

/// Internal consistency violations during execution.
///
/// These indicate a bug in the compiler or an opcode handler, never bad
/// scene data, so they terminate the run rather than being tolerated.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("operand stack imbalance: depth {0} after execution")]
    StackImbalance(usize),

    #[error("running-state stack underflow")]
    StateUnderflow,

    #[error("wrong-typed access: expected {expected}, value is {found}")]
    WrongType {
        expected: &'static str,
        found: VarType,
    },

    #[error("cardinality violation: {0}")]
    Cardinality(String),

    #[error("standard variable `{0}` not provided by the environment")]
    MissingGlobal(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}
