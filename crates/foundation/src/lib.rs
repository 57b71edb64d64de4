//! Foundation types for the umbra shading engine.
//!
//! This is the leaf crate of the workspace: the shading-language type
//! system (value kinds, cardinality, wire codes), 3-component vector and
//! 4x4 matrix math shared by the VM and the built-in shadeops, and the
//! deterministic noise primitives backing the `noise`/`cellnoise`/`random`
//! opcode family.

pub mod matrix;
pub mod rng;
pub mod types;
pub mod vector;

pub use matrix::Mat4;
pub use types::{ShaderKind, StorageClass, TypeCode, VarType};
pub use vector::V3;
