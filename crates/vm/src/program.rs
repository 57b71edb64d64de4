//! Compiled shader programs.
//!
//! A program is a flat sequence of tagged [`ProgramElement`]s per segment:
//! an opcode, then the statically known operands that opcode consumes from
//! the element stream (immediate literals, variable references, resolved
//! jump targets, external-call descriptors). The **Init** segment assigns
//! parameter defaults once per shader definition; the **Code** segment is
//! the main body, run once per grid.
//!
//! Control-flow shape emitted by the compiler:
//!
//! ```text
//! if (cond):            while (cond):
//!   rs_push               rs_push        ; restore level
//!   <cond> rs_get         rs_push        ; break level
//!   rs_jz :0            :0
//!   <then>                <cond> rs_get
//! :0                      rs_jz :1
//!   rs_inverse            <body>         ; break -> rs_break <levels>
//!   rs_jz :1              jmp :0
//!   <else>              :1
//! :1                      rs_pop
//!   rs_pop                rs_pop
//! ```
//!
//! Labels are always resolved at load time; executing an unresolved label
//! is impossible by construction.

use crate::dispatch::ResolvedExternal;
use crate::env::StandardVar;
use serde::{Deserialize, Serialize};
use umbra_foundation::{ShaderKind, StorageClass, VarType};

/// Bytecode format version this engine accepts, gated by exact match
/// against the `AQSIS_V` header token.
pub const ENGINE_VERSION: &str = "1.2.0";

/// What kind of element stream operand an opcode consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Float,
    Int,
    Str,
    Var,
    Label,
    External,
}

macro_rules! opcodes {
    ($( $variant:ident => ($mnemonic:literal, [$($operand:ident),*]) ),+ $(,)?) => {
        /// Every built-in operation, one arm per mnemonic.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Opcode {
            $($variant,)+
        }

        impl Opcode {
            /// Resolve a mnemonic token.
            pub fn lookup(mnemonic: &str) -> Option<Opcode> {
                match mnemonic {
                    $($mnemonic => Some(Opcode::$variant),)+
                    _ => None,
                }
            }

            /// Mnemonic of this opcode.
            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)+
                }
            }

            /// Element-stream operands this opcode consumes, in order.
            pub fn operands(&self) -> &'static [OperandKind] {
                match self {
                    $(Opcode::$variant => &[$(OperandKind::$operand),*],)+
                }
            }
        }
    };
}

opcodes! {
    // stack and data movement
    PushIF => ("pushif", [Float]),
    PushIS => ("pushis", [Str]),
    PushV => ("pushv", [Var]),
    IPushV => ("ipushv", [Var]),
    Pop => ("pop", [Var]),
    IPop => ("ipop", [Var]),
    Dup => ("dup", []),
    Drop => ("drop", []),
    Nop => ("nop", []),

    // control flow
    Jmp => ("jmp", [Label]),
    Jz => ("jz", [Label]),
    Jnz => ("jnz", [Label]),
    RsJz => ("rs_jz", [Label]),
    RsJnz => ("rs_jnz", [Label]),

    // running state
    RsPush => ("rs_push", []),
    RsPop => ("rs_pop", []),
    RsGet => ("rs_get", []),
    RsInverse => ("rs_inverse", []),
    RsBreak => ("rs_break", [Int]),
    SClear => ("s_clear", []),

    // external dispatch
    External => ("external", [External]),

    // arithmetic
    AddFF => ("addff", []),
    SubFF => ("subff", []),
    MulFF => ("mulff", []),
    DivFF => ("divff", []),
    AddPP => ("addpp", []),
    SubPP => ("subpp", []),
    MulPP => ("mulpp", []),
    DivPP => ("divpp", []),
    AddCC => ("addcc", []),
    SubCC => ("subcc", []),
    MulCC => ("mulcc", []),
    DivCC => ("divcc", []),
    MulMM => ("mulmm", []),
    NegF => ("negf", []),
    NegP => ("negp", []),
    NegC => ("negc", []),
    DotPP => ("dotpp", []),
    CrossPP => ("crosspp", []),

    // casts
    SetFC => ("setfc", []),
    SetFP => ("setfp", []),
    SetPC => ("setpc", []),
    SetCP => ("setcp", []),

    // comparison
    EqFF => ("eqff", []),
    NeFF => ("neff", []),
    LtFF => ("ltff", []),
    GtFF => ("gtff", []),
    LeFF => ("leff", []),
    GeFF => ("geff", []),
    EqPP => ("eqpp", []),
    NePP => ("nepp", []),
    EqCC => ("eqcc", []),
    NeCC => ("necc", []),
    EqSS => ("eqss", []),
    NeSS => ("ness", []),

    // logic
    LAnd => ("land", []),
    LOr => ("lor", []),

    // float function library
    Sqrt => ("sqrt", []),
    InverseSqrt => ("inversesqrt", []),
    Abs => ("abs", []),
    Floor => ("floor", []),
    Ceil => ("ceil", []),
    Round => ("round", []),
    Sign => ("sign", []),
    Sin => ("sin", []),
    Cos => ("cos", []),
    Tan => ("tan", []),
    Asin => ("asin", []),
    Acos => ("acos", []),
    Atan => ("atan", []),
    Atan2 => ("atan2", []),
    Exp => ("exp", []),
    Log => ("log", []),
    Pow => ("pow", []),
    Mod => ("mod", []),
    Min => ("min", []),
    Max => ("max", []),
    Clamp => ("clamp", []),
    MixFF => ("mixff", []),
    MixPP => ("mixpp", []),
    MixCC => ("mixcc", []),
    Step => ("step", []),
    SmoothStep => ("smoothstep", []),
    Degrees => ("degrees", []),
    Radians => ("radians", []),

    // random
    RandomF => ("randomf", []),
    RandomP => ("randomp", []),
    RandomC => ("randomc", []),

    // geometric
    Length => ("length", []),
    Distance => ("distance", []),
    Normalize => ("normalize", []),
    FaceForward => ("faceforward", []),
    Reflect => ("reflect", []),
    Refract => ("refract", []),
    CalculateNormal => ("calculatenormal", []),
    Transform => ("transform", []),
    VTransform => ("vtransform", []),
    NTransform => ("ntransform", []),
    CTransform => ("ctransform", []),
    MTransform => ("mtransform", []),
    MInvert => ("minvert", []),
    Determinant => ("determinant", []),

    // component access
    Comp => ("comp", []),
    SetComp => ("setcomp", []),

    // strings
    Concat => ("concat", []),
    Format => ("format", [Int]),
    Printf => ("printf", [Int]),
    Match => ("match", []),

    // noise
    Noise1F => ("noise1f", []),
    Noise2F => ("noise2f", []),
    Noise3F => ("noise3f", []),
    Noise1P => ("noise1p", []),
    Noise3P => ("noise3p", []),
    Noise1C => ("noise1c", []),
    Noise3C => ("noise3c", []),
    CellNoise1F => ("cellnoise1f", []),
    CellNoise3F => ("cellnoise3f", []),
    CellNoise3P => ("cellnoise3p", []),
    CellNoise3C => ("cellnoise3c", []),
    PNoise1F => ("pnoise1f", []),
    PNoise3F => ("pnoise3f", []),

    // lighting
    Ambient => ("ambient", []),
    Diffuse => ("diffuse", []),
    Specular => ("specular", []),
    InitIlluminance => ("init_illuminance", []),
    InitIlluminance2 => ("init_illuminance2", []),
    Illuminance => ("illuminance", []),
    Illuminance2 => ("illuminance2", []),
    AdvanceIlluminance => ("advance_illuminance", []),
    InitGather => ("init_gather", []),
    AdvanceGather => ("advance_gather", []),

    // texturing
    TextureF => ("texturef", []),
    TextureC => ("texturec", []),
    EnvironmentC => ("environmentc", []),
    Shadow => ("shadow", []),
    TextureInfo => ("textureinfo", []),

    // renderer queries
    OptionQ => ("option", []),
    AttributeQ => ("attribute", []),
}

/// Reference to a variable: a standard global slot or a shader-local slot.
///
/// The textual format encodes this distinction in the top bit of a single
/// index; the closed variant carries the same information without the bit
/// twiddling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarRef {
    Standard(StandardVar),
    Local(u16),
}

/// A resolved jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTarget {
    /// Numeric label as written in the source.
    pub number: u32,
    /// Element offset within the owning segment.
    pub address: usize,
}

/// One element of a program's flat element stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgramElement {
    Op(Opcode),
    FloatLit(f32),
    IntLit(i32),
    StringLit(String),
    Variable(VarRef),
    Label(LabelTarget),
    /// Index into [`Program::externals`].
    External(u16),
}

/// Declaration of one shader-local variable from the Data segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub vtype: VarType,
    pub class: StorageClass,
    pub output: bool,
    pub param: bool,
    /// `Some(n)` for an array declaration `name[n]`.
    pub array_len: Option<usize>,
}

/// A loaded, linked shader program. Immutable after load; instances share
/// it through an `Arc`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub kind: ShaderKind,
    /// Standard-variable usage bitmask: declared `USES` hint OR'd with
    /// the references actually found in the element streams.
    pub uses: u64,
    /// Local variables in declaration order; index is the slot number.
    pub symbols: Vec<Symbol>,
    pub init: Vec<ProgramElement>,
    pub code: Vec<ProgramElement>,
    /// External calls resolved at load time. Serialized by declared
    /// signature only; the candidate binding is re-resolved on load.
    pub externals: Vec<ResolvedExternal>,
}

impl Program {
    /// Slot number of a local variable, by name.
    pub fn slot(&self, name: &str) -> Option<u16> {
        self.symbols
            .iter()
            .position(|s| s.name == name)
            .map(|i| i as u16)
    }

    /// Whether the program references a standard variable.
    pub fn uses_standard(&self, var: StandardVar) -> bool {
        self.uses & var.bit() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonic_round_trip() {
        for op in [
            Opcode::PushIF,
            Opcode::RsBreak,
            Opcode::AddFF,
            Opcode::Illuminance2,
            Opcode::OptionQ,
        ] {
            assert_eq!(Opcode::lookup(op.mnemonic()), Some(op));
        }
        assert_eq!(Opcode::lookup("frobnicate"), None);
    }

    #[test]
    fn test_operand_shapes() {
        assert_eq!(Opcode::PushIF.operands(), &[OperandKind::Float]);
        assert_eq!(Opcode::Pop.operands(), &[OperandKind::Var]);
        assert_eq!(Opcode::Jz.operands(), &[OperandKind::Label]);
        assert_eq!(Opcode::Format.operands(), &[OperandKind::Int]);
        assert!(Opcode::AddFF.operands().is_empty());
    }
}
