//! Shading-language type system.
//!
//! Every value the VM manipulates is described by a [`VarType`] (what kind
//! of datum it is) and a [`StorageClass`] (one value for the whole grid, or
//! one per shading point). The single-character [`TypeCode`]s are the wire
//! form used by the bytecode text format for external-call signatures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value kind of a shading variable.
///
/// `Point`, `Vector`, and `Normal` share the same 3-component backing
/// representation and convert freely between each other; `Color` shares
/// the representation but converts only through explicit cast opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    Float,
    String,
    Point,
    Vector,
    Normal,
    Color,
    Matrix,
}

impl VarType {
    /// Parse a Data-segment declaration keyword.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "float" => Some(VarType::Float),
            "string" => Some(VarType::String),
            "point" => Some(VarType::Point),
            "vector" => Some(VarType::Vector),
            "normal" => Some(VarType::Normal),
            "color" => Some(VarType::Color),
            "matrix" => Some(VarType::Matrix),
            _ => None,
        }
    }

    /// Declaration keyword for this type.
    pub fn keyword(&self) -> &'static str {
        match self {
            VarType::Float => "float",
            VarType::String => "string",
            VarType::Point => "point",
            VarType::Vector => "vector",
            VarType::Normal => "normal",
            VarType::Color => "color",
            VarType::Matrix => "matrix",
        }
    }

    /// True for the three types sharing the 3-component spatial backing.
    pub fn is_point_like(&self) -> bool {
        matches!(self, VarType::Point | VarType::Vector | VarType::Normal)
    }

    /// True for any type backed by three components, color included.
    pub fn is_triple(&self) -> bool {
        self.is_point_like() || *self == VarType::Color
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Cardinality of a shading variable: one value per grid (`Uniform`) or
/// one value per shading point (`Varying`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    Uniform,
    Varying,
}

impl StorageClass {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "uniform" => Some(StorageClass::Uniform),
            "varying" => Some(StorageClass::Varying),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            StorageClass::Uniform => "uniform",
            StorageClass::Varying => "varying",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Kind of shader a program implements, from the bytecode header token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderKind {
    Surface,
    LightSource,
    Volume,
    Displacement,
    Transformation,
    Imager,
}

impl ShaderKind {
    pub fn from_token(word: &str) -> Option<Self> {
        match word {
            "surface" => Some(ShaderKind::Surface),
            "lightsource" => Some(ShaderKind::LightSource),
            "volume" => Some(ShaderKind::Volume),
            "displacement" => Some(ShaderKind::Displacement),
            "transformation" => Some(ShaderKind::Transformation),
            "imager" => Some(ShaderKind::Imager),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            ShaderKind::Surface => "surface",
            ShaderKind::LightSource => "lightsource",
            ShaderKind::Volume => "volume",
            ShaderKind::Displacement => "displacement",
            ShaderKind::Transformation => "transformation",
            ShaderKind::Imager => "imager",
        }
    }
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Single-character type code used in `external` call signatures.
///
/// `Void` is only meaningful as a declared return type; an argument is
/// never void.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    Void,
    Float,
    String,
    Point,
    Vector,
    Normal,
    Color,
    Matrix,
}

impl TypeCode {
    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'x' => Some(TypeCode::Void),
            'f' => Some(TypeCode::Float),
            's' => Some(TypeCode::String),
            'p' => Some(TypeCode::Point),
            'v' => Some(TypeCode::Vector),
            'n' => Some(TypeCode::Normal),
            'c' => Some(TypeCode::Color),
            'm' => Some(TypeCode::Matrix),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            TypeCode::Void => 'x',
            TypeCode::Float => 'f',
            TypeCode::String => 's',
            TypeCode::Point => 'p',
            TypeCode::Vector => 'v',
            TypeCode::Normal => 'n',
            TypeCode::Color => 'c',
            TypeCode::Matrix => 'm',
        }
    }

    /// The value kind an argument of this code carries. `None` for void.
    pub fn var_type(&self) -> Option<VarType> {
        match self {
            TypeCode::Void => None,
            TypeCode::Float => Some(VarType::Float),
            TypeCode::String => Some(VarType::String),
            TypeCode::Point => Some(VarType::Point),
            TypeCode::Vector => Some(VarType::Vector),
            TypeCode::Normal => Some(VarType::Normal),
            TypeCode::Color => Some(VarType::Color),
            TypeCode::Matrix => Some(VarType::Matrix),
        }
    }

    /// Whether a value of type `arg` may be passed where this code is
    /// declared. The three point-like types are interchangeable.
    pub fn accepts(&self, arg: VarType) -> bool {
        match self.var_type() {
            None => false,
            Some(t) if t == arg => true,
            Some(t) => t.is_point_like() && arg.is_point_like(),
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_type_keywords_round_trip() {
        for t in [
            VarType::Float,
            VarType::String,
            VarType::Point,
            VarType::Vector,
            VarType::Normal,
            VarType::Color,
            VarType::Matrix,
        ] {
            assert_eq!(VarType::from_keyword(t.keyword()), Some(t));
        }
        assert_eq!(VarType::from_keyword("quaternion"), None);
    }

    #[test]
    fn test_point_like_conversions() {
        assert!(VarType::Normal.is_point_like());
        assert!(!VarType::Color.is_point_like());
        assert!(VarType::Color.is_triple());
        assert!(!VarType::Float.is_triple());
    }

    #[test]
    fn test_type_code_accepts() {
        assert!(TypeCode::Point.accepts(VarType::Normal));
        assert!(TypeCode::Normal.accepts(VarType::Vector));
        assert!(!TypeCode::Color.accepts(VarType::Point));
        assert!(!TypeCode::Void.accepts(VarType::Float));
        assert!(TypeCode::Float.accepts(VarType::Float));
    }

    #[test]
    fn test_shader_kind_tokens() {
        assert_eq!(ShaderKind::from_token("surface"), Some(ShaderKind::Surface));
        assert_eq!(ShaderKind::from_token("shader"), None);
    }
}
