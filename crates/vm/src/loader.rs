//! Two-pass loader/linker for compiled shader text.
//!
//! Pass 1 walks the token stream, emitting program elements, recording
//! label definitions (`: <n>` at statement position) and resolving
//! variable names and external-call descriptors as it goes. Pass 2
//! patches every jump operand with its label's element offset. Programs
//! therefore never carry an unresolved label into execution.
//!
//! The header is validated before any segment is read: shader kind, then
//! the `AQSIS_V` version token (exact match against [`ENGINE_VERSION`]),
//! then an optional `USES` bitmask hint.

use crate::dispatch;
use crate::env::StandardVar;
use crate::error::{LoadError, LoadResult};
use crate::lexer::{Token, TokenStream};
use crate::program::{
    LabelTarget, Opcode, OperandKind, Program, ProgramElement, Symbol, VarRef, ENGINE_VERSION,
};
use std::collections::HashMap;
use tracing::debug;
use umbra_foundation::{ShaderKind, StorageClass, TypeCode, VarType};
use umbra_shadeops::ShadeopRegistry;

/// Load and link a compiled shader from its textual form.
pub fn load_program(
    name: impl Into<String>,
    source: &str,
    registry: &ShadeopRegistry,
) -> LoadResult<Program> {
    let name = name.into();
    let mut tokens = TokenStream::lex(source)?;

    let kind_token = tokens.expect_ident("shader kind")?;
    let kind = ShaderKind::from_token(&kind_token)
        .ok_or(LoadError::UnknownShaderKind(kind_token))?;

    let tag = tokens.expect_ident("AQSIS_V version tag")?;
    if tag != "AQSIS_V" {
        return Err(LoadError::Unexpected {
            expected: "AQSIS_V version tag".to_string(),
            found: tag,
        });
    }
    let version = match tokens.expect("version string")? {
        Token::Version(v) => v,
        Token::Number(n) => n.to_string(),
        other => {
            return Err(LoadError::Unexpected {
                expected: "version string".to_string(),
                found: other.describe(),
            })
        }
    };
    if version != ENGINE_VERSION {
        return Err(LoadError::VersionMismatch {
            found: version,
            engine: ENGINE_VERSION.to_string(),
        });
    }

    let mut uses = 0u64;
    if let Some(Token::Ident(word)) = tokens.peek() {
        if word == "USES" {
            tokens.next();
            uses = tokens.expect_number("USES bitmask")? as u64;
        }
    }

    let mut program = Program {
        name,
        kind,
        uses,
        symbols: Vec::new(),
        init: Vec::new(),
        code: Vec::new(),
        externals: Vec::new(),
    };

    while !tokens.is_empty() {
        let word = tokens.expect_ident("`segment`")?;
        if word != "segment" {
            return Err(LoadError::Unexpected {
                expected: "`segment`".to_string(),
                found: word,
            });
        }
        let segment = tokens.expect_ident("segment name")?;
        match segment.as_str() {
            "Data" => load_data(&mut tokens, &mut program)?,
            "Init" => {
                program.init = load_instructions(&mut tokens, &mut program, registry)?;
            }
            "Code" => {
                program.code = load_instructions(&mut tokens, &mut program, registry)?;
            }
            other => {
                return Err(LoadError::Unexpected {
                    expected: "Data, Init, or Code".to_string(),
                    found: other.to_string(),
                })
            }
        }
    }

    program.uses |= scan_uses(&program.init) | scan_uses(&program.code);
    debug!(
        shader = %program.name,
        kind = %program.kind,
        symbols = program.symbols.len(),
        init = program.init.len(),
        code = program.code.len(),
        externals = program.externals.len(),
        "loaded shader program"
    );
    Ok(program)
}

fn at_segment_boundary(tokens: &TokenStream) -> bool {
    match tokens.peek() {
        None => true,
        Some(Token::Ident(w)) => w == "segment",
        _ => false,
    }
}

fn load_data(tokens: &mut TokenStream, program: &mut Program) -> LoadResult<()> {
    while !at_segment_boundary(tokens) {
        let mut word = tokens.expect_ident("variable declaration")?;
        let mut output = false;
        let mut param = false;
        if word == "output" {
            output = true;
            word = tokens.expect_ident("storage class")?;
        }
        if word == "param" {
            param = true;
            word = tokens.expect_ident("storage class")?;
        }
        let class = StorageClass::from_keyword(&word).ok_or_else(|| {
            LoadError::MalformedDeclaration(format!("expected storage class, found `{word}`"))
        })?;
        let type_word = tokens.expect_ident("type keyword")?;
        let vtype = VarType::from_keyword(&type_word).ok_or_else(|| {
            LoadError::MalformedDeclaration(format!("expected type keyword, found `{type_word}`"))
        })?;
        let name = tokens.expect_ident("variable name")?;

        let mut array_len = None;
        if matches!(tokens.peek(), Some(Token::LBracket)) {
            tokens.next();
            let n = tokens.expect_number("array length")?;
            if n.fract() != 0.0 || n < 1.0 {
                return Err(LoadError::MalformedDeclaration(format!(
                    "array length for `{name}` must be a positive integer, found {n}"
                )));
            }
            match tokens.expect("closing `]`")? {
                Token::RBracket => {}
                other => {
                    return Err(LoadError::MalformedDeclaration(format!(
                        "unterminated array declaration for `{name}`, found `{}`",
                        other.describe()
                    )))
                }
            }
            array_len = Some(n as usize);
        }

        if program.slot(&name).is_some() {
            return Err(LoadError::MalformedDeclaration(format!(
                "duplicate variable `{name}`"
            )));
        }
        program.symbols.push(Symbol {
            name,
            vtype,
            class,
            output,
            param,
            array_len,
        });
    }
    Ok(())
}

fn load_instructions(
    tokens: &mut TokenStream,
    program: &mut Program,
    registry: &ShadeopRegistry,
) -> LoadResult<Vec<ProgramElement>> {
    let mut elements = Vec::new();
    let mut labels: HashMap<u32, usize> = HashMap::new();

    // Pass 1: emit elements, collect label offsets.
    while !at_segment_boundary(tokens) {
        if matches!(tokens.peek(), Some(Token::Colon)) {
            tokens.next();
            let number = tokens.expect_number("label number")? as u32;
            if labels.insert(number, elements.len()).is_some() {
                return Err(LoadError::MalformedDeclaration(format!(
                    "duplicate label :{number}"
                )));
            }
            continue;
        }

        let mnemonic = tokens.expect_ident("opcode mnemonic")?;
        if mnemonic == "external" {
            load_external(tokens, program, registry, &mut elements)?;
            continue;
        }
        let op = Opcode::lookup(&mnemonic).ok_or(LoadError::UnknownOpcode(mnemonic))?;
        elements.push(ProgramElement::Op(op));
        for operand in op.operands() {
            match operand {
                OperandKind::Float => {
                    let v = tokens.expect_number("float literal")?;
                    elements.push(ProgramElement::FloatLit(v as f32));
                }
                OperandKind::Int => {
                    let v = tokens.expect_number("integer literal")?;
                    elements.push(ProgramElement::IntLit(v as i32));
                }
                OperandKind::Str => {
                    let s = tokens.expect_string("string literal")?;
                    elements.push(ProgramElement::StringLit(s));
                }
                OperandKind::Var => {
                    let name = tokens.expect_ident("variable name")?;
                    elements.push(ProgramElement::Variable(resolve_variable(program, &name)?));
                }
                OperandKind::Label => {
                    match tokens.expect("label reference")? {
                        Token::Colon => {}
                        other => {
                            return Err(LoadError::Unexpected {
                                expected: "label reference `: <n>`".to_string(),
                                found: other.describe(),
                            })
                        }
                    }
                    let number = tokens.expect_number("label number")? as u32;
                    elements.push(ProgramElement::Label(LabelTarget {
                        number,
                        address: usize::MAX,
                    }));
                }
                OperandKind::External => {
                    // `external` is parsed as a pseudo-opcode above.
                    return Err(LoadError::UnknownOpcode(op.mnemonic().to_string()));
                }
            }
        }
    }

    // Pass 2: patch jump operands with resolved offsets.
    for element in &mut elements {
        if let ProgramElement::Label(target) = element {
            target.address = *labels
                .get(&target.number)
                .ok_or(LoadError::UnresolvedLabel(target.number))?;
        }
    }
    Ok(elements)
}

fn load_external(
    tokens: &mut TokenStream,
    program: &mut Program,
    registry: &ShadeopRegistry,
    elements: &mut Vec<ProgramElement>,
) -> LoadResult<()> {
    let name = tokens.expect_ident("external call name")?;
    let ret = parse_type_code(&tokens.expect_ident("return type code")?)?;
    let argc = tokens.expect_number("argument count")? as usize;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(parse_type_code(&tokens.expect_ident("argument type code")?)?);
    }

    let resolved = dispatch::resolve(registry, &name, ret, &args)?;
    let index = program.externals.len() as u16;
    program.externals.push(resolved);
    elements.push(ProgramElement::Op(Opcode::External));
    elements.push(ProgramElement::External(index));
    Ok(())
}

fn parse_type_code(word: &str) -> LoadResult<TypeCode> {
    let mut chars = word.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => TypeCode::from_code(c).ok_or(LoadError::BadTypeCode(word.to_string())),
        _ => Err(LoadError::BadTypeCode(word.to_string())),
    }
}

fn resolve_variable(program: &Program, name: &str) -> LoadResult<VarRef> {
    if let Some(slot) = program.slot(name) {
        return Ok(VarRef::Local(slot));
    }
    StandardVar::from_name(name)
        .map(VarRef::Standard)
        .ok_or_else(|| LoadError::UnknownVariable(name.to_string()))
}

fn scan_uses(elements: &[ProgramElement]) -> u64 {
    elements
        .iter()
        .filter_map(|e| match e {
            ProgramElement::Variable(VarRef::Standard(v)) => Some(v.bit()),
            _ => None,
        })
        .fold(0, |acc, bit| acc | bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ShadeopRegistry {
        ShadeopRegistry::with_builtins()
    }

    #[test]
    fn test_minimal_program() {
        let src = "\
surface
AQSIS_V 1.2.0
segment Data
param uniform float Kd
segment Init
pushif 0.8
pop Kd
segment Code
pushv Kd
drop
";
        let program = load_program("minimal", src, &registry()).unwrap();
        assert_eq!(program.kind, ShaderKind::Surface);
        assert_eq!(program.symbols.len(), 1);
        assert_eq!(program.init.len(), 4);
        assert_eq!(program.code.len(), 3);
    }

    #[test]
    fn test_version_gate_rejects_before_segments() {
        let src = "surface\nAQSIS_V 9.9.9\nsegment Data\nthis is not even valid";
        let err = load_program("old", src, &registry()).unwrap_err();
        assert!(matches!(err, LoadError::VersionMismatch { found, .. } if found == "9.9.9"));
    }

    #[test]
    fn test_unknown_mnemonic() {
        let src = "surface\nAQSIS_V 1.2.0\nsegment Code\nfrobnicate";
        let err = load_program("bad", src, &registry()).unwrap_err();
        assert!(matches!(err, LoadError::UnknownOpcode(m) if m == "frobnicate"));
    }

    #[test]
    fn test_malformed_array_declaration() {
        let src = "surface\nAQSIS_V 1.2.0\nsegment Data\nuniform float lights [ 0 ]";
        let err = load_program("bad", src, &registry()).unwrap_err();
        assert!(matches!(err, LoadError::MalformedDeclaration(_)));
    }

    #[test]
    fn test_array_declaration() {
        let src = "surface\nAQSIS_V 1.2.0\nsegment Data\nparam uniform color ramp [ 4 ]";
        let program = load_program("arr", src, &registry()).unwrap();
        assert_eq!(program.symbols[0].array_len, Some(4));
    }

    #[test]
    fn test_labels_resolved() {
        let src = "\
surface
AQSIS_V 1.2.0
segment Code
pushif 1.0
jnz : 1
nop
: 1
nop
";
        let program = load_program("jump", src, &registry()).unwrap();
        let target = program
            .code
            .iter()
            .find_map(|e| match e {
                ProgramElement::Label(t) => Some(*t),
                _ => None,
            })
            .unwrap();
        assert_eq!(target.number, 1);
        // Label 1 sits after pushif(2) + jnz(2) + nop(1).
        assert_eq!(target.address, 5);
    }

    #[test]
    fn test_unresolved_label_is_fatal() {
        let src = "surface\nAQSIS_V 1.2.0\nsegment Code\njmp : 7";
        let err = load_program("bad", src, &registry()).unwrap_err();
        assert!(matches!(err, LoadError::UnresolvedLabel(7)));
    }

    #[test]
    fn test_unknown_variable() {
        let src = "surface\nAQSIS_V 1.2.0\nsegment Code\npushv mystery";
        let err = load_program("bad", src, &registry()).unwrap_err();
        assert!(matches!(err, LoadError::UnknownVariable(v) if v == "mystery"));
    }

    #[test]
    fn test_external_resolution() {
        let src = "\
surface
AQSIS_V 1.2.0
segment Code
pushv Cs
external luminance f 1 c
drop
";
        let program = load_program("ext", src, &registry()).unwrap();
        assert_eq!(program.externals.len(), 1);
        assert!(program.externals[0].entry.is_some());
    }

    #[test]
    fn test_unresolved_external_enumerates_signatures() {
        let src = "surface\nAQSIS_V 1.2.0\nsegment Code\nexternal luminance m 1 m";
        let err = load_program("bad", src, &registry()).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("luminance(m) -> m"));
        assert!(text.contains("luminance(c) -> f"));
    }

    #[test]
    fn test_uses_mask_from_scan_and_header() {
        let src = "\
surface
AQSIS_V 1.2.0
USES 1
segment Code
pushv N
drop
";
        let program = load_program("uses", src, &registry()).unwrap();
        assert!(program.uses_standard(StandardVar::P)); // declared bit 0
        assert!(program.uses_standard(StandardVar::N)); // scanned
        assert!(!program.uses_standard(StandardVar::Alpha));
    }

    #[test]
    fn test_locals_shadow_standard_names() {
        let src = "\
surface
AQSIS_V 1.2.0
segment Data
uniform float N
segment Code
pushv N
drop
";
        let program = load_program("shadow", src, &registry()).unwrap();
        assert!(matches!(
            program.code[1],
            ProgramElement::Variable(VarRef::Local(0))
        ));
    }
}
