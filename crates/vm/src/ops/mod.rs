//! Built-in opcode library.
//!
//! Handlers pop their operands, compute over the whole grid, and push a
//! pooled temporary. Results are computed at every point (masking applies
//! to stores, not to expression evaluation); cardinality follows the
//! operands — mixing a uniform and a varying operand broadcasts the
//! uniform one and yields a varying result.

mod arith;
mod geom;
mod light;
mod noise;
mod string;
mod texture;

use crate::error::RunResult;
use crate::machine::Machine;
use crate::program::Opcode;
use umbra_foundation::{StorageClass, V3, VarType};

/// Execute a computational opcode. Data movement, control flow, and
/// external calls are handled by the machine itself.
pub(crate) fn exec(m: &mut Machine<'_>, op: Opcode) -> RunResult<()> {
    match op {
        // arithmetic
        Opcode::AddFF => binary_float(m, |a, b| a + b),
        Opcode::SubFF => binary_float(m, |a, b| a - b),
        Opcode::MulFF => binary_float(m, |a, b| a * b),
        Opcode::DivFF => binary_float(m, |a, b| a / b),
        Opcode::AddPP | Opcode::AddCC => binary_triple(m, |a, b| a + b),
        Opcode::SubPP | Opcode::SubCC => binary_triple(m, |a, b| a - b),
        Opcode::MulPP | Opcode::MulCC => binary_triple(m, |a, b| a.mul_components(b)),
        Opcode::DivPP | Opcode::DivCC => binary_triple(m, |a, b| a.div_components(b)),
        Opcode::NegF => unary_float(m, |a| -a),
        Opcode::NegP | Opcode::NegC => unary_triple(m, |a| -a),
        Opcode::MulMM => arith::mul_matrix(m),
        Opcode::DotPP => binary_triple_to_float(m, |a, b| a.dot(b)),
        Opcode::CrossPP => binary_triple(m, |a, b| a.cross(b)),

        // casts
        Opcode::SetFC => arith::float_to_triple(m, VarType::Color),
        Opcode::SetFP => arith::float_to_triple(m, VarType::Point),
        Opcode::SetPC => arith::retype_triple(m, VarType::Color),
        Opcode::SetCP => arith::retype_triple(m, VarType::Point),

        // comparison
        Opcode::EqFF => binary_float(m, |a, b| bool_f(a == b)),
        Opcode::NeFF => binary_float(m, |a, b| bool_f(a != b)),
        Opcode::LtFF => binary_float(m, |a, b| bool_f(a < b)),
        Opcode::GtFF => binary_float(m, |a, b| bool_f(a > b)),
        Opcode::LeFF => binary_float(m, |a, b| bool_f(a <= b)),
        Opcode::GeFF => binary_float(m, |a, b| bool_f(a >= b)),
        Opcode::EqPP | Opcode::EqCC => binary_triple_to_float(m, |a, b| bool_f(a == b)),
        Opcode::NePP | Opcode::NeCC => binary_triple_to_float(m, |a, b| bool_f(a != b)),
        Opcode::EqSS => string::compare(m, |a, b| a == b),
        Opcode::NeSS => string::compare(m, |a, b| a != b),

        // logic
        Opcode::LAnd => binary_float(m, |a, b| bool_f(a != 0.0 && b != 0.0)),
        Opcode::LOr => binary_float(m, |a, b| bool_f(a != 0.0 || b != 0.0)),

        // float function library
        Opcode::Sqrt => unary_float(m, f32::sqrt),
        Opcode::InverseSqrt => unary_float(m, |a| 1.0 / a.sqrt()),
        Opcode::Abs => unary_float(m, f32::abs),
        Opcode::Floor => unary_float(m, f32::floor),
        Opcode::Ceil => unary_float(m, f32::ceil),
        Opcode::Round => unary_float(m, f32::round),
        Opcode::Sign => unary_float(m, |a| if a == 0.0 { 0.0 } else { a.signum() }),
        Opcode::Sin => unary_float(m, f32::sin),
        Opcode::Cos => unary_float(m, f32::cos),
        Opcode::Tan => unary_float(m, f32::tan),
        Opcode::Asin => unary_float(m, f32::asin),
        Opcode::Acos => unary_float(m, f32::acos),
        Opcode::Atan => unary_float(m, f32::atan),
        Opcode::Atan2 => binary_float(m, f32::atan2),
        Opcode::Exp => unary_float(m, f32::exp),
        Opcode::Log => unary_float(m, f32::ln),
        Opcode::Pow => binary_float(m, f32::powf),
        Opcode::Mod => binary_float(m, f32::rem_euclid),
        Opcode::Min => binary_float(m, f32::min),
        Opcode::Max => binary_float(m, f32::max),
        Opcode::Clamp => ternary_float(m, |a, lo, hi| a.clamp(lo, hi)),
        Opcode::MixFF => ternary_float(m, |a, b, t| a + (b - a) * t),
        Opcode::MixPP | Opcode::MixCC => arith::mix_triple(m),
        Opcode::Step => binary_float(m, |edge, v| bool_f(v >= edge)),
        Opcode::SmoothStep => ternary_float(m, |lo, hi, v| {
            if hi == lo {
                bool_f(v >= lo)
            } else {
                let t = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
                t * t * (3.0 - 2.0 * t)
            }
        }),
        Opcode::Degrees => unary_float(m, f32::to_degrees),
        Opcode::Radians => unary_float(m, f32::to_radians),

        // random
        Opcode::RandomF => noise::random_float(m),
        Opcode::RandomP => noise::random_triple(m, VarType::Point),
        Opcode::RandomC => noise::random_triple(m, VarType::Color),

        // geometric
        Opcode::Length => unary_triple_to_float(m, V3::length),
        Opcode::Distance => binary_triple_to_float(m, V3::distance),
        Opcode::Normalize => unary_triple(m, V3::normalized),
        Opcode::FaceForward => geom::faceforward(m),
        Opcode::Reflect => geom::reflect(m),
        Opcode::Refract => geom::refract(m),
        Opcode::CalculateNormal => geom::calculate_normal(m),
        Opcode::Transform => geom::transform(m, geom::TransformKind::Point),
        Opcode::VTransform => geom::transform(m, geom::TransformKind::Vector),
        Opcode::NTransform => geom::transform(m, geom::TransformKind::Normal),
        Opcode::CTransform => geom::ctransform(m),
        Opcode::MTransform => geom::mtransform(m),
        Opcode::MInvert => arith::invert_matrix(m),
        Opcode::Determinant => arith::determinant(m),

        // component access
        Opcode::Comp => arith::component(m),
        Opcode::SetComp => arith::set_component(m),

        // strings
        Opcode::Concat => string::concat(m),
        Opcode::Format => string::format(m),
        Opcode::Printf => string::printf(m),
        Opcode::Match => string::match_substring(m),

        // noise
        Opcode::Noise1F => noise::noise1(m, VarType::Float),
        Opcode::Noise2F => noise::noise2(m),
        Opcode::Noise3F => noise::noise3(m, VarType::Float),
        Opcode::Noise1P => noise::noise1(m, VarType::Point),
        Opcode::Noise3P => noise::noise3(m, VarType::Point),
        Opcode::Noise1C => noise::noise1(m, VarType::Color),
        Opcode::Noise3C => noise::noise3(m, VarType::Color),
        Opcode::CellNoise1F => noise::cellnoise1(m, VarType::Float),
        Opcode::CellNoise3F => noise::cellnoise3(m, VarType::Float),
        Opcode::CellNoise3P => noise::cellnoise3(m, VarType::Point),
        Opcode::CellNoise3C => noise::cellnoise3(m, VarType::Color),
        Opcode::PNoise1F => noise::pnoise1(m),
        Opcode::PNoise3F => noise::pnoise3(m),

        // lighting
        Opcode::Ambient => light::ambient(m),
        Opcode::Diffuse => light::diffuse(m),
        Opcode::Specular => light::specular(m),
        Opcode::InitIlluminance => light::init_illuminance(m, false),
        Opcode::InitIlluminance2 => light::init_illuminance(m, true),
        Opcode::Illuminance => light::illuminance(m, false),
        Opcode::Illuminance2 => light::illuminance(m, true),
        Opcode::AdvanceIlluminance => light::advance_illuminance(m),
        Opcode::InitGather => light::init_gather(m),
        Opcode::AdvanceGather => light::advance_gather(m),

        // texturing
        Opcode::TextureF => texture::texture_float(m),
        Opcode::TextureC => texture::texture_color(m),
        Opcode::EnvironmentC => texture::environment_color(m),
        Opcode::Shadow => texture::shadow(m),
        Opcode::TextureInfo => texture::texture_info(m),

        // renderer queries
        Opcode::OptionQ => texture::option_query(m),
        Opcode::AttributeQ => texture::attribute_query(m),

        // handled by the machine; reaching here is a dispatch bug
        other => {
            return Err(crate::error::RuntimeError::Internal(format!(
                "opcode {} has no handler",
                other.mnemonic()
            )))
        }
    }
}

#[inline]
pub(crate) fn bool_f(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Result shape implied by the operands popped since the last flag reset.
pub(crate) fn result_shape(m: &Machine<'_>) -> (StorageClass, usize) {
    if m.stack.popped_varying() {
        (StorageClass::Varying, m.npoints)
    } else {
        (StorageClass::Uniform, 1)
    }
}

pub(crate) fn unary_float(m: &mut Machine<'_>, f: impl Fn(f32) -> f32) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let af = av.floats()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, f(*af.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    Ok(())
}

pub(crate) fn binary_float(m: &mut Machine<'_>, f: impl Fn(f32, f32) -> f32) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let af = av.floats()?;
        let bf = bv.floats()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, f(*af.at(i), *bf.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    Ok(())
}

/// Pops c, b, a; computes `f(a, b, c)`.
pub(crate) fn ternary_float(
    m: &mut Machine<'_>,
    f: impl Fn(f32, f32, f32) -> f32,
) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let c = m.stack.pop()?;
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let cv = c.value.borrow();
        let af = av.floats()?;
        let bf = bv.floats()?;
        let cf = cv.floats()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, f(*af.at(i), *bf.at(i), *cf.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    m.pool.release(c);
    Ok(())
}

pub(crate) fn unary_triple(m: &mut Machine<'_>, f: impl Fn(V3) -> V3) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let kind = a.value.borrow().vtype();
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let av = a.value.borrow();
        let at = av.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            ot.set_at(i, f(*at.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    Ok(())
}

/// Result kind follows the first-pushed operand.
pub(crate) fn binary_triple(m: &mut Machine<'_>, f: impl Fn(V3, V3) -> V3) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let kind = a.value.borrow().vtype();
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let at = av.triples()?;
        let bt = bv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            ot.set_at(i, f(*at.at(i), *bt.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    Ok(())
}

pub(crate) fn unary_triple_to_float(m: &mut Machine<'_>, f: impl Fn(V3) -> f32) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let at = av.triples()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, f(*at.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    Ok(())
}

pub(crate) fn binary_triple_to_float(
    m: &mut Machine<'_>,
    f: impl Fn(V3, V3) -> f32,
) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let at = av.triples()?;
        let bt = bv.triples()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, f(*at.at(i), *bt.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    Ok(())
}
