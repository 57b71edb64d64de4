//! Built-in extension shadeops.
//!
//! These ship with the engine but live outside the opcode library: they
//! are resolved through the same `external` mechanism as renderer plugins,
//! which keeps the dispatcher exercised in every build and gives compiled
//! shaders a stable set of always-available helpers.

use crate::{ShadeopDescriptor, ShadeopValue, SHADEOPS};
use linkme::distributed_slice;
use umbra_foundation::{TypeCode, V3};

/// Rec. 709 luma weights, matching the renderer's display pipeline.
const LUMA: V3 = V3::new(0.2126, 0.7152, 0.0722);

#[distributed_slice(SHADEOPS)]
static LUMINANCE: ShadeopDescriptor = ShadeopDescriptor {
    name: "luminance",
    ret: TypeCode::Float,
    args: &[TypeCode::Color],
    doc: "Rec. 709 luma of a color",
    init: None,
    eval: |args| {
        let c = args[0].as_triple().unwrap_or(V3::ZERO);
        ShadeopValue::Float(c.dot(LUMA))
    },
};

#[distributed_slice(SHADEOPS)]
static DESATURATE: ShadeopDescriptor = ShadeopDescriptor {
    name: "desaturate",
    ret: TypeCode::Color,
    args: &[TypeCode::Color, TypeCode::Float],
    doc: "Blend a color toward its luma by the given amount",
    init: None,
    eval: |args| {
        let c = args[0].as_triple().unwrap_or(V3::ZERO);
        let amount = args[1].as_float().unwrap_or(0.0).clamp(0.0, 1.0);
        let grey = V3::splat(c.dot(LUMA));
        ShadeopValue::Triple(c.lerp(grey, amount))
    },
};

#[distributed_slice(SHADEOPS)]
static FRESNEL_SCHLICK: ShadeopDescriptor = ShadeopDescriptor {
    name: "schlick",
    ret: TypeCode::Float,
    args: &[TypeCode::Vector, TypeCode::Normal, TypeCode::Float],
    doc: "Schlick fresnel approximation from incident, normal, and base reflectance",
    init: None,
    eval: |args| {
        let i = args[0].as_triple().unwrap_or(V3::ZERO).normalized();
        let n = args[1].as_triple().unwrap_or(V3::ZERO).normalized();
        let f0 = args[2].as_float().unwrap_or(0.04);
        let cos_theta = (-i).dot(n).clamp(0.0, 1.0);
        ShadeopValue::Float(f0 + (1.0 - f0) * (1.0 - cos_theta).powi(5))
    },
};

#[distributed_slice(SHADEOPS)]
static ROTATE_POINT: ShadeopDescriptor = ShadeopDescriptor {
    name: "rotate",
    ret: TypeCode::Point,
    args: &[TypeCode::Point, TypeCode::Float, TypeCode::Point, TypeCode::Point],
    doc: "Rotate a point by an angle (radians) about the axis from p0 to p1",
    init: None,
    eval: |args| {
        let q = args[0].as_triple().unwrap_or(V3::ZERO);
        let angle = args[1].as_float().unwrap_or(0.0);
        let p0 = args[2].as_triple().unwrap_or(V3::ZERO);
        let p1 = args[3].as_triple().unwrap_or(V3::ZERO);
        let axis = (p1 - p0).normalized();
        // Rodrigues rotation about the axis through p0.
        let v = q - p0;
        let (s, c) = angle.sin_cos();
        let rotated = v * c + axis.cross(v) * s + axis * (axis.dot(v) * (1.0 - c));
        ShadeopValue::Triple(p0 + rotated)
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luminance_white() {
        let out = (LUMINANCE.eval)(&[ShadeopValue::Triple(V3::ONE)]);
        let v = out.as_float().unwrap();
        assert!((v - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_desaturate_full() {
        let out = (DESATURATE.eval)(&[
            ShadeopValue::Triple(V3::new(1.0, 0.0, 0.0)),
            ShadeopValue::Float(1.0),
        ]);
        let c = out.as_triple().unwrap();
        assert!((c.x - c.y).abs() < 1e-6);
        assert!((c.y - c.z).abs() < 1e-6);
    }

    #[test]
    fn test_schlick_grazing() {
        // Grazing incidence approaches full reflectance.
        let out = (FRESNEL_SCHLICK.eval)(&[
            ShadeopValue::Triple(V3::new(1.0, 0.0, 0.0)),
            ShadeopValue::Triple(V3::new(0.0, 1.0, 0.0)),
            ShadeopValue::Float(0.04),
        ]);
        assert!(out.as_float().unwrap() > 0.9);
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let out = (ROTATE_POINT.eval)(&[
            ShadeopValue::Triple(V3::new(1.0, 0.0, 0.0)),
            ShadeopValue::Float(std::f32::consts::FRAC_PI_2),
            ShadeopValue::Triple(V3::ZERO),
            ShadeopValue::Triple(V3::new(0.0, 0.0, 1.0)),
        ]);
        let p = out.as_triple().unwrap();
        assert!((p - V3::new(0.0, 1.0, 0.0)).length() < 1e-5);
    }
}
