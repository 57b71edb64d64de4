//! 3-component vector math.
//!
//! [`V3`] is the shared backing representation for points, vectors,
//! normals, and colors. Geometric helpers used by the opcode library
//! (reflect, refract, faceforward) live here so the built-in shadeops can
//! reuse them without depending on the VM.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Index, Mul, Neg, Sub};

/// A 3-component value: point, direction, normal, or color triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct V3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl V3 {
    pub const ZERO: V3 = V3::new(0.0, 0.0, 0.0);
    pub const ONE: V3 = V3::new(1.0, 1.0, 1.0);

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// All three components set to `v`.
    #[inline]
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    #[inline]
    pub fn dot(self, rhs: V3) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    #[inline]
    pub fn cross(self, rhs: V3) -> V3 {
        V3::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    #[inline]
    pub fn length_sq(self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    #[inline]
    pub fn distance(self, rhs: V3) -> f32 {
        (self - rhs).length()
    }

    /// Unit-length copy. The zero vector normalizes to itself.
    #[inline]
    pub fn normalized(self) -> V3 {
        let len = self.length();
        if len > 0.0 {
            self / len
        } else {
            self
        }
    }

    /// Component-wise multiply (color filtering).
    #[inline]
    pub fn mul_components(self, rhs: V3) -> V3 {
        V3::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z)
    }

    /// Component-wise divide.
    #[inline]
    pub fn div_components(self, rhs: V3) -> V3 {
        V3::new(self.x / rhs.x, self.y / rhs.y, self.z / rhs.z)
    }

    /// Linear interpolation: `self` at t=0, `rhs` at t=1.
    #[inline]
    pub fn lerp(self, rhs: V3, t: f32) -> V3 {
        self + (rhs - self) * t
    }

    /// Component by index 0..3.
    #[inline]
    pub fn component(self, i: usize) -> Option<f32> {
        match i {
            0 => Some(self.x),
            1 => Some(self.y),
            2 => Some(self.z),
            _ => None,
        }
    }

    /// Set component by index 0..3; out-of-range indices are ignored.
    #[inline]
    pub fn set_component(&mut self, i: usize, v: f32) {
        match i {
            0 => self.x = v,
            1 => self.y = v,
            2 => self.z = v,
            _ => {}
        }
    }
}

impl Index<usize> for V3 {
    type Output = f32;

    fn index(&self, i: usize) -> &f32 {
        match i {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("V3 index out of range: {i}"),
        }
    }
}

impl Add for V3 {
    type Output = V3;
    #[inline]
    fn add(self, rhs: V3) -> V3 {
        V3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for V3 {
    type Output = V3;
    #[inline]
    fn sub(self, rhs: V3) -> V3 {
        V3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for V3 {
    type Output = V3;
    #[inline]
    fn mul(self, s: f32) -> V3 {
        V3::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Div<f32> for V3 {
    type Output = V3;
    #[inline]
    fn div(self, s: f32) -> V3 {
        V3::new(self.x / s, self.y / s, self.z / s)
    }
}

impl Neg for V3 {
    type Output = V3;
    #[inline]
    fn neg(self) -> V3 {
        V3::new(-self.x, -self.y, -self.z)
    }
}

/// Reflect incident direction `i` about normal `n`.
#[inline]
pub fn reflect(i: V3, n: V3) -> V3 {
    i - n * (2.0 * i.dot(n))
}

/// Refract incident direction `i` through normal `n` with relative index
/// of refraction `eta`. Total internal reflection yields the zero vector.
#[inline]
pub fn refract(i: V3, n: V3, eta: f32) -> V3 {
    let idotn = i.dot(n);
    let k = 1.0 - eta * eta * (1.0 - idotn * idotn);
    if k < 0.0 {
        V3::ZERO
    } else {
        i * eta - n * (eta * idotn + k.sqrt())
    }
}

/// Flip `n` so it faces away from incident direction `i`.
#[inline]
pub fn faceforward(n: V3, i: V3) -> V3 {
    if i.dot(n) < 0.0 {
        n
    } else {
        -n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_cross() {
        let x = V3::new(1.0, 0.0, 0.0);
        let y = V3::new(0.0, 1.0, 0.0);
        assert_eq!(x.dot(y), 0.0);
        assert_eq!(x.cross(y), V3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_normalize() {
        let v = V3::new(3.0, 4.0, 0.0).normalized();
        assert!((v.length() - 1.0).abs() < 1e-6);
        assert_eq!(V3::ZERO.normalized(), V3::ZERO);
    }

    #[test]
    fn test_reflect() {
        // Straight-down incident on an up-facing normal bounces straight up.
        let i = V3::new(0.0, -1.0, 0.0);
        let n = V3::new(0.0, 1.0, 0.0);
        assert_eq!(reflect(i, n), V3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_refract_total_internal() {
        let i = V3::new(1.0, -0.01, 0.0).normalized();
        let n = V3::new(0.0, 1.0, 0.0);
        assert_eq!(refract(i, n, 2.5), V3::ZERO);
    }

    #[test]
    fn test_faceforward() {
        let n = V3::new(0.0, 1.0, 0.0);
        let towards = V3::new(0.0, -1.0, 0.0);
        let away = V3::new(0.0, 1.0, 0.0);
        assert_eq!(faceforward(n, towards), n);
        assert_eq!(faceforward(n, away), -n);
    }
}
