//! Shading values.
//!
//! One concretely typed container per value kind behind a closed enum.
//! Every value knows its own type and cardinality for its whole lifetime;
//! a uniform value holds exactly one element, a varying value holds one
//! element per grid point. Wrong-kind access is an explicit
//! [`RuntimeError::WrongType`], never a reinterpretation.
//!
//! Values are shared through [`ValueRef`] handles so the operand stack can
//! reference permanent variables without copying grid-sized payloads.

use crate::error::{RunResult, RuntimeError};
use std::cell::RefCell;
use std::rc::Rc;
use umbra_foundation::{Mat4, StorageClass, V3, VarType};

/// Shared handle to a shading value.
pub type ValueRef = Rc<RefCell<ShadingValue>>;

/// Wrap a value into a shared handle.
pub fn value_ref(v: ShadingValue) -> ValueRef {
    Rc::new(RefCell::new(v))
}

/// Typed backing storage with a cardinality tag.
#[derive(Debug, Clone, PartialEq)]
pub struct VarData<T> {
    class: StorageClass,
    data: Vec<T>,
}

impl<T: Clone + Default> VarData<T> {
    pub fn uniform(v: T) -> Self {
        Self {
            class: StorageClass::Uniform,
            data: vec![v],
        }
    }

    pub fn varying(n: usize) -> Self {
        Self {
            class: StorageClass::Varying,
            data: vec![T::default(); n.max(1)],
        }
    }

    pub fn class(&self) -> StorageClass {
        self.class
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Element at point `i`; a uniform value answers every index.
    pub fn at(&self, i: usize) -> &T {
        match self.class {
            StorageClass::Uniform => &self.data[0],
            StorageClass::Varying => &self.data[i],
        }
    }

    pub fn set_at(&mut self, i: usize, v: T) {
        match self.class {
            StorageClass::Uniform => self.data[0] = v,
            StorageClass::Varying => self.data[i] = v,
        }
    }

    /// Promote to varying at `n` points, replicating a uniform value.
    /// Varying data is resized in place. Never demotes.
    pub fn promote(&mut self, n: usize) {
        let n = n.max(1);
        match self.class {
            StorageClass::Uniform => {
                let v = self.data[0].clone();
                self.class = StorageClass::Varying;
                self.data = vec![v; n];
            }
            StorageClass::Varying => {
                self.data.resize(n, T::default());
            }
        }
    }
}

/// Array-valued variable: an ordered sequence of same-typed siblings.
///
/// Element 0 is the representative used for type and class queries; the
/// rest are clones of its shape.
#[derive(Debug, Clone)]
pub struct ArrayValue {
    vtype: VarType,
    class: StorageClass,
    elements: Vec<ValueRef>,
}

impl ArrayValue {
    pub fn new(vtype: VarType, class: StorageClass, len: usize, npoints: usize) -> Self {
        let elements = (0..len.max(1))
            .map(|_| value_ref(ShadingValue::new(vtype, class, npoints)))
            .collect();
        Self {
            vtype,
            class,
            elements,
        }
    }

    pub fn vtype(&self) -> VarType {
        self.vtype
    }

    pub fn class(&self) -> StorageClass {
        self.class
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Handle to element `i`, or `None` out of range.
    pub fn element(&self, i: usize) -> Option<ValueRef> {
        self.elements.get(i).cloned()
    }
}

/// A shading-language value.
#[derive(Debug, Clone)]
pub enum ShadingValue {
    Float(VarData<f32>),
    Str(VarData<String>),
    Point(VarData<V3>),
    Vector(VarData<V3>),
    Normal(VarData<V3>),
    Color(VarData<V3>),
    Matrix(VarData<Mat4>),
    Array(ArrayValue),
}

impl ShadingValue {
    /// Construct a default-initialized value. Varying values are sized to
    /// `npoints`; uniform values always hold one element.
    pub fn new(vtype: VarType, class: StorageClass, npoints: usize) -> Self {
        macro_rules! data {
            ($t:ty) => {
                match class {
                    StorageClass::Uniform => VarData::<$t>::uniform(Default::default()),
                    StorageClass::Varying => VarData::<$t>::varying(npoints),
                }
            };
        }
        match vtype {
            VarType::Float => ShadingValue::Float(data!(f32)),
            VarType::String => ShadingValue::Str(data!(String)),
            VarType::Point => ShadingValue::Point(data!(V3)),
            VarType::Vector => ShadingValue::Vector(data!(V3)),
            VarType::Normal => ShadingValue::Normal(data!(V3)),
            VarType::Color => ShadingValue::Color(data!(V3)),
            VarType::Matrix => ShadingValue::Matrix(data!(Mat4)),
        }
    }

    pub fn uniform_float(v: f32) -> Self {
        ShadingValue::Float(VarData::uniform(v))
    }

    pub fn uniform_string(v: impl Into<String>) -> Self {
        ShadingValue::Str(VarData::uniform(v.into()))
    }

    pub fn uniform_triple(vtype: VarType, v: V3) -> Self {
        match vtype {
            VarType::Point => ShadingValue::Point(VarData::uniform(v)),
            VarType::Vector => ShadingValue::Vector(VarData::uniform(v)),
            VarType::Normal => ShadingValue::Normal(VarData::uniform(v)),
            _ => ShadingValue::Color(VarData::uniform(v)),
        }
    }

    pub fn uniform_matrix(m: Mat4) -> Self {
        ShadingValue::Matrix(VarData::uniform(m))
    }

    pub fn vtype(&self) -> VarType {
        match self {
            ShadingValue::Float(_) => VarType::Float,
            ShadingValue::Str(_) => VarType::String,
            ShadingValue::Point(_) => VarType::Point,
            ShadingValue::Vector(_) => VarType::Vector,
            ShadingValue::Normal(_) => VarType::Normal,
            ShadingValue::Color(_) => VarType::Color,
            ShadingValue::Matrix(_) => VarType::Matrix,
            ShadingValue::Array(a) => a.vtype(),
        }
    }

    pub fn class(&self) -> StorageClass {
        match self {
            ShadingValue::Float(d) => d.class(),
            ShadingValue::Str(d) => d.class(),
            ShadingValue::Point(d) => d.class(),
            ShadingValue::Vector(d) => d.class(),
            ShadingValue::Normal(d) => d.class(),
            ShadingValue::Color(d) => d.class(),
            ShadingValue::Matrix(d) => d.class(),
            ShadingValue::Array(a) => a.class(),
        }
    }

    pub fn is_varying(&self) -> bool {
        self.class() == StorageClass::Varying
    }

    /// Element count: grid point count for varying, 1 for uniform. An
    /// array reports its representative element's size.
    pub fn size(&self) -> usize {
        match self {
            ShadingValue::Float(d) => d.len(),
            ShadingValue::Str(d) => d.len(),
            ShadingValue::Point(d) => d.len(),
            ShadingValue::Vector(d) => d.len(),
            ShadingValue::Normal(d) => d.len(),
            ShadingValue::Color(d) => d.len(),
            ShadingValue::Matrix(d) => d.len(),
            ShadingValue::Array(a) => a
                .element(0)
                .map(|e| e.borrow().size())
                .unwrap_or(1),
        }
    }

    /// Promote to varying at `n` points. Arrays promote every element.
    pub fn promote(&mut self, n: usize) {
        match self {
            ShadingValue::Float(d) => d.promote(n),
            ShadingValue::Str(d) => d.promote(n),
            ShadingValue::Point(d) => d.promote(n),
            ShadingValue::Vector(d) => d.promote(n),
            ShadingValue::Normal(d) => d.promote(n),
            ShadingValue::Color(d) => d.promote(n),
            ShadingValue::Matrix(d) => d.promote(n),
            ShadingValue::Array(a) => {
                a.class = StorageClass::Varying;
                for e in &a.elements {
                    e.borrow_mut().promote(n);
                }
            }
        }
    }

    // --- typed access -----------------------------------------------------

    pub fn floats(&self) -> RunResult<&VarData<f32>> {
        match self {
            ShadingValue::Float(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "float",
                found: other.vtype(),
            }),
        }
    }

    pub fn floats_mut(&mut self) -> RunResult<&mut VarData<f32>> {
        match self {
            ShadingValue::Float(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "float",
                found: other.vtype(),
            }),
        }
    }

    pub fn strings(&self) -> RunResult<&VarData<String>> {
        match self {
            ShadingValue::Str(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "string",
                found: other.vtype(),
            }),
        }
    }

    pub fn strings_mut(&mut self) -> RunResult<&mut VarData<String>> {
        match self {
            ShadingValue::Str(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "string",
                found: other.vtype(),
            }),
        }
    }

    /// Three-component access: points, vectors, normals, and colors all
    /// share the backing representation.
    pub fn triples(&self) -> RunResult<&VarData<V3>> {
        match self {
            ShadingValue::Point(d)
            | ShadingValue::Vector(d)
            | ShadingValue::Normal(d)
            | ShadingValue::Color(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "point-like or color",
                found: other.vtype(),
            }),
        }
    }

    pub fn triples_mut(&mut self) -> RunResult<&mut VarData<V3>> {
        match self {
            ShadingValue::Point(d)
            | ShadingValue::Vector(d)
            | ShadingValue::Normal(d)
            | ShadingValue::Color(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "point-like or color",
                found: other.vtype(),
            }),
        }
    }

    pub fn matrices(&self) -> RunResult<&VarData<Mat4>> {
        match self {
            ShadingValue::Matrix(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "matrix",
                found: other.vtype(),
            }),
        }
    }

    pub fn matrices_mut(&mut self) -> RunResult<&mut VarData<Mat4>> {
        match self {
            ShadingValue::Matrix(d) => Ok(d),
            other => Err(RuntimeError::WrongType {
                expected: "matrix",
                found: other.vtype(),
            }),
        }
    }

    pub fn as_array(&self) -> RunResult<&ArrayValue> {
        match self {
            ShadingValue::Array(a) => Ok(a),
            other => Err(RuntimeError::WrongType {
                expected: "array",
                found: other.vtype(),
            }),
        }
    }

    // --- copying ----------------------------------------------------------

    /// Whether a value of `src` kind may be stored into this value without
    /// a cast opcode. The three point-like kinds interconvert; color and
    /// the rest require exact kind match.
    fn accepts_kind(&self, src: VarType) -> bool {
        let dst = self.vtype();
        dst == src || (dst.is_point_like() && src.is_point_like())
    }

    /// Copy `src` into this value with cardinality coercion: a uniform
    /// source broadcasts into a varying target; varying copies
    /// elementwise. Demotion (varying source, uniform target) is refused.
    pub fn set_from(&mut self, src: &ShadingValue) -> RunResult<()> {
        self.copy_from(src, None)
    }

    /// Copy a single point `i` of `src` into point `i` of this value.
    pub fn set_elem_from(&mut self, src: &ShadingValue, i: usize) -> RunResult<()> {
        if !self.accepts_kind(src.vtype()) {
            return Err(RuntimeError::WrongType {
                expected: self.vtype().keyword(),
                found: src.vtype(),
            });
        }
        match (&mut *self, src) {
            (ShadingValue::Float(d), ShadingValue::Float(s)) => d.set_at(i, *s.at(i)),
            (ShadingValue::Str(d), ShadingValue::Str(s)) => d.set_at(i, s.at(i).clone()),
            (ShadingValue::Matrix(d), ShadingValue::Matrix(s)) => d.set_at(i, *s.at(i)),
            (dst, src) => {
                let v = *src.triples()?.at(i);
                dst.triples_mut()?.set_at(i, v);
            }
        }
        Ok(())
    }

    /// Copy `src` into this value, restricted to mask-active points when a
    /// mask is supplied. Inactive points keep their previous contents.
    pub fn copy_from(&mut self, src: &ShadingValue, mask: Option<&[bool]>) -> RunResult<()> {
        if !self.accepts_kind(src.vtype()) {
            return Err(RuntimeError::WrongType {
                expected: self.vtype().keyword(),
                found: src.vtype(),
            });
        }
        if let (ShadingValue::Array(dst), ShadingValue::Array(sa)) = (&mut *self, src) {
            for (d, s) in dst.elements.iter().zip(&sa.elements) {
                d.borrow_mut().copy_from(&s.borrow(), mask)?;
            }
            return Ok(());
        }

        match (self.class(), src.class()) {
            (StorageClass::Uniform, StorageClass::Varying) => {
                return Err(RuntimeError::Cardinality(format!(
                    "cannot store varying {} into uniform {}",
                    src.vtype(),
                    self.vtype()
                )));
            }
            (StorageClass::Uniform, StorageClass::Uniform) => {
                // A uniform store proceeds when any point is active.
                if mask.map(|m| m.iter().any(|&b| b)).unwrap_or(true) {
                    self.set_elem_from(src, 0)?;
                }
            }
            (StorageClass::Varying, _) => {
                let n = self.size();
                if src.is_varying() && src.size() < n {
                    return Err(RuntimeError::Cardinality(format!(
                        "varying source has {} points, target has {}",
                        src.size(),
                        n
                    )));
                }
                for i in 0..n {
                    if mask.map(|m| m[i]).unwrap_or(true) {
                        self.set_elem_from(src, i)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reset every element to the type's default. Pooled temporaries are
    /// handed out with stale contents; callers that may leave points
    /// unwritten clear them first.
    pub fn fill_default(&mut self) {
        match self {
            ShadingValue::Float(d) => d.as_mut_slice().fill(0.0),
            ShadingValue::Str(d) => d.as_mut_slice().fill(String::new()),
            ShadingValue::Point(d)
            | ShadingValue::Vector(d)
            | ShadingValue::Normal(d)
            | ShadingValue::Color(d) => d.as_mut_slice().fill(V3::ZERO),
            ShadingValue::Matrix(d) => d.as_mut_slice().fill(Mat4::IDENTITY),
            ShadingValue::Array(a) => {
                for e in &a.elements {
                    e.borrow_mut().fill_default();
                }
            }
        }
    }

    /// Independent same-typed copy. Array elements are cloned into fresh
    /// handles rather than shared.
    pub fn deep_clone(&self) -> ShadingValue {
        match self {
            ShadingValue::Array(a) => ShadingValue::Array(ArrayValue {
                vtype: a.vtype,
                class: a.class,
                elements: a
                    .elements
                    .iter()
                    .map(|e| value_ref(e.borrow().deep_clone()))
                    .collect(),
            }),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_broadcast_into_varying() {
        let mut dst = ShadingValue::new(VarType::Float, StorageClass::Varying, 4);
        let src = ShadingValue::uniform_float(2.5);
        dst.set_from(&src).unwrap();
        assert_eq!(dst.floats().unwrap().as_slice(), &[2.5; 4]);
    }

    #[test]
    fn test_demotion_refused() {
        let mut dst = ShadingValue::uniform_float(0.0);
        let src = ShadingValue::new(VarType::Float, StorageClass::Varying, 4);
        assert!(matches!(
            dst.set_from(&src),
            Err(RuntimeError::Cardinality(_))
        ));
    }

    #[test]
    fn test_masked_copy_leaves_inactive_points() {
        let mut dst = ShadingValue::new(VarType::Float, StorageClass::Varying, 4);
        for i in 0..4 {
            dst.floats_mut().unwrap().set_at(i, 9.0);
        }
        let src = ShadingValue::uniform_float(1.0);
        let mask = [true, false, true, false];
        dst.copy_from(&src, Some(&mask)).unwrap();
        assert_eq!(dst.floats().unwrap().as_slice(), &[1.0, 9.0, 1.0, 9.0]);
    }

    #[test]
    fn test_point_like_interchange() {
        let mut dst = ShadingValue::new(VarType::Normal, StorageClass::Uniform, 1);
        let src = ShadingValue::uniform_triple(VarType::Vector, V3::new(1.0, 2.0, 3.0));
        dst.set_from(&src).unwrap();
        assert_eq!(*dst.triples().unwrap().at(0), V3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_color_needs_cast() {
        let mut dst = ShadingValue::new(VarType::Color, StorageClass::Uniform, 1);
        let src = ShadingValue::uniform_triple(VarType::Point, V3::ONE);
        assert!(dst.set_from(&src).is_err());
    }

    #[test]
    fn test_wrong_kind_getter_is_error() {
        let v = ShadingValue::uniform_float(1.0);
        assert!(matches!(
            v.triples(),
            Err(RuntimeError::WrongType { .. })
        ));
        assert!(v.floats().is_ok());
    }

    #[test]
    fn test_promote_replicates_uniform() {
        let mut v = ShadingValue::uniform_float(3.0);
        v.promote(5);
        assert!(v.is_varying());
        assert_eq!(v.floats().unwrap().as_slice(), &[3.0; 5]);
    }

    #[test]
    fn test_array_deep_clone_is_independent() {
        let arr = ShadingValue::Array(ArrayValue::new(
            VarType::Float,
            StorageClass::Uniform,
            2,
            1,
        ));
        let copy = arr.deep_clone();
        let a = arr.as_array().unwrap().element(0).unwrap();
        a.borrow_mut().floats_mut().unwrap().set_at(0, 7.0);
        let c = copy.as_array().unwrap().element(0).unwrap();
        let c_val = *c.borrow().floats().unwrap().at(0);
        assert_eq!(c_val, 0.0);
    }

    #[test]
    fn test_size_reporting() {
        let u = ShadingValue::uniform_float(0.0);
        assert_eq!(u.size(), 1);
        let v = ShadingValue::new(VarType::Color, StorageClass::Varying, 16);
        assert_eq!(v.size(), 16);
    }
}
