//! The 64-bit slot values that travel through operand stacks, local
//! variables, fields and array elements.

use jclass::descriptors::{BaseType, FieldType, TypeKind};

/// An opaque handle to a heap object. The all-zero handle is null; every
/// other handle addresses either the collected semispace (renumbered by each
/// GC cycle) or the permanent region (stable). Only the heap mints non-null
/// handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    pub const NULL: ObjRef = ObjRef(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A tagged slot value.
///
/// Byte, short, char and boolean never appear here: they are widened to
/// `Int` when loaded and truncated when stored, as the operand stack model
/// prescribes. The tag is what lets the garbage collector find reference
/// slots in live frames without consulting `StackMapTable` data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(ObjRef),
}

impl Value {
    pub const NULL: Value = Value::Reference(ObjRef::NULL);

    /// Long and double occupy two slots wherever slots are counted.
    pub fn is_category_two(self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// The zero value a field or array element of the given type starts
    /// life with.
    pub fn default_for(ty: &FieldType) -> Value {
        if ty.is_reference_or_array() {
            return Value::NULL;
        }
        match ty.kind {
            TypeKind::Primitive(BaseType::Long) => Value::Long(0),
            TypeKind::Primitive(BaseType::Float) => Value::Float(0.0),
            TypeKind::Primitive(BaseType::Double) => Value::Double(0.0),
            _ => Value::Int(0),
        }
    }

    // The typed accessors fail loudly on a tag mismatch: the bytecode is not
    // verified, and a mismatch means the class file lied about its types.

    pub fn as_int(self) -> i32 {
        match self {
            Value::Int(v) => v,
            other => panic!("expected an int slot, found {other:?}"),
        }
    }

    pub fn as_long(self) -> i64 {
        match self {
            Value::Long(v) => v,
            other => panic!("expected a long slot, found {other:?}"),
        }
    }

    pub fn as_float(self) -> f32 {
        match self {
            Value::Float(v) => v,
            other => panic!("expected a float slot, found {other:?}"),
        }
    }

    pub fn as_double(self) -> f64 {
        match self {
            Value::Double(v) => v,
            other => panic!("expected a double slot, found {other:?}"),
        }
    }

    pub fn as_reference(self) -> ObjRef {
        match self {
            Value::Reference(v) => v,
            other => panic!("expected a reference slot, found {other:?}"),
        }
    }

    pub fn as_reference_opt(self) -> Option<ObjRef> {
        match self {
            Value::Reference(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_two_detection() {
        assert!(Value::Long(1).is_category_two());
        assert!(Value::Double(1.0).is_category_two());
        assert!(!Value::Int(1).is_category_two());
        assert!(!Value::NULL.is_category_two());
    }

    #[test]
    fn defaults_follow_the_field_type() {
        assert_eq!(Value::default_for(&FieldType::parse("I").unwrap()), Value::Int(0));
        assert_eq!(Value::default_for(&FieldType::parse("Z").unwrap()), Value::Int(0));
        assert_eq!(Value::default_for(&FieldType::parse("J").unwrap()), Value::Long(0));
        assert_eq!(Value::default_for(&FieldType::parse("D").unwrap()), Value::Double(0.0));
        assert_eq!(Value::default_for(&FieldType::parse("[I").unwrap()), Value::NULL);
        assert_eq!(
            Value::default_for(&FieldType::parse("Ljava/lang/Object;").unwrap()),
            Value::NULL
        );
    }
}
