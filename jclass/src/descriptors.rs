//! Field and method descriptor parsing ([JVMS §4.3](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.3)).
//!
//! Grammar:
//!
//! ```text
//! FieldType  := BaseType | 'L' ClassName ';' | '[' FieldType
//! BaseType   := 'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z'
//! MethodType := '(' FieldType* ')' ( FieldType | 'V' )
//! ```

use std::fmt::Display;

/// The eight primitive base types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    fn from_char(c: char) -> Option<BaseType> {
        match c {
            'B' => Some(BaseType::Byte),
            'C' => Some(BaseType::Char),
            'D' => Some(BaseType::Double),
            'F' => Some(BaseType::Float),
            'I' => Some(BaseType::Int),
            'J' => Some(BaseType::Long),
            'S' => Some(BaseType::Short),
            'Z' => Some(BaseType::Boolean),
            _ => None,
        }
    }

    pub fn descriptor_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }

    /// Category-2 types occupy two slots everywhere slots are counted.
    pub fn is_category_two(self) -> bool {
        matches!(self, BaseType::Long | BaseType::Double)
    }
}

/// Either a primitive or a class, before array dimensions are applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive(BaseType),
    Object(String),
}

/// A parsed field descriptor: a base kind plus array dimensions counted from
/// the leading `[` characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldType {
    pub kind: TypeKind,
    pub dimensions: u8,
}

impl FieldType {
    pub fn primitive(base: BaseType) -> FieldType {
        FieldType {
            kind: TypeKind::Primitive(base),
            dimensions: 0,
        }
    }

    pub fn object(name: &str) -> FieldType {
        FieldType {
            kind: TypeKind::Object(name.into()),
            dimensions: 0,
        }
    }

    pub fn array_of(kind: TypeKind, dimensions: u8) -> FieldType {
        FieldType { kind, dimensions }
    }

    /// Parses a complete field descriptor; trailing characters are an error.
    pub fn parse(input: &str) -> Option<FieldType> {
        let (rest, ty) = parse_field_type(input)?;
        if rest.is_empty() {
            Some(ty)
        } else {
            None
        }
    }

    pub fn is_array(&self) -> bool {
        self.dimensions > 0
    }

    /// True for anything the garbage collector must treat as a pointer.
    pub fn is_reference_or_array(&self) -> bool {
        self.dimensions > 0 || matches!(self.kind, TypeKind::Object(_))
    }

    pub fn as_primitive(&self) -> Option<BaseType> {
        if self.dimensions == 0 {
            if let TypeKind::Primitive(base) = self.kind {
                return Some(base);
            }
        }
        None
    }

    pub fn as_object_name(&self) -> Option<&str> {
        if self.dimensions == 0 {
            if let TypeKind::Object(ref name) = self.kind {
                return Some(name);
            }
        }
        None
    }

    /// The type of one element of this array: the same kind with one fewer
    /// dimension.
    pub fn component_type(&self) -> Option<FieldType> {
        if self.dimensions == 0 {
            return None;
        }
        Some(FieldType {
            kind: self.kind.clone(),
            dimensions: self.dimensions - 1,
        })
    }

    pub fn is_category_two(&self) -> bool {
        self.as_primitive().is_some_and(BaseType::is_category_two)
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for _ in 0..self.dimensions {
            write!(f, "[")?;
        }
        match &self.kind {
            TypeKind::Primitive(base) => write!(f, "{}", base.descriptor_char()),
            TypeKind::Object(name) => write!(f, "L{name};"),
        }
    }
}

fn parse_field_type(input: &str) -> Option<(&str, FieldType)> {
    let mut dimensions = 0u8;
    let mut rest = input;

    while let Some(stripped) = rest.strip_prefix('[') {
        dimensions = dimensions.checked_add(1)?;
        rest = stripped;
    }

    let mut chars = rest.chars();
    match chars.next()? {
        'L' => {
            let end = rest.find(';')?;
            let name = &rest[1..end];
            if name.is_empty() {
                return None;
            }
            Some((&rest[end + 1..], FieldType::array_of(TypeKind::Object(name.into()), dimensions)))
        }
        c => {
            let base = BaseType::from_char(c)?;
            Some((chars.as_str(), FieldType::array_of(TypeKind::Primitive(base), dimensions)))
        }
    }
}

/// A parsed method descriptor. `return_type` is `None` for `V`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(input: &str) -> Option<MethodDescriptor> {
        let mut rest = input.strip_prefix('(')?;

        let mut parameters = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            let (next, ty) = parse_field_type(rest)?;
            parameters.push(ty);
            rest = next;
        }

        if rest == "V" {
            return Some(MethodDescriptor {
                parameters,
                return_type: None,
            });
        }

        let (tail, ty) = parse_field_type(rest)?;
        if !tail.is_empty() {
            return None;
        }
        Some(MethodDescriptor {
            parameters,
            return_type: Some(ty),
        })
    }

    /// Number of local-variable slots the parameters occupy, counting
    /// category-2 parameters twice. The receiver is not included.
    pub fn parameter_slots(&self) -> usize {
        self.parameters
            .iter()
            .map(|p| if p.is_category_two() { 2 } else { 1 })
            .sum()
    }
}

impl Display for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for param in &self.parameters {
            write!(f, "{param}")?;
        }
        write!(f, ")")?;
        match &self.return_type {
            Some(ty) => write!(f, "{ty}"),
            None => write!(f, "V"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_types() {
        assert_eq!(FieldType::parse("B"), Some(FieldType::primitive(BaseType::Byte)));
        assert_eq!(FieldType::parse("C"), Some(FieldType::primitive(BaseType::Char)));
        assert_eq!(FieldType::parse("D"), Some(FieldType::primitive(BaseType::Double)));
        assert_eq!(FieldType::parse("F"), Some(FieldType::primitive(BaseType::Float)));
        assert_eq!(FieldType::parse("I"), Some(FieldType::primitive(BaseType::Int)));
        assert_eq!(FieldType::parse("J"), Some(FieldType::primitive(BaseType::Long)));
        assert_eq!(FieldType::parse("S"), Some(FieldType::primitive(BaseType::Short)));
        assert_eq!(FieldType::parse("Z"), Some(FieldType::primitive(BaseType::Boolean)));
    }

    #[test]
    fn object_type() {
        assert_eq!(
            FieldType::parse("Ljava/lang/Object;"),
            Some(FieldType::object("java/lang/Object"))
        );
    }

    #[test]
    fn array_types() {
        assert_eq!(
            FieldType::parse("[B"),
            Some(FieldType::array_of(TypeKind::Primitive(BaseType::Byte), 1))
        );
        assert_eq!(
            FieldType::parse("[[[J"),
            Some(FieldType::array_of(TypeKind::Primitive(BaseType::Long), 3))
        );
        assert_eq!(
            FieldType::parse("[[Ljava/lang/Object;"),
            Some(FieldType::array_of(TypeKind::Object("java/lang/Object".into()), 2))
        );
    }

    #[test]
    fn invalid_field_descriptors() {
        assert_eq!(FieldType::parse("Ljava/lang/String"), None);
        assert_eq!(FieldType::parse(""), None);
        assert_eq!(FieldType::parse("["), None);
        assert_eq!(FieldType::parse("V"), None);
        assert_eq!(FieldType::parse("[[["), None);
        assert_eq!(FieldType::parse("Bjava/lang/String;"), None);
    }

    #[test]
    fn method_types() {
        let desc = MethodDescriptor::parse("(BF)V").unwrap();
        assert_eq!(
            desc.parameters,
            vec![
                FieldType::primitive(BaseType::Byte),
                FieldType::primitive(BaseType::Float)
            ]
        );
        assert_eq!(desc.return_type, None);

        let desc = MethodDescriptor::parse("()[[F").unwrap();
        assert!(desc.parameters.is_empty());
        assert_eq!(
            desc.return_type,
            Some(FieldType::array_of(TypeKind::Primitive(BaseType::Float), 2))
        );

        let desc = MethodDescriptor::parse("(Ljava/lang/String;)Ljava/lang/String;").unwrap();
        assert_eq!(desc.parameters, vec![FieldType::object("java/lang/String")]);
    }

    #[test]
    fn invalid_method_descriptors() {
        assert_eq!(MethodDescriptor::parse("("), None);
        assert_eq!(MethodDescriptor::parse("()"), None);
        assert_eq!(MethodDescriptor::parse("(V)"), None);
        assert_eq!(MethodDescriptor::parse("(V"), None);
        assert_eq!(MethodDescriptor::parse("()VV"), None);
        assert_eq!(
            MethodDescriptor::parse("(Ljava/lang/String)Ljava/lang/String;"),
            None
        );
    }

    #[test]
    fn parse_then_format_is_identity() {
        for desc in ["I", "[B", "[[[J", "Ljava/lang/Object;", "[[Ljava/util/List;"] {
            assert_eq!(FieldType::parse(desc).unwrap().to_string(), desc);
        }
        for desc in ["()V", "(BF)V", "(IJ)J", "([Ljava/lang/String;)V", "()[[F"] {
            assert_eq!(MethodDescriptor::parse(desc).unwrap().to_string(), desc);
        }
    }

    #[test]
    fn parameter_slot_counts() {
        assert_eq!(MethodDescriptor::parse("(IJD)V").unwrap().parameter_slots(), 5);
        assert_eq!(MethodDescriptor::parse("()V").unwrap().parameter_slots(), 0);
    }
}
