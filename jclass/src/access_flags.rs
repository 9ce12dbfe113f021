//! Access flag masks for classes, fields and methods
//! ([JVMS Table 4.1-B, §4.5, §4.6](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html)).
//!
//! Flags stay as their raw `u16` mask in the decoded records; the enums here
//! name the individual bits.

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassAccessFlags {
    /// Declared public; may be accessed from outside its package.
    AccPublic = 0x0001,
    /// Declared final; no subclasses allowed.
    AccFinal = 0x0010,
    /// Treat superclass methods specially when invoked by invokespecial.
    AccSuper = 0x0020,
    /// Is an interface, not a class.
    AccInterface = 0x0200,
    /// Declared abstract; must not be instantiated.
    AccAbstract = 0x0400,
    /// Declared synthetic; not present in the source code.
    AccSynthetic = 0x1000,
    /// Declared as an annotation interface.
    AccAnnotation = 0x2000,
    /// Declared as an enum class.
    AccEnum = 0x4000,
    /// Is a module, not a class or interface.
    AccModule = 0x8000,
}

impl ClassAccessFlags {
    const ALL: &'static [ClassAccessFlags] = &[
        ClassAccessFlags::AccPublic,
        ClassAccessFlags::AccFinal,
        ClassAccessFlags::AccSuper,
        ClassAccessFlags::AccInterface,
        ClassAccessFlags::AccAbstract,
        ClassAccessFlags::AccSynthetic,
        ClassAccessFlags::AccAnnotation,
        ClassAccessFlags::AccEnum,
        ClassAccessFlags::AccModule,
    ];

    pub fn decode(mask: u16) -> Vec<ClassAccessFlags> {
        Self::ALL.iter().copied().filter(|f| mask & *f as u16 != 0).collect()
    }

    pub fn is_set(mask: u16, flag: ClassAccessFlags) -> bool {
        mask & flag as u16 != 0
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccessFlags {
    AccPublic = 0x0001,
    AccPrivate = 0x0002,
    AccProtected = 0x0004,
    AccStatic = 0x0008,
    AccFinal = 0x0010,
    /// Declared volatile; cannot be cached.
    AccVolatile = 0x0040,
    /// Declared transient; not written or read by a persistent object manager.
    AccTransient = 0x0080,
    AccSynthetic = 0x1000,
    AccEnum = 0x4000,
}

impl FieldAccessFlags {
    const ALL: &'static [FieldAccessFlags] = &[
        FieldAccessFlags::AccPublic,
        FieldAccessFlags::AccPrivate,
        FieldAccessFlags::AccProtected,
        FieldAccessFlags::AccStatic,
        FieldAccessFlags::AccFinal,
        FieldAccessFlags::AccVolatile,
        FieldAccessFlags::AccTransient,
        FieldAccessFlags::AccSynthetic,
        FieldAccessFlags::AccEnum,
    ];

    pub fn decode(mask: u16) -> Vec<FieldAccessFlags> {
        Self::ALL.iter().copied().filter(|f| mask & *f as u16 != 0).collect()
    }

    pub fn is_set(mask: u16, flag: FieldAccessFlags) -> bool {
        mask & flag as u16 != 0
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodAccessFlags {
    AccPublic = 0x0001,
    AccPrivate = 0x0002,
    AccProtected = 0x0004,
    AccStatic = 0x0008,
    AccFinal = 0x0010,
    /// Declared synchronized; invocation is wrapped by a monitor use.
    AccSynchronized = 0x0020,
    /// A bridge method, generated by the compiler.
    AccBridge = 0x0040,
    AccVarArgs = 0x0080,
    /// Declared native; implemented outside Java bytecode.
    AccNative = 0x0100,
    AccAbstract = 0x0400,
    AccStrict = 0x0800,
    AccSynthetic = 0x1000,
}

impl MethodAccessFlags {
    const ALL: &'static [MethodAccessFlags] = &[
        MethodAccessFlags::AccPublic,
        MethodAccessFlags::AccPrivate,
        MethodAccessFlags::AccProtected,
        MethodAccessFlags::AccStatic,
        MethodAccessFlags::AccFinal,
        MethodAccessFlags::AccSynchronized,
        MethodAccessFlags::AccBridge,
        MethodAccessFlags::AccVarArgs,
        MethodAccessFlags::AccNative,
        MethodAccessFlags::AccAbstract,
        MethodAccessFlags::AccStrict,
        MethodAccessFlags::AccSynthetic,
    ];

    pub fn decode(mask: u16) -> Vec<MethodAccessFlags> {
        Self::ALL.iter().copied().filter(|f| mask & *f as u16 != 0).collect()
    }

    pub fn is_set(mask: u16, flag: MethodAccessFlags) -> bool {
        mask & flag as u16 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_picks_out_set_bits() {
        let flags = MethodAccessFlags::decode(0x0009);
        assert_eq!(
            flags,
            vec![MethodAccessFlags::AccPublic, MethodAccessFlags::AccStatic]
        );
        assert!(MethodAccessFlags::is_set(0x0109, MethodAccessFlags::AccNative));
        assert!(!MethodAccessFlags::is_set(0x0009, MethodAccessFlags::AccNative));
    }
}
