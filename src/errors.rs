//! VM-side errors and their mapping onto Java error classes.

use std::error::Error;
use std::fmt::Display;

/// Why a VM operation failed before a Java exception object could be
/// involved. Each kind corresponds to the Java error class that the runtime
/// raises when the failure surfaces during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmErrorKind {
    /// A class could not be located or decoded.
    ClassNotFound,
    /// A resolved class is missing a referenced field.
    NoSuchField,
    /// A resolved class is missing a referenced method.
    NoSuchMethod,
    /// A native method has no registered handler.
    UnsatisfiedLink,
    /// Both semispaces (or the permanent region) are exhausted.
    OutOfMemory,
    /// An instruction or constant this VM does not support.
    Unsupported,
    /// Everything that indicates a bug or a corrupt class file.
    Internal,
}

#[derive(Debug, Clone)]
pub struct VmError {
    kind: VmErrorKind,
    message: String,
}

impl VmError {
    pub fn new(kind: VmErrorKind, message: impl Into<String>) -> VmError {
        VmError {
            kind,
            message: message.into(),
        }
    }

    pub fn class_not_found(name: &str) -> VmError {
        VmError::new(VmErrorKind::ClassNotFound, name)
    }

    pub fn no_such_field(class: &str, name: &str, descriptor: &str) -> VmError {
        VmError::new(VmErrorKind::NoSuchField, format!("{class}.{name}:{descriptor}"))
    }

    pub fn no_such_method(class: &str, name: &str, descriptor: &str) -> VmError {
        VmError::new(VmErrorKind::NoSuchMethod, format!("{class}.{name}{descriptor}"))
    }

    pub fn kind(&self) -> &VmErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The binary name of the Java error class this failure becomes when it
    /// reaches running bytecode.
    pub fn exception_class(&self) -> &'static str {
        match self.kind {
            VmErrorKind::ClassNotFound => "java/lang/NoClassDefFoundError",
            VmErrorKind::NoSuchField => "java/lang/NoSuchFieldError",
            VmErrorKind::NoSuchMethod => "java/lang/NoSuchMethodError",
            VmErrorKind::UnsatisfiedLink => "java/lang/UnsatisfiedLinkError",
            VmErrorKind::OutOfMemory => "java/lang/OutOfMemoryError",
            VmErrorKind::Unsupported | VmErrorKind::Internal => "java/lang/InternalError",
        }
    }
}

impl Error for VmError {}

impl Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.exception_class().replace('/', "."), self.message)
    }
}

impl From<jclass::errors::FormatError> for VmError {
    fn from(err: jclass::errors::FormatError) -> Self {
        VmError::new(VmErrorKind::ClassNotFound, err.to_string())
    }
}

/// Marker returned by the interpreter when the current frame is being
/// abandoned because of a pending exception. The exception instance itself
/// lives on the owning thread; this type only carries the control flow, so
/// unwinding never relies on host panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind;
