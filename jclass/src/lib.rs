//! Decoder for the JVM 17 class file format (major version 61).
//!
//! This crate turns a big-endian class file blob into typed records: the
//! symbolic constant pool, field and method tables, and the attribute set
//! the runtime cares about. It performs no linking and holds no runtime
//! state; the VM crate layers resolution on top.

pub mod access_flags;
pub mod attributes;
pub mod class_file;
pub mod constants;
pub mod descriptors;
pub mod encoding;
pub mod errors;
