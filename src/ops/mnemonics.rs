//! Opcode mnemonics ([JVMS §6.5](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-6.html#jvms-6.5)).

/// Every JVM 17 opcode, plus `Unknown` for bytes with no assigned meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Nop,
    AconstNull,
    IconstM1,
    Iconst0,
    Iconst1,
    Iconst2,
    Iconst3,
    Iconst4,
    Iconst5,
    Lconst0,
    Lconst1,
    Fconst0,
    Fconst1,
    Fconst2,
    Dconst0,
    Dconst1,
    Bipush,
    Sipush,
    Ldc,
    LdcW,
    Ldc2W,
    Iload,
    Lload,
    Fload,
    Dload,
    Aload,
    Iload0,
    Iload1,
    Iload2,
    Iload3,
    Lload0,
    Lload1,
    Lload2,
    Lload3,
    Fload0,
    Fload1,
    Fload2,
    Fload3,
    Dload0,
    Dload1,
    Dload2,
    Dload3,
    Aload0,
    Aload1,
    Aload2,
    Aload3,
    Iaload,
    Laload,
    Faload,
    Daload,
    Aaload,
    Baload,
    Caload,
    Saload,
    Istore,
    Lstore,
    Fstore,
    Dstore,
    Astore,
    Istore0,
    Istore1,
    Istore2,
    Istore3,
    Lstore0,
    Lstore1,
    Lstore2,
    Lstore3,
    Fstore0,
    Fstore1,
    Fstore2,
    Fstore3,
    Dstore0,
    Dstore1,
    Dstore2,
    Dstore3,
    Astore0,
    Astore1,
    Astore2,
    Astore3,
    Iastore,
    Lastore,
    Fastore,
    Dastore,
    Aastore,
    Bastore,
    Castore,
    Sastore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Iadd,
    Ladd,
    Fadd,
    Dadd,
    Isub,
    Lsub,
    Fsub,
    Dsub,
    Imul,
    Lmul,
    Fmul,
    Dmul,
    Idiv,
    Ldiv,
    Fdiv,
    Ddiv,
    Irem,
    Lrem,
    Frem,
    Drem,
    Ineg,
    Lneg,
    Fneg,
    Dneg,
    Ishl,
    Lshl,
    Ishr,
    Lshr,
    Iushr,
    Lushr,
    Iand,
    Land,
    Ior,
    Lor,
    Ixor,
    Lxor,
    Iinc,
    I2l,
    I2f,
    I2d,
    L2i,
    L2f,
    L2d,
    F2i,
    F2l,
    F2d,
    D2i,
    D2l,
    D2f,
    I2b,
    I2c,
    I2s,
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
    Ifeq,
    Ifne,
    Iflt,
    Ifge,
    Ifgt,
    Ifle,
    IfIcmpeq,
    IfIcmpne,
    IfIcmplt,
    IfIcmpge,
    IfIcmpgt,
    IfIcmple,
    IfAcmpeq,
    IfAcmpne,
    Goto,
    Jsr,
    Ret,
    Tableswitch,
    Lookupswitch,
    Ireturn,
    Lreturn,
    Freturn,
    Dreturn,
    Areturn,
    Return,
    Getstatic,
    Putstatic,
    Getfield,
    Putfield,
    Invokevirtual,
    Invokespecial,
    Invokestatic,
    Invokeinterface,
    Invokedynamic,
    New,
    Newarray,
    Anewarray,
    Arraylength,
    Athrow,
    Checkcast,
    Instanceof,
    Monitorenter,
    Monitorexit,
    Wide,
    Multianewarray,
    Ifnull,
    Ifnonnull,
    GotoW,
    JsrW,
    Breakpoint,
    Impdep1,
    Impdep2,
    Unknown(u8),
}

impl From<u8> for Mnemonic {
    fn from(opcode: u8) -> Self {
        match opcode {
            0x00 => Mnemonic::Nop,
            0x01 => Mnemonic::AconstNull,
            0x02 => Mnemonic::IconstM1,
            0x03 => Mnemonic::Iconst0,
            0x04 => Mnemonic::Iconst1,
            0x05 => Mnemonic::Iconst2,
            0x06 => Mnemonic::Iconst3,
            0x07 => Mnemonic::Iconst4,
            0x08 => Mnemonic::Iconst5,
            0x09 => Mnemonic::Lconst0,
            0x0A => Mnemonic::Lconst1,
            0x0B => Mnemonic::Fconst0,
            0x0C => Mnemonic::Fconst1,
            0x0D => Mnemonic::Fconst2,
            0x0E => Mnemonic::Dconst0,
            0x0F => Mnemonic::Dconst1,
            0x10 => Mnemonic::Bipush,
            0x11 => Mnemonic::Sipush,
            0x12 => Mnemonic::Ldc,
            0x13 => Mnemonic::LdcW,
            0x14 => Mnemonic::Ldc2W,
            0x15 => Mnemonic::Iload,
            0x16 => Mnemonic::Lload,
            0x17 => Mnemonic::Fload,
            0x18 => Mnemonic::Dload,
            0x19 => Mnemonic::Aload,
            0x1A => Mnemonic::Iload0,
            0x1B => Mnemonic::Iload1,
            0x1C => Mnemonic::Iload2,
            0x1D => Mnemonic::Iload3,
            0x1E => Mnemonic::Lload0,
            0x1F => Mnemonic::Lload1,
            0x20 => Mnemonic::Lload2,
            0x21 => Mnemonic::Lload3,
            0x22 => Mnemonic::Fload0,
            0x23 => Mnemonic::Fload1,
            0x24 => Mnemonic::Fload2,
            0x25 => Mnemonic::Fload3,
            0x26 => Mnemonic::Dload0,
            0x27 => Mnemonic::Dload1,
            0x28 => Mnemonic::Dload2,
            0x29 => Mnemonic::Dload3,
            0x2A => Mnemonic::Aload0,
            0x2B => Mnemonic::Aload1,
            0x2C => Mnemonic::Aload2,
            0x2D => Mnemonic::Aload3,
            0x2E => Mnemonic::Iaload,
            0x2F => Mnemonic::Laload,
            0x30 => Mnemonic::Faload,
            0x31 => Mnemonic::Daload,
            0x32 => Mnemonic::Aaload,
            0x33 => Mnemonic::Baload,
            0x34 => Mnemonic::Caload,
            0x35 => Mnemonic::Saload,
            0x36 => Mnemonic::Istore,
            0x37 => Mnemonic::Lstore,
            0x38 => Mnemonic::Fstore,
            0x39 => Mnemonic::Dstore,
            0x3A => Mnemonic::Astore,
            0x3B => Mnemonic::Istore0,
            0x3C => Mnemonic::Istore1,
            0x3D => Mnemonic::Istore2,
            0x3E => Mnemonic::Istore3,
            0x3F => Mnemonic::Lstore0,
            0x40 => Mnemonic::Lstore1,
            0x41 => Mnemonic::Lstore2,
            0x42 => Mnemonic::Lstore3,
            0x43 => Mnemonic::Fstore0,
            0x44 => Mnemonic::Fstore1,
            0x45 => Mnemonic::Fstore2,
            0x46 => Mnemonic::Fstore3,
            0x47 => Mnemonic::Dstore0,
            0x48 => Mnemonic::Dstore1,
            0x49 => Mnemonic::Dstore2,
            0x4A => Mnemonic::Dstore3,
            0x4B => Mnemonic::Astore0,
            0x4C => Mnemonic::Astore1,
            0x4D => Mnemonic::Astore2,
            0x4E => Mnemonic::Astore3,
            0x4F => Mnemonic::Iastore,
            0x50 => Mnemonic::Lastore,
            0x51 => Mnemonic::Fastore,
            0x52 => Mnemonic::Dastore,
            0x53 => Mnemonic::Aastore,
            0x54 => Mnemonic::Bastore,
            0x55 => Mnemonic::Castore,
            0x56 => Mnemonic::Sastore,
            0x57 => Mnemonic::Pop,
            0x58 => Mnemonic::Pop2,
            0x59 => Mnemonic::Dup,
            0x5A => Mnemonic::DupX1,
            0x5B => Mnemonic::DupX2,
            0x5C => Mnemonic::Dup2,
            0x5D => Mnemonic::Dup2X1,
            0x5E => Mnemonic::Dup2X2,
            0x5F => Mnemonic::Swap,
            0x60 => Mnemonic::Iadd,
            0x61 => Mnemonic::Ladd,
            0x62 => Mnemonic::Fadd,
            0x63 => Mnemonic::Dadd,
            0x64 => Mnemonic::Isub,
            0x65 => Mnemonic::Lsub,
            0x66 => Mnemonic::Fsub,
            0x67 => Mnemonic::Dsub,
            0x68 => Mnemonic::Imul,
            0x69 => Mnemonic::Lmul,
            0x6A => Mnemonic::Fmul,
            0x6B => Mnemonic::Dmul,
            0x6C => Mnemonic::Idiv,
            0x6D => Mnemonic::Ldiv,
            0x6E => Mnemonic::Fdiv,
            0x6F => Mnemonic::Ddiv,
            0x70 => Mnemonic::Irem,
            0x71 => Mnemonic::Lrem,
            0x72 => Mnemonic::Frem,
            0x73 => Mnemonic::Drem,
            0x74 => Mnemonic::Ineg,
            0x75 => Mnemonic::Lneg,
            0x76 => Mnemonic::Fneg,
            0x77 => Mnemonic::Dneg,
            0x78 => Mnemonic::Ishl,
            0x79 => Mnemonic::Lshl,
            0x7A => Mnemonic::Ishr,
            0x7B => Mnemonic::Lshr,
            0x7C => Mnemonic::Iushr,
            0x7D => Mnemonic::Lushr,
            0x7E => Mnemonic::Iand,
            0x7F => Mnemonic::Land,
            0x80 => Mnemonic::Ior,
            0x81 => Mnemonic::Lor,
            0x82 => Mnemonic::Ixor,
            0x83 => Mnemonic::Lxor,
            0x84 => Mnemonic::Iinc,
            0x85 => Mnemonic::I2l,
            0x86 => Mnemonic::I2f,
            0x87 => Mnemonic::I2d,
            0x88 => Mnemonic::L2i,
            0x89 => Mnemonic::L2f,
            0x8A => Mnemonic::L2d,
            0x8B => Mnemonic::F2i,
            0x8C => Mnemonic::F2l,
            0x8D => Mnemonic::F2d,
            0x8E => Mnemonic::D2i,
            0x8F => Mnemonic::D2l,
            0x90 => Mnemonic::D2f,
            0x91 => Mnemonic::I2b,
            0x92 => Mnemonic::I2c,
            0x93 => Mnemonic::I2s,
            0x94 => Mnemonic::Lcmp,
            0x95 => Mnemonic::Fcmpl,
            0x96 => Mnemonic::Fcmpg,
            0x97 => Mnemonic::Dcmpl,
            0x98 => Mnemonic::Dcmpg,
            0x99 => Mnemonic::Ifeq,
            0x9A => Mnemonic::Ifne,
            0x9B => Mnemonic::Iflt,
            0x9C => Mnemonic::Ifge,
            0x9D => Mnemonic::Ifgt,
            0x9E => Mnemonic::Ifle,
            0x9F => Mnemonic::IfIcmpeq,
            0xA0 => Mnemonic::IfIcmpne,
            0xA1 => Mnemonic::IfIcmplt,
            0xA2 => Mnemonic::IfIcmpge,
            0xA3 => Mnemonic::IfIcmpgt,
            0xA4 => Mnemonic::IfIcmple,
            0xA5 => Mnemonic::IfAcmpeq,
            0xA6 => Mnemonic::IfAcmpne,
            0xA7 => Mnemonic::Goto,
            0xA8 => Mnemonic::Jsr,
            0xA9 => Mnemonic::Ret,
            0xAA => Mnemonic::Tableswitch,
            0xAB => Mnemonic::Lookupswitch,
            0xAC => Mnemonic::Ireturn,
            0xAD => Mnemonic::Lreturn,
            0xAE => Mnemonic::Freturn,
            0xAF => Mnemonic::Dreturn,
            0xB0 => Mnemonic::Areturn,
            0xB1 => Mnemonic::Return,
            0xB2 => Mnemonic::Getstatic,
            0xB3 => Mnemonic::Putstatic,
            0xB4 => Mnemonic::Getfield,
            0xB5 => Mnemonic::Putfield,
            0xB6 => Mnemonic::Invokevirtual,
            0xB7 => Mnemonic::Invokespecial,
            0xB8 => Mnemonic::Invokestatic,
            0xB9 => Mnemonic::Invokeinterface,
            0xBA => Mnemonic::Invokedynamic,
            0xBB => Mnemonic::New,
            0xBC => Mnemonic::Newarray,
            0xBD => Mnemonic::Anewarray,
            0xBE => Mnemonic::Arraylength,
            0xBF => Mnemonic::Athrow,
            0xC0 => Mnemonic::Checkcast,
            0xC1 => Mnemonic::Instanceof,
            0xC2 => Mnemonic::Monitorenter,
            0xC3 => Mnemonic::Monitorexit,
            0xC4 => Mnemonic::Wide,
            0xC5 => Mnemonic::Multianewarray,
            0xC6 => Mnemonic::Ifnull,
            0xC7 => Mnemonic::Ifnonnull,
            0xC8 => Mnemonic::GotoW,
            0xC9 => Mnemonic::JsrW,
            0xCA => Mnemonic::Breakpoint,
            0xFE => Mnemonic::Impdep1,
            0xFF => Mnemonic::Impdep2,
            other => Mnemonic::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_opcodes_decode() {
        assert_eq!(Mnemonic::from(0x00), Mnemonic::Nop);
        assert_eq!(Mnemonic::from(0x10), Mnemonic::Bipush);
        assert_eq!(Mnemonic::from(0x60), Mnemonic::Iadd);
        assert_eq!(Mnemonic::from(0xB1), Mnemonic::Return);
        assert_eq!(Mnemonic::from(0xB6), Mnemonic::Invokevirtual);
        assert_eq!(Mnemonic::from(0xCB), Mnemonic::Unknown(0xCB));
    }
}
