pub mod mnemonics;

pub use mnemonics::Mnemonic;
