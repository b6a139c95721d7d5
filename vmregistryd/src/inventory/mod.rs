pub mod assembler;
pub mod enumerator;
pub mod resolver;
pub mod snapshot;
