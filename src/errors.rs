use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    #[error("Syntax Error: {0}")]
    PestError(#[from] Box<pest::error::Error<crate::parser::Rule>>),

    #[error("did not completely evaluate expression")]
    NotReducible,

    #[error("invalid type for {expected}")]
    InvalidType { expected: &'static str },

    #[error("{what} must fit in {bits} bits")]
    OperandOutOfRange { what: &'static str, bits: u32 },

    #[error("invalid combination of load operations: zero/sign-extension for store")]
    InvalidCombination,

    #[error("invalid use of jmp: {reason}")]
    InvalidJump { reason: &'static str },

    #[error("invalid use of mov: {reason}")]
    InvalidMov { reason: &'static str },

    #[error("invalid address: greater than 32bits")]
    AddressTooLarge,

    #[error("overlapping sections: (0x{lower_base:08x} + 0x{lower_len:x} > 0x{upper_base:08x})")]
    OverlappingSections {
        lower_base: u32,
        lower_len: usize,
        upper_base: u32,
    },

    #[error("division by zero in constant expression")]
    DivisionByZero,

    #[error("duplicate label definition: {name}")]
    DuplicateLabel { name: String },

    // Internal invariant breach; propagates through phase boundaries instead
    // of being reported and latched.
    #[error("invalid expression: {0}")]
    InvalidExpression(&'static str),
}
