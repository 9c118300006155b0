#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeserializeError {
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("variable-length integer overflows 64 bits")]
    VarIntOverflow,
    #[error("value does not fit in {0}")]
    IntegerOverflow(&'static str),
    #[error("length {length} exceeds the {remaining} bytes remaining")]
    LengthTooLarge { length: usize, remaining: usize },
    #[error("invalid utf-8 in string")]
    InvalidUtf8,
    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },
    #[error("invalid {what} flags {bits:#x}")]
    InvalidFlags { what: &'static str, bits: u32 },
    #[error("string index {0} is not in the serialization dictionary")]
    UnknownDictionaryIndex(usize),
    #[error("dictionary-encoded string but no dictionary attached")]
    MissingDictionary,
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}
