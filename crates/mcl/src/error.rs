use mcl_hw::CmdDecodeError;
use thiserror::Error;

use crate::variable::VariableKind;

pub type Result<T> = std::result::Result<T, MclError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MclError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The value passed to a variable does not match the variable's kind.
    #[error("value does not fit a {kind:?} variable")]
    UnsupportedKind { kind: VariableKind },

    #[error("command stream: {0}")]
    Command(#[from] CmdDecodeError),
}
