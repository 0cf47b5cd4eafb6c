pub mod lower;
pub mod vcode;

pub use lower::Lower;
pub use vcode::{DisplayVCode, Inst, Label, VCode, VCodeInst};
