pub mod completion;
pub mod jma;
