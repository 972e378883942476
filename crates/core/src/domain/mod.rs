pub mod call;
pub mod records;
