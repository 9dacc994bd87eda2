pub mod serve;
pub mod single;
