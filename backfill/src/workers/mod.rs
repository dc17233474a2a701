pub mod policy;
pub mod pool;
pub mod table;
