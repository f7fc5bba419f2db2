pub mod value_cache;
pub mod table_cache;
