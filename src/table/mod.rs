pub mod fragment;
pub mod metadata;
pub mod table;
