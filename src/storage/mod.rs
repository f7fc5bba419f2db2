pub mod layout;
pub mod snapshot;
pub mod swap_file;
