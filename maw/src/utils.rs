pub mod fs;
pub mod is_elevated;
pub mod target_user;
pub mod threads;
