pub mod classes;
pub mod core;
pub mod picker;
pub mod students;
