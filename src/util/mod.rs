pub mod buf;
pub mod random;
