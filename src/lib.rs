pub mod debug_log;
pub mod stream;
pub mod tty;
