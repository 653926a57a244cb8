pub mod capture;
pub mod check;
pub mod devices;
pub mod watch;
