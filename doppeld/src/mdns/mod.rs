pub mod advertise;
pub mod browser;
