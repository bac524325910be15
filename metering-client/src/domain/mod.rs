pub mod installation;
pub mod sample;

pub use installation::{Address, Installation, Meter, MeterType};
pub use sample::{InstallationSample, MeterReading};
