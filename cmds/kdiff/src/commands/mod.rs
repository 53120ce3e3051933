pub mod diff;

pub mod util;
