pub mod median_mad;
pub mod whittaker;

pub use median_mad::{median, median_mad, median_mad_scaled, MAD_SCALE_FACTOR};
pub use whittaker::{second_difference_penalty, solve_penalized, Pentadiagonal};
