pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "cell size: 5 degrees, grid resolution: 0.25 degrees"
);
