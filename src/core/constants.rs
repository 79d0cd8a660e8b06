//! Calibration constants and solver parameters

/// Measured Bluetooth LE signal strength at one meter (dBm)
pub const BLUETOOTH_RSSI_AT_ONE_METER: f64 = -47.69767441860465;

/// Measured Wi-Fi signal strength at one meter (dBm)
pub const WIFI_RSSI_AT_ONE_METER: f64 = -34.40682414698163;

/// Default path-loss exponent, also absorbs calibration error
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 4.0;

/// Minimum number of distinct sniffers for a position fix
pub const MIN_SNIFFERS: usize = 3;

/// Relative singular value threshold below which the linear system is rank deficient
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-9;

/// Default coarse time unit used as a correlation token (seconds)
pub const DEFAULT_TOKEN_QUANTUM_SECS: f64 = 1.0;

/// Default wall-clock limit for an external decoder process (milliseconds)
pub const DEFAULT_DECODER_TIMEOUT_MS: u64 = 60_000;
