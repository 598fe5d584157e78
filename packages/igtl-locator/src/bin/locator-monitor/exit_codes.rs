pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const UNREACHABLE: i32 = 2;
pub const CONFIG_ERROR: i32 = 3;
/// The server dropped the connection before the monitor was stopped
pub const CONNECTION_LOST: i32 = 4;
