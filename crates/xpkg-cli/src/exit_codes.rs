//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Invalid package - the package stream failed to parse or validate
pub const INVALID_PACKAGE: i32 = 2;

/// Configuration error - invalid flags, environment or config file
pub const CONFIG_ERROR: i32 = 3;

/// Cluster error - the API server could not be reached or refused a request
pub const CLUSTER_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
