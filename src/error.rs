//! Error types and handling for Helios
//!
//! This module defines the error types used throughout the application.
//! Measurement and actuator failures are recoverable and stay local to one
//! control cycle; configuration-class errors are not.

use thiserror::Error;

/// Result type alias for Helios operations
pub type Result<T> = std::result::Result<T, HeliosError>;

/// Main error type for Helios
#[derive(Debug, Error)]
pub enum HeliosError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Transport-level failure talking to the measurement device
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Malformed or short register response
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Register requested outside of the bulk-read window
    #[error("Register {register} is outside of the read window starting at {first}")]
    OutOfRange { register: u16, first: u16 },

    /// Device control call failed
    #[error("Actuator '{device}' unavailable: {message}")]
    ActuatorUnavailable { device: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl HeliosError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HeliosError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HeliosError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new communication error
    pub fn communication<S: Into<String>>(message: S) -> Self {
        HeliosError::Communication {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HeliosError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        HeliosError::Decode {
            message: message.into(),
        }
    }

    /// Create a new out-of-range error
    pub fn out_of_range(register: u16, first: u16) -> Self {
        HeliosError::OutOfRange { register, first }
    }

    /// Create a new actuator error
    pub fn actuator<D: Into<String>, S: Into<String>>(device: D, message: S) -> Self {
        HeliosError::ActuatorUnavailable {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HeliosError::Io {
            message: message.into(),
        }
    }

    /// Whether the failure is local to one cycle and may be retried on the next one.
    ///
    /// Configuration-class errors (including a register outside of its read
    /// window) indicate a bug in the deployment and never heal by themselves.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            HeliosError::Config { .. }
                | HeliosError::Validation { .. }
                | HeliosError::OutOfRange { .. }
        )
    }

    /// Whether the error was raised by the transport rather than by decoding
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HeliosError::Communication { .. } | HeliosError::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for HeliosError {
    fn from(err: std::io::Error) -> Self {
        HeliosError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HeliosError {
    fn from(err: serde_yaml::Error) -> Self {
        HeliosError::Serialization {
            message: err.to_string(),
        }
    }
}
