use std::time::Duration;

use crate::error::ClientError;

/// Port Mumble servers listen on by default.
pub const DEFAULT_PORT: u16 = 64738;

pub const DEFAULT_USER_VOICE_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_DATA_PING_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_IN_FLIGHT_PINGS: u32 = 2;

/// 10 ms of audio at the protocol sample rate, the smallest packet size.
pub const DEFAULT_SAMPLES_PER_PACKET: u32 = 480;

#[derive(Clone, Debug)]
pub struct MumbleConfig {
    /// Identity sent in `Authenticate`.
    pub username: String,
    /// Optional server password.
    pub password: Option<String>,
    /// Access tokens for server ACL groups.
    pub tokens: Vec<String>,
    /// Release string sent in `Version`.
    pub client_software: String,
    /// OS name sent in `Version`.
    pub os_name: String,
    /// OS version sent in `Version`.
    pub os_version: String,
    /// Preferred outgoing audio bitrate in bits/s. When unset, the highest
    /// bitrate the server bandwidth cap allows is used.
    pub bitrate: Option<u32>,
    /// Samples per outgoing voice packet.
    pub samples_per_packet: u32,
    /// Idle timeout ending a user's voice transmission.
    pub user_voice_timeout: Duration,
    /// Period of the data-channel keep-alive ping.
    pub data_ping_interval: Duration,
    /// Unanswered data pings tolerated before the connection is declared dead.
    pub max_in_flight_data_pings: u32,
}

impl MumbleConfig {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            tokens: Vec::new(),
            client_software: default_client_software(),
            os_name: host_os_name(),
            os_version: host_os_version(),
            bitrate: None,
            samples_per_packet: DEFAULT_SAMPLES_PER_PACKET,
            user_voice_timeout: DEFAULT_USER_VOICE_TIMEOUT,
            data_ping_interval: DEFAULT_DATA_PING_INTERVAL,
            max_in_flight_data_pings: DEFAULT_MAX_IN_FLIGHT_PINGS,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.username.trim().is_empty() {
            return Err(ClientError::Config("username is required".to_string()));
        }
        if self.samples_per_packet == 0 {
            return Err(ClientError::Config(
                "samples per packet must be greater than 0".to_string(),
            ));
        }
        if self.max_in_flight_data_pings == 0 {
            return Err(ClientError::Config(
                "max in-flight pings must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_client_software() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Name of the host operating system.
pub fn host_os_name() -> String {
    std::env::consts::OS.to_string()
}

/// Version of the host operating system. The standard library exposes no
/// release string, so this stays empty unless the embedder overrides it.
pub fn host_os_version() -> String {
    String::new()
}

#[cfg(test)]
mod tests {
    use super::MumbleConfig;
    use crate::error::ClientError;

    /// `new` populates required fields and leaves optional values empty.
    #[test]
    fn new_sets_defaults() {
        // Arrange
        // Act
        let config = MumbleConfig::new("alice");
        // Assert
        assert_eq!(config.username, "alice");
        assert!(config.password.is_none());
        assert!(config.tokens.is_empty());
        assert!(config.bitrate.is_none());
        assert_eq!(config.samples_per_packet, 480);
        assert_eq!(config.user_voice_timeout.as_millis(), 200);
        assert_eq!(config.data_ping_interval.as_millis(), 5000);
        assert_eq!(config.max_in_flight_data_pings, 2);
        assert!(!config.client_software.is_empty());
    }

    /// Validation rejects blank usernames.
    #[test]
    fn validate_rejects_blank_username() {
        // Arrange
        let config = MumbleConfig::new("  ");
        // Act
        let err = config.validate().expect_err("expected validation to fail");
        // Assert
        assert!(matches!(err, ClientError::Config(_)));
    }

    /// Validation rejects a zero packet size.
    #[test]
    fn validate_rejects_zero_samples_per_packet() {
        // Arrange
        let mut config = MumbleConfig::new("alice");
        config.samples_per_packet = 0;
        // Act
        let err = config.validate().expect_err("expected validation to fail");
        // Assert
        assert!(matches!(err, ClientError::Config(_)));
    }
}
