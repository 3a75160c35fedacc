pub const DEFAULT_MAX_CONNECTIONS_PER_USER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    pub max_connections_per_user: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: DEFAULT_MAX_CONNECTIONS_PER_USER,
        }
    }
}
