#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("too many connections for user")]
    TooManyConnections,
    #[error("connection is not registered")]
    SubscriberNotFound,
}
