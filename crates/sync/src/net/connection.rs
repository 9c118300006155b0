use super::NetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Undefined,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Unordered, unreliable datagram transport.
pub trait Connection {
    fn status(&self) -> ConnectionStatus;

    fn close(&mut self);

    fn send(&mut self, datagram: &[u8]) -> Result<(), NetError>;

    /// Next available datagram, or `None` when nothing is pending.
    fn receive(&mut self) -> Result<Option<Vec<u8>>, NetError>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn status(&self) -> ConnectionStatus {
        (**self).status()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), NetError> {
        (**self).send(datagram)
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        (**self).receive()
    }
}
