//! Endpoint states defined in AMQP 1.0 specification Part 2.4 and 2.5

/// Connection states.
///
/// Pipelined open and the OC_PIPE / OPEN_PIPE states are not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// In this state a connection exists, but nothing has been sent or received
    Start,

    /// The protocol header has been sent, but not yet received
    HeaderSent,

    /// Both sides have sent and received the protocol header
    HeaderExchange,

    /// Open has been sent, but not yet received
    OpenSent,

    /// Open has been sent and received
    Opened,

    /// Close has been received, but not yet sent
    CloseReceived,

    /// Close has been sent, but not yet received
    CloseSent,

    /// The connection is closed and the socket is no longer used
    Closed,
}

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not attached to a channel
    Unmapped,

    /// Begin has been sent, but not yet received
    BeginSent,

    /// Begin has been sent and received
    Mapped,

    /// End has been sent, but not yet received
    EndSent,

    /// End has been received but not yet sent
    EndReceived,

    /// End has been sent and received
    Ended,
}
