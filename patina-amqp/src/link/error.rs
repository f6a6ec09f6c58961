use patina_amqp_types::definitions;

/// Error attaching a link
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttachError {
    #[error("Illegal session state")]
    IllegalSessionState,

    #[error("Handle max reached")]
    HandleMaxReached,

    #[error("Link name must be unique")]
    DuplicatedLinkName,

    /// The peer answered with a null terminus and detached the link
    #[error("Attach refused by the peer {0:?}")]
    Refused(Option<definitions::Error>),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Error detaching a link
#[derive(Debug, Clone, thiserror::Error)]
pub enum DetachError {
    /// The peer detached with an error
    #[error("Remote detached with error {0}")]
    Remote(definitions::Error),

    #[error("Illegal link state")]
    IllegalState,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Error sending a message or waiting for its outcome
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// The link was detached before the message went out or before it was settled
    #[error("Link detached {0:?}")]
    LinkDetached(Option<definitions::Error>),

    #[error("Connection closed")]
    ConnectionClosed,

    /// The encoded message does not fit into a single frame
    #[error("Message of {size} bytes exceeds the limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Illegal link state")]
    IllegalState,

    #[error("Cannot encode message: {0}")]
    Encode(#[from] patina_amqp_types::Error),
}

/// Error receiving a message
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecvError {
    #[error("Link detached {0:?}")]
    LinkDetached(Option<definitions::Error>),

    #[error("Connection closed")]
    ConnectionClosed,
}
