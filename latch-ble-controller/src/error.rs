use latch_proto::RangeError;

/// Failure reported by the platform BLE stack
#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("link unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    Serial(#[from] RangeError),
    /// Discovery ended without a matching device being selected
    #[error("device selection cancelled")]
    DeviceSelectionCancelled,
    /// A device was selected but it does not expose the lock service
    #[error("incorrect device selected")]
    IncorrectDeviceSelected,
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    /// Rebinding after a drop found the lock service missing
    #[error("incorrect device selected")]
    IncorrectDeviceSelected,
    #[error(transparent)]
    Link(#[from] LinkError),
}
