/// Command issued by the remote controller
///
/// Serialized the way the controller emits it:
///
/// ```json
/// {"tag": "initiate_bluetooth_connection", "data": {"serial": 12345, "message": [1, 2]}}
/// {"tag": "send_bluetooth_message", "data": [1, 2, 3]}
/// {"tag": "close_bluetooth_connection"}
/// ```
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "tag", content = "data")]
pub enum Command {
    /// Discover and bind the lock with `serial`, then send `message`
    #[serde(rename = "initiate_bluetooth_connection")]
    OpenChannel {
        serial: u64,
        #[serde(default)]
        message: Vec<u8>,
    },
    /// Write a payload on the open channel
    #[serde(rename = "send_bluetooth_message")]
    SendPayload(Vec<u8>),
    /// Tear the channel down
    #[serde(rename = "close_bluetooth_connection")]
    CloseChannel,
}

impl Command {
    pub fn tag(&self) -> &'static str {
        match self {
            Command::OpenChannel { .. } => "initiate_bluetooth_connection",
            Command::SendPayload(_) => "send_bluetooth_message",
            Command::CloseChannel => "close_bluetooth_connection",
        }
    }
}

/// Body posted to the controller for every frame received from the lock
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub serial: u32,
    pub message: Vec<u8>,
}

/// Body posted to the controller once an endpoint has authenticated
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    #[serde(rename = "endpointId")]
    pub endpoint_id: String,
}
