//! Client identity and the server welcome

use serde::Serialize;

/// Marker that opens every server-issued `message`
pub const SERVER_MARKER: &str = "SERVER:";

/// Token identifying the welcome among server messages
pub const WELCOME_TOKEN: &str = "Welcome";

/// Who this client is on the voice network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientIdentity {
    pub cid: i32,
    pub callsign: String,
    #[serde(skip)]
    pub token: String,
    /// Main frequency assigned by the server, 0 if none
    pub main_frequency: u32,
    pub is_controller: bool,
}

impl ClientIdentity {
    pub fn new(cid: i32, token: impl Into<String>) -> Self {
        Self {
            cid,
            token: token.into(),
            ..Self::default()
        }
    }

    /// Forget per-connection data; cid and token survive
    pub fn clear(&mut self) {
        self.callsign.clear();
        self.main_frequency = 0;
        self.is_controller = false;
    }

    pub fn is_valid(&self) -> bool {
        self.cid != 0 && !self.callsign.is_empty()
    }

    pub fn apply_welcome(&mut self, welcome: &Welcome) {
        self.callsign = welcome.callsign.clone();
        if let Some(frequency) = welcome.main_frequency {
            self.main_frequency = frequency;
            self.is_controller = true;
        }
    }
}

/// Identity confirmed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    pub callsign: String,
    /// Present for controller logins
    pub main_frequency: Option<u32>,
}

/// Parse `SERVER:<callsign>:...Welcome...[:<main frequency>]`
///
/// Four colon-separated fields carry a main frequency in the last one.
pub fn parse_welcome(data: &str) -> Option<Welcome> {
    if !data.starts_with(SERVER_MARKER) || !data.contains(WELCOME_TOKEN) {
        return None;
    }

    let fields: Vec<&str> = data.split(':').collect();
    let callsign = fields.get(1)?.trim().to_string();

    let main_frequency = if fields.len() == 4 {
        match fields[3].trim().parse() {
            Ok(frequency) => Some(frequency),
            Err(_) => {
                tracing::warn!("Welcome carries unparsable main frequency {:?}", fields[3]);
                None
            }
        }
    } else {
        None
    };

    Some(Welcome {
        callsign,
        main_frequency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pilot_welcome() {
        let welcome = parse_welcome("SERVER:CES2352:Welcome").unwrap();
        assert_eq!(welcome.callsign, "CES2352");
        assert_eq!(welcome.main_frequency, None);
    }

    #[test]
    fn test_controller_welcome() {
        let welcome = parse_welcome("SERVER:ZSSS_APP:Welcome:119700").unwrap();
        assert_eq!(welcome.callsign, "ZSSS_APP");
        assert_eq!(welcome.main_frequency, Some(119700));

        let mut identity = ClientIdentity::new(1001, "token");
        identity.apply_welcome(&welcome);
        assert!(identity.is_controller);
        assert_eq!(identity.main_frequency, 119700);
        assert!(identity.is_valid());
    }

    #[test]
    fn test_non_welcome_messages() {
        assert!(parse_welcome("SERVER:maintenance at 2200z").is_none());
        assert!(parse_welcome("CES123:Welcome").is_none());
        assert!(parse_welcome("SERVER:Welcome").is_some());
    }

    #[test]
    fn test_clear_keeps_credentials() {
        let mut identity = ClientIdentity::new(1001, "token");
        identity.apply_welcome(&parse_welcome("SERVER:ZSSS_APP:Welcome:119700").unwrap());
        identity.clear();

        assert_eq!(identity.cid, 1001);
        assert_eq!(identity.token, "token");
        assert!(identity.callsign.is_empty());
        assert!(!identity.is_controller);
        assert!(!identity.is_valid());
    }
}
