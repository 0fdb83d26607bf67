use serde::{Deserialize, Serialize};

use crate::codec::Frame;
use crate::constants::{JID_LEN, MAX_JID_FRAME, SEGMENT_LEN};

/// Chat identity: a 53-char peer segment (transport-routable) followed by a
/// 53-char mailbox segment (the node holding this identity's offline store).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

/// Group identity. Sliced exactly like a [`Jid`]: the peer segment comes
/// from a throwaway key pair, the mailbox segment names the group's home.
pub type Gid = Jid;

impl Jid {
    /// Join a peer segment with an optional mailbox segment.
    pub fn new(id: &str, mailbox: &str) -> Self {
        Self(format!("{id}{mailbox}"))
    }

    /// First segment, empty when the JID is shorter than one segment.
    pub fn peer_id(&self) -> &str {
        self.0.get(..SEGMENT_LEN).unwrap_or("")
    }

    /// Second segment, empty when the JID is shorter than two segments.
    pub fn mail_id(&self) -> &str {
        self.0.get(SEGMENT_LEN..JID_LEN).unwrap_or("")
    }

    /// Whether both segments are present.
    pub fn is_routable(&self) -> bool {
        self.0.len() == JID_LEN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<String> for Jid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Jid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Frame for Jid {
    const MAX_FRAME: usize = MAX_JID_FRAME;
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: &str = "16Uiu2HAkzRux7XYhYfmTDY2C7xuBapitNp25DvKvpvVnCf9bRne7";
    const MAIL: &str = "16Uiu2HAmPLe7Mzm8TsYUubgCAW1aJoeFScxrLj8ppHFivPo97bUZ";

    #[test]
    fn test_segments_of_full_jid() {
        let jid = Jid::new(PEER, MAIL);
        assert_eq!(jid.as_str().len(), JID_LEN);
        assert!(jid.is_routable());
        assert_eq!(jid.peer_id(), PEER);
        assert_eq!(jid.mail_id(), MAIL);
    }

    #[test]
    fn test_short_jid_yields_empty_segments() {
        let peer_only = Jid::new(PEER, "");
        assert_eq!(peer_only.peer_id(), PEER);
        assert_eq!(peer_only.mail_id(), "");
        assert!(!peer_only.is_routable());

        let tiny = Jid::from("abc");
        assert_eq!(tiny.peer_id(), "");
        assert_eq!(tiny.mail_id(), "");
    }

    #[test]
    fn test_jid_frame_fits_query_cap() {
        let jid = Jid::new(PEER, MAIL);
        let frame = jid.to_frame().unwrap();
        assert_eq!(Jid::from_frame(&frame).unwrap(), jid);
    }
}
