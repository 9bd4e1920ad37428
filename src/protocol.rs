//! Game-report protocol codec.
//!
//! Snake clients report game lifecycle and playfield mutations as short
//! ASCII lines:
//!
//! ```text
//! G>BEG,VER:0.3,PID:100,PRT:9000,RWS:10,CLS:20,LEN:3,TIO:300,USR:Ann,HSH:abc123
//! G>MRK,ROW:4,COL:11,WAT:2
//! G>UNM,ROW:4,COL:11,WAT:2
//! G>END,SCR:42,SIG:-1,FAI:5,PID:100,PRT:9000,USR:Ann,HSH:abc123
//! ```
//!
//! A message is `G>`, a tag, and a comma-separated list of `KEY:VALUE`
//! pairs. Keys are three uppercase ASCII letters; values may be empty and
//! may contain anything except a comma. No line terminator is required in
//! transit. Unknown keys under a known tag are retained so newer clients
//! keep working against older servers.

use bytes::BytesMut;
use std::fmt;

/// Maximum wire size of a single message.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Fixed acknowledgement written to the client once per readiness cycle.
pub const ACK: &[u8] = b"200 OK\n";

/// Field keys of the fixed vocabulary.
pub mod key {
    /// Client protocol version (BEG).
    pub const VER: &str = "VER";
    /// Client process id (BEG, END).
    pub const PID: &str = "PID";
    /// Client-side TCP port (BEG, END).
    pub const PRT: &str = "PRT";
    /// Playfield rows (BEG).
    pub const RWS: &str = "RWS";
    /// Playfield columns (BEG).
    pub const CLS: &str = "CLS";
    /// Initial snake length (BEG).
    pub const LEN: &str = "LEN";
    /// Keyboard timeout (BEG).
    pub const TIO: &str = "TIO";
    /// Player name (all tags).
    pub const USR: &str = "USR";
    /// Per-game session hash (all tags).
    pub const HSH: &str = "HSH";
    /// Final score (END).
    pub const SCR: &str = "SCR";
    /// Terminating signal, -1 if none (END).
    pub const SIG: &str = "SIG";
    /// Failure code (END).
    pub const FAI: &str = "FAI";
    /// Playfield row (MRK, UNM).
    pub const ROW: &str = "ROW";
    /// Playfield column (MRK, UNM).
    pub const COL: &str = "COL";
    /// Object code occupying the cell (MRK, UNM).
    pub const WAT: &str = "WAT";
}

/// Lifecycle and mutation tags reported by game clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// A game started.
    Beg,
    /// A game ended.
    End,
    /// A playfield cell was marked.
    Mrk,
    /// A playfield cell was cleared.
    Unm,
}

impl Tag {
    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Beg => "BEG",
            Tag::End => "END",
            Tag::Mrk => "MRK",
            Tag::Unm => "UNM",
        }
    }

    fn from_wire(s: &str) -> Option<Tag> {
        match s {
            "BEG" => Some(Tag::Beg),
            "END" => Some(Tag::End),
            "MRK" => Some(Tag::Mrk),
            "UNM" => Some(Tag::Unm),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode failure.
///
/// Sessions log and discard these; a malformed report never tears down
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input is not ASCII text.
    NotAscii,
    /// The `G>` prefix is absent.
    MissingPrefix,
    /// The tag is not one of the known tags.
    UnknownTag(String),
    /// A `KEY:VALUE` segment has no colon.
    MissingColon(String),
    /// A key is not three uppercase ASCII letters.
    InvalidKey(String),
    /// The message carries a tag but no key-value pairs.
    MissingFields,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotAscii => write!(f, "message is not ASCII text"),
            DecodeError::MissingPrefix => write!(f, "missing G> prefix"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown tag '{tag}'"),
            DecodeError::MissingColon(seg) => write!(f, "segment '{seg}' has no colon"),
            DecodeError::InvalidKey(k) => write!(f, "key '{k}' is not three uppercase letters"),
            DecodeError::MissingFields => write!(f, "message has no key-value pairs"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Why a game ended, from the `FAI` field of an END report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    Success,
    HitTopBorder,
    HitLowerBorder,
    HitLeftBorder,
    HitRightBorder,
    HitSnake,
    HitBomb,
    /// A code this server does not know about.
    Other(i32),
}

impl FailReason {
    /// Map a wire code to a reason.
    pub fn from_code(code: i32) -> FailReason {
        match code {
            0 => FailReason::Success,
            1 => FailReason::HitTopBorder,
            2 => FailReason::HitLowerBorder,
            3 => FailReason::HitLeftBorder,
            4 => FailReason::HitRightBorder,
            5 => FailReason::HitSnake,
            6 => FailReason::HitBomb,
            other => FailReason::Other(other),
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Success => write!(f, "Success"),
            FailReason::HitTopBorder => write!(f, "Hit top border"),
            FailReason::HitLowerBorder => write!(f, "Hit lower border"),
            FailReason::HitLeftBorder => write!(f, "Hit left border"),
            FailReason::HitRightBorder => write!(f, "Hit right border"),
            FailReason::HitSnake => write!(f, "Hit a snake"),
            FailReason::HitBomb => write!(f, "Hit a bomb"),
            FailReason::Other(code) => write!(f, "Unknown failure code {code}"),
        }
    }
}

/// Correlation identity emitted on BEG and echoed on END.
///
/// Any single field may serve as a correlation key; all three are
/// surfaced so callers can pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Per-game hash computed by the client.
    pub hash: String,
    /// Client process id.
    pub pid: u32,
    /// Client-side TCP port.
    pub port: u16,
}

/// A decoded game report. Immutable after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    tag: Tag,
    fields: Vec<(String, String)>,
}

impl Message {
    /// Build a message from a tag and ordered key-value pairs.
    ///
    /// Keys are unique within a message; later duplicates are ignored.
    pub fn new(tag: Tag, fields: &[(&str, &str)]) -> Message {
        let mut msg = Message {
            tag,
            fields: Vec::with_capacity(fields.len()),
        };
        for &(key, value) in fields {
            if msg.get(key).is_none() {
                msg.fields.push((key.to_string(), value.to_string()));
            }
        }
        msg
    }

    /// The message tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Look up a field value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Fields in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to the exact wire form, with no trailing terminator.
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(64);
        out.extend_from_slice(b"G>");
        out.extend_from_slice(self.tag.as_str().as_bytes());
        for (key, value) in &self.fields {
            out.extend_from_slice(b",");
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b":");
            out.extend_from_slice(value.as_bytes());
        }
        out
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.trim().parse().ok()
    }

    /// Client protocol version (BEG).
    pub fn version(&self) -> Option<&str> {
        self.get(key::VER)
    }

    /// Client process id (BEG, END).
    pub fn pid(&self) -> Option<u32> {
        self.parsed(key::PID)
    }

    /// Client-side TCP port (BEG, END).
    pub fn client_port(&self) -> Option<u16> {
        self.parsed(key::PRT)
    }

    /// Playfield rows (BEG).
    pub fn rows(&self) -> Option<u32> {
        self.parsed(key::RWS)
    }

    /// Playfield columns (BEG).
    pub fn cols(&self) -> Option<u32> {
        self.parsed(key::CLS)
    }

    /// Initial snake length (BEG).
    pub fn initial_length(&self) -> Option<u32> {
        self.parsed(key::LEN)
    }

    /// Keyboard timeout (BEG).
    pub fn keyboard_timeout(&self) -> Option<i64> {
        self.parsed(key::TIO)
    }

    /// Player name.
    pub fn user(&self) -> Option<&str> {
        self.get(key::USR)
    }

    /// Per-game session hash.
    pub fn session_hash(&self) -> Option<&str> {
        self.get(key::HSH)
    }

    /// Final score (END). -1 when the game was interrupted.
    pub fn score(&self) -> Option<i64> {
        self.parsed(key::SCR)
    }

    /// Terminating signal (END). -1 when the game ended normally.
    pub fn signal(&self) -> Option<i32> {
        self.parsed(key::SIG)
    }

    /// Why the game ended (END).
    pub fn failure(&self) -> Option<FailReason> {
        self.parsed(key::FAI).map(FailReason::from_code)
    }

    /// Playfield row (MRK, UNM).
    pub fn row(&self) -> Option<u32> {
        self.parsed(key::ROW)
    }

    /// Playfield column (MRK, UNM).
    pub fn col(&self) -> Option<u32> {
        self.parsed(key::COL)
    }

    /// Object code occupying the cell (MRK, UNM).
    pub fn object(&self) -> Option<u32> {
        self.parsed(key::WAT)
    }

    /// The (HSH, PID, PRT) correlation triple, when all three are present.
    pub fn identity(&self) -> Option<SessionIdentity> {
        Some(SessionIdentity {
            hash: self.session_hash()?.to_string(),
            pid: self.pid()?,
            port: self.client_port()?,
        })
    }
}

/// Decode one message from a raw read buffer.
///
/// Trailing NUL, CR, and LF bytes are stripped first; clients are not
/// required to terminate messages.
pub fn decode(input: &[u8]) -> Result<Message, DecodeError> {
    let input = trim_terminators(input);
    let text = match std::str::from_utf8(input) {
        Ok(text) if text.is_ascii() => text,
        _ => return Err(DecodeError::NotAscii),
    };

    let rest = text.strip_prefix("G>").ok_or(DecodeError::MissingPrefix)?;

    let mut segments = rest.split(',');
    // split always yields at least one segment
    let tag_str = segments.next().unwrap_or("");
    let tag =
        Tag::from_wire(tag_str).ok_or_else(|| DecodeError::UnknownTag(tag_str.to_string()))?;

    let mut fields: Vec<(String, String)> = Vec::new();
    for segment in segments {
        let (key, value) = segment
            .split_once(':')
            .ok_or_else(|| DecodeError::MissingColon(segment.to_string()))?;
        if !is_valid_key(key) {
            return Err(DecodeError::InvalidKey(key.to_string()));
        }
        if fields.iter().all(|(k, _)| k != key) {
            fields.push((key.to_string(), value.to_string()));
        }
    }

    if fields.is_empty() {
        return Err(DecodeError::MissingFields);
    }

    Ok(Message { tag, fields })
}

fn is_valid_key(key: &str) -> bool {
    key.len() == 3 && key.bytes().all(|b| b.is_ascii_uppercase())
}

fn trim_terminators(mut input: &[u8]) -> &[u8] {
    while let [rest @ .., b'\0' | b'\r' | b'\n'] = input {
        input = rest;
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_beg_report() {
        let msg = decode(
            b"G>BEG,VER:0.3,PID:100,PRT:9000,RWS:10,CLS:20,LEN:3,TIO:300,USR:Ann,HSH:abc123",
        )
        .unwrap();

        assert_eq!(msg.tag(), Tag::Beg);
        assert_eq!(msg.version(), Some("0.3"));
        assert_eq!(msg.pid(), Some(100));
        assert_eq!(msg.client_port(), Some(9000));
        assert_eq!(msg.rows(), Some(10));
        assert_eq!(msg.cols(), Some(20));
        assert_eq!(msg.initial_length(), Some(3));
        assert_eq!(msg.keyboard_timeout(), Some(300));
        assert_eq!(msg.user(), Some("Ann"));
        assert_eq!(msg.session_hash(), Some("abc123"));
    }

    #[test]
    fn test_decode_end_report() {
        let msg =
            decode(b"G>END,SCR:42,SIG:-1,FAI:5,PID:100,PRT:9000,USR:Ann,HSH:abc123").unwrap();

        assert_eq!(msg.tag(), Tag::End);
        assert_eq!(msg.score(), Some(42));
        assert_eq!(msg.signal(), Some(-1));
        assert_eq!(msg.failure(), Some(FailReason::HitSnake));

        let identity = msg.identity().unwrap();
        assert_eq!(identity.hash, "abc123");
        assert_eq!(identity.pid, 100);
        assert_eq!(identity.port, 9000);
    }

    #[test]
    fn test_decode_mark_report() {
        let msg = decode(b"G>MRK,ROW:4,COL:11,WAT:2").unwrap();
        assert_eq!(msg.tag(), Tag::Mrk);
        assert_eq!(msg.row(), Some(4));
        assert_eq!(msg.col(), Some(11));
        assert_eq!(msg.object(), Some(2));
    }

    #[test]
    fn test_round_trip_all_tags() {
        let cases = [
            Message::new(
                Tag::Beg,
                &[
                    (key::VER, "0.3"),
                    (key::PID, "4242"),
                    (key::PRT, "51000"),
                    (key::RWS, "10"),
                    (key::CLS, "20"),
                    (key::LEN, "3"),
                    (key::TIO, "300"),
                    (key::USR, "player one"),
                    (key::HSH, "deadbeef01"),
                ],
            ),
            Message::new(
                Tag::End,
                &[
                    (key::SCR, "17"),
                    (key::SIG, "-1"),
                    (key::FAI, "6"),
                    (key::PID, "4242"),
                    (key::PRT, "51000"),
                    (key::USR, "player one"),
                    (key::HSH, "deadbeef01"),
                ],
            ),
            Message::new(Tag::Mrk, &[(key::ROW, "0"), (key::COL, "7"), (key::WAT, "4")]),
            Message::new(Tag::Unm, &[(key::ROW, "9"), (key::COL, "19"), (key::WAT, "1")]),
        ];

        for msg in cases {
            let decoded = decode(&msg.encode()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_encode_exact_bytes() {
        let msg = Message::new(Tag::Mrk, &[(key::ROW, "4"), (key::COL, "11"), (key::WAT, "2")]);
        assert_eq!(&msg.encode()[..], b"G>MRK,ROW:4,COL:11,WAT:2");
    }

    #[test]
    fn test_missing_prefix() {
        assert_eq!(decode(b"BEG,USR:Ann"), Err(DecodeError::MissingPrefix));
        assert_eq!(decode(b""), Err(DecodeError::MissingPrefix));
        assert_eq!(decode(b"GET / HTTP/1.1"), Err(DecodeError::MissingPrefix));
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            decode(b"G>XXX,USR:Ann"),
            Err(DecodeError::UnknownTag("XXX".to_string()))
        );
        assert_eq!(decode(b"G>"), Err(DecodeError::UnknownTag(String::new())));
    }

    #[test]
    fn test_missing_colon() {
        assert_eq!(
            decode(b"G>MRK,ROW:1,COL2"),
            Err(DecodeError::MissingColon("COL2".to_string()))
        );
    }

    #[test]
    fn test_invalid_key() {
        assert_eq!(
            decode(b"G>MRK,row:1"),
            Err(DecodeError::InvalidKey("row".to_string()))
        );
        assert_eq!(
            decode(b"G>MRK,ROWS:1"),
            Err(DecodeError::InvalidKey("ROWS".to_string()))
        );
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(decode(b"G>BEG"), Err(DecodeError::MissingFields));
    }

    #[test]
    fn test_not_ascii() {
        assert_eq!(decode(b"G>MRK,ROW:\xff"), Err(DecodeError::NotAscii));
    }

    #[test]
    fn test_unknown_key_retained() {
        let msg = decode(b"G>MRK,ROW:1,COL:2,WAT:4,XTR:9").unwrap();
        assert_eq!(msg.get("XTR"), Some("9"));
        assert_eq!(msg.row(), Some(1));
    }

    #[test]
    fn test_duplicate_key_first_wins() {
        let msg = decode(b"G>MRK,ROW:1,ROW:5,COL:2,WAT:0").unwrap();
        assert_eq!(msg.row(), Some(1));
        assert_eq!(msg.fields().filter(|(k, _)| *k == "ROW").count(), 1);
    }

    #[test]
    fn test_trailing_terminators_stripped() {
        let msg = decode(b"G>MRK,ROW:1,COL:2,WAT:4\r\n\0\0").unwrap();
        assert_eq!(msg.object(), Some(4));
    }

    #[test]
    fn test_empty_value() {
        let msg = decode(b"G>END,SCR:,HSH:").unwrap();
        assert_eq!(msg.get(key::SCR), Some(""));
        assert_eq!(msg.score(), None);
    }

    #[test]
    fn test_identity_requires_all_fields() {
        let msg = decode(b"G>END,SCR:3,HSH:abc").unwrap();
        assert!(msg.identity().is_none());
    }

    #[test]
    fn test_fail_reason_text() {
        assert_eq!(FailReason::from_code(0), FailReason::Success);
        assert_eq!(FailReason::from_code(6).to_string(), "Hit a bomb");
        assert_eq!(
            FailReason::from_code(99).to_string(),
            "Unknown failure code 99"
        );
    }
}
