//! Room Code Generation and Parsing
//!
//! Human-friendly codes used as the room key in the shared store.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;

/// Characters used in room codes (unambiguous, uppercase)
/// Excludes: 0/O, 1/I/L, 5/S, 2/Z to avoid confusion
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// Room code length (8 chars = ~282 trillion combinations with 27-char alphabet)
const CODE_LENGTH: usize = 8;

/// Length of generated client ids
const CLIENT_ID_LENGTH: usize = 12;

/// A room code that can be shared to join a room
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random room code
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();

        let mut code = String::with_capacity(CODE_LENGTH);
        for _ in 0..CODE_LENGTH {
            let idx = rng.gen_range(0..ALPHABET.len());
            code.push(ALPHABET[idx] as char);
        }
        RoomCode(code)
    }

    /// Get the room code as a string (the store key)
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a room code from user input
    ///
    /// Normalizes to uppercase and validates format.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != CODE_LENGTH {
            return None;
        }

        if normalized.bytes().all(|b| ALPHABET.contains(&b)) {
            Some(RoomCode(normalized))
        } else {
            None
        }
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // XXXX-XXXX for readability
        if self.0.len() == CODE_LENGTH {
            write!(f, "{}-{}", &self.0[..4], &self.0[4..])
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Generate an id for one client session.
///
/// Ids are fresh per session so a restarted client never mistakes an old
/// write of its own for an echo.
pub fn new_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_LENGTH)
        .map(char::from)
        .collect()
}
