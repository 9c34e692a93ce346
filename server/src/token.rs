//! Capability tokens
//!
//! Tokens are opaque strings derived from cryptographically random bytes run
//! through SHA-256, with the last digest byte dropped before hex encoding.
//! The master token is process-wide; each zone additionally gets a privileged
//! token that administers it.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

const TOKEN_ENTROPY_BYTES: usize = 128;

/// Length in characters of every randomly generated token.
pub const TOKEN_LENGTH: usize = 62;

const DEBUG_MASTER_TOKEN: &str = "M";
const DEBUG_PRIVILEGED_TOKEN: &str = "A";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Draws fresh random bytes and hashes them into a new token.
    pub fn generate() -> Self {
        let mut entropy = [0u8; TOKEN_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut entropy);

        let digest = Sha256::digest(entropy);
        Self(hex::encode(&digest[..digest.len() - 1]))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Issues tokens and checks master authority.
///
/// Debug mode substitutes the well-known tokens `M` (master) and `A`
/// (every zone's privileged token) so a local session can be scripted.
/// It must be requested explicitly and is never the default.
#[derive(Debug)]
pub struct TokenAuthority {
    master: Token,
    debug: bool,
}

impl TokenAuthority {
    pub fn new(debug: bool) -> Self {
        let master = if debug {
            Token::new(DEBUG_MASTER_TOKEN)
        } else {
            Token::generate()
        };

        Self { master, debug }
    }

    pub fn with_master(master: Token) -> Self {
        Self {
            master,
            debug: false,
        }
    }

    pub fn master(&self) -> &Token {
        &self.master
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn master_auth(&self, candidate: &str) -> bool {
        candidate
            .as_bytes()
            .ct_eq(self.master.as_str().as_bytes())
            .into()
    }

    /// Token handed to a zone's creator.
    pub fn privileged_token(&self) -> Token {
        if self.debug {
            Token::new(DEBUG_PRIVILEGED_TOKEN)
        } else {
            Token::generate()
        }
    }

    /// Token handed to a regular painter.
    pub fn user_token(&self) -> Token {
        Token::generate()
    }
}
