use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 19198;
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Integer pixel coordinate. Also used as a canvas size descriptor.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// True if either component of `self` is strictly greater than the
    /// matching component of `other`.
    pub fn exceeds(&self, other: &Point) -> bool {
        self.x > other.x || self.y > other.y
    }

    pub fn is_negative(&self) -> bool {
        self.x < 0 || self.y < 0
    }
}

/// Straight (non-premultiplied) RGBA color. Drawing overwrites, never blends.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(channels: [u8; 4]) -> Self {
        Self::new(channels[0], channels[1], channels[2], channels[3])
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Draw {
        token: String,
        zone: u32,
        point: Point,
        color: Color,
    },
    CreateZone {
        token: String,
        width: i32,
        height: i32,
        freeze: u64,
    },
    IssueToken {
        token: String,
        zone: u32,
    },
    RevokeToken {
        token: String,
        zone: u32,
        target: String,
    },
    Info,
    Stop {
        token: String,
    },

    ZoneCreated {
        zone: u32,
        privileged_token: String,
    },
    TokenIssued {
        zone: u32,
        token: String,
    },
    TokenRevoked {
        zone: u32,
    },
    ServerInfo {
        tick: u64,
        zones: u32,
    },
    Stopping,
    Rejected {
        reason: String,
    },
}

impl Packet {
    /// Encodes the packet into a single datagram payload.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
