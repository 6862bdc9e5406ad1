use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

bitflags::bitflags! {
    /// Access mode bitmask, the "JRWPASDO" capability set from the wire
    /// protocol. Two modes combine with `&` to produce the effective mode
    /// a subscription actually operates under.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessMode: u16 {
        /// Permission to subscribe to the topic.
        const JOIN     = 0b0000_0001;
        /// Permission to receive `data` and read message history.
        const READ     = 0b0000_0010;
        /// Permission to `pub` new messages.
        const WRITE    = 0b0000_0100;
        /// Permission to receive presence/typing/receipt notifications.
        const PRESENCE = 0b0000_1000;
        /// Permission to approve or reject other users' subscription requests.
        const APPROVE  = 0b0001_0000;
        /// Permission to invite other users to the topic.
        const SHARE    = 0b0010_0000;
        /// Permission to hard-delete messages.
        const DELETE   = 0b0100_0000;
        /// Marks the subscriber as the topic owner; implies every other bit.
        const OWNER    = 0b1000_0000;
    }
}

impl AccessMode {
    /// The conventional default for a freshly created group topic owner.
    pub const OWNER_DEFAULT: AccessMode = AccessMode::JOIN
        .union(AccessMode::READ)
        .union(AccessMode::WRITE)
        .union(AccessMode::PRESENCE)
        .union(AccessMode::APPROVE)
        .union(AccessMode::SHARE)
        .union(AccessMode::DELETE)
        .union(AccessMode::OWNER);

    /// The conventional default granted to an ordinary authenticated joiner.
    pub const MEMBER_DEFAULT: AccessMode = AccessMode::JOIN
        .union(AccessMode::READ)
        .union(AccessMode::WRITE)
        .union(AccessMode::PRESENCE);

    pub fn is_joiner(self) -> bool {
        self.contains(AccessMode::JOIN)
    }
    pub fn is_reader(self) -> bool {
        self.contains(AccessMode::READ)
    }
    pub fn is_writer(self) -> bool {
        self.contains(AccessMode::WRITE)
    }
    pub fn is_presencer(self) -> bool {
        self.contains(AccessMode::PRESENCE)
    }
    pub fn is_approver(self) -> bool {
        self.contains(AccessMode::APPROVE)
    }
    pub fn is_sharer(self) -> bool {
        self.contains(AccessMode::SHARE)
    }
    pub fn is_deleter(self) -> bool {
        self.contains(AccessMode::DELETE)
    }
    pub fn is_owner(self) -> bool {
        self.contains(AccessMode::OWNER)
    }

    /// Letter encoding used on the wire, e.g. "JRWPS". Order is fixed:
    /// J R W P A S D O.
    pub fn to_letters(self) -> String {
        const LETTERS: [(AccessMode, char); 8] = [
            (AccessMode::JOIN, 'J'),
            (AccessMode::READ, 'R'),
            (AccessMode::WRITE, 'W'),
            (AccessMode::PRESENCE, 'P'),
            (AccessMode::APPROVE, 'A'),
            (AccessMode::SHARE, 'S'),
            (AccessMode::DELETE, 'D'),
            (AccessMode::OWNER, 'O'),
        ];
        let mut out = String::with_capacity(8);
        for (bit, ch) in LETTERS {
            if self.contains(bit) {
                out.push(ch);
            }
        }
        if out.is_empty() {
            out.push('N');
        }
        out
    }
}

impl FromStr for AccessMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "N" {
            return Ok(AccessMode::empty());
        }
        let mut mode = AccessMode::empty();
        for ch in s.chars() {
            let bit = match ch.to_ascii_uppercase() {
                'J' => AccessMode::JOIN,
                'R' => AccessMode::READ,
                'W' => AccessMode::WRITE,
                'P' => AccessMode::PRESENCE,
                'A' => AccessMode::APPROVE,
                'S' => AccessMode::SHARE,
                'D' => AccessMode::DELETE,
                'O' => AccessMode::OWNER,
                other => return Err(ModeParseError(other)),
            };
            mode |= bit;
        }
        Ok(mode)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_letters())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeParseError(char);

impl fmt::Display for ModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized access mode letter '{}'", self.0)
    }
}

impl std::error::Error for ModeParseError {}

impl Serialize for AccessMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_letters())
    }
}

impl<'de> Deserialize<'de> for AccessMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AccessMode::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// The three layers that combine to produce a subscription's access, per
/// the negotiation rules: `modeGiven = override ?? default`, and the
/// effective mode actually enforced is `modeWant & modeGiven`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePair {
    pub want: AccessMode,
    pub given: AccessMode,
}

impl ModePair {
    pub fn new(want: AccessMode, given: AccessMode) -> Self {
        Self { want, given }
    }

    /// The mode that actually gates operations: the intersection of what
    /// the user asked for and what the topic granted.
    pub fn effective(&self) -> AccessMode {
        self.want & self.given
    }

    /// True if `want` asks for bits that `given` does not supply, i.e. an
    /// invitation to an approver is warranted.
    pub fn needs_approval(&self) -> bool {
        !self.want.difference(self.given).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_mode_is_intersection() {
        let pair = ModePair::new(
            AccessMode::JOIN | AccessMode::READ | AccessMode::WRITE,
            AccessMode::JOIN | AccessMode::READ,
        );
        assert_eq!(pair.effective(), AccessMode::JOIN | AccessMode::READ);
        assert!(pair.needs_approval());
    }

    #[test]
    fn letters_round_trip() {
        let mode = AccessMode::JOIN | AccessMode::READ | AccessMode::WRITE | AccessMode::PRESENCE;
        let letters = mode.to_letters();
        assert_eq!(letters, "JRWP");
        assert_eq!(AccessMode::from_str(&letters).unwrap(), mode);
    }

    #[test]
    fn empty_mode_renders_as_n() {
        assert_eq!(AccessMode::empty().to_letters(), "N");
        assert_eq!(AccessMode::from_str("N").unwrap(), AccessMode::empty());
    }

    #[test]
    fn owner_default_has_every_bit() {
        assert!(AccessMode::OWNER_DEFAULT.is_owner());
        assert!(AccessMode::OWNER_DEFAULT.is_deleter());
        assert!(AccessMode::OWNER_DEFAULT.is_sharer());
    }
}
